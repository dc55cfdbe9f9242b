//! Wallet/UTXO state machine.
//!
//! Owns the session lifecycle (`closed -> open(seed, nonce?) -> closed`),
//! the in-memory pool registry derived from chain configuration, and the
//! `apply_memos` decode pipeline that turns encrypted entry-service rows
//! into `UtxoRecord`s in the storage adapter.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use ark_bn254::Fr;
use num_bigint::BigUint;
use tokio::sync::RwLock;

use ocash_config::ChainConfig;
use ocash_crypto::{commitment, memo, nullifier};
use ocash_store::{ListUtxosQuery, StorageAdapter, UtxoRecord};
use ocash_types::bigint::{biguint_to_field, field_to_biguint};
use ocash_types::{field_to_hex, hex_to_field, Hex, OcashError, Result};

/// A single row fed to `apply_memos`, shaped like the decoded fields of an
/// entry-service `EntryMemo`.
#[derive(Debug, Clone)]
pub struct IncomingMemo {
    pub cid: u64,
    pub commitment: Hex,
    pub memo: Hex,
}

/// Source of the `(chain_id, pool_id) -> (asset_id, viewer_pk, freezer_pk)`
/// registry. A thin trait so the wallet can "refresh the registry once and
/// retry" on an unknown pool id without caring whether the source is a
/// static config, a hot-reloaded file, or a remote fetch.
pub trait AssetRegistryProvider: Send + Sync {
    fn chains(&self) -> Vec<ChainConfig>;
}

/// A registry backed by a fixed, already-loaded set of chains.
pub struct StaticRegistry(Vec<ChainConfig>);

impl StaticRegistry {
    pub fn new(chains: Vec<ChainConfig>) -> Self {
        Self(chains)
    }
}

impl AssetRegistryProvider for StaticRegistry {
    fn chains(&self) -> Vec<ChainConfig> {
        self.0.clone()
    }
}

/// A resolved pool entry: the real token id and the viewer/freezer keys
/// that back it.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub asset_id: String,
    pub viewer_pk: (Fr, Fr),
    pub freezer_pk: (Fr, Fr),
}

/// Outcome of a call to `apply_memos`.
#[derive(Debug, Clone, Default)]
pub struct ApplyMemosSummary {
    pub decoded: u64,
    pub skipped: u64,
    pub stored: u64,
}

/// Events the wallet emits for observing hosts (e.g. the `ocash-ops` event
/// bus). Matches the `wallet:utxo:update` named kind from the SDK's typed
/// event taxonomy.
#[derive(Debug, Clone)]
pub enum WalletEvent {
    UtxoUpdate { chain_id: u64, summary: ApplyMemosSummary },
}

pub type WalletEventHandler = Box<dyn Fn(WalletEvent) + Send + Sync>;

struct OpenSession {
    secret_key: Fr,
    public_key: (Fr, Fr),
    pool_map: HashMap<(u64, String), PoolEntry>,
}

enum SessionState {
    Closed,
    Open(OpenSession),
}

/// The wallet: a session state machine plus the UTXO decode pipeline.
pub struct Wallet {
    state: RwLock<SessionState>,
    store: Arc<dyn StorageAdapter>,
    registry: Arc<dyn AssetRegistryProvider>,
    on_event: Option<WalletEventHandler>,
}

impl Wallet {
    pub fn new(
        store: Arc<dyn StorageAdapter>,
        registry: Arc<dyn AssetRegistryProvider>,
        on_event: Option<WalletEventHandler>,
    ) -> Self {
        Self {
            state: RwLock::new(SessionState::Closed),
            store,
            registry,
            on_event,
        }
    }

    fn emit(&self, event: WalletEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    /// Open a session: derive the keypair, build the pool map, and
    /// initialise the storage adapter with `wallet_id = address`.
    pub async fn open(&self, seed: &str, nonce: Option<&str>) -> Result<Hex> {
        let mut state = self.state.write().await;
        if let SessionState::Open(_) = *state {
            return Err(OcashError::Other("wallet session is already open".into()));
        }

        let (secret_key, public_key) = ocash_crypto::keys::derive_key_pair(seed, nonce)?;
        let pool_map = build_pool_map(&self.registry.chains())?;
        let address = viewing_address(&public_key)?;

        self.store.init(&address).await?;

        *state = SessionState::Open(OpenSession {
            secret_key,
            public_key,
            pool_map,
        });

        Ok(address)
    }

    /// Close the session, dropping secret references.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        *state = SessionState::Closed;
        self.store.close().await
    }

    pub async fn is_open(&self) -> bool {
        matches!(*self.state.read().await, SessionState::Open(_))
    }

    pub async fn viewing_address(&self) -> Result<Hex> {
        let state = self.state.read().await;
        match &*state {
            SessionState::Open(session) => viewing_address(&session.public_key),
            SessionState::Closed => Err(OcashError::Other("wallet session is closed".into())),
        }
    }

    /// Decode a batch of entry-service memos for `chain_id`, store the
    /// resulting UTXOs, and return a summary. Follows the six-step
    /// algorithm: invalid-cid skip, owner decode + commitment
    /// re-verification, pool lookup with a one-shot registry refresh,
    /// nullifier derivation, record construction, in-batch dedup + upsert.
    pub async fn apply_memos(&self, chain_id: u64, memos: &[IncomingMemo]) -> Result<ApplyMemosSummary> {
        let mut state = self.state.write().await;
        let session = match &mut *state {
            SessionState::Open(session) => session,
            SessionState::Closed => return Err(OcashError::Other("wallet session is closed".into())),
        };

        let mut summary = ApplyMemosSummary::default();
        let mut rows: Vec<UtxoRecord> = Vec::new();
        let mut refreshed_once = false;

        for entry in memos {
            // Step 1: ignore entries whose cid/commitment/memo are not
            // well-formed before attempting decryption.
            if hex_to_field(&entry.commitment).is_err() {
                summary.skipped += 1;
                continue;
            }

            // Step 2: owner decode + byte-for-byte commitment re-verification.
            let opening = match memo::decrypt_memo(&session.secret_key, &entry.memo)? {
                Some(ro) => ro,
                None => {
                    summary.skipped += 1;
                    continue;
                }
            };
            let recomputed = commitment::compute(&opening)?;
            if !hex_eq(&field_to_hex(&recomputed), &entry.commitment) {
                summary.skipped += 1;
                continue;
            }
            summary.decoded += 1;

            // Step 3: resolve the pool id the opening's asset_id field
            // actually encodes, refreshing the registry once if unknown.
            let pool_key = (chain_id, field_to_hex(&opening.asset_id));
            let pool_entry = match session.pool_map.get(&pool_key) {
                Some(entry) => entry.clone(),
                None if !refreshed_once => {
                    refreshed_once = true;
                    session.pool_map = build_pool_map(&self.registry.chains())?;
                    match session.pool_map.get(&pool_key) {
                        Some(entry) => entry.clone(),
                        None => {
                            summary.skipped += 1;
                            continue;
                        }
                    }
                }
                None => {
                    summary.skipped += 1;
                    continue;
                }
            };

            // Step 4: nullifier.
            let null = nullifier::compute(&session.secret_key, &recomputed, Some(pool_entry.freezer_pk))?;

            // Step 5: build the row.
            rows.push(UtxoRecord {
                chain_id,
                asset_id: pool_entry.asset_id,
                amount: ocash_types::bigint::biguint_to_hex(&field_to_biguint(&opening.asset_amount)),
                commitment: field_to_hex(&recomputed),
                nullifier: field_to_hex(&null),
                mk_index: entry.cid,
                is_frozen: opening.is_frozen,
                is_spent: false,
                memo: Some(entry.memo.clone()),
                created_at: None,
            });
        }

        // Step 6: dedupe within the batch by (chain_id, commitment); last
        // write for a given commitment wins.
        let mut deduped: HashMap<Hex, UtxoRecord> = HashMap::new();
        for row in rows {
            deduped.insert(row.commitment.clone(), row);
        }
        let final_rows: Vec<UtxoRecord> = deduped.into_values().collect();
        summary.stored = final_rows.len() as u64;

        if !final_rows.is_empty() {
            self.store.upsert_utxos(&final_rows).await?;
        }

        tracing::debug!(
            chain_id,
            decoded = summary.decoded,
            skipped = summary.skipped,
            stored = summary.stored,
            "applied memo batch"
        );

        self.emit(WalletEvent::UtxoUpdate {
            chain_id,
            summary: summary.clone(),
        });

        Ok(summary)
    }

    /// Mark UTXOs as spent from a nullifier-resource sync pass.
    pub async fn mark_spent(&self, chain_id: u64, nullifiers: &[Hex]) -> Result<u64> {
        if !self.is_open().await {
            return Err(OcashError::Other("wallet session is closed".into()));
        }
        let count = self.store.mark_spent(chain_id, nullifiers).await?;
        tracing::debug!(chain_id, count, "marked nullifiers spent");
        Ok(count)
    }

    /// Sum of `amount` over unspent, unfrozen UTXOs for `(chain_id, asset_id)`.
    pub async fn balance(&self, chain_id: u64, asset_id: &str) -> Result<BigUint> {
        let rows = self
            .store
            .list_utxos(&ListUtxosQuery {
                chain_id: Some(chain_id),
                asset_id: Some(asset_id.to_string()),
                spent: Some(false),
                frozen: Some(false),
                ..Default::default()
            })
            .await?;

        let mut total = BigUint::from(0u32);
        for row in rows {
            total += ocash_types::bigint::hex_to_biguint(&row.amount)?;
        }
        Ok(total)
    }
}

fn hex_eq(a: &str, b: &str) -> bool {
    a.trim_start_matches("0x").eq_ignore_ascii_case(b.trim_start_matches("0x"))
}

fn viewing_address(public_key: &(Fr, Fr)) -> Result<Hex> {
    let compressed = ocash_crypto::babyjubjub::compress_point(&public_key.0, &public_key.1)?;
    Ok(format!("0x{}", hex::encode(compressed)))
}

fn decimal_to_field(s: &str) -> Result<Fr> {
    let n = BigUint::from_str(s).map_err(|e| OcashError::Other(format!("invalid decimal field element: {e}")))?;
    Ok(biguint_to_field(&n))
}

fn build_pool_map(chains: &[ChainConfig]) -> Result<HashMap<(u64, String), PoolEntry>> {
    let mut map = HashMap::new();
    for chain in chains {
        for token in &chain.tokens {
            let token_addr = decimal_to_field(&token.id)?;
            let viewer_pk = (decimal_to_field(&token.viewer_pk.0)?, decimal_to_field(&token.viewer_pk.1)?);
            let freezer_pk = (decimal_to_field(&token.freezer_pk.0)?, decimal_to_field(&token.freezer_pk.1)?);

            let pool_id = commitment::pool_id(&token_addr, (&viewer_pk.0, &viewer_pk.1), (&freezer_pk.0, &freezer_pk.1));
            map.insert(
                (chain.chain_id, field_to_hex(&pool_id)),
                PoolEntry {
                    asset_id: token.id.clone(),
                    viewer_pk,
                    freezer_pk,
                },
            );
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocash_config::TokenConfig;
    use ocash_store::memory::MemoryStore;

    fn test_chain(chain_id: u64, viewer_sk: Fr, freezer_pk: (Fr, Fr)) -> (ChainConfig, (Fr, Fr)) {
        let viewer_pk = ocash_crypto::babyjubjub::scalar_mult(&viewer_sk);
        let chain = ChainConfig {
            chain_id,
            rpc_url: None,
            entry_url: None,
            relayer_url: None,
            merkle_proof_url: None,
            contract_address: None,
            tokens: vec![TokenConfig {
                id: "7".into(),
                symbol: "TEST".into(),
                decimals: 18,
                wrapped_erc20: "0xabc".into(),
                viewer_pk: (field_to_biguint(&viewer_pk.0).to_string(), field_to_biguint(&viewer_pk.1).to_string()),
                freezer_pk: (field_to_biguint(&freezer_pk.0).to_string(), field_to_biguint(&freezer_pk.1).to_string()),
                deposit_fee_bps: None,
                withdraw_fee_bps: None,
                transfer_max_amount: None,
                withdraw_max_amount: None,
            }],
        };
        (chain, viewer_pk)
    }

    #[tokio::test]
    async fn open_then_apply_memos_then_close_roundtrips_a_utxo() {
        let store: Arc<dyn StorageAdapter> = Arc::new(MemoryStore::new());
        let (owner_sk, owner_pk) = ocash_crypto::keys::derive_key_pair("a reasonably long test seed", None).unwrap();
        let freezer_pk = ocash_crypto::babyjubjub::identity();
        let (chain, _viewer_pk) = test_chain(1, owner_sk, freezer_pk);

        let registry: Arc<dyn AssetRegistryProvider> = Arc::new(StaticRegistry::new(vec![chain.clone()]));
        let wallet = Wallet::new(store.clone(), registry, None);

        assert!(!wallet.is_open().await);
        let address = wallet.open("a reasonably long test seed", None).await.unwrap();
        assert!(wallet.is_open().await);
        assert!(address.starts_with("0x"));

        let token_addr = decimal_to_field(&chain.tokens[0].id).unwrap();
        let pool_id = commitment::pool_id(&token_addr, (&owner_pk.0, &owner_pk.1), (&freezer_pk.0, &freezer_pk.1));

        let ro = ocash_crypto::record::RecordOpening {
            asset_id: pool_id,
            asset_amount: Fr::from(500u64),
            user_pk: owner_pk,
            blinding_factor: Fr::from(9u64),
            is_frozen: false,
        };
        let memo_hex = memo::create_memo(&ro).unwrap();
        let cm_hex = field_to_hex(&commitment::compute(&ro).unwrap());

        let summary = wallet
            .apply_memos(
                1,
                &[IncomingMemo {
                    cid: 0,
                    commitment: cm_hex,
                    memo: memo_hex,
                }],
            )
            .await
            .unwrap();
        assert_eq!(summary.decoded, 1);
        assert_eq!(summary.stored, 1);
        assert_eq!(summary.skipped, 0);

        let balance = wallet.balance(1, &chain.tokens[0].id).await.unwrap();
        assert_eq!(balance, BigUint::from(500u32));

        wallet.close().await.unwrap();
        assert!(!wallet.is_open().await);
    }

    #[tokio::test]
    async fn apply_memos_requires_an_open_session() {
        let store: Arc<dyn StorageAdapter> = Arc::new(MemoryStore::new());
        let registry: Arc<dyn AssetRegistryProvider> = Arc::new(StaticRegistry::new(vec![]));
        let wallet = Wallet::new(store, registry, None);

        let result = wallet.apply_memos(1, &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn malformed_commitment_hex_is_skipped() {
        let store: Arc<dyn StorageAdapter> = Arc::new(MemoryStore::new());
        let registry: Arc<dyn AssetRegistryProvider> = Arc::new(StaticRegistry::new(vec![]));
        let wallet = Wallet::new(store, registry, None);
        wallet.open("a reasonably long test seed", None).await.unwrap();

        let summary = wallet
            .apply_memos(
                1,
                &[IncomingMemo {
                    cid: 0,
                    commitment: "not-hex".into(),
                    memo: "0x00".into(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.stored, 0);
    }

    #[tokio::test]
    async fn memo_for_a_different_recipient_is_skipped() {
        let store: Arc<dyn StorageAdapter> = Arc::new(MemoryStore::new());
        let (_owner_sk, owner_pk) = ocash_crypto::keys::derive_key_pair("a reasonably long test seed", None).unwrap();
        let ro = ocash_crypto::record::RecordOpening {
            asset_id: Fr::from(1u64),
            asset_amount: Fr::from(500u64),
            user_pk: owner_pk,
            blinding_factor: Fr::from(9u64),
            is_frozen: false,
        };
        let memo_hex = memo::create_memo(&ro).unwrap();
        let cm_hex = field_to_hex(&commitment::compute(&ro).unwrap());

        let registry: Arc<dyn AssetRegistryProvider> = Arc::new(StaticRegistry::new(vec![]));
        let wallet = Wallet::new(store, registry, None);
        wallet.open("a completely different seed!!", None).await.unwrap();

        let summary = wallet
            .apply_memos(1, &[IncomingMemo { cid: 0, commitment: cm_hex, memo: memo_hex }])
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.decoded, 0);
    }
}
