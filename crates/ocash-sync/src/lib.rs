//! Sync engine for incremental memo/nullifier synchronization with the Entry service.
//!
//! Resources synced:
//! - `memo`: Encrypted UTXO commitments (cid-indexed, contiguous), decoded
//!   through the wallet's `apply_memos` pipeline.
//! - `nullifier`: Spent UTXO markers (nid-indexed by block order), applied
//!   through the wallet's `mark_spent`.

pub mod entry_client;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use entry_client::EntryClient;
use ocash_store::{StorageAdapter, SyncCursor};
use ocash_types::{Hex, OcashError, Result};
use ocash_wallet::{IncomingMemo, Wallet};

const DEFAULT_POLL_MS: u64 = 15_000;

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub page_size: u64,
    pub poll_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            poll_ms: DEFAULT_POLL_MS,
            request_timeout_ms: 20_000,
        }
    }
}

/// Coerce a caller-supplied poll interval (which may arrive as a `NaN` or
/// non-finite value from an untyped config source) to a usable millisecond
/// duration, falling back to the default interval.
pub fn coerce_poll_ms(poll_ms: f64) -> u64 {
    if !poll_ms.is_finite() || poll_ms <= 0.0 {
        DEFAULT_POLL_MS
    } else {
        poll_ms as u64
    }
}

/// The two resources synced per chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Memo,
    Nullifier,
}

impl Resource {
    fn as_str(&self) -> &'static str {
        match self {
            Resource::Memo => "memo",
            Resource::Nullifier => "nullifier",
        }
    }
}

/// Status of a single (chain, resource) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Idle,
    Running,
    Error(String),
}

/// Sync status for a single chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncChainStatus {
    pub chain_id: u64,
    pub memo_cursor: u64,
    pub nullifier_cursor: u64,
    pub merkle_cursor: u64,
    pub memo_status: ResourceStatus,
    pub nullifier_status: ResourceStatus,
}

/// Chain configuration for syncing.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub entry_url: String,
    pub contract_address: String,
}

/// Sync event for progress reporting.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Start { chain_id: u64 },
    Progress { chain_id: u64, resource: String, downloaded: u64 },
    Done { chain_id: u64, cursor: SyncCursor },
    Error { chain_id: u64, resource: String, message: String },
}

/// Callback type for sync events.
pub type SyncEventHandler = Box<dyn Fn(SyncEvent) + Send + Sync>;

/// Options for a single `sync_once` pass.
#[derive(Debug, Clone, Default)]
pub struct SyncOnceOptions {
    pub chain_ids: Option<Vec<u64>>,
    pub resources: Option<Vec<Resource>>,
    pub continue_on_error: bool,
}

/// Options for the scheduled background loop started by `start`.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub chain_ids: Option<Vec<u64>>,
    pub poll_ms: f64,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self { chain_ids: None, poll_ms: DEFAULT_POLL_MS as f64 }
    }
}

struct ChainRuntime {
    config: ChainConfig,
    // Per-resource status, guarded independently so a memo error doesn't
    // block the nullifier tick from reporting its own state.
    memo_status: AsyncMutex<ResourceStatus>,
    nullifier_status: AsyncMutex<ResourceStatus>,
    // Held for the duration of a tick; a scheduled loop that finds this
    // locked skips the chain rather than queuing up overlapping ticks.
    ticking: AsyncMutex<()>,
}

/// The sync engine orchestrates incremental syncing across chains.
pub struct SyncEngine {
    config: SyncConfig,
    chains: Vec<Arc<ChainRuntime>>,
    store: Arc<dyn StorageAdapter>,
    wallet: Arc<Wallet>,
    on_event: Option<SyncEventHandler>,
    loop_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        chains: Vec<ChainConfig>,
        store: Arc<dyn StorageAdapter>,
        wallet: Arc<Wallet>,
        on_event: Option<SyncEventHandler>,
    ) -> Self {
        let chains = chains
            .into_iter()
            .map(|config| {
                Arc::new(ChainRuntime {
                    config,
                    memo_status: AsyncMutex::new(ResourceStatus::Idle),
                    nullifier_status: AsyncMutex::new(ResourceStatus::Idle),
                    ticking: AsyncMutex::new(()),
                })
            })
            .collect();
        Self {
            config,
            chains,
            store,
            wallet,
            on_event,
            loop_handle: AsyncMutex::new(None),
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(ref handler) = self.on_event {
            handler(event);
        }
    }

    /// Run a single sync pass across the requested (or all) chains and
    /// resources. Returns an error immediately on the first stage failure
    /// unless `continue_on_error` is set, in which case other chains and
    /// resources still run and the error is only surfaced via events.
    pub async fn sync_once(&self, options: &SyncOnceOptions) -> Result<()> {
        let resources = options
            .resources
            .clone()
            .unwrap_or_else(|| vec![Resource::Memo, Resource::Nullifier]);

        for runtime in &self.chains {
            if let Some(ref ids) = options.chain_ids {
                if !ids.contains(&runtime.config.chain_id) {
                    continue;
                }
            }

            // Re-entrancy guard: a tick already in flight for this chain
            // means this pass skips it rather than racing.
            let guard = match runtime.ticking.try_lock() {
                Ok(guard) => guard,
                Err(_) => continue,
            };

            if let Err(err) = self.sync_chain(runtime, &resources, options.continue_on_error).await {
                drop(guard);
                if !options.continue_on_error {
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    async fn sync_chain(
        &self,
        runtime: &Arc<ChainRuntime>,
        resources: &[Resource],
        continue_on_error: bool,
    ) -> Result<()> {
        let chain = &runtime.config;
        self.emit(SyncEvent::Start { chain_id: chain.chain_id });

        let mut cursor = self.store.get_sync_cursor(chain.chain_id).await?.unwrap_or_default();
        let client = EntryClient::new(&chain.entry_url, Some(self.config.request_timeout_ms));

        let mut first_err = None;

        if resources.contains(&Resource::Memo) {
            *runtime.memo_status.lock().await = ResourceStatus::Running;
            match self.sync_memos(&client, chain, &mut cursor).await {
                Ok(_) => *runtime.memo_status.lock().await = ResourceStatus::Idle,
                Err(err) => {
                    *runtime.memo_status.lock().await = ResourceStatus::Error(err.to_string());
                    self.emit(SyncEvent::Error {
                        chain_id: chain.chain_id,
                        resource: Resource::Memo.as_str().into(),
                        message: err.to_string(),
                    });
                    if !continue_on_error {
                        self.store.set_sync_cursor(chain.chain_id, &cursor).await?;
                        return Err(err);
                    }
                    first_err.get_or_insert(err);
                }
            }
        }

        if resources.contains(&Resource::Nullifier) {
            *runtime.nullifier_status.lock().await = ResourceStatus::Running;
            match self.sync_nullifiers(&client, chain, &mut cursor).await {
                Ok(_) => *runtime.nullifier_status.lock().await = ResourceStatus::Idle,
                Err(err) => {
                    *runtime.nullifier_status.lock().await = ResourceStatus::Error(err.to_string());
                    self.emit(SyncEvent::Error {
                        chain_id: chain.chain_id,
                        resource: Resource::Nullifier.as_str().into(),
                        message: err.to_string(),
                    });
                    if !continue_on_error {
                        self.store.set_sync_cursor(chain.chain_id, &cursor).await?;
                        return Err(err);
                    }
                    first_err.get_or_insert(err);
                }
            }
        }

        // Cursor only advances past stages that actually succeeded; a
        // failed stage leaves its half of the cursor untouched so the next
        // pass resumes from the same point.
        self.store.set_sync_cursor(chain.chain_id, &cursor).await?;

        self.emit(SyncEvent::Done { chain_id: chain.chain_id, cursor: cursor.clone() });

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Sync memos incrementally, page by page, decoding each page through
    /// the wallet.
    async fn sync_memos(
        &self,
        client: &EntryClient,
        chain: &ChainConfig,
        cursor: &mut SyncCursor,
    ) -> Result<u64> {
        let mut total_downloaded = 0u64;

        loop {
            let result = client
                .list_memos(chain.chain_id, &chain.contract_address, cursor.memo, self.config.page_size)
                .await?;

            if result.items.is_empty() {
                break;
            }

            for (i, memo) in result.items.iter().enumerate() {
                let expected_cid = cursor.memo + i as u64;
                if memo.cid != expected_cid {
                    return Err(OcashError::Other(format!(
                        "non-contiguous memo cids: expected {}, got {}",
                        expected_cid, memo.cid
                    )));
                }
            }

            let incoming: Vec<IncomingMemo> = result
                .items
                .iter()
                .map(|m| IncomingMemo { cid: m.cid, commitment: m.commitment.clone(), memo: m.memo.clone() })
                .collect();

            self.wallet.apply_memos(chain.chain_id, &incoming).await?;

            let count = result.items.len() as u64;
            total_downloaded += count;
            cursor.memo += count;

            self.emit(SyncEvent::Progress {
                chain_id: chain.chain_id,
                resource: Resource::Memo.as_str().into(),
                downloaded: total_downloaded,
            });

            if count < self.config.page_size {
                break;
            }
        }

        Ok(total_downloaded)
    }

    /// Sync nullifiers incrementally, page by page. Stops early, without
    /// erroring, if the entry service reports the page as not yet `ready`.
    async fn sync_nullifiers(
        &self,
        client: &EntryClient,
        chain: &ChainConfig,
        cursor: &mut SyncCursor,
    ) -> Result<u64> {
        let mut total_downloaded = 0u64;

        loop {
            let result = client
                .list_nullifiers_by_block(chain.chain_id, &chain.contract_address, cursor.nullifier, self.config.page_size)
                .await?;

            if result.items.is_empty() {
                break;
            }

            let nullifier_hexes: Vec<Hex> = result.items.iter().map(|n| n.nullifier.clone()).collect();
            self.wallet.mark_spent(chain.chain_id, &nullifier_hexes).await?;

            let count = result.items.len() as u64;
            total_downloaded += count;
            cursor.nullifier += count;

            self.emit(SyncEvent::Progress {
                chain_id: chain.chain_id,
                resource: Resource::Nullifier.as_str().into(),
                downloaded: total_downloaded,
            });

            if !result.ready || count < self.config.page_size {
                break;
            }
        }

        Ok(total_downloaded)
    }

    /// Start the scheduled background sync loop. Idempotent: calling
    /// `start` while already running is a no-op.
    pub async fn start(self: &Arc<Self>, options: StartOptions) {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            return;
        }

        let poll_ms = coerce_poll_ms(options.poll_ms);
        let engine = Arc::clone(self);
        let chain_ids = options.chain_ids;

        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(poll_ms));
            loop {
                interval.tick().await;
                let once_options = SyncOnceOptions {
                    chain_ids: chain_ids.clone(),
                    resources: None,
                    continue_on_error: true,
                };
                if let Err(err) = engine.sync_once(&once_options).await {
                    tracing::warn!(error = %err, "scheduled sync pass failed");
                }
            }
        }));
    }

    /// Stop the scheduled background sync loop, if running.
    pub async fn stop(&self) {
        let mut handle = self.loop_handle.lock().await;
        if let Some(join) = handle.take() {
            join.abort();
        }
    }

    /// Get the current sync status for all chains.
    pub async fn get_status(&self) -> Result<Vec<SyncChainStatus>> {
        let mut statuses = Vec::new();
        for runtime in &self.chains {
            let cursor = self.store.get_sync_cursor(runtime.config.chain_id).await?.unwrap_or_default();
            statuses.push(SyncChainStatus {
                chain_id: runtime.config.chain_id,
                memo_cursor: cursor.memo,
                nullifier_cursor: cursor.nullifier,
                merkle_cursor: cursor.merkle,
                memo_status: runtime.memo_status.lock().await.clone(),
                nullifier_status: runtime.nullifier_status.lock().await.clone(),
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_poll_ms_replaces_nan_and_non_positive_with_default() {
        assert_eq!(coerce_poll_ms(f64::NAN), DEFAULT_POLL_MS);
        assert_eq!(coerce_poll_ms(f64::INFINITY), DEFAULT_POLL_MS);
        assert_eq!(coerce_poll_ms(0.0), DEFAULT_POLL_MS);
        assert_eq!(coerce_poll_ms(-5.0), DEFAULT_POLL_MS);
    }

    #[test]
    fn coerce_poll_ms_passes_through_finite_positive_values() {
        assert_eq!(coerce_poll_ms(2500.0), 2500);
    }

    #[tokio::test]
    async fn sync_once_skips_chains_not_in_the_requested_set() {
        let store: Arc<dyn StorageAdapter> = Arc::new(ocash_store::memory::MemoryStore::new());
        let registry: Arc<dyn ocash_wallet::AssetRegistryProvider> =
            Arc::new(ocash_wallet::StaticRegistry::new(vec![]));
        let wallet = Arc::new(Wallet::new(store.clone(), registry, None));
        wallet.open("a reasonably long test seed", None).await.unwrap();

        let engine = SyncEngine::new(
            SyncConfig::default(),
            vec![ChainConfig { chain_id: 1, entry_url: "http://127.0.0.1:1".into(), contract_address: "0xabc".into() }],
            store,
            wallet,
            None,
        );

        let result = engine
            .sync_once(&SyncOnceOptions { chain_ids: Some(vec![999]), resources: None, continue_on_error: true })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_aborts_the_loop() {
        let store: Arc<dyn StorageAdapter> = Arc::new(ocash_store::memory::MemoryStore::new());
        let registry: Arc<dyn ocash_wallet::AssetRegistryProvider> =
            Arc::new(ocash_wallet::StaticRegistry::new(vec![]));
        let wallet = Arc::new(Wallet::new(store.clone(), registry, None));
        wallet.open("a reasonably long test seed", None).await.unwrap();

        let engine = Arc::new(SyncEngine::new(SyncConfig::default(), vec![], store, wallet, None));

        engine.start(StartOptions { chain_ids: None, poll_ms: 50.0 }).await;
        engine.start(StartOptions { chain_ids: None, poll_ms: 50.0 }).await;
        assert!(engine.loop_handle.lock().await.is_some());

        engine.stop().await;
        assert!(engine.loop_handle.lock().await.is_none());
    }
}
