//! Storage adapter trait and implementations for the OCash SDK.
//!
//! Defines the `StorageAdapter` trait that all storage backends must implement.
//! Provides a `MemoryStore` reference backend for testing and ephemeral use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ocash_types::{Hex, Result};

pub mod memory;

/// Sync cursor tracking progress per chain.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncCursor {
    pub memo: u64,
    pub nullifier: u64,
    pub merkle: u64,
}

/// A UTXO record stored in the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub chain_id: u64,
    pub asset_id: String,
    pub amount: String, // hex-encoded BigUint
    pub commitment: Hex,
    pub nullifier: Hex,
    pub mk_index: u64,
    pub is_frozen: bool,
    pub is_spent: bool,
    pub memo: Option<Hex>,
    pub created_at: Option<u64>,
}

/// Query for listing UTXOs. `limit`/`offset` page the result; `None` limit
/// means unbounded.
#[derive(Debug, Clone, Default)]
pub struct ListUtxosQuery {
    pub chain_id: Option<u64>,
    pub asset_id: Option<String>,
    pub spent: Option<bool>,
    pub frozen: Option<bool>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// A mirrored entry-service memo row, kept for re-sync without re-fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMemoRecord {
    pub chain_id: u64,
    pub cid: u64,
    pub memo: Hex,
    pub block_number: u64,
}

/// A mirrored entry-service nullifier row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryNullifierRecord {
    pub chain_id: u64,
    pub nullifier: Hex,
    pub block_number: u64,
}

/// Merkle node record for local proof generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleNodeRecord {
    pub chain_id: u64,
    pub id: String,
    pub level: u32,
    pub position: u64,
    pub hash: Hex,
}

/// Merkle tree state metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTreeState {
    pub chain_id: u64,
    pub root: Hex,
    pub total_elements: u64,
    pub last_updated: u64,
}

/// A single merkle leaf, keyed by its contiguous index (cid).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleLeafRecord {
    pub chain_id: u64,
    pub cid: u64,
    pub commitment: Hex,
}

/// Sort order for `list_operations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Desc
    }
}

/// Stored operation (transaction history) row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOperation {
    pub id: String,
    pub chain_id: u64,
    pub op_type: String,
    pub status: String,
    pub tx_hash: Option<Hex>,
    pub created_at: u64,
    pub updated_at: u64,
    pub data: serde_json::Value,
}

/// A partial update applied to an existing [`StoredOperation`] by
/// `update_operation`. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationPatch {
    pub status: Option<String>,
    pub tx_hash: Option<Hex>,
    pub data: Option<serde_json::Value>,
    pub updated_at: u64,
}

/// Query for listing operations.
#[derive(Debug, Clone, Default)]
pub struct ListOperationsQuery {
    pub chain_id: Option<u64>,
    pub op_type: Option<String>,
    pub status: Option<String>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Bounded retention policy applied after `create_operation`: once the log
/// for a chain exceeds `max_rows`, the oldest rows (by `created_at`) are
/// pruned until it fits.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_rows: usize,
}

/// The core storage adapter trait.
///
/// All methods are async to support both in-memory and persistent backends.
/// Implementations must be crash-safe for cursor and operation rows (durable
/// before the call returns) and idempotent under repeated `upsert_utxos`
/// (deduped by `(chain_id, commitment)`).
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    // --- Lifecycle ---
    async fn init(&self, _wallet_id: &str) -> Result<()> {
        Ok(())
    }
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    // --- Sync Cursors ---
    async fn get_sync_cursor(&self, chain_id: u64) -> Result<Option<SyncCursor>>;
    async fn set_sync_cursor(&self, chain_id: u64, cursor: &SyncCursor) -> Result<()>;

    // --- UTXO Management ---
    async fn upsert_utxos(&self, utxos: &[UtxoRecord]) -> Result<()>;
    async fn list_utxos(&self, query: &ListUtxosQuery) -> Result<Vec<UtxoRecord>>;
    async fn mark_spent(&self, chain_id: u64, nullifiers: &[Hex]) -> Result<u64>;

    // --- Entry mirror (optional) ---
    async fn list_entry_memos(&self, _chain_id: u64, _from_cid: u64) -> Result<Vec<EntryMemoRecord>> {
        Ok(Vec::new())
    }
    async fn list_entry_nullifiers(&self, _chain_id: u64, _from_block: u64) -> Result<Vec<EntryNullifierRecord>> {
        Ok(Vec::new())
    }

    // --- Merkle tree state (optional for local/hybrid mode) ---
    async fn get_merkle_tree(&self, _chain_id: u64) -> Result<Option<MerkleTreeState>> {
        Ok(None)
    }
    async fn set_merkle_tree(&self, _chain_id: u64, _tree: &MerkleTreeState) -> Result<()> {
        Ok(())
    }
    async fn upsert_merkle_nodes(&self, _chain_id: u64, _nodes: &[MerkleNodeRecord]) -> Result<()> {
        Ok(())
    }
    async fn get_merkle_node(&self, _chain_id: u64, _id: &str) -> Result<Option<MerkleNodeRecord>> {
        Ok(None)
    }

    // --- Merkle leaves (optional, for local proof generation) ---
    async fn append_merkle_leaves(&self, _chain_id: u64, _leaves: &[MerkleLeafRecord]) -> Result<()> {
        Ok(())
    }
    async fn get_merkle_leaves(&self, _chain_id: u64, _from_cid: u64) -> Result<Vec<MerkleLeafRecord>> {
        Ok(Vec::new())
    }
    async fn clear_merkle_leaves(&self, _chain_id: u64) -> Result<()> {
        Ok(())
    }

    // --- Operation log ---
    async fn create_operation(&self, op: &StoredOperation) -> Result<()>;
    async fn update_operation(&self, id: &str, patch: &OperationPatch) -> Result<Option<StoredOperation>>;
    async fn list_operations(&self, query: &ListOperationsQuery) -> Result<Vec<StoredOperation>>;

    /// Apply a bounded retention policy to a chain's operation log,
    /// pruning the oldest rows past `policy.max_rows`. Backends that do not
    /// support retention may no-op.
    async fn prune_operations(&self, _chain_id: u64, _policy: RetentionPolicy) -> Result<u64> {
        Ok(0)
    }
}
