//! In-memory storage adapter for testing and ephemeral use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::*;
use ocash_types::Result;

/// In-memory storage adapter. All writes are synchronous under a mutex, so
/// every call is durable with respect to subsequent reads the instant it
/// returns (the crash-safety requirement is trivially met: there is no
/// separate flush step to lose).
pub struct MemoryStore {
    cursors: Mutex<HashMap<u64, SyncCursor>>,
    utxos: Mutex<Vec<UtxoRecord>>,
    entry_memos: Mutex<Vec<EntryMemoRecord>>,
    entry_nullifiers: Mutex<Vec<EntryNullifierRecord>>,
    merkle_trees: Mutex<HashMap<u64, MerkleTreeState>>,
    merkle_nodes: Mutex<HashMap<(u64, String), MerkleNodeRecord>>,
    merkle_leaves: Mutex<HashMap<u64, Vec<MerkleLeafRecord>>>,
    operations: Mutex<Vec<StoredOperation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
            utxos: Mutex::new(Vec::new()),
            entry_memos: Mutex::new(Vec::new()),
            entry_nullifiers: Mutex::new(Vec::new()),
            merkle_trees: Mutex::new(HashMap::new()),
            merkle_nodes: Mutex::new(HashMap::new()),
            merkle_leaves: Mutex::new(HashMap::new()),
            operations: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStore {
    async fn get_sync_cursor(&self, chain_id: u64) -> Result<Option<SyncCursor>> {
        let cursors = self.cursors.lock().unwrap();
        Ok(cursors.get(&chain_id).cloned())
    }

    async fn set_sync_cursor(&self, chain_id: u64, cursor: &SyncCursor) -> Result<()> {
        let mut cursors = self.cursors.lock().unwrap();
        cursors.insert(chain_id, cursor.clone());
        Ok(())
    }

    async fn upsert_utxos(&self, utxos: &[UtxoRecord]) -> Result<()> {
        let mut store = self.utxos.lock().unwrap();
        for utxo in utxos {
            if let Some(existing) = store
                .iter_mut()
                .find(|u| u.chain_id == utxo.chain_id && u.commitment == utxo.commitment)
            {
                *existing = utxo.clone();
            } else {
                store.push(utxo.clone());
            }
        }
        Ok(())
    }

    async fn list_utxos(&self, query: &ListUtxosQuery) -> Result<Vec<UtxoRecord>> {
        let store = self.utxos.lock().unwrap();
        let mut filtered: Vec<UtxoRecord> = store
            .iter()
            .filter(|u| {
                if let Some(cid) = query.chain_id {
                    if u.chain_id != cid {
                        return false;
                    }
                }
                if let Some(ref aid) = query.asset_id {
                    if u.asset_id != *aid {
                        return false;
                    }
                }
                if let Some(spent) = query.spent {
                    if u.is_spent != spent {
                        return false;
                    }
                }
                if let Some(frozen) = query.frozen {
                    if u.is_frozen != frozen {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        // Stable, deterministic ordering so paging is well-defined.
        filtered.sort_by(|a, b| a.commitment.cmp(&b.commitment));

        let page = filtered.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    async fn mark_spent(&self, chain_id: u64, nullifiers: &[Hex]) -> Result<u64> {
        let mut store = self.utxos.lock().unwrap();
        let mut count = 0u64;
        for utxo in store.iter_mut() {
            if utxo.chain_id == chain_id && nullifiers.contains(&utxo.nullifier) && !utxo.is_spent {
                utxo.is_spent = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_entry_memos(&self, chain_id: u64, from_cid: u64) -> Result<Vec<EntryMemoRecord>> {
        let rows = self.entry_memos.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| r.chain_id == chain_id && r.cid >= from_cid)
            .cloned()
            .collect())
    }

    async fn list_entry_nullifiers(&self, chain_id: u64, from_block: u64) -> Result<Vec<EntryNullifierRecord>> {
        let rows = self.entry_nullifiers.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| r.chain_id == chain_id && r.block_number >= from_block)
            .cloned()
            .collect())
    }

    async fn get_merkle_tree(&self, chain_id: u64) -> Result<Option<MerkleTreeState>> {
        let trees = self.merkle_trees.lock().unwrap();
        Ok(trees.get(&chain_id).cloned())
    }

    async fn set_merkle_tree(&self, chain_id: u64, tree: &MerkleTreeState) -> Result<()> {
        let mut trees = self.merkle_trees.lock().unwrap();
        trees.insert(chain_id, tree.clone());
        Ok(())
    }

    async fn upsert_merkle_nodes(&self, chain_id: u64, nodes: &[MerkleNodeRecord]) -> Result<()> {
        let mut store = self.merkle_nodes.lock().unwrap();
        for node in nodes {
            store.insert((chain_id, node.id.clone()), node.clone());
        }
        Ok(())
    }

    async fn get_merkle_node(&self, chain_id: u64, id: &str) -> Result<Option<MerkleNodeRecord>> {
        let store = self.merkle_nodes.lock().unwrap();
        Ok(store.get(&(chain_id, id.to_string())).cloned())
    }

    async fn append_merkle_leaves(&self, chain_id: u64, leaves: &[MerkleLeafRecord]) -> Result<()> {
        let mut store = self.merkle_leaves.lock().unwrap();
        let entry = store.entry(chain_id).or_default();
        for leaf in leaves {
            if let Some(existing) = entry.iter_mut().find(|l| l.cid == leaf.cid) {
                *existing = leaf.clone();
            } else {
                entry.push(leaf.clone());
            }
        }
        entry.sort_by_key(|l| l.cid);
        Ok(())
    }

    async fn get_merkle_leaves(&self, chain_id: u64, from_cid: u64) -> Result<Vec<MerkleLeafRecord>> {
        let store = self.merkle_leaves.lock().unwrap();
        Ok(store
            .get(&chain_id)
            .map(|leaves| leaves.iter().filter(|l| l.cid >= from_cid).cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_merkle_leaves(&self, chain_id: u64) -> Result<()> {
        let mut store = self.merkle_leaves.lock().unwrap();
        store.remove(&chain_id);
        Ok(())
    }

    async fn create_operation(&self, op: &StoredOperation) -> Result<()> {
        let mut ops = self.operations.lock().unwrap();
        ops.push(op.clone());
        Ok(())
    }

    async fn update_operation(&self, id: &str, patch: &OperationPatch) -> Result<Option<StoredOperation>> {
        let mut ops = self.operations.lock().unwrap();
        let op = match ops.iter_mut().find(|o| o.id == id) {
            Some(op) => op,
            None => return Ok(None),
        };
        if let Some(ref status) = patch.status {
            op.status = status.clone();
        }
        if patch.tx_hash.is_some() {
            op.tx_hash = patch.tx_hash.clone();
        }
        if let Some(ref data) = patch.data {
            op.data = data.clone();
        }
        op.updated_at = patch.updated_at;
        Ok(Some(op.clone()))
    }

    async fn list_operations(&self, query: &ListOperationsQuery) -> Result<Vec<StoredOperation>> {
        let ops = self.operations.lock().unwrap();
        let mut filtered: Vec<StoredOperation> = ops
            .iter()
            .filter(|o| {
                if let Some(cid) = query.chain_id {
                    if o.chain_id != cid {
                        return false;
                    }
                }
                if let Some(ref t) = query.op_type {
                    if o.op_type != *t {
                        return false;
                    }
                }
                if let Some(ref s) = query.status {
                    if o.status != *s {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        filtered.sort_by_key(|o| o.created_at);
        if query.sort == SortOrder::Desc {
            filtered.reverse();
        }

        let page = filtered.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    async fn prune_operations(&self, chain_id: u64, policy: RetentionPolicy) -> Result<u64> {
        let mut ops = self.operations.lock().unwrap();
        let mut chain_indices: Vec<usize> = ops
            .iter()
            .enumerate()
            .filter(|(_, o)| o.chain_id == chain_id)
            .map(|(i, _)| i)
            .collect();
        if chain_indices.len() <= policy.max_rows {
            return Ok(0);
        }
        chain_indices.sort_by_key(|&i| ops[i].created_at);
        let to_remove = chain_indices.len() - policy.max_rows;
        let remove_set: std::collections::HashSet<usize> =
            chain_indices.into_iter().take(to_remove).collect();
        let mut removed = 0u64;
        let mut i = 0;
        ops.retain(|_| {
            let keep = !remove_set.contains(&i);
            if !keep {
                removed += 1;
            }
            i += 1;
            keep
        });
        Ok(removed)
    }
}
