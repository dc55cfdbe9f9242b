//! Relayer request shapes and client.
//!
//! - Build transfer/burn request bodies
//! - Submit to the relayer service
//! - Poll for the underlying EVM transaction hash
//! - Fetch (and cache) the relayer's fee configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ocash_types::Hex;

pub mod relayer_client;

pub use relayer_client::CancelToken;

/// A transfer submission to `POST /api/v1/transfer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub proof: serde_json::Value,
    pub input: serde_json::Value,
    pub extra_data: [Hex; 3],
    pub merkle_root_index: u64,
    pub array_hash_index: u64,
    pub relayer: Hex,
    pub flatten_input: serde_json::Value,
}

/// A withdraw (burn) submission to `POST /api/v1/burn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnRequest {
    pub proof: serde_json::Value,
    pub input: serde_json::Value,
    pub extra_data: Hex,
    pub recipient_address: Hex,
    /// Decimal string, matching the wire convention for amount fields here.
    pub relayer_fee: String,
    pub gas_drop_value: String,
    pub burn_amount: String,
    pub merkle_root_index: u64,
    pub array_hash_index: u64,
    pub relayer: Hex,
    pub flatten_input: serde_json::Value,
}

/// Either relayer submission, dispatched to the matching endpoint.
#[derive(Debug, Clone)]
pub enum RelayerRequest {
    Transfer(TransferRequest),
    Burn(BurnRequest),
}

/// The relayer's chain identity and per-pool fee schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    pub config: RelayerIdentity,
    pub fee_configure: FeeConfigure,
    pub fetched_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerIdentity {
    pub relayer_address: Hex,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfigure {
    pub valid_time: u64,
    /// Keyed by the 32-byte big-endian zero-padded hex of the pool id.
    pub transfer: HashMap<String, PoolFee>,
    pub withdraw: HashMap<String, PoolFee>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolFee {
    pub fee: String,
}
