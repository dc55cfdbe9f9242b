//! Root configuration model: chains, tokens, and asset-file overrides.
//!
//! Loaded from TOML (the on-disk format) or directly from an in-memory
//! value for embedding hosts that already have a config object. Field
//! shapes mirror the on-disk layout used by embedding hosts. Amount-like fields are parsed
//! as decimal strings into [`BigUint`] rather than a fixed machine integer,
//! since token amounts are field elements and can exceed 128 bits.

use std::path::Path;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid decimal bigint in config: {0}")]
    InvalidBigUint(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// A pair of decimal-string-encoded field elements (a BabyJubjub point).
pub type DecimalPoint = (String, String);

/// A single token registered on a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Decimal string of the token's field-element id.
    pub id: String,
    pub symbol: String,
    pub decimals: u8,
    pub wrapped_erc20: String,
    pub viewer_pk: DecimalPoint,
    pub freezer_pk: DecimalPoint,
    #[serde(default)]
    pub deposit_fee_bps: Option<u32>,
    #[serde(default)]
    pub withdraw_fee_bps: Option<u32>,
    #[serde(default, with = "biguint_opt_decimal")]
    pub transfer_max_amount: Option<BigUint>,
    #[serde(default, with = "biguint_opt_decimal")]
    pub withdraw_max_amount: Option<BigUint>,
}

/// A single chain's connectivity and token registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub entry_url: Option<String>,
    #[serde(default)]
    pub relayer_url: Option<String>,
    #[serde(default)]
    pub merkle_proof_url: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

/// Where to fetch a named circuit/proving-key asset from: one or more
/// URLs (tried in order) or a local filesystem path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetSource {
    Urls(Vec<String>),
    LocalPath(String),
}

/// Root configuration: every chain the SDK can talk to, plus asset-file
/// overrides consumed by the proof bridge.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RootConfig {
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub assets: std::collections::HashMap<String, AssetSource>,
}

impl RootConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

impl ChainConfig {
    pub fn token(&self, token_id: &str) -> Option<&TokenConfig> {
        self.tokens.iter().find(|t| t.id == token_id)
    }
}

mod biguint_opt_decimal {
    use super::BigUint;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &Option<BigUint>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(v) => v.to_string().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<BigUint>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => BigUint::from_str(&s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
