use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bigint;

/// BN254 scalar field element type alias.
pub type FieldElement = Fr;

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// The typed error taxonomy from the SDK's stage-propagation policy.
///
/// Every internal pipeline stage is wrapped so a foreign error surfaces as
/// one of these, carrying a [`StageDetail`]. Typed errors from a lower
/// stage propagate unchanged rather than being re-wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Invalid or missing configuration.
    Config,
    /// Entry service protocol failure.
    Sync,
    /// Merkle proof service failure or on-chain root mismatch.
    Merkle,
    /// Relayer submission or polling failure.
    Relayer,
    /// Proof bridge failure, or the prover returned `success=false`.
    Proof,
    /// Could not build an input secret for the witness.
    Witness,
    /// Asset download or integrity failure.
    Assets,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "CONFIG",
            Self::Sync => "SYNC",
            Self::Merkle => "MERKLE",
            Self::Relayer => "RELAYER",
            Self::Proof => "PROOF",
            Self::Witness => "WITNESS",
            Self::Assets => "ASSETS",
        };
        f.write_str(s)
    }
}

/// Contextual detail attached to a typed stage error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageDetail {
    pub chain_id: Option<u64>,
    pub contract: Option<String>,
    pub cids: Vec<u64>,
    pub request_url: Option<String>,
    pub cause: Option<String>,
}

impl StageDetail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    pub fn with_cids(mut self, cids: Vec<u64>) -> Self {
        self.cids = cids;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.request_url = Some(url.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

/// OCash SDK error types.
#[derive(Debug, Error)]
pub enum OcashError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("point not on curve")]
    PointNotOnCurve,

    #[error("invalid compressed point: {0}")]
    InvalidCompressedPoint(String),

    #[error("no modular square root exists")]
    NoSquareRoot,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("seed too short: minimum 16 characters required")]
    SeedTooShort,

    #[error("invalid key pair")]
    InvalidKeyPair,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed")]
    DecryptionFailed,

    /// A typed stage failure, carrying the originating stage and an optional cause.
    #[error("{code}: {detail:?}")]
    Stage { code: ErrorCode, detail: StageDetail },

    #[error("{0}")]
    Other(String),
}

impl OcashError {
    /// Wrap any error as a typed stage failure, unless it already is one
    /// (typed errors propagate unchanged; foreign errors get wrapped with stage context).
    pub fn stage(code: ErrorCode, detail: StageDetail) -> Self {
        Self::Stage { code, detail }
    }

    /// The error code of this error, if it is (or carries) a typed stage error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Stage { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Re-home a foreign error under a stage code, preserving typed errors.
    pub fn wrap_stage(self, code: ErrorCode, mut detail: StageDetail) -> Self {
        if let Self::Stage { .. } = self {
            return self;
        }
        detail.cause.get_or_insert_with(|| self.to_string());
        Self::Stage { code, detail }
    }
}

pub type Result<T> = std::result::Result<T, OcashError>;

/// Wrap a `Result<T, E: Display>` into a typed stage error, preserving an
/// already-typed [`OcashError`] unchanged.
pub fn wrap_stage_result<T, E: std::fmt::Display>(
    result: std::result::Result<T, E>,
    code: ErrorCode,
    detail: StageDetail,
) -> Result<T> {
    result.map_err(|e| {
        let mut detail = detail;
        detail.cause.get_or_insert_with(|| e.to_string());
        OcashError::Stage { code, detail }
    })
}

/// A point on the BabyJubjub curve (x, y).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: String, // hex-encoded field element
    pub y: String,
}

/// User public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPublicKey {
    pub user_address: [String; 2], // [x_hex, y_hex]
}

/// User secret key (includes public key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSecretKey {
    pub address_sk: String, // hex-encoded scalar
}

/// User key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserKeyPair {
    pub user_pk: UserPublicKey,
    pub user_sk: UserSecretKey,
}

/// Record opening / commitment data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentData {
    pub asset_id: String,      // hex-encoded
    pub asset_amount: String,  // hex-encoded
    pub user_pk_x: String,     // hex-encoded
    pub user_pk_y: String,     // hex-encoded
    pub blinding_factor: String, // hex-encoded
    pub is_frozen: bool,
}

/// Parse a 0x-prefixed hex string into a field element.
pub fn hex_to_field(hex_str: &str) -> Result<Fr> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str).map_err(|e| OcashError::InvalidHex(e.to_string()))?;
    // Convert big-endian bytes to field element
    let mut padded = [0u8; 32];
    let offset = 32usize.saturating_sub(bytes.len());
    padded[offset..].copy_from_slice(&bytes);
    // ark-ff uses little-endian representation internally
    padded.reverse();
    Ok(Fr::from_le_bytes_mod_order(&padded))
}

/// Convert a field element to a 0x-prefixed hex string (64 chars).
pub fn field_to_hex(f: &Fr) -> String {
    let bytes = f.into_bigint().to_bytes_be();
    format!("0x{}", hex::encode(bytes))
}

/// Parse a hex string to a big-endian byte array.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| OcashError::InvalidHex(e.to_string()))
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_field_roundtrip() {
        let f = Fr::from(987654321u64);
        let hex = field_to_hex(&f);
        let back = hex_to_field(&hex).unwrap();
        assert_eq!(f, back);
    }

    #[test]
    fn typed_error_preserves_code_through_wrap() {
        let original = OcashError::stage(ErrorCode::Merkle, StageDetail::new().with_chain(1));
        let wrapped = original.wrap_stage(ErrorCode::Sync, StageDetail::new());
        assert_eq!(wrapped.code(), Some(ErrorCode::Merkle));
    }

    #[test]
    fn foreign_error_takes_stage_code() {
        let err: std::result::Result<(), &str> = Err("boom");
        let wrapped = wrap_stage_result(err, ErrorCode::Relayer, StageDetail::new().with_url("http://x"));
        let e = wrapped.unwrap_err();
        assert_eq!(e.code(), Some(ErrorCode::Relayer));
    }
}
