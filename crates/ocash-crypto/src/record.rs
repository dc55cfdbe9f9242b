//! Record opening codec (ABI-style encoding/decoding).
//!
//! Format: 5 × 32-byte uint256 slots (160 bytes total):
//!   [asset_id, asset_amount, compressed_pk, blinding_factor, is_frozen(0/1)]
//!
//! The compressed public key is the BabyJubjub point compression bytes
//! interpreted as a uint256 (LE bytes → toHex → BigInt → ABI uint256).

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use ocash_types::{OcashError, Result};
use rand::RngCore;

use crate::babyjubjub;
use crate::commitment;

/// A decoded record opening.
#[derive(Debug, Clone)]
pub struct RecordOpening {
    pub asset_id: Fr,
    pub asset_amount: Fr,
    pub user_pk: (Fr, Fr),
    pub blinding_factor: Fr,
    pub is_frozen: bool,
}

/// Maximum attempts to draw a non-degenerate blinding factor.
const MAX_BLINDING_RETRIES: usize = 5;

/// Create a fresh record opening for `owner`, drawing a uniformly random
/// blinding factor. Retries up to [`MAX_BLINDING_RETRIES`] times if the
/// resulting commitment would hash to zero.
pub fn create_record_opening(
    asset_id: Fr,
    asset_amount: Fr,
    owner_pk: (Fr, Fr),
    is_frozen: bool,
) -> Result<RecordOpening> {
    let mut rng = rand::thread_rng();
    let mut last_err = None;

    for _ in 0..MAX_BLINDING_RETRIES {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        let blinding_factor = Fr::from_le_bytes_mod_order(&bytes);

        let ro = RecordOpening {
            asset_id,
            asset_amount,
            user_pk: owner_pk,
            blinding_factor,
            is_frozen,
        };

        match commitment::compute(&ro) {
            Ok(cm) if cm != Fr::from(0u64) => return Ok(ro),
            Ok(_) => {
                last_err = Some(OcashError::Other("commitment hashed to zero".into()));
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| OcashError::Other("failed to draw a non-degenerate blinding factor".into())))
}

/// Encode a record opening to ABI-style bytes (160 bytes).
pub fn encode(ro: &RecordOpening) -> Result<Vec<u8>> {
    let compressed = babyjubjub::compress_point(&ro.user_pk.0, &ro.user_pk.1)?;

    let mut result = Vec::with_capacity(160);
    result.extend_from_slice(&field_to_be_bytes(&ro.asset_id));
    result.extend_from_slice(&field_to_be_bytes(&ro.asset_amount));
    // Compressed point: LE bytes are treated as-is for the uint256 slot
    // (TS does BigInt(toHex(compressedBytes)) → ABI encode → same byte order)
    result.extend_from_slice(&compressed);
    result.extend_from_slice(&field_to_be_bytes(&ro.blinding_factor));
    let mut frozen_slot = [0u8; 32];
    if ro.is_frozen {
        frozen_slot[31] = 1;
    }
    result.extend_from_slice(&frozen_slot);

    Ok(result)
}

/// Encode a record opening to a 0x-prefixed hex string.
pub fn encode_hex(ro: &RecordOpening) -> Result<String> {
    let bytes = encode(ro)?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

/// Decode ABI-style bytes (160 bytes) to a record opening.
pub fn decode(data: &[u8]) -> Result<RecordOpening> {
    if data.len() != 160 {
        return Err(OcashError::Other(format!(
            "record data must be 160 bytes, got {}",
            data.len()
        )));
    }

    let asset_id = be_bytes_to_field(&data[0..32]);
    let asset_amount = be_bytes_to_field(&data[32..64]);

    // Compressed point slot: raw bytes are the LE compressed point
    let mut compressed = [0u8; 32];
    compressed.copy_from_slice(&data[64..96]);
    let (pk_x, pk_y) = babyjubjub::decompress_point(&compressed)?;

    let blinding_factor = be_bytes_to_field(&data[96..128]);
    let is_frozen = data[159] == 1;

    Ok(RecordOpening {
        asset_id,
        asset_amount,
        user_pk: (pk_x, pk_y),
        blinding_factor,
        is_frozen,
    })
}

/// Decode a 0x-prefixed hex string to a record opening.
pub fn decode_hex(hex_str: &str) -> Result<RecordOpening> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str).map_err(|e| OcashError::InvalidHex(e.to_string()))?;
    decode(&bytes)
}

/// Convert a field element to 32-byte big-endian representation.
fn field_to_be_bytes(f: &Fr) -> [u8; 32] {
    let bytes = f.into_bigint().to_bytes_be();
    let mut result = [0u8; 32];
    let offset = 32usize.saturating_sub(bytes.len());
    result[offset..].copy_from_slice(&bytes[..]);
    result
}

/// Convert 32-byte big-endian data to a field element.
fn be_bytes_to_field(data: &[u8]) -> Fr {
    let mut padded = [0u8; 32];
    let offset = 32usize.saturating_sub(data.len());
    padded[offset..].copy_from_slice(data);
    padded.reverse(); // BE to LE
    Fr::from_le_bytes_mod_order(&padded)
}
