//! Minimal ABI-style encoder for proof-binding hashes.
//!
//! Mirrors the head/tail layout `ethers.js`'s `AbiCoder.encode` produces for
//! the small set of shapes the planner needs (an address, fixed-width
//! integers, and dynamic `bytes`/`bytes[3]`), just enough to make the
//! binding hash a deterministic function of its inputs.

use num_bigint::BigUint;
use sha3::{Digest, Keccak256};

use ark_bn254::Fr;
use ocash_types::{OcashError, Result};

fn be_word(value: &BigUint) -> [u8; 32] {
    let bytes = value.to_bytes_be();
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    word
}

fn encode_address(addr: &str) -> Result<[u8; 32]> {
    let stripped = addr.strip_prefix("0x").unwrap_or(addr);
    let bytes = hex::decode(stripped).map_err(|e| OcashError::InvalidHex(e.to_string()))?;
    if bytes.len() != 20 {
        return Err(OcashError::Other(format!("expected a 20-byte address, got {} bytes", bytes.len())));
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

fn encode_bytes_dynamic(data: &[u8]) -> Vec<u8> {
    let mut out = be_word(&BigUint::from(data.len())).to_vec();
    out.extend_from_slice(data);
    let pad = (32 - (data.len() % 32)) % 32;
    out.extend(std::iter::repeat(0u8).take(pad));
    out
}

fn encode_bytes3_dynamic(items: &[Vec<u8>; 3]) -> Vec<u8> {
    let head_size = 3 * 32;
    let mut heads = Vec::with_capacity(head_size);
    let mut tails = Vec::new();
    let mut offset = head_size;
    for item in items {
        heads.extend_from_slice(&be_word(&BigUint::from(offset)));
        let encoded = encode_bytes_dynamic(item);
        offset += encoded.len();
        tails.extend_from_slice(&encoded);
    }
    heads.extend_from_slice(&tails);
    heads
}

fn reduce_mod_bjj_scalar_field(hash: &[u8]) -> Fr {
    let n = BigUint::from_bytes_be(hash);
    ocash_types::bigint::biguint_to_field(&n)
}

fn hex_to_bytes(data: &str) -> Result<Vec<u8>> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(stripped).map_err(|e| OcashError::InvalidHex(e.to_string()))
}

/// `keccak256(abi.encode(address relayer, bytes abi.encode(bytes[3] memos))) mod BJJ_SCALAR_FIELD`
pub fn transfer_proof_binding(relayer: &str, memos: &[String; 3]) -> Result<Fr> {
    let memo_bytes: [Vec<u8>; 3] = [hex_to_bytes(&memos[0])?, hex_to_bytes(&memos[1])?, hex_to_bytes(&memos[2])?];
    let inner_tail = encode_bytes3_dynamic(&memo_bytes);

    let mut inner_encoded = be_word(&BigUint::from(32u32)).to_vec();
    inner_encoded.extend_from_slice(&inner_tail);

    let mut encoded = encode_address(relayer)?.to_vec();
    encoded.extend_from_slice(&be_word(&BigUint::from(64u32)));
    encoded.extend_from_slice(&encode_bytes_dynamic(&inner_encoded));

    let hash = Keccak256::digest(&encoded);
    Ok(reduce_mod_bjj_scalar_field(&hash))
}

/// `keccak256(abi.encode(address recipient, uint128 amount, address relayer, uint128 relayer_fee, uint128 gas_drop_value, bytes memo)) mod BJJ_SCALAR_FIELD`
pub fn withdraw_proof_binding(
    recipient: &str,
    amount: &BigUint,
    relayer: &str,
    relayer_fee: &BigUint,
    gas_drop_value: &BigUint,
    memo: &str,
) -> Result<Fr> {
    let memo_bytes = hex_to_bytes(memo)?;

    let mut heads = Vec::with_capacity(6 * 32);
    heads.extend_from_slice(&encode_address(recipient)?);
    heads.extend_from_slice(&be_word(amount));
    heads.extend_from_slice(&encode_address(relayer)?);
    heads.extend_from_slice(&be_word(relayer_fee));
    heads.extend_from_slice(&be_word(gas_drop_value));
    heads.extend_from_slice(&be_word(&BigUint::from(heads.len() + 32)));

    let mut encoded = heads;
    encoded.extend_from_slice(&encode_bytes_dynamic(&memo_bytes));

    let hash = Keccak256::digest(&encoded);
    Ok(reduce_mod_bjj_scalar_field(&hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELAYER: &str = "0x000000000000000000000000000000000000aa";

    #[test]
    fn transfer_binding_changes_with_any_memo() {
        let memos_a = ["0x01".to_string(), "0x02".to_string(), "0x03".to_string()];
        let memos_b = ["0x01".to_string(), "0x02".to_string(), "0x04".to_string()];

        let a = transfer_proof_binding(RELAYER, &memos_a).unwrap();
        let b = transfer_proof_binding(RELAYER, &memos_b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn transfer_binding_is_deterministic() {
        let memos = ["0x01".to_string(), "0x02".to_string(), "0x03".to_string()];
        let a = transfer_proof_binding(RELAYER, &memos).unwrap();
        let b = transfer_proof_binding(RELAYER, &memos).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn withdraw_binding_changes_with_amount() {
        let a = withdraw_proof_binding(
            RELAYER,
            &BigUint::from(100u32),
            RELAYER,
            &BigUint::from(1u32),
            &BigUint::from(0u32),
            "0xaa",
        )
        .unwrap();
        let b = withdraw_proof_binding(
            RELAYER,
            &BigUint::from(200u32),
            RELAYER,
            &BigUint::from(1u32),
            &BigUint::from(0u32),
            "0xaa",
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_a_malformed_address() {
        let memos = ["0x01".to_string(), "0x02".to_string(), "0x03".to_string()];
        assert!(transfer_proof_binding("0xnotanaddress", &memos).is_err());
    }
}
