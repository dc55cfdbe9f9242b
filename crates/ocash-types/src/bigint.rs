//! Big-integer helpers for amount/fee arithmetic.
//!
//! Asset amounts and fees are defined over the BN254 scalar field and can
//! exceed 128 bits (e.g. the `1 << 128` frozen-flag bit stuffed into
//! `asset_amount`), so all planner/ops arithmetic goes through
//! [`num_bigint::BigUint`] rather than a fixed machine integer. No floating
//! point is used anywhere in this crate family.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

use crate::{Hex, OcashError, Result};

/// Parse a `0x`-prefixed (or bare) hex string into a [`BigUint`].
pub fn hex_to_biguint(hex_str: &str) -> Result<BigUint> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let hex_str = if hex_str.is_empty() { "0" } else { hex_str };
    let bytes = hex::decode(pad_even(hex_str)).map_err(|e| OcashError::InvalidHex(e.to_string()))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Convert a [`BigUint`] to a `0x`-prefixed hex string (no fixed width,
/// matching how amounts travel over the wire in this protocol).
pub fn biguint_to_hex(n: &BigUint) -> Hex {
    let bytes = n.to_bytes_be();
    format!("0x{}", hex::encode(bytes))
}

fn pad_even(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{s}")
    } else {
        s.to_string()
    }
}

/// Convert a BN254 scalar field element to a [`BigUint`] (big-endian).
pub fn field_to_biguint(f: &Fr) -> BigUint {
    BigUint::from_bytes_be(&f.into_bigint().to_bytes_be())
}

/// Convert a [`BigUint`] into a BN254 scalar field element, reducing mod `p`.
pub fn biguint_to_field(n: &BigUint) -> Fr {
    let bytes = n.to_bytes_le();
    Fr::from_le_bytes_mod_order(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let n = hex_to_biguint("0xff01").unwrap();
        assert_eq!(biguint_to_hex(&n), "0xff01");
    }

    #[test]
    fn zero_hex() {
        let n = hex_to_biguint("0x0").unwrap();
        assert_eq!(n, BigUint::from(0u32));
        let n2 = hex_to_biguint("0x").unwrap();
        assert_eq!(n2, BigUint::from(0u32));
    }

    #[test]
    fn odd_length_hex_is_padded() {
        let n = hex_to_biguint("0xabc").unwrap();
        assert_eq!(n, BigUint::from(0xabcu32));
    }

    #[test]
    fn field_roundtrip_under_modulus() {
        let f = Fr::from(123456789u64);
        let big = field_to_biguint(&f);
        let back = biguint_to_field(&big);
        assert_eq!(f, back);
    }
}
