//! Poseidon2-based nullifier hash.
//!
//! nullifier = Poseidon2.hashDomain(nullifierKey, commitment, Nullifier)
//!
//! Where nullifierKey is either:
//! - The secret key directly (if freezer is identity)
//! - Poseidon2.hashDomain(shared.x, shared.y, KeyDerivation) where shared = ECDH(freezerPk, sk)

use ark_bn254::Fr;
use ocash_types::{field_to_hex, hex_to_field, Hex, Result};

use crate::babyjubjub;
use crate::poseidon2::{self, Poseidon2Domain};

/// Compute a nullifier from secret key and commitment.
///
/// If `freezer_pk` is None or the identity point (0, 1), uses sk directly.
/// Otherwise computes ECDH shared secret with the freezer public key.
pub fn nullifier(
    secret_key: &Fr,
    commitment: &Fr,
    freezer_pk: Option<(Fr, Fr)>,
) -> Fr {
    let (id_x, id_y) = babyjubjub::identity();

    let is_default_freezer = match &freezer_pk {
        None => true,
        Some((fx, fy)) => *fx == id_x && *fy == id_y,
    };

    let nullifier_key = if is_default_freezer {
        *secret_key
    } else {
        let (fx, fy) = freezer_pk.unwrap();
        let shared = babyjubjub::mul_point((fx, fy), secret_key);
        poseidon2::hash_with_domain(shared.0, shared.1, Poseidon2Domain::KeyDerivation)
    };

    poseidon2::hash_with_domain(nullifier_key, *commitment, Poseidon2Domain::Nullifier)
}

/// Compute nullifier from secret key and commitment Fr, returning Fr.
pub fn compute(
    secret_key: &Fr,
    commitment: &Fr,
    freezer_pk: Option<(Fr, Fr)>,
) -> Result<Fr> {
    Ok(nullifier(secret_key, commitment, freezer_pk))
}

/// Compute nullifier and return as 0x-prefixed hex string.
pub fn nullifier_hex(
    secret_key: &Fr,
    commitment_hex: &str,
    freezer_pk: Option<(Fr, Fr)>,
) -> Result<Hex> {
    let commitment = hex_to_field(commitment_hex)?;
    let result = nullifier(secret_key, &commitment, freezer_pk);
    Ok(field_to_hex(&result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullifier_is_deterministic() {
        let sk = Fr::from(123u64);
        let cm = Fr::from(456u64);
        let a = nullifier(&sk, &cm, None);
        let b = nullifier(&sk, &cm, None);
        assert_eq!(a, b);
    }

    #[test]
    fn none_freezer_matches_explicit_identity_freezer() {
        let sk = Fr::from(123u64);
        let cm = Fr::from(456u64);
        let via_none = nullifier(&sk, &cm, None);
        let via_identity = nullifier(&sk, &cm, Some(babyjubjub::identity()));
        assert_eq!(via_none, via_identity);
    }

    #[test]
    fn non_identity_freezer_changes_the_nullifier() {
        let sk = Fr::from(123u64);
        let cm = Fr::from(456u64);
        let freezer_pk = babyjubjub::scalar_mult(&Fr::from(9u64));
        let without_freezer = nullifier(&sk, &cm, None);
        let with_freezer = nullifier(&sk, &cm, Some(freezer_pk));
        assert_ne!(without_freezer, with_freezer);
    }

    #[test]
    fn different_commitments_produce_different_nullifiers() {
        let sk = Fr::from(123u64);
        let a = nullifier(&sk, &Fr::from(1u64), None);
        let b = nullifier(&sk, &Fr::from(2u64), None);
        assert_ne!(a, b);
    }

    #[test]
    fn nullifier_hex_roundtrips_the_commitment_input() {
        let sk = Fr::from(123u64);
        let cm = Fr::from(456u64);
        let cm_hex = field_to_hex(&cm);
        let hex_result = nullifier_hex(&sk, &cm_hex, None).unwrap();
        let direct = field_to_hex(&nullifier(&sk, &cm, None));
        assert_eq!(hex_result, direct);
    }
}
