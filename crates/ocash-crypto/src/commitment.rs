//! Poseidon2-based commitment hash.
//!
//! commitment = Poseidon2.hashSequenceWithDomain(
//!     [pk.x, pk.y, blinding_factor, asset_id, amount_with_frozen_bit],
//!     Record
//! )

use ark_bn254::Fr;
use ark_ff::PrimeField;
use ocash_types::{field_to_hex, Hex};

use crate::poseidon2::{self, Poseidon2Domain};
use crate::record::RecordOpening;

/// Compute a commitment hash from record opening fields.
pub fn commitment(
    user_pk_x: &Fr,
    user_pk_y: &Fr,
    blinding_factor: &Fr,
    asset_id: &Fr,
    asset_amount: &Fr,
    is_frozen: bool,
) -> Fr {
    let mut amount = *asset_amount;
    if is_frozen {
        // Set bit 128: amount |= (1 << 128)
        let frozen_bit = Fr::from_bigint(ark_ff::BigInteger256::new([0, 0, 1, 0])).unwrap();
        amount += frozen_bit;
    }

    let inputs = [*user_pk_x, *user_pk_y, *blinding_factor, *asset_id, amount];
    poseidon2::hash_sequence_with_domain(&inputs, Poseidon2Domain::Record.value(), None)
}

/// Compute commitment and return as 0x-prefixed hex string.
pub fn commitment_hex(
    user_pk_x: &Fr,
    user_pk_y: &Fr,
    blinding_factor: &Fr,
    asset_id: &Fr,
    asset_amount: &Fr,
    is_frozen: bool,
) -> Hex {
    let h = commitment(user_pk_x, user_pk_y, blinding_factor, asset_id, asset_amount, is_frozen);
    field_to_hex(&h)
}

/// Compute commitment from a RecordOpening.
pub fn compute(ro: &RecordOpening) -> ocash_types::Result<Fr> {
    Ok(commitment(
        &ro.user_pk.0,
        &ro.user_pk.1,
        &ro.blinding_factor,
        &ro.asset_id,
        &ro.asset_amount,
        ro.is_frozen,
    ))
}

/// Compute a pool id from the token address, viewer public key, and freezer
/// public key:
///
/// `PoolId = Poseidon2.fold([vx, vy, fx, fy], Policy, seed = token_addr)`
pub fn pool_id(token_addr: &Fr, viewer_pk: (&Fr, &Fr), freezer_pk: (&Fr, &Fr)) -> Fr {
    let inputs = [*viewer_pk.0, *viewer_pk.1, *freezer_pk.0, *freezer_pk.1];
    poseidon2::hash_sequence_with_domain(&inputs, Poseidon2Domain::Policy.value(), Some(*token_addr))
}

/// Compute a pool id and return it as a 0x-prefixed, 32-byte big-endian hex
/// string (zero-padded), matching the key format of the relayer fee tables.
pub fn pool_id_hex(token_addr: &Fr, viewer_pk: (&Fr, &Fr), freezer_pk: (&Fr, &Fr)) -> Hex {
    field_to_hex(&pool_id(token_addr, viewer_pk, freezer_pk))
}
