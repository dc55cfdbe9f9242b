//! Coin selection and transaction planning for transfers and withdrawals.
//!
//! - Transfer: up to 3 inputs, 3 outputs (recipient, change, dummy)
//! - Withdraw: 1 input, 1 change output
//! - Fee calculation with relayer fees and protocol fees, merging small
//!   UTXOs into a single self-transfer when a direct plan can't reach the
//!   requested amount.
//!
//! All arithmetic here goes through [`BigUint`]; amounts are field elements
//! and can exceed 128 bits, and fee ratios must round the same way on every
//! platform, so no floating point is used anywhere in this crate.

mod abi;

use ark_bn254::Fr;
use num_bigint::BigUint;

use ocash_crypto::record::{create_record_opening, RecordOpening};
use ocash_crypto::{commitment, memo};
use ocash_store::UtxoRecord;
use ocash_types::bigint::{biguint_to_field, hex_to_biguint};
use ocash_types::{Hex, OcashError, Result};

pub const INPUT_NUMBER: usize = 3;
const BPS_BASE: u32 = 10_000;

/// The action a fee/plan computation is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Transfer,
    Withdraw,
}

impl Action {
    fn max_inputs(self) -> usize {
        match self {
            Action::Transfer => INPUT_NUMBER,
            Action::Withdraw => 1,
        }
    }
}

/// Per-action relayer fees, looked up by pool id elsewhere in the SDK.
#[derive(Debug, Clone)]
pub struct RelayerFees {
    pub transfer: BigUint,
    pub withdraw: BigUint,
}

/// A BabyJubjub pool's identifying keys, needed to build new output
/// records whose `asset_id` field is the pool id (not the human-readable
/// token id carried on [`UtxoRecord`]).
#[derive(Debug, Clone)]
pub struct AssetContext {
    pub pool_id: Fr,
    pub viewer_pk: (Fr, Fr),
    pub freezer_pk: (Fr, Fr),
}

fn sub_clamped(a: &BigUint, b: &BigUint) -> BigUint {
    if a > b {
        a - b
    } else {
        BigUint::from(0u32)
    }
}

/// Outcome of folding a record list down to its fee-bearing total.
#[derive(Debug, Clone)]
pub struct FeeOutcome {
    /// Number of relayer submissions the folded plan will make: one for
    /// the action's own final step (transfer or withdraw), plus one per
    /// self-transfer merge required to reach the action's per-proof input
    /// limit. Always at least 1.
    pub fee_count: u64,
    /// Sum of every record fed in, before any fee is deducted.
    pub total: BigUint,
    pub transfer_fee: BigUint,
    pub protocol_fee: BigUint,
    /// Amount that must be available across the records for the query to
    /// be satisfiable.
    pub cost: BigUint,
    /// Amount the query's target actually receives (the send amount for a
    /// transfer, or the net payout for a withdraw).
    pub output: BigUint,
    pub feasible: bool,
}

/// Fold `records` down to the action's per-proof input limit by repeatedly
/// merging the first three into one (a self-transfer, each incurring one
/// more relayer fee), then compute the action's fee/cost/output for either
/// a fixed `expected` amount or, if `expected` is `None`, the maximum the
/// folded total can produce.
///
/// `fee_count` starts at 1 to account for the action's own final relayer
/// submission, then gains one more per merge step; a plain transfer or
/// withdraw that never merges still pays exactly one relayer fee.
pub fn records_fee(
    records: &[BigUint],
    expected: Option<&BigUint>,
    action: Action,
    fees: &RelayerFees,
    protocol_bps: u32,
    expected_is_with_fee: bool,
) -> FeeOutcome {
    let max_len = action.max_inputs();
    let mut folded: Vec<BigUint> = records.to_vec();
    let mut fee_count: u64 = 1;

    while folded.len() > max_len {
        let take = folded.len().min(3);
        let merged = folded.drain(0..take).fold(BigUint::from(0u32), |acc, v| acc + v);
        folded.insert(0, merged);
        fee_count += 1;
    }

    let total = folded.iter().fold(BigUint::from(0u32), |acc, v| acc + v);

    match action {
        Action::Transfer => {
            let transfer_fee = &fees.transfer * fee_count;
            let (cost, output) = match expected {
                None => (total.clone(), sub_clamped(&total, &transfer_fee)),
                Some(expected) => {
                    if expected_is_with_fee {
                        (expected.clone(), sub_clamped(expected, &transfer_fee))
                    } else {
                        (expected + &transfer_fee, expected.clone())
                    }
                }
            };
            let feasible = total >= cost;
            FeeOutcome { fee_count, total, transfer_fee, protocol_fee: BigUint::from(0u32), cost, output, feasible }
        }
        Action::Withdraw => {
            let bps_base = BigUint::from(BPS_BASE);
            let protocol_bps_big = BigUint::from(protocol_bps);
            let denom = &bps_base + &protocol_bps_big;
            // `fee_count` always includes the withdraw's own final step, so
            // only the merge steps (fee_count - 1) pay the transfer-type fee.
            let transfer_fee = &fees.transfer * (fee_count - 1);

            let base = match expected {
                None => (sub_clamped(&total, &transfer_fee) * &bps_base) / &denom,
                Some(expected) => {
                    if expected_is_with_fee {
                        expected.clone()
                    } else {
                        expected + &fees.withdraw
                    }
                }
            };

            let protocol_fee = (&base * &protocol_bps_big) / &bps_base;
            let burn_fee = &protocol_fee + &fees.withdraw;
            let output = sub_clamped(&base, &fees.withdraw);
            let cost = &output + &transfer_fee + &burn_fee;
            let feasible = total >= cost;

            FeeOutcome { fee_count, total, transfer_fee, protocol_fee, cost, output, feasible }
        }
    }
}

fn utxo_amount(u: &UtxoRecord) -> Result<BigUint> {
    hex_to_biguint(&u.amount)
}

fn sort_descending(utxos: &[UtxoRecord]) -> Result<Vec<(UtxoRecord, BigUint)>> {
    let mut with_amounts: Vec<(UtxoRecord, BigUint)> =
        utxos.iter().map(|u| Ok((u.clone(), utxo_amount(u)?))).collect::<Result<_>>()?;
    with_amounts.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(with_amounts)
}

/// Human-readable fee/estimate summary, in decimal strings for display.
#[derive(Debug, Clone)]
pub struct FeeSummary {
    pub relayer_fee: String,
    pub protocol_fee: String,
    pub total_fee: String,
}

impl FeeSummary {
    fn from_outcome(o: &FeeOutcome) -> Self {
        Self {
            relayer_fee: o.transfer_fee.to_string(),
            protocol_fee: o.protocol_fee.to_string(),
            total_fee: (&o.transfer_fee + &o.protocol_fee).to_string(),
        }
    }
}

/// Result of [`estimate`].
#[derive(Debug, Clone)]
pub struct EstimateResult {
    pub relayer_fee: String,
    pub required: String,
    /// Feasible using only up to the action's input limit, with no merges.
    pub ok: bool,
    /// Feasible once small UTXOs are merged via self-transfers first.
    pub ok_with_merge: bool,
    pub fee_summary: FeeSummary,
    pub max_summary: FeeSummary,
    pub selected_inputs: Vec<UtxoRecord>,
    pub burn_amount: Option<String>,
    pub protocol_fee: Option<String>,
}

/// Estimate feasibility and fees for sending `amount` of `asset` as
/// `action`, from `available_utxos`.
pub fn estimate(
    action: Action,
    amount: &BigUint,
    pay_includes_fee: bool,
    available_utxos: &[UtxoRecord],
    fees: &RelayerFees,
    protocol_bps: u32,
) -> Result<EstimateResult> {
    let sorted = sort_descending(available_utxos)?;
    let max_len = action.max_inputs();

    let one_step: Vec<BigUint> = sorted.iter().take(max_len).map(|(_, a)| a.clone()).collect();
    let one_step_outcome = records_fee(&one_step, Some(amount), action, fees, protocol_bps, pay_includes_fee);

    let all_amounts: Vec<BigUint> = sorted.iter().map(|(_, a)| a.clone()).collect();
    let merged_outcome = records_fee(&all_amounts, Some(amount), action, fees, protocol_bps, pay_includes_fee);

    let max_outcome = records_fee(&all_amounts, None, action, fees, protocol_bps, pay_includes_fee);

    let (chosen_outcome, chosen_len) =
        if one_step_outcome.feasible { (&one_step_outcome, max_len.min(sorted.len())) } else { (&merged_outcome, sorted.len()) };

    let selected_inputs = sorted.iter().take(chosen_len).map(|(u, _)| u.clone()).collect();

    let relayer_fee = match action {
        Action::Transfer => fees.transfer.clone(),
        Action::Withdraw => fees.withdraw.clone(),
    };

    let (burn_amount, protocol_fee) = match action {
        Action::Transfer => (None, None),
        Action::Withdraw => (Some(chosen_outcome.cost.to_string()), Some(chosen_outcome.protocol_fee.to_string())),
    };

    Ok(EstimateResult {
        relayer_fee: relayer_fee.to_string(),
        required: chosen_outcome.cost.to_string(),
        ok: one_step_outcome.feasible,
        ok_with_merge: merged_outcome.feasible,
        fee_summary: FeeSummary::from_outcome(chosen_outcome),
        max_summary: FeeSummary::from_outcome(&max_outcome),
        selected_inputs,
        burn_amount,
        protocol_fee,
    })
}

/// A single planned output record.
#[derive(Debug, Clone)]
pub struct PlannedOutput {
    pub to_pk: (Fr, Fr),
    pub amount: BigUint,
    pub memo: Hex,
    pub is_dummy: bool,
}

fn make_output(asset: &AssetContext, amount: &BigUint, recipient_pk: (Fr, Fr), is_dummy: bool) -> Result<PlannedOutput> {
    let amount_fr = biguint_to_field(amount);
    let ro = create_record_opening(asset.pool_id, amount_fr, recipient_pk, false)?;
    let memo_hex = memo::create_memo(&ro)?;
    Ok(PlannedOutput { to_pk: recipient_pk, amount: amount.clone(), memo: memo_hex, is_dummy })
}

/// A fully built transfer plan: selected inputs, the three outputs, fees,
/// and the proof binding hash the prover must match.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub chain_id: u64,
    pub requested_amount: BigUint,
    pub send_amount: BigUint,
    pub to: Hex,
    pub relayer: Hex,
    pub relayer_fee: BigUint,
    pub selected_inputs: Vec<UtxoRecord>,
    pub outputs: [PlannedOutput; 3],
    pub fee_summary: FeeSummary,
    pub proof_binding: Fr,
}

/// Either a direct transfer plan, or a merge step that must land first.
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Direct(TransferPlan),
    /// `merge` must be submitted and confirmed before `plan` can be
    /// retried; the merged UTXO will then fit within the one-step limit.
    NeedsMerge { merge: TransferPlan },
}

/// Input to a transfer plan.
pub struct TransferInput<'a> {
    pub chain_id: u64,
    pub asset: &'a AssetContext,
    pub requested_amount: BigUint,
    pub pay_includes_fee: bool,
    pub to_pk: (Fr, Fr),
    pub to_hex: Hex,
    pub owner_pk: (Fr, Fr),
    pub relayer: Hex,
    pub relayer_fees: RelayerFees,
    pub auto_merge: bool,
    pub available_utxos: &'a [UtxoRecord],
}

/// Plan a transfer, picking up to [`INPUT_NUMBER`] inputs, or falling back
/// to a self-transfer merge plan when `auto_merge` is set and merging would
/// make the transfer feasible.
pub fn plan_transfer(input: &TransferInput) -> Result<TransferOutcome> {
    let sorted = sort_descending(input.available_utxos)?;
    let one_step: Vec<BigUint> = sorted.iter().take(INPUT_NUMBER).map(|(_, a)| a.clone()).collect();
    let one_step_outcome = records_fee(
        &one_step,
        Some(&input.requested_amount),
        Action::Transfer,
        &input.relayer_fees,
        0,
        input.pay_includes_fee,
    );

    if one_step_outcome.feasible {
        let selected: Vec<UtxoRecord> = sorted.iter().take(INPUT_NUMBER.min(sorted.len())).map(|(u, _)| u.clone()).collect();
        return Ok(TransferOutcome::Direct(build_transfer_plan(input, selected, &one_step_outcome)?));
    }

    if !input.auto_merge {
        return Err(OcashError::Other("transfer is not feasible with up to 3 inputs and auto_merge is disabled".into()));
    }

    let all_amounts: Vec<BigUint> = sorted.iter().map(|(_, a)| a.clone()).collect();
    let merged_outcome = records_fee(
        &all_amounts,
        Some(&input.requested_amount),
        Action::Transfer,
        &input.relayer_fees,
        0,
        input.pay_includes_fee,
    );
    if !merged_outcome.feasible {
        return Err(OcashError::Other("transfer is not feasible even after merging all available UTXOs".into()));
    }

    // Merge the three smallest first, since they contribute the least to
    // a future one-step transfer; fall back to the three largest only if
    // the smallest three can't even cover the merge's own relayer fee.
    let mut ascending = sorted.clone();
    ascending.reverse();
    let smallest_three: Vec<(UtxoRecord, BigUint)> = ascending.into_iter().take(INPUT_NUMBER.min(sorted.len())).collect();
    let smallest_sum: BigUint = smallest_three.iter().fold(BigUint::from(0u32), |acc, (_, a)| acc + a);

    let merge_group = if smallest_sum > input.relayer_fees.transfer {
        smallest_three
    } else {
        sorted.iter().take(INPUT_NUMBER.min(sorted.len())).cloned().collect()
    };

    let merge_inputs: Vec<UtxoRecord> = merge_group.iter().map(|(u, _)| u.clone()).collect();
    let merge_total: BigUint = merge_group.iter().fold(BigUint::from(0u32), |acc, (_, a)| acc + a);
    let merge_send = sub_clamped(&merge_total, &input.relayer_fees.transfer);

    let merge_outcome = FeeOutcome {
        fee_count: 1,
        total: merge_total,
        transfer_fee: input.relayer_fees.transfer.clone(),
        protocol_fee: BigUint::from(0u32),
        cost: merge_send.clone(),
        output: merge_send,
        feasible: true,
    };

    let merge_input = TransferInput {
        chain_id: input.chain_id,
        asset: input.asset,
        requested_amount: merge_outcome.output.clone(),
        pay_includes_fee: false,
        to_pk: input.owner_pk,
        to_hex: String::new(),
        owner_pk: input.owner_pk,
        relayer: input.relayer.clone(),
        relayer_fees: RelayerFees { transfer: input.relayer_fees.transfer.clone(), withdraw: input.relayer_fees.withdraw.clone() },
        auto_merge: false,
        available_utxos: input.available_utxos,
    };
    let merge_plan = build_transfer_plan(&merge_input, merge_inputs, &merge_outcome)?;

    Ok(TransferOutcome::NeedsMerge { merge: merge_plan })
}

fn build_transfer_plan(input: &TransferInput, selected_inputs: Vec<UtxoRecord>, outcome: &FeeOutcome) -> Result<TransferPlan> {
    let change = sub_clamped(&outcome.total, &outcome.cost);
    let has_change = change > BigUint::from(0u32);

    let recipient_output = make_output(input.asset, &outcome.output, input.to_pk, false)?;
    let change_output = if has_change {
        make_output(input.asset, &change, input.owner_pk, false)?
    } else {
        make_output(input.asset, &BigUint::from(0u32), input.owner_pk, true)?
    };
    let dummy_output = make_output(input.asset, &BigUint::from(0u32), input.owner_pk, true)?;

    let memos = [recipient_output.memo.clone(), change_output.memo.clone(), dummy_output.memo.clone()];
    let proof_binding = abi::transfer_proof_binding(&input.relayer, &memos)?;

    Ok(TransferPlan {
        chain_id: input.chain_id,
        requested_amount: input.requested_amount.clone(),
        send_amount: outcome.output.clone(),
        to: input.to_hex.clone(),
        relayer: input.relayer.clone(),
        relayer_fee: outcome.transfer_fee.clone(),
        selected_inputs,
        outputs: [recipient_output, change_output, dummy_output],
        fee_summary: FeeSummary::from_outcome(outcome),
        proof_binding,
    })
}

/// A fully built withdraw plan.
#[derive(Debug, Clone)]
pub struct WithdrawPlan {
    pub chain_id: u64,
    pub requested_amount: BigUint,
    pub burn_amount: BigUint,
    pub recipient: Hex,
    pub relayer: Hex,
    pub relayer_fee: BigUint,
    pub protocol_fee: BigUint,
    pub gas_drop_value: BigUint,
    pub selected_input: UtxoRecord,
    pub change_output: PlannedOutput,
    pub fee_summary: FeeSummary,
    pub proof_binding: Fr,
}

/// Input to a withdraw plan.
pub struct WithdrawInput<'a> {
    pub chain_id: u64,
    pub asset: &'a AssetContext,
    pub requested_amount: BigUint,
    pub pay_includes_fee: bool,
    pub recipient: Hex,
    pub owner_pk: (Fr, Fr),
    pub relayer: Hex,
    pub relayer_fees: RelayerFees,
    pub protocol_bps: u32,
    pub gas_drop_value: BigUint,
    pub available_utxos: &'a [UtxoRecord],
}

/// Plan a withdraw, picking a single UTXO whose amount covers the burn.
pub fn plan_withdraw(input: &WithdrawInput) -> Result<WithdrawPlan> {
    let sorted = sort_descending(input.available_utxos)?;

    for (utxo, amount) in &sorted {
        let single = [amount.clone()];
        let outcome = records_fee(
            &single,
            Some(&input.requested_amount),
            Action::Withdraw,
            &input.relayer_fees,
            input.protocol_bps,
            input.pay_includes_fee,
        );
        if outcome.feasible {
            let change = sub_clamped(amount, &outcome.cost);
            let has_change = change > BigUint::from(0u32);
            let change_output = if has_change {
                make_output(input.asset, &change, input.owner_pk, false)?
            } else {
                make_output(input.asset, &BigUint::from(0u32), input.owner_pk, true)?
            };

            let proof_binding = abi::withdraw_proof_binding(
                &input.recipient,
                &outcome.output,
                &input.relayer,
                &input.relayer_fees.withdraw,
                &input.gas_drop_value,
                &change_output.memo,
            )?;

            return Ok(WithdrawPlan {
                chain_id: input.chain_id,
                requested_amount: input.requested_amount.clone(),
                burn_amount: outcome.cost.clone(),
                recipient: input.recipient.clone(),
                relayer: input.relayer.clone(),
                relayer_fee: input.relayer_fees.withdraw.clone(),
                protocol_fee: outcome.protocol_fee,
                gas_drop_value: input.gas_drop_value.clone(),
                selected_input: utxo.clone(),
                change_output,
                fee_summary: FeeSummary::from_outcome(&outcome),
                proof_binding,
            });
        }
    }

    Err(OcashError::Other("no single UTXO can cover the requested withdrawal".into()))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn records_strategy() -> impl Strategy<Value = Vec<BigUint>> {
        proptest::collection::vec(1u64..=1_000_000u64, 1..=8).prop_map(|v| v.into_iter().map(BigUint::from).collect())
    }

    fn fees_strategy() -> impl Strategy<Value = RelayerFees> {
        (1u64..=100, 1u64..=100)
            .prop_map(|(t, w)| RelayerFees { transfer: BigUint::from(t), withdraw: BigUint::from(w) })
    }

    proptest! {
        /// Merging never loses or creates value: the folded total always
        /// equals the sum of the original records.
        #[test]
        fn records_fee_conserves_total_value(records in records_strategy(), fees in fees_strategy()) {
            let sum_before: BigUint = records.iter().fold(BigUint::from(0u32), |acc, v| acc + v);
            let outcome = records_fee(&records, None, Action::Transfer, &fees, 0, false);
            prop_assert_eq!(outcome.total, sum_before);
        }

        /// Merging reduces the record count down to at most the action's
        /// input limit, charging one relayer fee per merge plus one for the
        /// transfer's own final step.
        #[test]
        fn records_fee_merge_count_matches_input_excess(records in records_strategy(), fees in fees_strategy()) {
            let outcome = records_fee(&records, None, Action::Transfer, &fees, 0, false);
            let expected_merges = if records.len() > INPUT_NUMBER {
                // Each merge folds up to 3 records into 1; repeat until <= limit.
                let mut len = records.len();
                let mut merges = 0u64;
                while len > INPUT_NUMBER {
                    let take = len.min(3);
                    len = len - take + 1;
                    merges += 1;
                }
                merges
            } else {
                0
            };
            prop_assert_eq!(outcome.fee_count, expected_merges + 1);
            prop_assert_eq!(outcome.transfer_fee, &fees.transfer * (expected_merges + 1));
        }

        /// A transfer's output is never negative (clamped to zero) and
        /// never exceeds the folded total.
        #[test]
        fn records_fee_transfer_output_is_bounded(records in records_strategy(), fees in fees_strategy()) {
            let outcome = records_fee(&records, None, Action::Transfer, &fees, 0, false);
            prop_assert!(outcome.output <= outcome.total);
        }

        /// A withdraw's protocol fee is always `base * bps / 10_000`,
        /// rounding down, for any bps in the valid 0..=10_000 range.
        #[test]
        fn records_fee_withdraw_protocol_fee_matches_bps_formula(
            records in records_strategy(),
            fees in fees_strategy(),
            protocol_bps in 0u32..=10_000u32,
        ) {
            let outcome = records_fee(&records, None, Action::Withdraw, &fees, protocol_bps, false);
            let bps_base = BigUint::from(BPS_BASE);
            let denom = &bps_base + BigUint::from(protocol_bps);
            // fee_count is always >= 1 (the withdraw's own merge-free step never
            // charges a transfer fee, only merges preceding it do).
            let transfer_fee = &fees.transfer * (outcome.fee_count - 1);
            let base = (sub_clamped(&outcome.total, &transfer_fee) * &bps_base) / &denom;
            let expected_protocol_fee = (&base * BigUint::from(protocol_bps)) / &bps_base;
            prop_assert_eq!(outcome.protocol_fee, expected_protocol_fee);
        }

        /// Feasibility for a `None` (max-query) target is always true as
        /// long as there's at least one record, since the target is
        /// whatever the folded total can produce.
        #[test]
        fn records_fee_max_query_is_always_feasible(records in records_strategy(), fees in fees_strategy()) {
            let outcome = records_fee(&records, None, Action::Transfer, &fees, 0, false);
            prop_assert!(outcome.feasible);
        }
    }
}
