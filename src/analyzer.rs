//! C7 — Economic Analyzer. Derives trade direction, input/output token, and
//! amounts purely from pre/post balances (spec §4.3) — it never inspects
//! instruction bytes. Directly adapted from the teacher's
//! `trade_extractor.rs` (`extract_sol_changes`/`extract_token_changes`/
//! `determine_trade_direction`), generalized from "find *a* user volume" to
//! the full three-way classification (`buy`/`sell`/token-to-token `buy`)
//! spec §4.3 requires.

use crate::error::AnalyzerError;
use crate::types::{BalanceDelta, RawTx, TradeIntent, TradeType, NATIVE_MINT};
use solana_pubkey::Pubkey;
use std::collections::HashMap;

/// `token_mint -> (post - pre)` for balances owned by `master`, per spec
/// §4.3 step 1. Multiple deltas for the same mint (e.g. split across
/// several token accounts the master owns) are summed.
fn owned_token_delta_map(deltas: &[BalanceDelta], master: Pubkey) -> HashMap<String, i128> {
    let mut map = HashMap::new();
    for d in deltas.iter().filter(|d| d.owner == Some(master)) {
        *map.entry(d.mint.clone()).or_insert(0) += d.raw_change;
    }
    map
}

/// Master's native-token delta, summed across every account index owned by
/// the master (there is ordinarily exactly one, but fee-payer/signer splits
/// exist on some venues).
fn owned_native_delta(deltas: &[BalanceDelta], master: Pubkey) -> i128 {
    deltas.iter().filter(|d| d.owner == Some(master)).map(|d| d.raw_change).sum()
}

pub fn analyze(tx: &RawTx, master: Pubkey) -> Result<TradeIntent, AnalyzerError> {
    let native_delta = owned_native_delta(&tx.native_deltas, master);
    let token_deltas = owned_token_delta_map(&tx.token_deltas, master);

    let positive: Vec<(&String, &i128)> = token_deltas.iter().filter(|(_, d)| **d > 0).collect();
    let negative: Vec<(&String, &i128)> = token_deltas.iter().filter(|(_, d)| **d < 0).collect();

    // native delta <0 AND exactly one token delta >0 -> buy
    if native_delta < 0 && positive.len() == 1 && negative.is_empty() {
        let (mint, amount) = positive[0];
        return Ok(build_intent(tx, master, TradeType::Buy, NATIVE_MINT.to_string(), mint.clone(), native_delta.unsigned_abs() as u64, amount.unsigned_abs() as u64));
    }

    // native delta >0 AND exactly one token delta <0 -> sell
    if native_delta > 0 && negative.len() == 1 && positive.is_empty() {
        let (mint, amount) = negative[0];
        return Ok(build_intent(tx, master, TradeType::Sell, mint.clone(), NATIVE_MINT.to_string(), amount.unsigned_abs() as u64, native_delta.unsigned_abs() as u64));
    }

    // exactly one <0 and exactly one >0, native ~= 0 -> token-to-token buy
    const NATIVE_EPSILON: i128 = 10_000; // ~0.00001 native, fee-rounding slack
    if negative.len() == 1 && positive.len() == 1 && native_delta.abs() <= NATIVE_EPSILON {
        let (in_mint, in_amount) = negative[0];
        let (out_mint, out_amount) = positive[0];
        return Ok(build_intent(tx, master, TradeType::Buy, in_mint.clone(), out_mint.clone(), in_amount.unsigned_abs() as u64, out_amount.unsigned_abs() as u64));
    }

    Err(AnalyzerError::Ambiguous)
}

fn build_intent(
    tx: &RawTx,
    master: Pubkey,
    trade_type: TradeType,
    input_mint: String,
    output_mint: String,
    input_amount_raw: u64,
    output_amount_raw: u64,
) -> TradeIntent {
    let decimals = tx
        .token_deltas
        .iter()
        .find(|d| d.mint == input_mint || d.mint == output_mint)
        .map(|d| d.decimals)
        .unwrap_or(9);

    TradeIntent {
        trade_type,
        input_mint,
        output_mint,
        input_amount_raw,
        output_amount_raw,
        trader_id: master,
        token_decimals: decimals,
        signature: tx.signature.clone(),
        slot: tx.slot,
        observed_compute_unit_limit: tx.observed_compute_unit_limit,
    }
}
