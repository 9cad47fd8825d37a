//! C8 — Instruction Locator. Finds the single "core swap" instruction
//! inside a multi-instruction transaction (spec §4.4). Grounded on the
//! teacher's `instruction_scanner.rs` (`InstructionScanner::scan`'s
//! outer-then-inner walk over a closed program-id set), generalized from
//! "does any tracked program appear" to "which instruction is the core
//! one, by priority, with a derived platform tag."

use crate::error::LocatorError;
use crate::types::{CoreInstruction, PlatformTag, RawTx};
use solana_pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;

/// Closed set of known venue programs plus their platform tag. Spec §9's
/// "dynamic dispatch on platform tag" redesign flag: represented as a
/// table, not a `match` chain scattered across components.
fn dex_programs() -> &'static HashMap<Pubkey, PlatformTag> {
    use std::sync::OnceLock;
    static TABLE: OnceLock<HashMap<Pubkey, PlatformTag>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(pk("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P"), PlatformTag::PumpfunBc);
        m.insert(pk("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA"), PlatformTag::PumpfunAmm);
        m.insert(pk("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8"), PlatformTag::RaydiumV4);
        m.insert(pk("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK"), PlatformTag::RaydiumClmm);
        m.insert(pk("LanMV9sAd7wArD4vJFi2qDdfnVhFxYSUg6eADduJ3uj"), PlatformTag::RaydiumLaunchpad);
        m.insert(pk("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo"), PlatformTag::MeteoraDlmm);
        m.insert(pk("dbcij3LWUppWqq96dh6gJWwBifmcGfLSB5D4DuSMaqN"), PlatformTag::MeteoraDbc);
        m.insert(pk("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc"), PlatformTag::OrcaWhirlpool);
        m.insert(pk("MoonCVVNZFSYkqNXP6bxHLPL6QQJiMagDL3qcqUQTrG"), PlatformTag::PumpfunAmm);
        m
    })
}

/// Router/aggregator programs: eligible as a *candidate* core instruction,
/// but rewalked away from when a `pumpfun_*` hit exists (spec §4.4's
/// "rewalk" rule), and never treated as a known helper program in the
/// priority-3 fallback.
fn router_programs() -> &'static HashMap<Pubkey, PlatformTag> {
    use std::sync::OnceLock;
    static TABLE: OnceLock<HashMap<Pubkey, PlatformTag>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(pk("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4"), PlatformTag::JupiterRouter);
        m.insert(pk("DCA265Vj8a9CEuX1eb1LWRnDT7uK6q1xMipnNyatn23M"), PlatformTag::JupiterRouter);
        m
    })
}

/// Known helper programs that are never the core instruction even when
/// they reference the master (system transfer, compute-budget, ATA
/// creation, token program instructions that aren't the swap itself).
fn helper_programs() -> &'static std::collections::HashSet<Pubkey> {
    use std::sync::OnceLock;
    static TABLE: OnceLock<std::collections::HashSet<Pubkey>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            pk("11111111111111111111111111111111"),
            pk("ComputeBudget111111111111111111111111111111"),
            pk("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL"),
            pk("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"),
        ]
        .into_iter()
        .collect()
    })
}

fn pk(s: &str) -> Pubkey {
    Pubkey::from_str(s).expect("hardcoded program id must parse")
}

fn is_ata_creator(program_id: &Pubkey) -> bool {
    *program_id == pk("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL")
}

/// Flattened `(instruction_index, &RawInstruction)` view across outer and
/// inner instructions, ordered outer-then-inner the way §4.4 "walks
/// instructions in order" (the teacher's scanner checks outer fully before
/// any inner group, so ties resolve the same way here).
fn ordered_candidates(tx: &RawTx) -> Vec<(usize, &crate::types::RawInstruction)> {
    let mut out: Vec<(usize, &crate::types::RawInstruction)> = tx.instructions.iter().enumerate().collect();
    for (_outer_idx, inner) in &tx.inner_instructions {
        for ix in inner {
            out.push((out.len(), ix));
        }
    }
    out
}

fn platform_tag_for(program_id: &Pubkey) -> PlatformTag {
    dex_programs()
        .get(program_id)
        .copied()
        .or_else(|| router_programs().get(program_id).copied())
        .unwrap_or(PlatformTag::Unknown)
}

fn is_dex_or_router(program_id: &Pubkey) -> bool {
    dex_programs().contains_key(program_id) || router_programs().contains_key(program_id)
}

pub fn locate(tx: &RawTx, master: Pubkey) -> Result<CoreInstruction, LocatorError> {
    let candidates = ordered_candidates(tx);
    let is_signer_0 = tx.account_keys.first() == Some(&master);

    let mut pick: Option<(usize, &crate::types::RawInstruction)> = None;

    if is_signer_0 {
        // Priority 1: signer index 0 is the master -> first non-system,
        // non-compute-budget instruction in DEX_PROGRAMS ∪ ROUTER_PROGRAMS.
        pick = candidates.iter().find(|(_, ix)| is_dex_or_router(&ix.program_id)).copied();
    }

    if pick.is_none() {
        // Priority 2: first instruction referencing the master whose
        // program is in the same set.
        pick = candidates
            .iter()
            .find(|(_, ix)| is_dex_or_router(&ix.program_id) && ix.accounts.iter().any(|a| a.pubkey == master))
            .copied();
    }

    if pick.is_none() {
        // Priority 3: fall back to any instruction referencing the master
        // that is not a known helper program.
        pick = candidates
            .iter()
            .find(|(_, ix)| ix.accounts.iter().any(|a| a.pubkey == master) && !helper_programs().contains(&ix.program_id))
            .copied();
    }

    let (index, instruction) = pick.ok_or(LocatorError::NoCore)?;

    let mut platform_tag = platform_tag_for(&instruction.program_id);

    // "when the primary hit is pumpfun_* the locator rewalks to ensure the
    // selected instruction is the platform-specific one (not a router
    // wrapper)" — spec §4.4.
    if matches!(platform_tag, PlatformTag::JupiterRouter) {
        if let Some((bc_index, bc_ix)) = candidates
            .iter()
            .find(|(_, ix)| matches!(dex_programs().get(&ix.program_id), Some(PlatformTag::PumpfunBc) | Some(PlatformTag::PumpfunAmm)))
        {
            platform_tag = platform_tag_for(&bc_ix.program_id);
            return finish(tx, *bc_index, bc_ix, platform_tag);
        }
    }

    finish(tx, index, instruction, platform_tag)
}

fn finish(
    tx: &RawTx,
    index: usize,
    instruction: &crate::types::RawInstruction,
    platform_tag: PlatformTag,
) -> Result<CoreInstruction, LocatorError> {
    // Account-index bounds are enforced at normalization time (C5):
    // `ingress::instruction_accounts`/`program_id_at` reject any instruction
    // whose indices fall outside `full_account_keys` before a `RawTx` ever
    // reaches this locator, so every `AccountRef` here is already resolved.

    // §4.4 failure mode: the selected program is an ATA creator AND no
    // balance change is observed.
    if is_ata_creator(&instruction.program_id) && tx.token_deltas.is_empty() && tx.native_deltas.is_empty() {
        return Err(LocatorError::NoCore);
    }

    Ok(CoreInstruction {
        program_id: instruction.program_id,
        accounts: instruction.accounts.clone(),
        data: instruction.data.clone(),
        platform_tag,
        instruction_index: index,
    })
}
