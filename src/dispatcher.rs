//! C10 — Dispatcher (spec §4.6). Applies the pre-send compute-unit limit
//! and priority fee, signs against the chosen anchor, picks a send target
//! via C3, submits through C2, and confirms. The teacher has no
//! counterpart (solflow never submits); grounded directly on spec §4.6 and
//! the send/tip shape in `other_examples/.../ronaldslwong-copyrust::build_tx::tx_builder`.

use crate::error::DispatchError;
use crate::leader::{leader_hint, LeaderTracker};
use crate::network::NetworkClient;
use crate::types::{ClonedTransaction, Commitment, DispatchResult, PlatformTag, RecentAnchor};
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_hash::Hash;
use solana_instruction::Instruction;
use solana_keypair::Keypair;
use solana_message::{Message, VersionedMessage};
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use std::str::FromStr;
use std::time::{Duration, Instant};

const PLATFORM_CU_DEFAULT_BONDING_CURVE: u32 = 1_200_000;
const PLATFORM_CU_DEFAULT_OTHER: u32 = 600_000;
const PRIORITY_FEE_FRACTION: f64 = 0.15;
const PRIORITY_FEE_CAP_MICRO_LAMPORTS: u64 = 1_000_000;

const NONCE_POLL_INTERVAL: Duration = Duration::from_millis(50);
const NONCE_POLL_BUDGET: Duration = Duration::from_millis(1_000);
const REGULAR_POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Compute-unit limit for a dispatch: the master's observed limit when the
/// source transaction set one, otherwise a platform default (spec §4.6,
/// Open Question 3 decision recorded in DESIGN.md).
pub fn compute_unit_limit(observed: Option<u32>, platform_tag: PlatformTag) -> u32 {
    match observed {
        Some(limit) if limit > 0 => limit,
        _ => {
            if platform_tag.is_bonding_curve() {
                PLATFORM_CU_DEFAULT_BONDING_CURVE
            } else {
                PLATFORM_CU_DEFAULT_OTHER
            }
        }
    }
}

/// Priority fee in micro-lamports-per-CU pricing: `min(max(floor(native_in *
/// 0.15), tip_floor), 1_000_000)` per transaction (Open Question 2
/// decision). `tip_floor` is `Config::default_jito_tip_lamports`, read as a
/// floor in the same micro-lamports-per-CU unit so a master's smallest
/// trade still prices competitively against the tip the operator has
/// configured as a baseline.
pub fn priority_fee_micro_lamports(user_native_in: u64, tip_floor: u64) -> u64 {
    let scaled = (user_native_in as f64 * PRIORITY_FEE_FRACTION).floor() as u64;
    scaled.max(tip_floor).min(PRIORITY_FEE_CAP_MICRO_LAMPORTS)
}

fn build_transaction(cloned: &ClonedTransaction, signer: &Keypair) -> Result<VersionedTransaction, DispatchError> {
    let mut instructions: Vec<Instruction> = vec![
        ComputeBudgetInstruction::set_compute_unit_limit(cloned.compute_unit_limit),
        ComputeBudgetInstruction::set_compute_unit_price(cloned.priority_fee_micro_lamports),
    ];
    for ix in &cloned.instructions {
        instructions.push(Instruction {
            program_id: ix.program_id,
            accounts: ix.accounts.iter().map(|a| solana_instruction::AccountMeta { pubkey: a.pubkey, is_signer: a.is_signer, is_writable: a.is_writable }).collect(),
            data: ix.data.clone(),
        });
    }

    let blockhash = match &cloned.recent_anchor {
        RecentAnchor::Blockhash { blockhash, .. } => Hash::from_str(blockhash).map_err(|e| DispatchError::SubmitFailed(e.to_string()))?,
        RecentAnchor::Nonce { current_nonce, .. } => Hash::from_str(current_nonce).map_err(|e| DispatchError::SubmitFailed(e.to_string()))?,
    };

    let message = Message::new_with_blockhash(&instructions, Some(&signer.pubkey()), &blockhash);
    let versioned_message = VersionedMessage::Legacy(message);
    VersionedTransaction::try_new(versioned_message, &[signer]).map_err(|e| DispatchError::SubmitFailed(e.to_string()))
}

async fn confirm_nonce(network: &dyn NetworkClient, signature: &str) -> Result<(), DispatchError> {
    let deadline = Instant::now() + NONCE_POLL_BUDGET;
    loop {
        if let Some(status) = network.get_signature_status(signature).await.map_err(|e| DispatchError::SubmitFailed(e.to_string()))? {
            if let Some(err) = status.err {
                return Err(DispatchError::ConfirmedOnChainError(err));
            }
            if matches!(status.commitment, Some(crate::types::Commitment::Confirmed) | Some(crate::types::Commitment::Finalized)) {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(DispatchError::ConfirmTimeout);
        }
        tokio::time::sleep(NONCE_POLL_INTERVAL).await;
    }
}

async fn confirm_regular(network: &dyn NetworkClient, signature: &str, valid_until_height: u64) -> Result<(), DispatchError> {
    loop {
        if let Some(status) = network.get_signature_status(signature).await.map_err(|e| DispatchError::SubmitFailed(e.to_string()))? {
            if let Some(err) = status.err {
                return Err(DispatchError::ConfirmedOnChainError(err));
            }
            if matches!(status.commitment, Some(crate::types::Commitment::Confirmed) | Some(crate::types::Commitment::Finalized)) {
                return Ok(());
            }
        }
        let current_height = network.get_current_slot(Commitment::Processed).await.map_err(|e| DispatchError::SubmitFailed(e.to_string()))?;
        if current_height > valid_until_height {
            return Err(DispatchError::ConfirmTimeout);
        }
        tokio::time::sleep(REGULAR_POLL_INTERVAL).await;
    }
}

/// Dispatches a cloned transaction: finalizes compute-unit limit/priority
/// fee, signs, picks a send target via C3, submits, and confirms.
pub async fn dispatch(
    mut cloned: ClonedTransaction,
    observed_compute_unit_limit: Option<u32>,
    user_native_in: u64,
    tip_floor_micro_lamports: u64,
    signer: &Keypair,
    leader_tracker: &LeaderTracker,
    network: &dyn NetworkClient,
    skip_confirmation: bool,
) -> DispatchResult {
    cloned.compute_unit_limit = compute_unit_limit(observed_compute_unit_limit, cloned.platform_tag);
    cloned.priority_fee_micro_lamports = priority_fee_micro_lamports(user_native_in, tip_floor_micro_lamports);

    let started = Instant::now();
    let hint = leader_hint(leader_tracker);
    let target = hint.endpoint.clone().unwrap_or_else(|| "default-rpc".to_string());

    let tx = match build_transaction(&cloned, signer) {
        Ok(tx) => tx,
        Err(e) => {
            return DispatchResult { success: false, signature: None, latency_ms: started.elapsed().as_millis() as u64, target, err: Some(e.to_string()) };
        }
    };

    let serialized = match bincode::serialize(&tx) {
        Ok(bytes) => bytes,
        Err(e) => {
            return DispatchResult { success: false, signature: None, latency_ms: started.elapsed().as_millis() as u64, target, err: Some(e.to_string()) };
        }
    };

    let signature = match network.submit(&serialized, hint.endpoint.as_deref()).await {
        Ok(sig) => sig,
        Err(e) => {
            return DispatchResult { success: false, signature: None, latency_ms: started.elapsed().as_millis() as u64, target, err: Some(e.to_string()) };
        }
    };

    if skip_confirmation {
        return DispatchResult { success: true, signature: Some(signature), latency_ms: started.elapsed().as_millis() as u64, target, err: None };
    }

    let confirmation = match &cloned.recent_anchor {
        RecentAnchor::Nonce { .. } => confirm_nonce(network, &signature).await,
        RecentAnchor::Blockhash { valid_until_height, .. } => confirm_regular(network, &signature, *valid_until_height).await,
    };

    match confirmation {
        Ok(()) => DispatchResult { success: true, signature: Some(signature), latency_ms: started.elapsed().as_millis() as u64, target, err: None },
        Err(e) => DispatchResult { success: false, signature: Some(signature), latency_ms: started.elapsed().as_millis() as u64, target, err: Some(e.to_string()) },
    }
}
