//! C12 — Pipeline Orchestrator. Drives the per-transaction state machine
//! (spec §4.7): filter -> analyze -> locate -> lock -> clone -> dispatch ->
//! verify -> release, for every per-user trading configuration subscribed to
//! a master wallet. Grounded on the teacher's `state.rs::state_aggregator_task`
//! (a single channel-driven background task folding events into shared
//! state), generalized here into the full state machine that also reaches
//! out to C6 through C10 instead of only updating an in-memory aggregate.

use crate::analyzer;
use crate::cloner;
use crate::dispatcher;
use crate::error::OrchestratorReject;
use crate::golden_filter::GoldenFilter;
use crate::leader::LeaderTracker;
use crate::locator;
use crate::network::NetworkClient;
use crate::state_store::StateStore;
use crate::types::{Commitment, DispatchResult, Position, RawTx, TradeType, UserTradingConfig};
use crate::vault::keypair_store::KeyVault;
use solana_program_pack::Pack;
use solana_pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;
use std::time::Duration;

/// Abstraction over the position persistence the orchestrator reads/clamps
/// sell amounts against and writes back to on confirmed dispatch. Kept as a
/// trait here (rather than a direct `persistence.rs` dependency) so the
/// orchestrator's state machine is testable without a real sqlite file, the
/// same separation `NetworkClient` already gives C9/C10.
#[async_trait::async_trait]
pub trait PositionStore: Send + Sync {
    async fn get(&self, user_id: &str, mint: &str) -> Position;
    async fn apply_token_delta(&self, user_id: &str, mint: &str, token_delta_raw: i128, native_spent_raw: u128, now_ts: i64);
}

/// Outcome of running one `RawTx` through the full pipeline for one user's
/// trading configuration. Every non-`Verified` outcome is terminal and
/// carries no side effect beyond whatever step it failed at.
#[derive(Debug)]
pub enum Outcome {
    FilteredOut(crate::error::FilterReason),
    AnalyzerRejected(crate::error::AnalyzerError),
    NoCoreInstruction(crate::error::LocatorError),
    Rejected(OrchestratorReject),
    ClonerFailed(crate::error::ClonerError),
    Verified(DispatchResult),
    Unverified(DispatchResult),
}

/// Process-wide dedup set keyed `(master, signature)` (spec §4.9). A thin,
/// typed wrapper over C4's raw KV so call sites don't reinvent the key
/// format; kept separate from `poller::SeenSignatures`, which only avoids
/// refetching a page and has no cross-source authority.
pub struct DedupSet<'a> {
    store: &'a StateStore,
    ttl: Duration,
}

impl<'a> DedupSet<'a> {
    /// `ttl` comes from `Config::dedup_ttl_seconds` (spec §4.9's default is
    /// 120s, but callers own the value rather than this module hardcoding it).
    pub fn new(store: &'a StateStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(master: Pubkey, signature: &str) -> String {
        format!("dedup:{master}:{signature}")
    }

    /// Inserts the key if absent. Returns `true` if this call is the first
    /// to see `(master, signature)` — spec §4.9 requires the insert to
    /// happen *before* analysis runs. The key is per-transaction, not
    /// per-subscriber: callers check this once for a `(master, signature)`
    /// pair before fanning the transaction out to every subscribed user's
    /// `process_for_user`, not once per user.
    pub fn insert_if_new(&self, master: Pubkey, signature: &str) -> bool {
        self.store.set_nx_ex(&Self::key(master, signature), b"1", self.ttl)
    }
}

fn buy_lock_key(output_mint: &str) -> String {
    format!("lock:buy:{output_mint}")
}

/// Reads a user's associated-token-account balance for the position
/// write-back's post-confirmation read (spec §4.7). Returns `0` if the
/// account doesn't exist yet or doesn't unpack as an SPL token account —
/// both are the correct "nothing held" reading for a brand-new ATA.
async fn token_account_balance(network: &dyn NetworkClient, ata: &Pubkey) -> u64 {
    match network.get_account_info(ata, Commitment::Confirmed).await {
        Ok(Some(data)) => spl_token::state::Account::unpack(&data).map(|account| account.amount).unwrap_or(0),
        _ => 0,
    }
}

/// Runs the full state machine for one observed transaction against one
/// user's trading configuration. `master` is the wallet being mirrored;
/// `current_slot` comes from C3 and feeds the golden filter's freshness
/// check. Callers are expected to have already cleared the `(master,
/// signature)` pair through `DedupSet` once, before calling this per
/// subscribed user — see `DedupSet::insert_if_new`.
#[allow(clippy::too_many_arguments)]
pub async fn process_for_user(
    tx: &RawTx,
    master: Pubkey,
    current_slot: u64,
    user: &UserTradingConfig,
    min_buy_native_raw: u64,
    lock_ttl: Duration,
    default_jito_tip_lamports: u64,
    filter: &GoldenFilter<'_>,
    locks: &StateStore,
    positions: &dyn PositionStore,
    vault: &KeyVault,
    leader_tracker: &LeaderTracker,
    network: &dyn NetworkClient,
) -> Outcome {
    if let Err(reason) = filter.check(tx, master, current_slot) {
        return Outcome::FilteredOut(reason);
    }

    let intent = match analyzer::analyze(tx, master) {
        Ok(intent) => intent,
        Err(e) => return Outcome::AnalyzerRejected(e),
    };

    let core = match locator::locate(tx, master) {
        Ok(core) => core,
        Err(e) => return Outcome::NoCoreInstruction(e),
    };

    let trading_pubkey = match vault.trading_pubkey(&user.user_id) {
        Ok(pk) => pk,
        Err(_) => return Outcome::Rejected(OrchestratorReject::PositionMissing),
    };

    let (scaled_amount, lock_key) = match intent.trade_type {
        TradeType::Sell => {
            let position = positions.get(&user.user_id, &intent.input_mint).await;
            if position.is_empty() {
                return Outcome::Rejected(OrchestratorReject::PositionMissing);
            }
            let clamped = intent.input_amount_raw.min(position.amount_raw.min(u64::MAX as u128) as u64);
            (clamped, None)
        }
        TradeType::Buy | TradeType::Swap => {
            let sized = (intent.input_amount_raw as f64 * user.scale_factor).floor() as u64;
            if sized < min_buy_native_raw {
                return Outcome::Rejected(OrchestratorReject::TooSmall);
            }
            (sized, Some(buy_lock_key(&intent.output_mint)))
        }
    };

    // Lock contract (spec §4.7): buys lock per output mint, sells are never
    // locked so they can't be starved behind a pending buy.
    let lock_held = if let Some(key) = &lock_key { !locks.set_nx_ex(key, tx.signature.as_bytes(), lock_ttl) } else { false };
    if lock_held {
        return Outcome::Rejected(OrchestratorReject::DuplicateInFlight);
    }

    let credited_mint: &str = match intent.trade_type {
        TradeType::Sell => &intent.input_mint,
        TradeType::Buy | TradeType::Swap => &intent.output_mint,
    };
    let credited_ata = Pubkey::from_str(credited_mint).ok().map(|mint| get_associated_token_address(&trading_pubkey, &mint));
    let pre_balance = match &credited_ata {
        Some(ata) => token_account_balance(network, ata).await,
        None => 0,
    };

    let result = run_clone_and_dispatch(&core, &intent, master, trading_pubkey, user, vault, leader_tracker, network, scaled_amount, default_jito_tip_lamports).await;

    if let Some(key) = &lock_key {
        locks.del(key);
    }

    match result {
        Ok(dispatch_result) if dispatch_result.success => {
            // Post-confirmation read (spec §4.7): the realized delta comes
            // from the user's own account state, not the master's observed
            // amounts, since slippage/scaling mean the two can diverge.
            let realized_delta: i128 = match &credited_ata {
                Some(ata) => {
                    let post_balance = token_account_balance(network, ata).await;
                    post_balance as i128 - pre_balance as i128
                }
                None => match intent.trade_type {
                    TradeType::Sell => -(scaled_amount as i128),
                    TradeType::Buy | TradeType::Swap => intent.output_amount_raw as i128,
                },
            };
            let native_spent_raw: u128 = match intent.trade_type {
                TradeType::Sell => 0,
                TradeType::Buy | TradeType::Swap => scaled_amount as u128,
            };
            positions.apply_token_delta(&user.user_id, credited_mint, realized_delta, native_spent_raw, tx.block_time.unwrap_or(0)).await;
            Outcome::Verified(dispatch_result)
        }
        Ok(dispatch_result) => Outcome::Unverified(dispatch_result),
        Err(e) => Outcome::ClonerFailed(e),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_clone_and_dispatch(
    core: &crate::types::CoreInstruction,
    intent: &crate::types::TradeIntent,
    master: Pubkey,
    user_pubkey: Pubkey,
    user: &UserTradingConfig,
    vault: &KeyVault,
    leader_tracker: &LeaderTracker,
    network: &dyn NetworkClient,
    scaled_amount: u64,
    default_jito_tip_lamports: u64,
) -> Result<DispatchResult, crate::error::ClonerError> {
    let material = vault.material_for(&user.user_id).map_err(|_| crate::error::ClonerError::AtaDeriveFailed)?;

    let cloned = cloner::clone_trade(core, intent, master, user_pubkey, material.nonce.as_ref(), network, scaled_amount).await?;

    let native_in = match intent.trade_type {
        TradeType::Buy | TradeType::Swap => scaled_amount,
        TradeType::Sell => 0,
    };

    let result =
        dispatcher::dispatch(cloned, intent.observed_compute_unit_limit, native_in, default_jito_tip_lamports, &material.keypair, leader_tracker, network, false).await;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TTL: Duration = Duration::from_secs(20);

    #[test]
    fn dedup_insert_is_first_writer_wins() {
        let store = StateStore::new();
        let dedup = DedupSet::new(&store, TEST_TTL);
        let master = Pubkey::new_unique();
        assert!(dedup.insert_if_new(master, "sig-a"));
        assert!(!dedup.insert_if_new(master, "sig-a"));
    }

    #[test]
    fn dedup_is_scoped_per_master_and_signature_pair() {
        let store = StateStore::new();
        let dedup = DedupSet::new(&store, TEST_TTL);
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        assert!(dedup.insert_if_new(a, "sig-shared"));
        assert!(dedup.insert_if_new(b, "sig-shared"));
    }

    #[test]
    fn buy_lock_key_is_scoped_to_output_mint() {
        assert_eq!(buy_lock_key("MintA"), "lock:buy:MintA");
        assert_ne!(buy_lock_key("MintA"), buy_lock_key("MintB"));
    }

    #[test]
    fn buy_lock_contract_rejects_second_concurrent_holder() {
        let store = StateStore::new();
        let key = buy_lock_key("MintX");
        assert!(store.set_nx_ex(&key, b"sig-1", TEST_TTL));
        assert!(!store.set_nx_ex(&key, b"sig-2", TEST_TTL));
        store.del(&key);
        assert!(store.set_nx_ex(&key, b"sig-3", TEST_TTL));
    }
}
