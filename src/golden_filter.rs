//! C6 — Golden Filter. Cheap pre-checks before expensive analysis (spec
//! §4.2). Grounded on the teacher's `streamer_core::blocklist_checker`
//! (fail-open check before any further processing) for the optional mint
//! blocklist (AMBIENT-6); the freshness/error/delta checks are new (the
//! teacher never filtered on slot age since it only observed, never
//! dispatched).

use crate::config::Config;
use crate::error::FilterReason;
use crate::types::RawTx;
use solana_pubkey::Pubkey;

/// Optional operator-editable mint blocklist, consulted before economic
/// analysis runs. Fails open on store errors (logged at `debug`), same
/// discipline as `streamer_core::blocklist_checker::BlocklistChecker`.
pub trait MintBlocklist: Send + Sync {
    fn is_blocked(&self, mint: &str) -> Result<bool, String>;
}

pub struct GoldenFilter<'a> {
    config: &'a Config,
    blocklist: Option<&'a dyn MintBlocklist>,
}

impl<'a> GoldenFilter<'a> {
    pub fn new(config: &'a Config, blocklist: Option<&'a dyn MintBlocklist>) -> Self {
        Self { config, blocklist }
    }

    /// Runs the four cheap pre-checks in the order spec §4.2 lists them.
    /// `current_slot` comes from C3; `age_slots` is computed as
    /// `current_slot.saturating_sub(tx.slot)` and compared against a
    /// horizon expressed in slots (≈ 2.5 slots/second on this network,
    /// matching the teacher's 9-decimal SOL assumption for the same kind
    /// of "pick a network constant" decision).
    pub fn check(&self, tx: &RawTx, master: Pubkey, current_slot: u64) -> Result<(), FilterReason> {
        if tx.err {
            return Err(FilterReason::OnChainError);
        }

        const SLOTS_PER_SECOND: u64 = 2; // conservative floor on a ~400ms slot time
        let horizon_slots = self.config.max_age_seconds * SLOTS_PER_SECOND;
        let age_slots = current_slot.saturating_sub(tx.slot);
        if age_slots > horizon_slots {
            return Err(FilterReason::TooOld);
        }

        let native_delta_abs: u128 = tx
            .native_deltas
            .iter()
            .map(|d| d.raw_change.unsigned_abs())
            .max()
            .unwrap_or(0);
        if native_delta_abs < self.config.min_native_delta_raw as u128 {
            return Err(FilterReason::BelowMinDelta);
        }

        let owner_touched = tx.token_deltas.iter().any(|d| d.owner == Some(master));
        if !owner_touched {
            return Err(FilterReason::NoOwnerTokenChange);
        }

        if let Some(blocklist) = self.blocklist {
            if let Some(mint) = tx.token_deltas.iter().find(|d| d.owner == Some(master)).map(|d| d.mint.clone()) {
                match blocklist.is_blocked(&mint) {
                    Ok(true) => return Err(FilterReason::Blocklisted),
                    Ok(false) => {}
                    Err(e) => log::debug!("blocklist check failed for {mint}, failing open: {e}"),
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BalanceDelta;

    fn base_config() -> Config {
        Config {
            endpoints: crate::config::Endpoints {
                rpc: "http://localhost".into(),
                ws: String::new(),
                stream: "http://localhost".into(),
                sender: None,
                x_token: None,
            },
            wallet_encryption_key: "k".into(),
            min_buy_native_raw: 1_000_000,
            max_age_seconds: 30,
            default_jito_tip_lamports: 10_000,
            lock_ttl_seconds: 20,
            dedup_ttl_seconds: 120,
            poller_interval_seconds: 25,
            worker_pool_count: 32,
            min_native_delta_raw: 100_000,
            sqlite_path: ":memory:".into(),
            janitor_mcap_threshold: None,
            janitor_grace: None,
            rust_log: None,
        }
    }

    fn base_tx(master: Pubkey, slot: u64) -> RawTx {
        RawTx {
            signature: "sig".into(),
            slot,
            trader_id: master,
            block_time: None,
            account_keys: vec![master],
            instructions: vec![],
            inner_instructions: vec![],
            err: false,
            native_deltas: vec![BalanceDelta {
                account_index: 0,
                mint: crate::types::NATIVE_MINT.into(),
                owner: Some(master),
                raw_change: -200_000,
                decimals: 9,
                is_native: true,
            }],
            token_deltas: vec![BalanceDelta {
                account_index: 1,
                mint: "MintXXXX".into(),
                owner: Some(master),
                raw_change: 500,
                decimals: 6,
                is_native: false,
            }],
            observed_compute_unit_limit: None,
        }
    }

    #[test]
    fn accepts_delta_exactly_at_min_native_delta() {
        let config = base_config();
        let master = Pubkey::new_unique();
        let mut tx = base_tx(master, 100);
        tx.native_deltas[0].raw_change = -(config.min_native_delta_raw as i128);
        let filter = GoldenFilter::new(&config, None);
        assert!(filter.check(&tx, master, 100).is_ok());
    }

    #[test]
    fn rejects_on_chain_error() {
        let config = base_config();
        let master = Pubkey::new_unique();
        let mut tx = base_tx(master, 100);
        tx.err = true;
        let filter = GoldenFilter::new(&config, None);
        assert_eq!(filter.check(&tx, master, 100), Err(FilterReason::OnChainError));
    }

    #[test]
    fn age_exactly_at_horizon_is_accepted_one_past_is_rejected() {
        let config = base_config();
        let master = Pubkey::new_unique();
        let horizon_slots = config.max_age_seconds * 2;
        let tx_at_horizon = base_tx(master, 0);
        let filter = GoldenFilter::new(&config, None);
        assert!(filter.check(&tx_at_horizon, master, horizon_slots).is_ok());

        let tx_one_past = base_tx(master, 0);
        assert_eq!(filter.check(&tx_one_past, master, horizon_slots + 1), Err(FilterReason::TooOld));
    }

    #[test]
    fn rejects_when_no_token_delta_owned_by_master() {
        let config = base_config();
        let master = Pubkey::new_unique();
        let mut tx = base_tx(master, 100);
        tx.token_deltas.clear();
        let filter = GoldenFilter::new(&config, None);
        assert_eq!(filter.check(&tx, master, 100), Err(FilterReason::NoOwnerTokenChange));
    }
}
