//! §6 operator action surface — the eight verbs an external operator
//! interface (explicitly out of scope per §1) drives against this crate.
//! The teacher has no equivalent surface (solflow is read-only); each verb
//! is modeled directly on spec §6 and, per its closing sentence, triggers a
//! C5 resync so the stream subscription always reflects the latest active
//! set.

use crate::error::OperatorError;
use crate::ingress::StreamIngress;
use crate::persistence::{Store, WithdrawalRecord};
use crate::vault::KeyVault;
use solana_pubkey::Pubkey;
use std::sync::Arc;

pub struct Operator {
    store: Arc<Store>,
    vault: Arc<KeyVault>,
    ingress: Arc<StreamIngress>,
}

impl Operator {
    pub fn new(store: Arc<Store>, vault: Arc<KeyVault>, ingress: Arc<StreamIngress>) -> Self {
        Self { store, vault, ingress }
    }

    async fn resync(&self) -> Result<(), OperatorError> {
        let wallets = self.store.all_active_wallets()?;
        self.ingress.resync(wallets.into_iter().collect()).await;
        Ok(())
    }

    fn trader_by_name(&self, user_id: &str, name: &str) -> Result<Pubkey, OperatorError> {
        self.store
            .traders_for_user(user_id)?
            .into_iter()
            .find(|t| t.display_name == name)
            .map(|t| t.wallet)
            .ok_or_else(|| OperatorError::TraderNotFound(name.to_string(), user_id.to_string()))
    }

    pub async fn add_trader(&self, user_id: &str, name: &str, wallet: Pubkey) -> Result<(), OperatorError> {
        self.store.add_user(user_id)?;
        self.store.add_trader(user_id, wallet, name)?;
        self.resync().await
    }

    pub async fn remove_trader(&self, user_id: &str, name: &str) -> Result<(), OperatorError> {
        let wallet = self.trader_by_name(user_id, name)?;
        self.store.remove_trader(user_id, wallet)?;
        self.resync().await
    }

    pub async fn activate(&self, user_id: &str, name: &str) -> Result<(), OperatorError> {
        let wallet = self.trader_by_name(user_id, name)?;
        self.store.set_trader_active(user_id, wallet, true)?;
        self.resync().await
    }

    pub async fn deactivate(&self, user_id: &str, name: &str) -> Result<(), OperatorError> {
        let wallet = self.trader_by_name(user_id, name)?;
        self.store.set_trader_active(user_id, wallet, false)?;
        self.resync().await
    }

    /// Spec §6 config table: `USER_SCALE_FACTOR` must fall in `(0, 1]`.
    pub async fn set_scale_factor(&self, user_id: &str, factor: f64) -> Result<(), OperatorError> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(OperatorError::InvalidScaleFactor(factor));
        }
        self.store.set_scale_factor(user_id, factor)?;
        Ok(())
    }

    pub async fn set_slippage_bps(&self, user_id: &str, bps: u16) -> Result<(), OperatorError> {
        self.store.set_slippage_bps(user_id, bps)?;
        Ok(())
    }

    /// Records a withdrawal against the user's bounded history (§6). Balance
    /// sufficiency is judged against the persisted position for `mint`; this
    /// module never touches the chain itself, it only records intent and
    /// clamps history — the actual transfer is the caller's (C1/C2's)
    /// responsibility.
    pub async fn withdraw(&self, user_id: &str, mint: &str, to: &str, amount_raw: u128, now_ts: i64) -> Result<(), OperatorError> {
        let position = self.store.get_position(user_id, mint)?;
        if amount_raw > position.amount_raw {
            return Err(OperatorError::InsufficientBalance);
        }
        self.store.record_withdrawal(&WithdrawalRecord { user_id: user_id.to_string(), mint: mint.to_string(), amount_raw, destination: to.to_string(), ts: now_ts })?;
        Ok(())
    }

    /// Clears a user's traders, trading wallet, and positions, then resyncs
    /// so any wallets the reset de-subscribes are dropped from C5.
    pub async fn reset_data(&self, user_id: &str) -> Result<(), OperatorError> {
        for trader in self.store.traders_for_user(user_id)? {
            self.store.remove_trader(user_id, trader.wallet)?;
        }
        self.vault.clear_nonce_account(user_id);
        self.resync().await
    }
}
