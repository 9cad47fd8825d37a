//! mirrorflow — real-time copy-trading engine. Observes master wallets,
//! clones their swaps for locally-held signers, and dispatches ahead of the
//! leader window. The module layout mirrors the twelve components of the
//! pipeline; see `DESIGN.md` for what each one is grounded on.
//!
//! Wiring follows the builder shape called for once the teacher's
//! constructor-then-inject pattern is replaced: leaves (C1 vault, C2
//! network, C3 leader tracker, C4 state store) are constructed first in
//! [`Engine::build`] and handed by reference into every consumer; nothing
//! downstream holds a back-pointer into anything upstream.

pub mod account_keys;
pub mod analyzer;
pub mod cloner;
pub mod config;
pub mod dispatcher;
pub mod empty_decoder;
pub mod error;
pub mod golden_filter;
pub mod ingress;
pub mod leader;
pub mod locator;
pub mod network;
pub mod operator;
pub mod orchestrator;
pub mod persistence;
pub mod poller;
pub mod state_store;
pub mod streamer_core;
pub mod types;
pub mod vault;

use async_trait::async_trait;
use config::Config;
use dashmap::DashMap;
use error::ConfigError;
use ingress::StreamIngress;
use leader::LeaderTracker;
use network::{NetworkClient, RpcNetworkClient};
use operator::Operator;
use orchestrator::PositionStore;
use persistence::Store;
use poller::{CircuitState, FallbackPoller};
use state_store::StateStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use types::Position;
use vault::{AesGcmSecretStore, KeyVault};

/// Adapts the synchronous, sqlite-backed [`Store`] to the async
/// [`PositionStore`] seam C12 depends on. Sqlite calls here are fast
/// (single mutex-guarded statement each), so wrapping them in an `async fn`
/// that never actually awaits is sufficient; this exists purely to satisfy
/// the trait boundary without giving C12 a direct dependency on rusqlite.
pub struct SqlitePositionStore {
    store: Arc<Store>,
}

impl SqlitePositionStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PositionStore for SqlitePositionStore {
    async fn get(&self, user_id: &str, mint: &str) -> Position {
        self.store.get_position(user_id, mint).unwrap_or_default()
    }

    async fn apply_token_delta(&self, user_id: &str, mint: &str, token_delta_raw: i128, native_spent_raw: u128, now_ts: i64) {
        if let Err(e) = self.store.apply_token_delta(user_id, mint, token_delta_raw, native_spent_raw, now_ts) {
            log::error!("failed to persist position delta for {user_id}/{mint}: {e}");
        }
    }
}

/// Everything a running instance of the engine needs. Built once at
/// startup by [`Engine::build`]; `main.rs` only drives the run loops this
/// struct hands back.
pub struct Engine {
    pub config: Config,
    pub vault: Arc<KeyVault>,
    pub network: Arc<dyn NetworkClient>,
    pub leader_tracker: Arc<LeaderTracker>,
    pub state_store: Arc<StateStore>,
    pub store: Arc<Store>,
    pub positions: Arc<SqlitePositionStore>,
    pub ingress: Arc<StreamIngress>,
    pub operator: Arc<Operator>,
}

/// Background channels `main.rs` needs to wire the ingress run loop and
/// the orchestrator's consumption of its events, handed back alongside the
/// `Engine` rather than stashed as fields so nothing in `Engine` itself
/// needs a `&mut self` run method.
pub struct EngineChannels {
    pub active_masters_rx: watch::Receiver<HashSet<solana_pubkey::Pubkey>>,
    pub ingress_event_tx: mpsc::Sender<ingress::IngressEvent>,
    pub ingress_event_rx: mpsc::Receiver<ingress::IngressEvent>,
    pub poller: FallbackPoller,
    pub poller_tx: mpsc::Sender<types::RawTx>,
    pub poller_rx: mpsc::Receiver<types::RawTx>,
    /// Toggled by `main.rs` on `IngressEvent::StreamDegraded`/`StreamHealthy`
    /// so the already-running poller task picks up the transition on its
    /// next tick (spec §4.8).
    pub circuit_tx: watch::Sender<CircuitState>,
}

impl Engine {
    /// Constructs C1 through C4 as leaves, then every consumer that needs
    /// them, loading every active trader's key material and trading
    /// configuration from persistence so the vault and wallet set are
    /// warm before the first event arrives.
    pub fn build(config: Config) -> Result<(Self, EngineChannels), ConfigError> {
        // C1 — Key/Nonce Vault.
        let secret_store = Arc::new(AesGcmSecretStore::new(&config.wallet_encryption_key));
        let vault = Arc::new(KeyVault::new(secret_store));

        // C2 — Network Client.
        let network: Arc<dyn NetworkClient> = Arc::new(RpcNetworkClient::new(config.endpoints.rpc.clone()));

        // C3 — Leader Tracker.
        let leader_tracker = Arc::new(LeaderTracker::new(Arc::new(DashMap::new())));

        // C4 — State Store.
        let state_store = Arc::new(StateStore::new());

        // Persisted entities: users/traders/trading-wallets/positions/withdrawals.
        let store = Arc::new(Store::open(&config.sqlite_path).map_err(|e| ConfigError::InvalidValue {
            field: "MIRRORFLOW_DB_PATH".into(),
            value: e.to_string(),
        })?);
        let positions = Arc::new(SqlitePositionStore::new(store.clone()));

        // C5 — Stream Ingress.
        let (ingress, active_masters_rx) = StreamIngress::new(config.endpoints.stream.clone(), config.endpoints.x_token.clone());
        let ingress = Arc::new(ingress);

        // C11 — Fallback Poller, gated by C5's health signal (wired in main.rs).
        let (circuit_tx, circuit_rx) = watch::channel(CircuitState::StreamHealthy);
        let poller = FallbackPoller::new(
            std::time::Duration::from_secs(config.poller_interval_seconds),
            network.clone(),
            active_masters_rx.clone(),
            circuit_rx,
        );

        let operator = Arc::new(Operator::new(store.clone(), vault.clone(), ingress.clone()));

        let (ingress_event_tx, ingress_event_rx) = mpsc::channel(1024);
        let (poller_tx, poller_rx) = mpsc::channel(256);

        let engine = Self {
            config,
            vault,
            network,
            leader_tracker,
            state_store,
            store,
            positions,
            ingress,
            operator,
        };

        let channels = EngineChannels { active_masters_rx, ingress_event_tx, ingress_event_rx, poller, poller_tx, poller_rx, circuit_tx };

        Ok((engine, channels))
    }

    /// Loads every active trader's wallet set into C5's desired-subscription
    /// channel and every known user's encrypted trading key into C1. Called
    /// once at startup after `build`, separately so `build` itself stays
    /// infallible with respect to sqlite row contents (only open/schema
    /// errors there).
    pub async fn warm_start(&self) -> Result<(), error::PersistenceError> {
        for (user_id, encrypted_secret) in self.store.all_encrypted_secrets()? {
            self.vault.register_encrypted(&user_id, encrypted_secret);
            if let Ok(cfg) = self.store.user_trading_config(&user_id) {
                if let Some(nonce) = cfg.nonce_account {
                    self.vault.set_nonce_account(&user_id, nonce);
                }
            }
        }
        let wallets = self.store.all_active_wallets()?;
        self.ingress.resync(wallets.into_iter().collect()).await;
        Ok(())
    }
}
