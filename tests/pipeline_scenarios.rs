//! End-to-end scenarios against the full C6-C12 state machine, covering the
//! six walkthroughs enumerated alongside the pipeline's testable properties.
//! Network I/O is stubbed with an in-memory `FakeNetwork`; everything else
//! (filter, analyzer, locator, cloner, dispatcher, dedup/lock store) runs
//! unmodified.

use async_trait::async_trait;
use mirrorflow::config::{Config, Endpoints};
use mirrorflow::error::{NetworkError, OrchestratorReject};
use mirrorflow::golden_filter::GoldenFilter;
use mirrorflow::leader::LeaderTracker;
use mirrorflow::network::NetworkClient;
use mirrorflow::orchestrator::{self, DedupSet, Outcome, PositionStore};
use mirrorflow::state_store::StateStore;
use mirrorflow::types::{
    AccountRef, Anchor, BalanceDelta, Commitment, NonceAccount, Position, RawInstruction, RawTx, SignatureStatus, UserTradingConfig, NATIVE_MINT,
};
use mirrorflow::vault::secret_store::AesGcmSecretStore;
use mirrorflow::vault::KeyVault;
use solana_keypair::Keypair;
use solana_program_option::COption;
use solana_program_pack::Pack;
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use spl_token::state::{Account as TokenAccount, AccountState};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// `6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P` — pump.fun bonding curve
/// program id, matching `locator`'s internal `dex_programs` table.
fn pumpfun_bc_program() -> Pubkey {
    Pubkey::from_str("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P").unwrap()
}

/// Packs a minimal SPL token account with the given balance, the same
/// bytes `token_account_balance` unpacks on the orchestrator side.
fn token_account_bytes(amount: u64) -> Vec<u8> {
    let account = TokenAccount {
        mint: Pubkey::new_unique(),
        owner: Pubkey::new_unique(),
        amount,
        delegate: COption::None,
        state: AccountState::Initialized,
        is_native: COption::None,
        delegated_amount: 0,
        close_authority: COption::None,
    };
    let mut buf = vec![0u8; TokenAccount::LEN];
    account.pack_into_slice(&mut buf);
    buf
}

/// Always-confirms, always-fresh-blockhash network stub. Good enough to
/// drive the cloner and dispatcher through a full dispatch without a real
/// validator. `get_account_info` alternates pre/post-dispatch ATA reads:
/// even-numbered calls (the pre-dispatch read) see a zero balance, odd ones
/// (the post-dispatch read) see `credited_amount`, matching each scenario's
/// single buy/sell round trip through the orchestrator.
struct FakeNetwork {
    credited_amount: u64,
    calls: AtomicU64,
}

impl FakeNetwork {
    fn new(credited_amount: u64) -> Self {
        Self { credited_amount, calls: AtomicU64::new(0) }
    }
}

#[async_trait]
impl NetworkClient for FakeNetwork {
    async fn submit(&self, _serialized_tx: &[u8], _target_endpoint: Option<&str>) -> Result<String, NetworkError> {
        Ok("fake-submitted-signature".to_string())
    }
    async fn get_signature_status(&self, _signature: &str) -> Result<Option<SignatureStatus>, NetworkError> {
        Ok(Some(SignatureStatus { commitment: Some(Commitment::Confirmed), err: None }))
    }
    async fn get_account_info(&self, _pubkey: &Pubkey, _commitment: Commitment) -> Result<Option<Vec<u8>>, NetworkError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let amount = if n % 2 == 0 { 0 } else { self.credited_amount };
        Ok(Some(token_account_bytes(amount)))
    }
    async fn get_multiple_accounts(&self, pubkeys: &[Pubkey], _commitment: Commitment) -> Result<Vec<Option<Vec<u8>>>, NetworkError> {
        // ATAs already exist, no create instruction needed.
        Ok(pubkeys.iter().map(|_| Some(vec![0u8; 165])).collect())
    }
    async fn get_latest_anchor(&self, _commitment: Commitment) -> Result<Anchor, NetworkError> {
        Ok(Anchor { blockhash: solana_hash::Hash::default().to_string(), valid_until_height: u64::MAX })
    }
    async fn get_current_slot(&self, _commitment: Commitment) -> Result<u64, NetworkError> {
        Ok(0)
    }
    async fn get_slot_leaders(&self, _start_slot: u64, _count: u64) -> Result<Vec<Pubkey>, NetworkError> {
        Ok(vec![])
    }
    async fn get_signatures_for_address(&self, _pubkey: &Pubkey, _before: Option<&str>, _limit: usize) -> Result<Vec<String>, NetworkError> {
        unimplemented!()
    }
    async fn get_transaction(&self, _signature: &str, _trader_id: Pubkey) -> Result<Option<RawTx>, NetworkError> {
        unimplemented!()
    }
}

struct InMemoryPositions {
    rows: Mutex<HashMap<(String, String), Position>>,
}

impl InMemoryPositions {
    fn new() -> Self {
        Self { rows: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl PositionStore for InMemoryPositions {
    async fn get(&self, user_id: &str, mint: &str) -> Position {
        self.rows.lock().unwrap().get(&(user_id.to_string(), mint.to_string())).cloned().unwrap_or_default()
    }

    async fn apply_token_delta(&self, user_id: &str, mint: &str, token_delta_raw: i128, native_spent_raw: u128, now_ts: i64) {
        let mut rows = self.rows.lock().unwrap();
        let entry = rows.entry((user_id.to_string(), mint.to_string())).or_default();
        if token_delta_raw >= 0 {
            entry.amount_raw += token_delta_raw as u128;
        } else {
            entry.amount_raw = entry.amount_raw.saturating_sub((-token_delta_raw) as u128);
            entry.sold_amount_raw += (-token_delta_raw) as u128;
        }
        entry.native_spent += native_spent_raw;
        if entry.first_buy_ts == 0 {
            entry.first_buy_ts = now_ts;
        }
        entry.last_update_ts = now_ts;
    }
}

fn test_config() -> Config {
    Config {
        endpoints: Endpoints { rpc: "http://localhost".into(), ws: String::new(), stream: "http://localhost".into(), sender: None, x_token: None },
        wallet_encryption_key: "integration-test-key".into(),
        min_buy_native_raw: 500_000,
        max_age_seconds: 30,
        default_jito_tip_lamports: 10_000,
        lock_ttl_seconds: 20,
        dedup_ttl_seconds: 120,
        poller_interval_seconds: 25,
        worker_pool_count: 8,
        min_native_delta_raw: 100_000,
        sqlite_path: ":memory:".into(),
        janitor_mcap_threshold: None,
        janitor_grace: None,
        rust_log: None,
    }
}

fn vault_with_user(user_id: &str) -> (Arc<KeyVault>, Pubkey) {
    let vault = Arc::new(KeyVault::new(Arc::new(AesGcmSecretStore::new("integration-test-key"))));
    let kp = Keypair::new();
    let pubkey = kp.pubkey();
    vault.import_plaintext(user_id, &kp.to_bytes()).unwrap();
    (vault, pubkey)
}

fn buy_tx(master: Pubkey, signature: &str, output_mint: &str, native_spent: i128, token_received: i128) -> RawTx {
    RawTx {
        signature: signature.to_string(),
        slot: 100,
        trader_id: master,
        block_time: Some(1_700_000_000),
        account_keys: vec![master],
        instructions: vec![RawInstruction {
            program_id: pumpfun_bc_program(),
            accounts: vec![AccountRef { pubkey: master, is_signer: false, is_writable: true }],
            data: vec![0u8; 32],
        }],
        inner_instructions: vec![],
        err: false,
        native_deltas: vec![BalanceDelta { account_index: 0, mint: NATIVE_MINT.into(), owner: Some(master), raw_change: -native_spent, decimals: 9, is_native: true }],
        token_deltas: vec![BalanceDelta { account_index: 1, mint: output_mint.to_string(), owner: Some(master), raw_change: token_received, decimals: 6, is_native: false }],
        observed_compute_unit_limit: None,
    }
}

fn sell_tx(master: Pubkey, signature: &str, input_mint: &str, token_spent: i128, native_received: i128) -> RawTx {
    RawTx {
        signature: signature.to_string(),
        slot: 100,
        trader_id: master,
        block_time: Some(1_700_000_000),
        account_keys: vec![master],
        instructions: vec![RawInstruction {
            program_id: pumpfun_bc_program(),
            accounts: vec![AccountRef { pubkey: master, is_signer: false, is_writable: true }],
            data: vec![0u8; 32],
        }],
        inner_instructions: vec![],
        err: false,
        native_deltas: vec![BalanceDelta { account_index: 0, mint: NATIVE_MINT.into(), owner: Some(master), raw_change: native_received, decimals: 9, is_native: true }],
        token_deltas: vec![BalanceDelta { account_index: 1, mint: input_mint.to_string(), owner: Some(master), raw_change: -token_spent, decimals: 6, is_native: false }],
        observed_compute_unit_limit: None,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    tx: &RawTx,
    master: Pubkey,
    user: &UserTradingConfig,
    min_buy_native_raw: u64,
    config: &Config,
    state_store: &StateStore,
    positions: &dyn PositionStore,
    vault: &KeyVault,
    leader_tracker: &LeaderTracker,
    network: &dyn NetworkClient,
) -> Outcome {
    let filter = GoldenFilter::new(config, None);
    // Mirrors main.rs's process_tx: the dedup check happens once per
    // (master, signature) before process_for_user is ever called, not
    // inside it (the dedup key has no per-user component).
    let dedup = DedupSet::new(state_store, Duration::from_secs(config.dedup_ttl_seconds));
    if !dedup.insert_if_new(master, &tx.signature) {
        return Outcome::Rejected(OrchestratorReject::Duplicate);
    }
    orchestrator::process_for_user(
        tx,
        master,
        tx.slot,
        user,
        min_buy_native_raw,
        Duration::from_secs(config.lock_ttl_seconds),
        config.default_jito_tip_lamports,
        &filter,
        state_store,
        positions,
        vault,
        leader_tracker,
        network,
    )
    .await
}

/// Scenario 1: happy buy. Master spends 5_000_000 native for mint X; user
/// scale 0.2; no prior position. Dispatch submits with max_native_in =
/// 1_000_000, and the position for X is written with the confirmed delta.
#[tokio::test]
async fn happy_buy_dispatches_and_writes_position() {
    let config = test_config();
    let master = Pubkey::new_unique();
    let (vault, user_pubkey) = vault_with_user("alice");
    let user = UserTradingConfig { user_id: "alice".into(), trading_key: user_pubkey, scale_factor: 0.2, slippage_bps: 50, nonce_account: None };
    let state_store = StateStore::new();
    let positions = InMemoryPositions::new();
    let leader_tracker = LeaderTracker::new(Arc::new(dashmap::DashMap::new()));
    let network = FakeNetwork::new(1_000);

    let tx = buy_tx(master, "sig-happy-buy", "MintX", 5_000_000, 1_000);
    let outcome = run(&tx, master, &user, config.min_buy_native_raw, &config, &state_store, &positions, &vault, &leader_tracker, &network).await;

    match outcome {
        Outcome::Verified(result) => assert!(result.success && result.signature.is_some()),
        other => panic!("expected Verified, got {other:?}"),
    }

    let position = positions.get("alice", "MintX").await;
    assert_eq!(position.amount_raw, 1_000);
    assert_eq!(position.native_spent, 1_000_000);
}

/// Scenario 2: duplicate in window. Same (master, signature) observed
/// twice; exactly one dispatch attempt, the second drop reason is
/// `Duplicate`.
#[tokio::test]
async fn duplicate_signature_is_dropped_on_second_sighting() {
    let config = test_config();
    let master = Pubkey::new_unique();
    let (vault, user_pubkey) = vault_with_user("bob");
    let user = UserTradingConfig { user_id: "bob".into(), trading_key: user_pubkey, scale_factor: 0.5, slippage_bps: 50, nonce_account: None };
    let state_store = StateStore::new();
    let positions = InMemoryPositions::new();
    let leader_tracker = LeaderTracker::new(Arc::new(dashmap::DashMap::new()));
    let network = FakeNetwork::new(400);

    let tx = buy_tx(master, "sig-duplicate", "MintY", 2_000_000, 400);

    let first = run(&tx, master, &user, config.min_buy_native_raw, &config, &state_store, &positions, &vault, &leader_tracker, &network).await;
    assert!(matches!(first, Outcome::Verified(_)));

    let second = run(&tx, master, &user, config.min_buy_native_raw, &config, &state_store, &positions, &vault, &leader_tracker, &network).await;
    assert!(matches!(second, Outcome::Rejected(OrchestratorReject::Duplicate)));
}

/// Dedup is keyed `(master, signature)` only, with no per-user component
/// (spec §1 permits more than one subscribed user per instance). A second
/// subscriber to the same master's transaction must still be served, not
/// rejected as a duplicate of the first subscriber's `process_for_user`
/// call — the dedup gate lives in the fan-out caller (`main.rs`), not
/// inside `process_for_user` itself.
#[tokio::test]
async fn two_subscribers_to_the_same_transaction_are_both_served() {
    let config = test_config();
    let master = Pubkey::new_unique();
    let (vault_a, user_a_pubkey) = vault_with_user("erin");
    let (vault_b, user_b_pubkey) = vault_with_user("frank");
    let user_a = UserTradingConfig { user_id: "erin".into(), trading_key: user_a_pubkey, scale_factor: 0.5, slippage_bps: 50, nonce_account: None };
    let user_b = UserTradingConfig { user_id: "frank".into(), trading_key: user_b_pubkey, scale_factor: 0.5, slippage_bps: 50, nonce_account: None };
    let state_store = StateStore::new();
    let positions = InMemoryPositions::new();
    let leader_tracker = LeaderTracker::new(Arc::new(dashmap::DashMap::new()));
    let network = FakeNetwork::new(400);
    let filter = GoldenFilter::new(&config, None);

    let tx = buy_tx(master, "sig-shared-fanout", "MintZ", 2_000_000, 400);

    // Mirrors main.rs: dedup checked exactly once per (master, signature),
    // then every subscriber runs process_for_user unconditionally.
    let dedup = DedupSet::new(&state_store, Duration::from_secs(config.dedup_ttl_seconds));
    assert!(dedup.insert_if_new(master, &tx.signature));
    let lock_ttl = Duration::from_secs(config.lock_ttl_seconds);

    let outcome_a = orchestrator::process_for_user(
        &tx,
        master,
        tx.slot,
        &user_a,
        config.min_buy_native_raw,
        lock_ttl,
        config.default_jito_tip_lamports,
        &filter,
        &state_store,
        &positions,
        &vault_a,
        &leader_tracker,
        &network,
    )
    .await;
    let outcome_b = orchestrator::process_for_user(
        &tx,
        master,
        tx.slot,
        &user_b,
        config.min_buy_native_raw,
        lock_ttl,
        config.default_jito_tip_lamports,
        &filter,
        &state_store,
        &positions,
        &vault_b,
        &leader_tracker,
        &network,
    )
    .await;

    assert!(matches!(outcome_a, Outcome::Verified(_)), "first subscriber should dispatch: {outcome_a:?}");
    assert!(matches!(outcome_b, Outcome::Verified(_)), "second subscriber should dispatch: {outcome_b:?}");
}

/// Scenario 3: concurrent buys on the same output mint. A master already
/// holds `lock:buy:X`; a second master's buy on the same mint drops with
/// `DuplicateInFlight` rather than waiting.
#[tokio::test]
async fn concurrent_buy_on_same_mint_is_rejected_while_locked() {
    let config = test_config();
    let (vault, user_pubkey) = vault_with_user("carol");
    let user = UserTradingConfig { user_id: "carol".into(), trading_key: user_pubkey, scale_factor: 0.3, slippage_bps: 50, nonce_account: None };
    let state_store = StateStore::new();
    let positions = InMemoryPositions::new();
    let leader_tracker = LeaderTracker::new(Arc::new(dashmap::DashMap::new()));
    let network = FakeNetwork::new(600);

    // Simulate master A's buy already holding the lock for this mint.
    assert!(state_store.set_nx_ex("lock:buy:MintX", b"master-a-in-flight", Duration::from_secs(20)));

    let master_b = Pubkey::new_unique();
    let tx = buy_tx(master_b, "sig-master-b", "MintX", 3_000_000, 600);
    let outcome = run(&tx, master_b, &user, config.min_buy_native_raw, &config, &state_store, &positions, &vault, &leader_tracker, &network).await;

    assert!(matches!(outcome, Outcome::Rejected(OrchestratorReject::DuplicateInFlight)));
}

/// Scenario 4: sell without position. Master sells mint Y; user holds 0 of
/// Y. Analyzed and located, but dropped at C12 with no network call.
#[tokio::test]
async fn sell_without_a_position_is_dropped() {
    let config = test_config();
    let master = Pubkey::new_unique();
    let (vault, user_pubkey) = vault_with_user("dave");
    let user = UserTradingConfig { user_id: "dave".into(), trading_key: user_pubkey, scale_factor: 1.0, slippage_bps: 50, nonce_account: None };
    let state_store = StateStore::new();
    let positions = InMemoryPositions::new();
    let leader_tracker = LeaderTracker::new(Arc::new(dashmap::DashMap::new()));
    let network = FakeNetwork::new(0);

    let tx = sell_tx(master, "sig-sell-no-position", "MintY", 500, 1_000_000);
    let outcome = run(&tx, master, &user, config.min_buy_native_raw, &config, &state_store, &positions, &vault, &leader_tracker, &network).await;

    assert!(matches!(outcome, Outcome::Rejected(OrchestratorReject::PositionMissing)));
}

/// Scenario 6: nonce vs fresh anchor. User A has a durable nonce, user B
/// doesn't; both complete, each against its own anchor type. The
/// `AdvanceNonce`-is-instruction-0 invariant itself is exercised at the
/// cloner layer (`cloner::tests::nonce_account_prepends_advance_instruction`);
/// this only checks that both anchor paths dispatch successfully end to end.
#[tokio::test]
async fn nonce_and_blockhash_users_both_dispatch_successfully() {
    let config = test_config();
    let state_store = StateStore::new();
    let positions = InMemoryPositions::new();
    let leader_tracker = LeaderTracker::new(Arc::new(dashmap::DashMap::new()));
    let network = FakeNetwork::new(800);

    let master = Pubkey::new_unique();

    let (vault_a, user_a_pubkey) = vault_with_user("user-a");
    vault_a.set_nonce_account(
        "user-a",
        NonceAccount { pubkey: Pubkey::new_unique(), authority: user_a_pubkey, current_nonce: solana_hash::Hash::default().to_string() },
    );
    let user_a = UserTradingConfig { user_id: "user-a".into(), trading_key: user_a_pubkey, scale_factor: 0.4, slippage_bps: 50, nonce_account: None };
    let tx_a = buy_tx(master, "sig-nonce-user", "MintN", 4_000_000, 800);
    let outcome_a = run(&tx_a, master, &user_a, config.min_buy_native_raw, &config, &state_store, &positions, &vault_a, &leader_tracker, &network).await;
    assert!(matches!(outcome_a, Outcome::Verified(_)), "nonce-anchored user should dispatch: {outcome_a:?}");

    let (vault_b, user_b_pubkey) = vault_with_user("user-b");
    let user_b = UserTradingConfig { user_id: "user-b".into(), trading_key: user_b_pubkey, scale_factor: 0.4, slippage_bps: 50, nonce_account: None };
    let tx_b = buy_tx(master, "sig-fresh-anchor-user", "MintN", 4_000_000, 800);
    let outcome_b = run(&tx_b, master, &user_b, config.min_buy_native_raw, &config, &state_store, &positions, &vault_b, &leader_tracker, &network).await;
    assert!(matches!(outcome_b, Outcome::Verified(_)), "fresh-blockhash user should dispatch: {outcome_b:?}");
}
