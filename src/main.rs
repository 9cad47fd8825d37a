use mirrorflow::config::Config;
use mirrorflow::orchestrator::{self, DedupSet};
use mirrorflow::poller::CircuitState;
use mirrorflow::types::RawTx;
use mirrorflow::{Engine, EngineChannels};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let mut builder = if config.rust_log.is_some() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    } else {
        env_logger::Builder::from_default_env()
    };
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    if !log_level.contains("carbon_log_metrics") {
        builder.filter_module("carbon_log_metrics", log::LevelFilter::Warn);
    }
    builder.target(env_logger::Target::Stderr).init();

    // Workaround for rustls issue, carried over from the teacher.
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("can't set crypto provider to aws_lc_rs");

    log::info!("starting mirrorflow");
    log::info!("stream endpoint: {}", config.endpoints.stream);
    log::info!("rpc endpoint: {}", config.endpoints.rpc);

    let (engine, channels) = match Engine::build(config) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("failed to build engine: {e}");
            std::process::exit(1);
        }
    };
    let engine = Arc::new(engine);

    if let Err(e) = engine.warm_start().await {
        log::error!("failed to warm-start from persistence: {e}");
        std::process::exit(1);
    }

    let EngineChannels { active_masters_rx, ingress_event_tx, mut ingress_event_rx, poller, poller_tx, mut poller_rx, circuit_tx } = channels;

    // C5 — stream ingress run loop.
    let ingress_handle = {
        let ingress = engine.ingress.clone();
        tokio::spawn(async move {
            ingress.run(active_masters_rx, ingress_event_tx).await;
        })
    };

    // C3 — leader tracker refresh loop. Slot-change events are not wired to
    // a dedicated subscription in this build; the periodic refresh inside
    // `LeaderTracker::run` is the backstop this crate relies on.
    let leader_handle = {
        let tracker = engine.leader_tracker.clone();
        let network = engine.network.clone();
        let (_slot_tx, slot_rx) = mpsc::channel::<mirrorflow::leader::SlotEvent>(1);
        tokio::spawn(async move {
            tracker.run(network, slot_rx).await;
        })
    };

    // C11 — fallback poller, always running; its output only matters while
    // the circuit breaker (driven by C5 health events below) is open.
    let poller_handle = tokio::spawn(async move {
        poller.run(poller_tx).await;
    });

    // Drains both the live stream (C5) and the fallback poller (C11) into
    // the same C12 state-machine call, so a transaction is processed
    // identically regardless of which path produced it. Concurrent
    // in-flight transactions are bounded by `worker_pool_count` so a burst
    // of activity from several masters can't spawn unbounded tasks.
    let pipeline_engine = engine.clone();
    let worker_pool = Arc::new(Semaphore::new(engine.config.worker_pool_count.max(1)));
    let pipeline_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = ingress_event_rx.recv() => {
                    match event {
                        mirrorflow::ingress::IngressEvent::Tx(tx) => spawn_pipeline_task(&pipeline_engine, &worker_pool, tx),
                        mirrorflow::ingress::IngressEvent::StreamDegraded(reason) => {
                            log::warn!("stream degraded: {reason}");
                            let _ = circuit_tx.send(CircuitState::StreamDegraded);
                        }
                        mirrorflow::ingress::IngressEvent::StreamHealthy => {
                            log::info!("stream healthy");
                            let _ = circuit_tx.send(CircuitState::StreamHealthy);
                        }
                    }
                }
                Some(tx) = poller_rx.recv() => spawn_pipeline_task(&pipeline_engine, &worker_pool, tx),
                else => break,
            }
        }
    });

    let _ = tokio::join!(ingress_handle, leader_handle, poller_handle, pipeline_handle);
}

/// Spawns one transaction's full C6-C12 fan-out as its own task, gated by
/// `worker_pool`'s permits (`Config::worker_pool_count`) so the pipeline
/// never runs more concurrent transactions than the operator has sized it
/// for.
fn spawn_pipeline_task(engine: &Arc<Engine>, worker_pool: &Arc<Semaphore>, tx: RawTx) {
    let engine = engine.clone();
    let worker_pool = worker_pool.clone();
    tokio::spawn(async move {
        let Ok(_permit) = worker_pool.acquire_owned().await else { return };
        process_tx(&engine, tx).await;
    });
}

/// Runs one observed transaction through C6-C12 for every user currently
/// subscribed to the transaction's candidate master wallets. Per the
/// documented multi-wallet attribution caveat, every active trader's owning
/// user is tried; the golden filter's owner check is what actually decides
/// whether the transaction belongs to that master.
async fn process_tx(engine: &Arc<Engine>, tx: RawTx) {
    let traders = match engine.store.all_active_wallets() {
        Ok(wallets) => wallets,
        Err(e) => {
            log::error!("failed to read active wallets: {e}");
            return;
        }
    };

    let filter_config = &engine.config;
    let filter = mirrorflow::golden_filter::GoldenFilter::new(filter_config, None);
    let dedup = DedupSet::new(&engine.state_store, Duration::from_secs(engine.config.dedup_ttl_seconds));
    let lock_ttl = Duration::from_secs(engine.config.lock_ttl_seconds);
    let current_slot = engine.leader_tracker.current_slot();

    for master in traders {
        // Dedup is keyed `(master, signature)`, not `(master, signature,
        // user)`: checked once per candidate master here, before fanning
        // out to its subscribers, so a second subscriber to the same master
        // never gets rejected as a duplicate of the first (spec §1 permits
        // >1 user per instance; spec §8 only requires the event reach C12
        // exactly once per master it actually belongs to).
        if !dedup.insert_if_new(master, &tx.signature) {
            log::debug!("duplicate transaction {}/{master}: dropped before fan-out", tx.signature);
            continue;
        }

        let subscribers = match engine.store.traders_for_user_by_wallet(master) {
            Ok(users) => users,
            Err(e) => {
                log::error!("failed to read subscribers for {master}: {e}");
                continue;
            }
        };

        for user_id in subscribers {
            let user = match engine.store.user_trading_config(&user_id) {
                Ok(cfg) => cfg,
                Err(_) => continue,
            };

            let outcome = orchestrator::process_for_user(
                &tx,
                master,
                current_slot,
                &user,
                engine.config.min_buy_native_raw,
                lock_ttl,
                engine.config.default_jito_tip_lamports,
                &filter,
                &engine.state_store,
                engine.positions.as_ref(),
                &engine.vault,
                &engine.leader_tracker,
                engine.network.as_ref(),
            )
            .await;

            log_outcome(&tx.signature, &user_id, &outcome);
        }
    }
}

fn log_outcome(signature: &str, user_id: &str, outcome: &orchestrator::Outcome) {
    match outcome {
        orchestrator::Outcome::Verified(result) => {
            log::info!("dispatched {signature} for {user_id}: {:?}", result.signature);
        }
        orchestrator::Outcome::Unverified(result) => {
            log::warn!("dispatch unverified for {signature}/{user_id}: {:?}", result.err);
        }
        orchestrator::Outcome::ClonerFailed(e) => {
            log::warn!("clone failed for {signature}/{user_id}: {e}");
        }
        orchestrator::Outcome::Rejected(reason) => {
            log::debug!("rejected {signature}/{user_id}: {reason}");
        }
        orchestrator::Outcome::FilteredOut(reason) => {
            log::trace!("filtered {signature}/{user_id}: {reason}");
        }
        orchestrator::Outcome::AnalyzerRejected(e) => {
            log::trace!("analyzer rejected {signature}/{user_id}: {e}");
        }
        orchestrator::Outcome::NoCoreInstruction(e) => {
            log::trace!("no core instruction {signature}/{user_id}: {e}");
        }
    }
}
