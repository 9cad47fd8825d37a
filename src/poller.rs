//! C11 — Fallback Poller + Circuit Breaker (spec §4.8). Listens for C5's
//! health signal; while the stream is degraded, polls each active master's
//! recent signatures on a fixed interval and feeds new ones through the
//! same C6-C10 pipeline C12 drives for streamed transactions. Grounded on
//! the teacher's `streamer_core::grpc_client::run_with_reconnect` reconnect
//! loop shape, repurposed here as a polling loop gated by stream health
//! rather than a gRPC connection.

use crate::network::NetworkClient;
use crate::types::RawTx;
use solana_pubkey::Pubkey;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Duration};

const POLL_LOOKBACK_LIMIT: usize = 20;

/// Signatures the poller has already handed to the pipeline, scoped per
/// master so the same poll cycle doesn't redispatch a signature it just
/// saw. The authoritative cross-source dedup set (spec §4.9) lives in
/// C12/C4; this is purely "don't refetch the same page twice."
struct SeenSignatures {
    per_master: RwLock<std::collections::HashMap<Pubkey, HashSet<String>>>,
}

impl SeenSignatures {
    fn new() -> Self {
        Self { per_master: RwLock::new(std::collections::HashMap::new()) }
    }

    async fn mark_and_filter_new(&self, master: Pubkey, signatures: Vec<String>) -> Vec<String> {
        let mut guard = self.per_master.write().await;
        let seen = guard.entry(master).or_default();
        signatures.into_iter().filter(|sig| seen.insert(sig.clone())).collect()
    }
}

/// Drives the §4.8 state machine: `StreamDegraded` starts polling,
/// `StreamHealthy` stops it. Both transitions are idempotent because the
/// polling task is only ever spawned while `active` is false and only ever
/// aborted while it's true.
pub struct FallbackPoller {
    interval: Duration,
    network: Arc<dyn NetworkClient>,
    active_masters: watch::Receiver<HashSet<Pubkey>>,
    circuit: watch::Receiver<CircuitState>,
    seen: Arc<SeenSignatures>,
}

impl FallbackPoller {
    pub fn new(
        poll_interval: Duration,
        network: Arc<dyn NetworkClient>,
        active_masters: watch::Receiver<HashSet<Pubkey>>,
        circuit: watch::Receiver<CircuitState>,
    ) -> Self {
        Self { interval: poll_interval, network, active_masters, circuit, seen: Arc::new(SeenSignatures::new()) }
    }

    /// Runs the polling loop for as long as the task lives. Each tick is a
    /// no-op while the circuit is `StreamHealthy` (spec §4.8): the loop
    /// keeps ticking so it notices a `StreamDegraded` transition promptly,
    /// but only calls out to the network while the breaker is open.
    pub async fn run(self, sink: tokio::sync::mpsc::Sender<RawTx>) {
        let mut ticker = interval(self.interval);
        loop {
            ticker.tick().await;
            if !self.circuit.borrow().should_poll() {
                continue;
            }
            let masters: Vec<Pubkey> = self.active_masters.borrow().iter().copied().collect();
            for master in masters {
                if let Err(e) = self.poll_master(master, &sink).await {
                    log::warn!("poller: failed to poll master {master}: {e}");
                }
            }
        }
    }

    async fn poll_master(&self, master: Pubkey, sink: &tokio::sync::mpsc::Sender<RawTx>) -> Result<(), crate::error::NetworkError> {
        let signatures = self.network.get_signatures_for_address(&master, None, POLL_LOOKBACK_LIMIT).await?;
        let fresh = self.seen.mark_and_filter_new(master, signatures).await;
        for signature in fresh {
            match self.network.get_transaction(&signature, master).await {
                Ok(Some(tx)) => {
                    if sink.send(tx).await.is_err() {
                        log::warn!("poller: pipeline sink closed, dropping transaction {signature}");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("poller: failed to fetch transaction {signature}: {e}"),
            }
        }
        Ok(())
    }
}

/// Circuit state the orchestrator toggles in response to C5 health events.
/// Kept as a tiny explicit type rather than a bare bool so call sites read
/// as state transitions, not flag flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    StreamHealthy,
    StreamDegraded,
}

impl CircuitState {
    pub fn should_poll(self) -> bool {
        matches!(self, CircuitState::StreamDegraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seen_signatures_deduplicates_within_a_master() {
        let seen = SeenSignatures::new();
        let master = Pubkey::new_unique();
        let first = seen.mark_and_filter_new(master, vec!["a".into(), "b".into()]).await;
        assert_eq!(first, vec!["a".to_string(), "b".to_string()]);
        let second = seen.mark_and_filter_new(master, vec!["b".into(), "c".into()]).await;
        assert_eq!(second, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn seen_signatures_are_scoped_per_master() {
        let seen = SeenSignatures::new();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        seen.mark_and_filter_new(a, vec!["x".into()]).await;
        let result = seen.mark_and_filter_new(b, vec!["x".into()]).await;
        assert_eq!(result, vec!["x".to_string()]);
    }

    #[test]
    fn circuit_state_gates_polling() {
        assert!(CircuitState::StreamDegraded.should_poll());
        assert!(!CircuitState::StreamHealthy.should_poll());
    }
}
