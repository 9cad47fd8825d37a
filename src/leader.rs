//! C3 — Leader Tracker. Maintains a slot -> leader cache via subscription
//! plus periodic refresh (spec §2, §4, §5 "single-threaded leader tracker").
//! Grounded on the teacher's channel-driven background-task pattern
//! (`state.rs::state_aggregator_task`), generalized here to a slot cache
//! instead of a trade aggregate; the design note in spec §9 calls for slot
//! changes to "arrive on a dedicated channel consumed by C3."

use crate::error::LeaderError;
use crate::network::NetworkClient;
use crate::types::Commitment;
use dashmap::DashMap;
use solana_pubkey::Pubkey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How many slots ahead the tracker keeps cached leaders for.
const SCHEDULE_WINDOW: u64 = 64;
/// Periodic refresh cadence, independent of the slot-change subscription.
const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Optional direct-send endpoints, keyed by leader identity; populated by
/// configuration or discovery outside this module's scope.
pub type DirectEndpoints = Arc<DashMap<Pubkey, String>>;

pub struct LeaderTracker {
    current_slot: AtomicU64,
    schedule: DashMap<u64, Pubkey>,
    direct_endpoints: DirectEndpoints,
}

/// Event consumed by the single-threaded C3 task.
pub enum SlotEvent {
    SlotChanged(u64),
    Refresh,
}

impl LeaderTracker {
    pub fn new(direct_endpoints: DirectEndpoints) -> Self {
        Self {
            current_slot: AtomicU64::new(0),
            schedule: DashMap::new(),
            direct_endpoints,
        }
    }

    pub fn current_slot(&self) -> u64 {
        self.current_slot.load(Ordering::Relaxed)
    }

    /// Leader for the current slot, if the schedule cache covers it.
    pub fn current_leader(&self) -> Option<Pubkey> {
        self.schedule.get(&self.current_slot()).map(|e| *e)
    }

    /// Direct-send endpoint for a leader, if one is configured.
    pub fn endpoint_for(&self, leader: &Pubkey) -> Option<String> {
        self.direct_endpoints.get(leader).map(|e| e.clone())
    }

    fn ingest_schedule(&self, start_slot: u64, leaders: &[Pubkey]) {
        for (offset, leader) in leaders.iter().enumerate() {
            self.schedule.insert(start_slot + offset as u64, *leader);
        }
        // Drop anything far enough behind the current slot to be stale.
        let floor = self.current_slot().saturating_sub(SCHEDULE_WINDOW);
        self.schedule.retain(|slot, _| *slot >= floor);
    }

    async fn refresh(&self, network: &dyn NetworkClient) -> Result<(), LeaderError> {
        let slot = network
            .get_current_slot(Commitment::Processed)
            .await
            .map_err(|e| LeaderError::ScheduleUnavailable(e.to_string()))?;
        self.current_slot.store(slot, Ordering::Relaxed);

        let leaders = network
            .get_slot_leaders(slot, SCHEDULE_WINDOW)
            .await
            .map_err(|e| LeaderError::ScheduleUnavailable(e.to_string()))?;
        self.ingest_schedule(slot, &leaders);
        Ok(())
    }

    /// Runs the single-threaded C3 task: consumes slot-change events from
    /// `rx` (pushed by the stream provider's slot subscription) and also
    /// refreshes on a fixed interval as a backstop against a dropped
    /// subscription.
    pub async fn run(self: Arc<Self>, network: Arc<dyn NetworkClient>, mut rx: mpsc::Receiver<SlotEvent>) {
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    match event {
                        SlotEvent::SlotChanged(slot) => {
                            self.current_slot.store(slot, Ordering::Relaxed);
                            if !self.schedule.contains_key(&slot) {
                                if let Err(e) = self.refresh(network.as_ref()).await {
                                    log::warn!("leader schedule refresh failed after slot change: {e}");
                                }
                            }
                        }
                        SlotEvent::Refresh => {
                            if let Err(e) = self.refresh(network.as_ref()).await {
                                log::warn!("leader schedule refresh failed: {e}");
                            }
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh(network.as_ref()).await {
                        log::warn!("periodic leader schedule refresh failed: {e}");
                    }
                }
                else => break,
            }
        }
    }
}

/// Snapshot view handed to C10 for a single dispatch decision.
pub struct LeaderHint {
    pub leader: Option<Pubkey>,
    pub endpoint: Option<String>,
}

pub fn leader_hint(tracker: &LeaderTracker) -> LeaderHint {
    let leader = tracker.current_leader();
    let endpoint = leader.and_then(|l| tracker.endpoint_for(&l));
    LeaderHint { leader, endpoint }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_schedule_populates_contiguous_slots() {
        let tracker = LeaderTracker::new(Arc::new(DashMap::new()));
        let leaders: Vec<Pubkey> = (0..4).map(|_| Pubkey::new_unique()).collect();
        tracker.ingest_schedule(100, &leaders);
        for (i, leader) in leaders.iter().enumerate() {
            assert_eq!(tracker.schedule.get(&(100 + i as u64)).map(|e| *e), Some(*leader));
        }
    }

    #[test]
    fn stale_entries_are_pruned_relative_to_current_slot() {
        let tracker = LeaderTracker::new(Arc::new(DashMap::new()));
        tracker.current_slot.store(1_000, Ordering::Relaxed);
        tracker.schedule.insert(1, Pubkey::new_unique());
        tracker.ingest_schedule(1_000, &[Pubkey::new_unique()]);
        assert!(!tracker.schedule.contains_key(&1));
    }

    #[test]
    fn endpoint_lookup_uses_configured_map() {
        let endpoints: DirectEndpoints = Arc::new(DashMap::new());
        let leader = Pubkey::new_unique();
        endpoints.insert(leader, "https://leader.example".to_string());
        let tracker = LeaderTracker::new(endpoints);
        assert_eq!(tracker.endpoint_for(&leader), Some("https://leader.example".to_string()));
    }
}
