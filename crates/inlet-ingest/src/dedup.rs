//! Exactly-once processing tracker for platform update ids.
//!
//! An update is `InProgress` from admission until its dispatch finishes, and
//! enters the processed set only when that dispatch succeeded. A failed
//! attempt leaves no trace, so the platform's retry is admitted as new.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use inlet_core::config::DedupConfig;
use inlet_core::types::UpdateId;

/// Result of [`UpdateDeduplicator::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    New,
    Duplicate,
    InProgress,
}

#[derive(Debug, Default)]
struct DedupState {
    processed: HashMap<UpdateId, Instant>,
    /// Insertion order of `processed`, oldest first.
    order: VecDeque<UpdateId>,
    in_flight: HashSet<UpdateId>,
}

#[derive(Debug)]
pub struct UpdateDeduplicator {
    state: Mutex<DedupState>,
    max_tracked: usize,
    expiry: Duration,
}

impl UpdateDeduplicator {
    pub fn new(max_tracked: usize, expiry: Duration) -> Self {
        Self {
            state: Mutex::new(DedupState::default()),
            max_tracked,
            expiry,
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.max_tracked, Duration::from_secs(config.expiry_secs))
    }

    /// Classify `id` and, when new, mark it in flight.
    pub fn admit(&self, id: UpdateId) -> Admission {
        let mut state = self.state.lock().expect("dedup state poisoned");
        if state.processed.contains_key(&id) {
            return Admission::Duplicate;
        }
        if !state.in_flight.insert(id) {
            return Admission::InProgress;
        }
        Admission::New
    }

    /// Finish processing of an admitted update.
    ///
    /// Always clears the in-flight mark; records the id as processed only on
    /// success.
    pub fn commit(&self, id: UpdateId, success: bool) {
        let mut state = self.state.lock().expect("dedup state poisoned");
        state.in_flight.remove(&id);
        if !success {
            debug!(update_id = %id, "update left uncommitted for retry");
            return;
        }

        let now = Instant::now();
        if state.processed.len() >= self.max_tracked {
            self.purge(&mut state, now);
        }
        if state.processed.insert(id, now).is_none() {
            state.order.push_back(id);
        }
    }

    /// Number of ids in the processed set.
    pub fn tracked(&self) -> usize {
        self.state.lock().expect("dedup state poisoned").processed.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().expect("dedup state poisoned").in_flight.len()
    }

    /// Drop expired entries, then the oldest ones until there is room for one
    /// more insertion.
    fn purge(&self, state: &mut DedupState, now: Instant) {
        let before = state.processed.len();

        while let Some(oldest) = state.order.front().copied() {
            let expired = state
                .processed
                .get(&oldest)
                .map_or(true, |at| now.saturating_duration_since(*at) >= self.expiry);
            if !expired {
                break;
            }
            state.order.pop_front();
            state.processed.remove(&oldest);
        }

        while state.processed.len() >= self.max_tracked {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.processed.remove(&oldest);
                }
                None => break,
            }
        }

        debug!(
            purged = before - state.processed.len(),
            remaining = state.processed.len(),
            "purged processed update ids"
        );
    }
}
