//! Per-camp run exclusion
//!
//! At most one grouping run per camp may be in flight. A second request for
//! the same camp is rejected immediately instead of queued; runs for
//! different camps proceed independently.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Shared set of camps with a run in flight
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the camp, or `None` if a run for it is already in flight.
    /// The claim is released when the permit drops.
    pub fn try_acquire(&self, camp_id: Uuid) -> Option<RunPermit> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(camp_id) {
            return None;
        }
        Some(RunPermit {
            camp_id,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_running(&self, camp_id: Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&camp_id)
    }
}

/// Held for the duration of one run
#[derive(Debug)]
pub struct RunPermit {
    camp_id: Uuid,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl RunPermit {
    pub fn camp_id(&self) -> Uuid {
        self.camp_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.camp_id);
    }
}
