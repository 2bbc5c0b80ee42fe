//! Slot Coordinator (§4.7)
//!
//! Owns the process-local `updatedInSlot` set plus the slot it belongs to.
//! Whenever the observed slot advances past the one the set was built for,
//! the set is cleared — the advisory kv lock is what makes the guarantee
//! cross-process; this is the single-process half of it.

use std::collections::HashSet;

use tokio::sync::Mutex;
use uptimekeeper_core::SlotId;

struct State {
    slot: SlotId,
    updated: HashSet<i64>,
}

pub struct SlotCoordinator {
    state: Mutex<State>,
}

impl SlotCoordinator {
    pub fn new(slot: SlotId) -> Self {
        SlotCoordinator {
            state: Mutex::new(State {
                slot,
                updated: HashSet::new(),
            }),
        }
    }

    /// Filters `ids` down to the ones not yet credited in `slot`, marking
    /// them as credited as a side effect. Rotates the set first if `slot`
    /// is newer than the slot the coordinator was tracking.
    pub async fn dedupe(&self, slot: SlotId, ids: Vec<i64>) -> Vec<i64> {
        let mut state = self.state.lock().await;
        if slot != state.slot {
            state.slot = slot;
            state.updated.clear();
        }
        ids.into_iter()
            .filter(|id| state.updated.insert(*id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn slot_at(minute: u32) -> SlotId {
        SlotId::containing(Utc.with_ymd_and_hms(2026, 7, 31, 10, minute, 0).unwrap())
    }

    #[tokio::test]
    async fn dedupes_within_the_same_slot() {
        let coord = SlotCoordinator::new(slot_at(0));
        let first = coord.dedupe(slot_at(0), vec![1, 2, 3]).await;
        assert_eq!(first, vec![1, 2, 3]);
        let second = coord.dedupe(slot_at(5), vec![2, 3, 4]).await;
        assert_eq!(second, vec![4]);
    }

    #[tokio::test]
    async fn rotates_when_slot_advances() {
        let coord = SlotCoordinator::new(slot_at(0));
        coord.dedupe(slot_at(0), vec![1]).await;
        let after_rotation = coord.dedupe(slot_at(15), vec![1]).await;
        assert_eq!(after_rotation, vec![1]);
    }
}
