//! Per-slot in-flight tracking.

use dashmap::DashMap;

/// In-flight request counter per concurrency slot.
///
/// Requests routed through the same proxy host share one slot, so these
/// counts show the engine how loaded each proxy currently is.
#[derive(Debug, Default)]
pub struct SlotTracker {
    in_flight: DashMap<String, usize>,
}

impl SlotTracker {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    pub fn acquire(&self, slot: &str) {
        self.in_flight
            .entry(slot.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    pub fn release(&self, slot: &str) {
        self.in_flight.entry(slot.to_string()).and_modify(|count| {
            if *count > 0 {
                *count -= 1;
            }
        });
    }

    pub fn get(&self, slot: &str) -> usize {
        self.in_flight.get(slot).map(|count| *count).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.in_flight.clear();
    }
}
