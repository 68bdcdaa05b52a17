//! Single-slot hand-off between the processing path and the monitor stream.
//!
//! The monitor output runs on its own hardware clock, so it can drift ahead
//! of or behind the primary stream. The relay holds at most one pending
//! frame: a push overwrites whatever is still unconsumed, a take clears the
//! slot. Freshness over completeness — the monitor never lags the primary
//! path by more than one callback period, at the cost of silently dropped
//! frames when it runs slower.

use parking_lot::Mutex;

/// Bounded (capacity 1) frame exchange. Push never blocks the producer
/// beyond an uncontended mutex acquisition.
#[derive(Debug, Default)]
pub struct MonitorRelay {
    slot: Mutex<Option<Vec<f32>>>,
}

impl MonitorRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` as the pending monitor block, replacing any unconsumed
    /// previous frame.
    pub fn push(&self, frame: Vec<f32>) {
        *self.slot.lock() = Some(frame);
    }

    /// Take the most recent frame, leaving the slot empty. Returns `None`
    /// when nothing has been pushed since the last take.
    pub fn take(&self) -> Option<Vec<f32>> {
        self.slot.lock().take()
    }
}
