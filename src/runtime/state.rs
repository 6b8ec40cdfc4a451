//! Loop bookkeeping.

/// Where the loop currently is within one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Capturing,
    Publishing,
    /// Blocked in the broker reconnect loop.
    Reconnecting,
}

/// Mutable state carried between loop iterations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopState {
    /// Clock reading at the start of the last capture cycle.
    pub last_capture_ms: u64,
    pub phase: Phase,
    /// Capture cycles started, including ones that produced no frame.
    pub cycles: u64,
}

impl LoopState {
    /// Whether at least `interval_ms` has passed since the last capture.
    ///
    /// A clock reading behind the last capture counts as no time elapsed.
    pub fn capture_due(&self, now_ms: u64, interval_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_capture_ms) >= interval_ms
    }
}
