//! Shared liveness clock
//!
//! Timestamp cells read by the hangup monitor and side loops, written by the
//! orchestrator on playback/transcript events. Millisecond offsets from
//! session start; zero means "never".

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Atomic liveness state shared across session tasks
#[derive(Debug)]
pub struct LivenessState {
    started: Instant,
    last_transmitted_ms: AtomicU64,
    last_human_ms: AtomicU64,
    user_speaking: AtomicBool,
    asked_still_there: AtomicBool,
}

impl LivenessState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_transmitted_ms: AtomicU64::new(0),
            last_human_ms: AtomicU64::new(0),
            user_speaking: AtomicBool::new(false),
            asked_still_there: AtomicBool::new(false),
        }
    }

    fn now_ms(&self) -> u64 {
        // Clamp to 1 so a mark is always distinguishable from "never".
        (self.started.elapsed().as_millis() as u64).max(1)
    }

    /// Assistant audio reached the sink
    pub fn mark_transmitted(&self) {
        self.last_transmitted_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    /// A human word arrived from the transcriber
    pub fn mark_human_word(&self) {
        self.last_human_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    /// Seconds since assistant audio was last transmitted
    pub fn secs_since_transmitted(&self) -> f64 {
        let last = self.last_transmitted_ms.load(Ordering::SeqCst);
        if last == 0 {
            return 0.0;
        }
        let now = self.started.elapsed().as_millis() as u64;
        (now.saturating_sub(last)) as f64 / 1000.0
    }

    /// Whether the assistant transmitted more recently than the user spoke.
    /// Silence-based prompts and hangup fire only in this ordering, so a
    /// user who is mid-response is never interrupted.
    pub fn assistant_spoke_last(&self) -> bool {
        let transmitted = self.last_transmitted_ms.load(Ordering::SeqCst);
        transmitted > 0 && self.last_human_ms.load(Ordering::SeqCst) < transmitted
    }

    pub fn set_user_speaking(&self, speaking: bool) {
        self.user_speaking.store(speaking, Ordering::SeqCst);
    }

    pub fn is_user_speaking(&self) -> bool {
        self.user_speaking.load(Ordering::SeqCst)
    }

    pub fn set_asked_still_there(&self, asked: bool) {
        self.asked_still_there.store(asked, Ordering::SeqCst);
    }

    pub fn asked_still_there(&self) -> bool {
        self.asked_still_there.load(Ordering::SeqCst)
    }
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_never_reports_silence() {
        let liveness = LivenessState::new();
        assert_eq!(liveness.secs_since_transmitted(), 0.0);
        assert!(!liveness.assistant_spoke_last());
    }

    #[test]
    fn test_assistant_spoke_last_ordering() {
        let liveness = LivenessState::new();

        liveness.mark_human_word();
        assert!(!liveness.assistant_spoke_last());

        std::thread::sleep(std::time::Duration::from_millis(5));
        liveness.mark_transmitted();
        assert!(liveness.assistant_spoke_last());

        std::thread::sleep(std::time::Duration::from_millis(5));
        liveness.mark_human_word();
        assert!(!liveness.assistant_spoke_last());
    }
}
