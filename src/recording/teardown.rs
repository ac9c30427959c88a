// Graceful recording shutdown
//
// Stopping a recording must push an end-of-stream event through the capture
// branch so the muxer can finalize the file (mp4mux writes its index on EOS).
// The handshake runs on GStreamer streaming threads; this tracks its progress:
//
//   Recording -> FlushRequested -> FlushConfirmed -> Stopped
//
// `FlushRequested` is entered by the caller when it blocks the tee pad,
// `FlushConfirmed` by the pad probe that sees EOS leave the muxer.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownState {
    /// Capture branch is receiving buffers
    Recording,
    /// Tee pad blocked and EOS sent into the capture branch
    FlushRequested,
    /// EOS reached the muxer output; file is finalized
    FlushConfirmed,
    /// Pipeline set to NULL
    Stopped,
}

/// Shared teardown state, signalled from pad probes
pub struct Teardown {
    state: Mutex<TeardownState>,
    changed: Condvar,
}

impl Default for Teardown {
    fn default() -> Self {
        Self::new()
    }
}

impl Teardown {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TeardownState::Recording),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> TeardownState {
        *self.state.lock()
    }

    /// Move from `from` to `to`. Returns false (and changes nothing) if the
    /// current state isn't `from`.
    pub fn transition(&self, from: TeardownState, to: TeardownState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        self.changed.notify_all();
        true
    }

    /// Unconditionally set the state
    pub fn force(&self, to: TeardownState) {
        *self.state.lock() = to;
        self.changed.notify_all();
    }

    /// Block until `FlushConfirmed` (or later) or until `timeout` has elapsed.
    ///
    /// Each wait is capped at `poll` so a missed notification costs at most one
    /// interval. Returns whether the flush was confirmed.
    pub fn wait_confirmed(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while !matches!(*state, TeardownState::FlushConfirmed | TeardownState::Stopped) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = poll.min(deadline - now);
            self.changed.wait_for(&mut state, wait);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_transitions_follow_order() {
        let teardown = Teardown::new();
        assert_eq!(teardown.state(), TeardownState::Recording);

        assert!(!teardown.transition(TeardownState::FlushRequested, TeardownState::FlushConfirmed));
        assert!(teardown.transition(TeardownState::Recording, TeardownState::FlushRequested));
        assert!(!teardown.transition(TeardownState::Recording, TeardownState::FlushRequested));
        assert!(teardown.transition(TeardownState::FlushRequested, TeardownState::FlushConfirmed));
        assert_eq!(teardown.state(), TeardownState::FlushConfirmed);
    }

    #[test]
    fn test_wait_times_out() {
        let teardown = Teardown::new();
        teardown.transition(TeardownState::Recording, TeardownState::FlushRequested);

        let start = Instant::now();
        assert!(!teardown.wait_confirmed(Duration::from_millis(100), Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(teardown.state(), TeardownState::FlushRequested);
    }

    #[test]
    fn test_wait_wakes_on_confirmation() {
        let teardown = Arc::new(Teardown::new());
        teardown.transition(TeardownState::Recording, TeardownState::FlushRequested);

        let signaller = teardown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            signaller.transition(TeardownState::FlushRequested, TeardownState::FlushConfirmed);
        });

        assert!(teardown.wait_confirmed(Duration::from_secs(5), Duration::from_millis(200)));
        handle.join().unwrap();
    }

    #[test]
    fn test_already_confirmed_returns_immediately() {
        let teardown = Teardown::new();
        teardown.force(TeardownState::FlushConfirmed);
        assert!(teardown.wait_confirmed(Duration::ZERO, Duration::from_millis(1)));
    }
}
