//! Stop-signal bridge
//!
//! The only channel from the control thread into running script code. The
//! control side writes the flag once; the worker reads it whenever the script
//! calls `stopping()`. The flag is advisory, so relaxed ordering is enough:
//! the write only has to become visible eventually.

use std::sync::atomic::{AtomicBool, Ordering};

/// Observable state of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopState {
    Running,
    StopRequested,
}

/// One-way Running -> StopRequested flag
#[derive(Debug, Default)]
pub struct StopFlag {
    requested: AtomicBool,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns true only for the call that made the transition.
    pub fn request_stop(&self) -> bool {
        !self.requested.swap(true, Ordering::Relaxed)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> StopState {
        if self.is_stop_requested() {
            StopState::StopRequested
        } else {
            StopState::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_running() {
        let flag = StopFlag::new();
        assert!(!flag.is_stop_requested());
        assert_eq!(flag.state(), StopState::Running);
    }

    #[test]
    fn transition_is_one_way() {
        let flag = StopFlag::new();
        assert!(flag.request_stop());
        assert!(!flag.request_stop());
        for _ in 0..3 {
            assert_eq!(flag.state(), StopState::StopRequested);
        }
    }

    #[test]
    fn visible_across_threads() {
        let flag = Arc::new(StopFlag::new());
        let writer = flag.clone();
        std::thread::spawn(move || {
            writer.request_stop();
        })
        .join()
        .unwrap();
        assert!(flag.is_stop_requested());
    }
}
