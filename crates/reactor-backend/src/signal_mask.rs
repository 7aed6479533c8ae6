//! Shared signal-mask bookkeeping. Every backend tracks which
//! signals the engine is watching, because the contract requires the
//! user to block a signal in the process mask before `add_signal_watch`
//! and the engine to unblock it only for the duration of a poll.

use nix::sys::signal::{SigSet, Signal};

/// Tracks the set of signals currently being watched, backed by a
/// `nix::sys::signal::SigSet` so backends can hand it straight to
/// `pthread_sigmask`/`pselect`/`signalfd` without re-deriving it.
#[derive(Debug, Clone)]
pub struct WatchedSignals {
    set: SigSet,
}

impl WatchedSignals {
    pub fn new() -> Self {
        WatchedSignals { set: SigSet::empty() }
    }

    pub fn add(&mut self, signo: i32) {
        if let Ok(sig) = Signal::try_from(signo) {
            self.set.add(sig);
        }
    }

    pub fn remove(&mut self, signo: i32) {
        if let Ok(sig) = Signal::try_from(signo) {
            self.set.remove(sig);
        }
    }

    pub fn contains(&self, signo: i32) -> bool {
        Signal::try_from(signo).map(|s| self.set.contains(s)).unwrap_or(false)
    }

    pub fn as_sigset(&self) -> SigSet {
        self.set
    }

    /// The mask to pass to `pselect`/`ppoll`: the process mask with the
    /// watched signals unblocked, i.e. everything *except* what we watch.
    pub fn unblocked_during_poll(&self, process_mask: SigSet) -> SigSet {
        let mut m = process_mask;
        for signo in 1..=nix::sys::signal::SIGRTMAX() {
            if self.contains(signo) {
                if let Ok(sig) = Signal::try_from(signo) {
                    m.remove(sig);
                }
            }
        }
        m
    }
}

impl Default for WatchedSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_contains() {
        let mut w = WatchedSignals::new();
        assert!(!w.contains(libc::SIGTERM));
        w.add(libc::SIGTERM);
        assert!(w.contains(libc::SIGTERM));
        w.remove(libc::SIGTERM);
        assert!(!w.contains(libc::SIGTERM));
    }
}
