//! Typed signal watcher registration.
//!
//! Required user-side discipline: the signal must already be blocked in
//! the process's signal mask before `add_signal_watch` is called — the
//! engine unblocks it only for the duration of a poll. The backends
//! (`epoll`'s `signalfd`, `kqueue`'s `EVFILT_SIGNAL`, the `pselect`
//! captured-handler table) all assume this.

use reactor_core::watcher::{SignalWatcherData, WatcherBase, WatcherKind};
use reactor_core::ReactorResult;

use crate::watchers::{Payload, SignalCallback, WatcherEntry, WatcherId};
use crate::EventLoop;

impl EventLoop {
    /// Watch `signo`. Auto-rearmed by default — the watcher stays armed
    /// across deliveries unless the callback returns `Rearm::Disarm` or
    /// `Rearm::Remove`. Signal watchers are inherently one-shot from the
    /// kernel's view but are auto-rearmed by default.
    pub fn add_signal_watch(&self, signo: i32, priority: i64, callback: SignalCallback) -> ReactorResult<WatcherId> {
        let mut st = self.state.lock();
        let data = SignalWatcherData { signo, last_siginfo: None, enabled: true };
        let id = st.watchers.insert(WatcherEntry {
            base: WatcherBase::new(WatcherKind::Signal, priority),
            payload: Payload::Signal { data, callback },
            on_removed: None,
        });

        let backend = st.backend.as_mut().unwrap();
        match backend.add_signal_watch(signo, id.to_token()) {
            Ok(()) => Ok(id),
            Err(e) => {
                st.watchers.remove(id);
                Err(e)
            }
        }
    }

    /// Enable or disable delivery without deregistering. The backend
    /// keeps reporting the signal
    /// regardless (no per-signal disable primitive exists below
    /// `signalfd`/`EVFILT_SIGNAL`); while disabled, deliveries are
    /// dropped rather than enqueued.
    pub fn set_signal_watch_enabled(&self, id: WatcherId, enabled: bool) -> ReactorResult<()> {
        self.apply_enable(id, enabled)
    }

    /// Deregister a signal watch, unblocking the signal's delivery path
    /// for this watcher.
    pub fn remove_signal_watch(&self, id: WatcherId) -> ReactorResult<()> {
        self.deregister(id)
    }
}
