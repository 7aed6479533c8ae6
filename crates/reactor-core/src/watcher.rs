//! Watcher records: the base fields and per-kind payloads that make up a
//! registered event source.
//!
//! These are plain data: the typed callback/closure machinery that turns
//! a record into a live, dispatchable watcher lives in `reactor-runtime`,
//! which owns an `EventLoop` and can therefore invoke callbacks. This
//! module only carries the fields belonging to each watcher kind, plus
//! the lifecycle flags shared by all of them.

use crate::heap::Handle as QueueHandle;
use crate::timer_heap::TimerHandle;

/// IN/OUT readiness mask. Kept as a small hand-rolled bitset rather than
/// pulling in a bitflags-style crate: the core is deliberately
/// dependency-free and the mask has exactly two members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoEvents(u8);

impl IoEvents {
    pub const NONE: IoEvents = IoEvents(0);
    pub const IN: IoEvents = IoEvents(0b01);
    pub const OUT: IoEvents = IoEvents(0b10);

    pub fn contains(self, other: IoEvents) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: IoEvents) -> IoEvents {
        IoEvents(self.0 | other.0)
    }

    pub fn remove(self, other: IoEvents) -> IoEvents {
        IoEvents(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for IoEvents {
    type Output = IoEvents;
    fn bitor(self, rhs: IoEvents) -> IoEvents {
        self.union(rhs)
    }
}

/// Discriminates which payload a `WatcherBase` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherKind {
    Fd,
    BidiPrimary,
    BidiSecondary,
    Signal,
    Child,
    Timer,
}

/// Fields and flags shared by every registered event source, independent
/// of kind-specific payload.
#[derive(Debug, Clone)]
pub struct WatcherBase {
    pub kind: WatcherKind,
    /// Smaller dispatches earlier.
    pub priority: i64,
    /// Set for the duration of the watcher's callback invocation.
    pub active: bool,
    /// Deferred-removal request raised while `active`.
    pub deleteme: bool,
    /// Slot in the event queue, `Some` iff currently queued for dispatch.
    pub queue_handle: Option<QueueHandle>,
}

impl WatcherBase {
    pub fn new(kind: WatcherKind, priority: i64) -> Self {
        WatcherBase {
            kind,
            priority,
            active: false,
            deleteme: false,
            queue_handle: None,
        }
    }

    pub fn is_queued(&self) -> bool {
        self.queue_handle.is_some()
    }
}

/// Fd watcher payload. For a bidi pair this describes one side; the
/// pair itself is two `FdWatcherData` records sharing a descriptor,
/// coordinated by `read_removed`/`write_removed` in the owning
/// `BidiFdWatcherData`.
#[derive(Debug, Clone)]
pub struct FdWatcherData {
    pub fd: std::os::unix::io::RawFd,
    pub watched: IoEvents,
    /// Accumulated since the last dispatch (readiness the backend
    /// reported that hasn't been delivered to the callback yet).
    pub pending: IoEvents,
    /// Set when the backend cannot natively poll this descriptor type
    /// (e.g. a regular file) and the engine emulates readiness.
    pub emulated: bool,
    /// Whether this side is currently armed at the kernel level.
    /// Recomputed into a combined mask on every enable/disable/rearm
    /// for bidi pairs sharing one descriptor.
    pub kernel_enabled: bool,
}

/// Coordination state for a bidi fd watcher pair.
#[derive(Debug, Clone, Default)]
pub struct BidiCoordination {
    pub read_removed: bool,
    pub write_removed: bool,
}

impl BidiCoordination {
    pub fn fully_removed(&self) -> bool {
        self.read_removed && self.write_removed
    }
}

/// Captured signal delivery info.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigInfo {
    pub signo: i32,
    pub pid: i32,
    pub uid: u32,
    pub status: i32,
}

/// Signal watcher payload.
#[derive(Debug, Clone)]
pub struct SignalWatcherData {
    pub signo: i32,
    pub last_siginfo: Option<SigInfo>,
    /// Engine-level enable flag. The backend contract has no
    /// per-signal disable primitive — signalfd/kqueue/the captured
    /// handler keep reporting as long as the mask is watched — so a
    /// `Rearm::Disarm` verdict is honoured here instead: deliveries are
    /// dropped rather than enqueued while `false`.
    pub enabled: bool,
}

/// Exit status captured by the reaper, mirroring
/// `original_source/dasynq/childproc.h`'s `proc_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStatus {
    /// `CLD_EXITED` or a signal-related `si_code`.
    pub si_code: i32,
    /// Exit status (if `did_exit`) or terminating signal number.
    pub si_status: i32,
}

impl ProcStatus {
    const CLD_EXITED: i32 = 1;
    const CLD_KILLED: i32 = 2;

    pub fn exited(exit_code: i32) -> Self {
        ProcStatus { si_code: Self::CLD_EXITED, si_status: exit_code }
    }

    pub fn signalled(signo: i32) -> Self {
        ProcStatus { si_code: Self::CLD_KILLED, si_status: signo }
    }

    pub fn did_exit(&self) -> bool {
        self.si_code == Self::CLD_EXITED
    }

    pub fn did_exit_clean(&self) -> bool {
        self.did_exit() && self.si_status == 0
    }

    pub fn was_signalled(&self) -> bool {
        !self.did_exit()
    }
}

/// Child watcher payload.
#[derive(Debug, Clone)]
pub struct ChildWatcherData {
    pub pid: i32,
    pub status: Option<ProcStatus>,
    pub terminated: bool,
}

/// Timer watcher payload; the heap handle indexes into the
/// per-`ClockKind` `TimerHeap` owned by the runtime.
#[derive(Debug, Clone, Copy)]
pub struct TimerWatcherData {
    pub clock: crate::clock::ClockKind,
    pub timer_handle: TimerHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_events_union_and_contains() {
        let mask = IoEvents::IN | IoEvents::OUT;
        assert!(mask.contains(IoEvents::IN));
        assert!(mask.contains(IoEvents::OUT));
        let read_only = mask.remove(IoEvents::OUT);
        assert!(read_only.contains(IoEvents::IN));
        assert!(!read_only.contains(IoEvents::OUT));
    }

    #[test]
    fn bidi_fully_removed_requires_both_sides() {
        let mut coord = BidiCoordination::default();
        assert!(!coord.fully_removed());
        coord.read_removed = true;
        assert!(!coord.fully_removed());
        coord.write_removed = true;
        assert!(coord.fully_removed());
    }

    #[test]
    fn proc_status_classifies_exit_vs_signal() {
        let exited = ProcStatus { si_code: ProcStatus::CLD_EXITED, si_status: 0 };
        assert!(exited.did_exit());
        assert!(exited.did_exit_clean());

        let signalled = ProcStatus { si_code: 2, si_status: 9 };
        assert!(signalled.was_signalled());
        assert!(!signalled.did_exit());
    }
}
