//! Watcher storage and the typed per-kind API surface.
//!
//! `reactor-core::watcher` only carries plain data (`WatcherBase` plus a
//! payload struct per kind); this module adds the boxed user callback to
//! each payload and the generation-protected arena that owns every live
//! watcher, mirroring the arena-with-generation-indices design already
//! used for the priority heap and pid map.

pub mod child;
pub mod fd;
pub mod signal;
pub mod timer;

use reactor_core::watcher::{
    ChildWatcherData, FdWatcherData, IoEvents, ProcStatus, SigInfo, SignalWatcherData,
    TimerWatcherData, WatcherBase,
};
use reactor_core::Rearm;

use crate::EventLoop;

/// Opaque handle to a registered watcher, valid until it is removed.
/// Using it after removal is caught by the generation check, not UB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub(crate) usize, pub(crate) u32);

impl WatcherId {
    /// Placeholder written into a heap/table slot before the real id is
    /// known (e.g. a timer's `TimerHeap::allocate` needs *a* payload
    /// before the watcher entry naming that handle exists yet) and
    /// patched immediately after. Never observed by user code.
    pub(crate) const PLACEHOLDER: WatcherId = WatcherId(usize::MAX, u32::MAX);

    /// Pack into a `u64` backend watch token and back. fd/bidi watchers
    /// use this directly as their `WatchToken`; signal/child watchers
    /// are keyed by signal number / pid instead (see `signal.rs`,
    /// `child.rs`).
    pub(crate) fn to_token(self) -> u64 {
        (self.0 as u64) << 32 | self.1 as u64
    }

    pub(crate) fn from_token(token: u64) -> Self {
        WatcherId((token >> 32) as usize, token as u32)
    }
}

/// The loop's public API takes `&self` throughout: every mutating
/// operation goes through the interior-locked base state, so a callback
/// only ever needs a shared reference back to the loop, even to
/// register or deregister other watchers from within itself. Callbacks
/// are required to be `Send` so that a `thread-safe` build's `EventLoop`
/// can itself be `Send + Sync` and shared via `Arc` across threads.
pub type FdCallback = Box<dyn FnMut(&EventLoop, IoEvents) -> Rearm + Send>;
pub type SignalCallback = Box<dyn FnMut(&EventLoop, SigInfo) -> Rearm + Send>;
pub type ChildCallback = Box<dyn FnMut(&EventLoop, ProcStatus) -> Rearm + Send>;
pub type TimerCallback = Box<dyn FnMut(&EventLoop, u64) -> Rearm + Send>;
pub type RemovedCallback = Box<dyn FnOnce(&EventLoop) + Send>;

pub(crate) enum Payload {
    Fd { data: FdWatcherData, callback: FdCallback },
    BidiPrimary { data: FdWatcherData, coord: WatcherId, callback: FdCallback },
    BidiSecondary { data: FdWatcherData, coord: WatcherId, callback: FdCallback },
    Signal { data: SignalWatcherData, callback: SignalCallback },
    Child { data: ChildWatcherData, callback: ChildCallback },
    Timer { data: TimerWatcherData, callback: TimerCallback, pending_count: u64 },
}

pub(crate) struct WatcherEntry {
    pub base: WatcherBase,
    pub payload: Payload,
    /// Fired exactly once, with all locks released, when the watcher is
    /// structurally removed (the `watch_removed` callback). For a bidi pair
    /// this lives on the primary side and fires once both sides are
    /// gone; see `LoopState::bidi` in `lib.rs`.
    pub on_removed: Option<RemovedCallback>,
}

struct Slot {
    entry: Option<WatcherEntry>,
    generation: u32,
}

/// Generation-protected arena of live watchers (the "pointer-dense
/// watcher lifetime" pattern also used by the priority heap and pid map).
#[derive(Default)]
pub(crate) struct WatcherTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl WatcherTable {
    pub fn new() -> Self {
        WatcherTable { slots: Vec::new(), free: Vec::new() }
    }

    pub fn insert(&mut self, entry: WatcherEntry) -> WatcherId {
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx];
            slot.entry = Some(entry);
            WatcherId(idx, slot.generation)
        } else {
            let idx = self.slots.len();
            self.slots.push(Slot { entry: Some(entry), generation: 0 });
            WatcherId(idx, 0)
        }
    }

    fn check(&self, id: WatcherId) -> Option<usize> {
        self.slots.get(id.0).filter(|s| s.generation == id.1 && s.entry.is_some()).map(|_| id.0)
    }

    pub fn get(&self, id: WatcherId) -> Option<&WatcherEntry> {
        self.check(id).and_then(|idx| self.slots[idx].entry.as_ref())
    }

    pub fn get_mut(&mut self, id: WatcherId) -> Option<&mut WatcherEntry> {
        let idx = self.check(id)?;
        self.slots[idx].entry.as_mut()
    }

    pub fn remove(&mut self, id: WatcherId) -> Option<WatcherEntry> {
        let idx = self.check(id)?;
        let entry = self.slots[idx].entry.take();
        self.slots[idx].generation = self.slots[idx].generation.wrapping_add(1);
        self.free.push(idx);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_core::watcher::WatcherKind;

    fn dummy_entry() -> WatcherEntry {
        WatcherEntry {
            base: WatcherBase::new(WatcherKind::Fd, 0),
            payload: Payload::Fd {
                data: FdWatcherData {
                    fd: -1,
                    watched: IoEvents::NONE,
                    pending: IoEvents::NONE,
                    emulated: false,
                    kernel_enabled: false,
                },
                callback: Box::new(|_, _| Rearm::Noop),
            },
            on_removed: None,
        }
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let mut table = WatcherTable::new();
        let id1 = table.insert(dummy_entry());
        table.remove(id1).unwrap();
        let id2 = table.insert(dummy_entry());
        assert_eq!(id1.0, id2.0);
        assert_ne!(id1.1, id2.1);
        assert!(table.get(id1).is_none());
        assert!(table.get(id2).is_some());
    }
}
