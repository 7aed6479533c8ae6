//! The event queue (the priority queue specialised to hold
//! [`WatcherId`]s) and the dispatch loop it feeds. The loop body
//! itself lives on [`crate::EventLoop`] since it needs the watcher
//! table, backend, and timer heaps together; this module holds just the
//! queue type and the enqueue helper shared by every event source.

use reactor_core::heap::Heap;
use reactor_core::rearm::Rearm;

use crate::watchers::WatcherId;

pub(crate) type EventQueue = Heap<WatcherId>;

/// Outcome of applying a dispatch verdict, used by callers (fd/bidi/
/// signal/child/timer modules) to decide what else to do after
/// `EventLoop::process_events` hands a verdict back to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VerdictAction {
    Enable,
    Disable,
    Noop,
    Unregister,
    AlreadyUnregistered,
    Requeue,
}

pub(crate) fn verdict_action(verdict: Rearm) -> VerdictAction {
    match verdict {
        Rearm::Rearm => VerdictAction::Enable,
        Rearm::Disarm => VerdictAction::Disable,
        Rearm::Noop => VerdictAction::Noop,
        Rearm::Remove => VerdictAction::Unregister,
        Rearm::Removed => VerdictAction::AlreadyUnregistered,
        Rearm::Requeue => VerdictAction::Requeue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_rearm_variant_maps_to_its_own_action() {
        assert_eq!(verdict_action(Rearm::Rearm), VerdictAction::Enable);
        assert_eq!(verdict_action(Rearm::Disarm), VerdictAction::Disable);
        assert_eq!(verdict_action(Rearm::Noop), VerdictAction::Noop);
        assert_eq!(verdict_action(Rearm::Remove), VerdictAction::Unregister);
        assert_eq!(verdict_action(Rearm::Removed), VerdictAction::AlreadyUnregistered);
        assert_eq!(verdict_action(Rearm::Requeue), VerdictAction::Requeue);
    }

    #[test]
    fn event_queue_pops_in_priority_order() {
        let mut q: EventQueue = Heap::new();
        let a = q.allocate(WatcherId::PLACEHOLDER).unwrap();
        q.insert(a, 5);
        let b = q.allocate(WatcherId::PLACEHOLDER).unwrap();
        q.insert(b, 1);
        let root = q.pull_root().unwrap();
        assert_eq!(root, b);
    }
}
