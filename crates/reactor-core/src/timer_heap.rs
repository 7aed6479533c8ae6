//! Per-clock timer heap.
//!
//! Wraps the d-ary [`Heap`](crate::heap::Heap) from `heap.rs`, keyed by
//! absolute expiry converted to a heap priority. One `TimerHeap` exists
//! per clock — the engine keeps two heaps even on backends that fold
//! both clocks onto one timer — and `reactor-runtime`'s watcher layer
//! owns one instance per `ClockKind`.

use crate::clock::ClockTime;
use crate::error::ReactorResult;
use crate::heap::{Heap, DEFAULT_ARITY};

pub use crate::heap::Handle as TimerHandle;

struct TimerEntry<T> {
    expiry: ClockTime,
    /// Zero means one-shot.
    interval: ClockTime,
    enabled: bool,
    /// Expiry count that accumulated while `enabled` was false.
    accumulated: u64,
    data: T,
}

/// One timer's expiry report: fire `count` times (always ≥ 1 when
/// produced by [`TimerHeap::process_expired`], accounting for overrun).
pub struct TimerFired {
    pub handle: TimerHandle,
    pub count: u64,
}

fn key_of(expiry: ClockTime) -> i64 {
    // Ordering only needs to be consistent with ClockTime's own Ord, and
    // timers are always scheduled within a few centuries of the epoch, so
    // truncating to i64 nanoseconds-since-epoch is safe for heap-ordering
    // purposes.
    let secs_component = expiry.secs().saturating_mul(1_000_000_000);
    secs_component.saturating_add(expiry.nanos() as i64)
}

pub struct TimerHeap<T, const D: usize = DEFAULT_ARITY> {
    heap: Heap<TimerEntry<T>, D>,
}

impl<T, const D: usize> TimerHeap<T, D> {
    pub fn new() -> Self {
        TimerHeap { heap: Heap::new() }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.heap.reserve(additional);
    }

    /// Reserve a handle for a timer that is not yet armed.
    pub fn allocate(&mut self, data: T) -> ReactorResult<TimerHandle> {
        self.heap.allocate(TimerEntry {
            expiry: ClockTime::ZERO,
            interval: ClockTime::ZERO,
            enabled: false,
            accumulated: 0,
            data,
        })
    }

    /// Arm (or re-arm) a timer at an absolute `expiry`, with `interval`
    /// zero for one-shot. Returns whether the heap root changed (callers
    /// use this to decide whether to rearm the OS-level timer/poll
    /// deadline).
    pub fn arm(
        &mut self,
        handle: TimerHandle,
        expiry: ClockTime,
        interval: ClockTime,
        enabled: bool,
    ) -> bool {
        if let Some(entry) = self.heap.get_mut(handle) {
            entry.expiry = expiry;
            entry.interval = interval;
            entry.enabled = enabled;
            entry.accumulated = 0;
        }
        if self.heap.is_queued(handle) {
            self.heap.set_priority(handle, key_of(expiry))
        } else {
            self.heap.insert(handle, key_of(expiry))
        }
    }

    /// Remove a timer from the ordering without releasing its slot — it
    /// can be re-armed later via `arm` on the same handle.
    pub fn stop(&mut self, handle: TimerHandle) {
        self.heap.unqueue(handle);
    }

    /// Fully release a timer's slot (deregister).
    pub fn remove(&mut self, handle: TimerHandle) {
        self.heap.remove(handle);
    }

    pub fn get(&self, handle: TimerHandle) -> Option<&T> {
        self.heap.get(handle).map(|e| &e.data)
    }

    pub fn get_mut(&mut self, handle: TimerHandle) -> Option<&mut T> {
        self.heap.get_mut(handle).map(|e| &mut e.data)
    }

    /// The soonest armed expiry across all timers in this heap, or `None`
    /// if no timer is queued. Used to compute the poll timeout.
    pub fn next_expiry(&self) -> Option<ClockTime> {
        self.heap.peek_root().and_then(|h| self.heap.get(h)).map(|e| e.expiry)
    }

    /// Enable or disable delivery without touching the armed expiry. If
    /// re-enabling a timer that accumulated expiries while disabled,
    /// returns the immediate delivery those expiries produce — re-enabling
    /// delivers the accumulated count immediately.
    pub fn set_enabled(&mut self, handle: TimerHandle, enabled: bool) -> Option<TimerFired> {
        let entry = self.heap.get_mut(handle)?;
        let was_enabled = entry.enabled;
        entry.enabled = enabled;
        if enabled && !was_enabled && entry.accumulated > 0 {
            let count = entry.accumulated;
            entry.accumulated = 0;
            Some(TimerFired { handle, count })
        } else {
            None
        }
    }

    /// Scan for and process all timers whose expiry is `<= now`. One-shot
    /// timers are removed from the heap (but keep their slot); interval
    /// timers are re-inserted at their next expiry with overrun computed
    /// by exact integer division. Disabled timers accumulate their
    /// expiry count silently instead of appearing in the returned list.
    pub fn process_expired(&mut self, now: ClockTime) -> Vec<TimerFired> {
        let mut fired = Vec::new();
        let now_key = key_of(now);

        while let Some(root) = self.heap.peek_root() {
            if self.heap.priority_of(root).unwrap() > now_key {
                break;
            }
            let handle = self.heap.pull_root().expect("peeked root must pull");
            let is_one_shot = {
                let entry = self.heap.get(handle).expect("pulled handle must have data");
                entry.interval == ClockTime::ZERO
            };

            if is_one_shot {
                let entry = self.heap.get_mut(handle).unwrap();
                if entry.enabled {
                    let count = 1 + entry.accumulated;
                    entry.accumulated = 0;
                    fired.push(TimerFired { handle, count });
                } else {
                    entry.accumulated += 1;
                }
                // stays unqueued until the watcher layer re-arms it
            } else {
                let (overrun, new_expiry, enabled) = {
                    let entry = self.heap.get(handle).unwrap();
                    let elapsed = now - entry.expiry;
                    let (overrun, remainder) = elapsed.div_rem(entry.interval);
                    let new_expiry = now + entry.interval - remainder;
                    (overrun, new_expiry, entry.enabled)
                };
                {
                    let entry = self.heap.get_mut(handle).unwrap();
                    entry.expiry = new_expiry;
                    if enabled {
                        let count = 1 + overrun as u64 + entry.accumulated;
                        entry.accumulated = 0;
                        fired.push(TimerFired { handle, count });
                    } else {
                        entry.accumulated += 1 + overrun as u64;
                    }
                }
                self.heap.insert(handle, key_of(new_expiry));
            }
        }

        fired
    }
}

impl<T, const D: usize> Default for TimerHeap<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_and_stays_removed() {
        let mut h: TimerHeap<&'static str> = TimerHeap::new();
        let handle = h.allocate("a").unwrap();
        h.arm(handle, ClockTime::new(10, 0), ClockTime::ZERO, true);

        let fired = h.process_expired(ClockTime::new(10, 0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].count, 1);
        assert!(h.is_empty());
        // slot is still alive, just not queued
        assert_eq!(*h.get(handle).unwrap(), "a");
    }

    #[test]
    fn interval_overrun_scenario_e() {
        // period 100ms, disabled at t=0, re-enabled at t=350ms.
        let mut h: TimerHeap<u32> = TimerHeap::new();
        let handle = h.allocate(0).unwrap();
        h.arm(handle, ClockTime::new(0, 100_000_000), ClockTime::new(0, 100_000_000), false);

        // scan at 350ms: expiries at 100, 200, 300 all <=350 in one pass
        // because each re-insertion recomputes around `now`.
        let fired = h.process_expired(ClockTime::new(0, 350_000_000));
        // disabled, so nothing delivered yet
        assert!(fired.is_empty());

        let immediate = h.set_enabled(handle, true).expect("accumulated expiries");
        assert_eq!(immediate.count, 3);
        assert_eq!(h.next_expiry(), Some(ClockTime::new(0, 400_000_000)));
    }

    #[test]
    fn enabled_interval_reports_overrun_directly() {
        let mut h: TimerHeap<u32> = TimerHeap::new();
        let handle = h.allocate(0).unwrap();
        h.arm(handle, ClockTime::new(0, 100_000_000), ClockTime::new(0, 100_000_000), true);

        let fired = h.process_expired(ClockTime::new(0, 350_000_000));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].count, 3);
        assert_eq!(h.next_expiry(), Some(ClockTime::new(0, 400_000_000)));
    }

    #[test]
    fn next_expiry_tracks_soonest_across_multiple_timers() {
        let mut h: TimerHeap<u32> = TimerHeap::new();
        let a = h.allocate(1).unwrap();
        let b = h.allocate(2).unwrap();
        h.arm(a, ClockTime::new(5, 0), ClockTime::ZERO, true);
        h.arm(b, ClockTime::new(2, 0), ClockTime::ZERO, true);
        assert_eq!(h.next_expiry(), Some(ClockTime::new(2, 0)));
    }
}
