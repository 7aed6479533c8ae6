//! Typed timer watcher registration.
//!
//! Both clocks use absolute expiries internally; `add_timer_watch_rel`
//! is sugar that reads the chosen clock once and adds the offset.

use reactor_core::clock::{ClockKind, ClockTime};
use reactor_core::watcher::{TimerWatcherData, WatcherBase, WatcherKind};
use reactor_core::{ReactorError, ReactorResult};

use crate::watchers::{Payload, TimerCallback, WatcherEntry, WatcherId};
use crate::{clock_now, EventLoop};

impl EventLoop {
    /// Arm a timer at an absolute `expiry`. A zero `interval` is
    /// one-shot; a non-zero one repeats, with overrun accounted for
    /// exactly via integer division.
    pub fn add_timer_watch_abs(
        &self,
        clock: ClockKind,
        expiry: ClockTime,
        interval: ClockTime,
        priority: i64,
        enabled: bool,
        callback: TimerCallback,
    ) -> ReactorResult<WatcherId> {
        let mut st = self.state.lock();

        let timer_handle = match clock {
            ClockKind::System => st.timers_system.allocate(WatcherId::PLACEHOLDER)?,
            ClockKind::Monotonic => st.timers_monotonic.allocate(WatcherId::PLACEHOLDER)?,
        };

        let data = TimerWatcherData { clock, timer_handle };
        let id = st.watchers.insert(WatcherEntry {
            base: WatcherBase::new(WatcherKind::Timer, priority),
            payload: Payload::Timer { data, callback, pending_count: 0 },
            on_removed: None,
        });

        match clock {
            ClockKind::System => {
                if let Some(slot) = st.timers_system.get_mut(timer_handle) {
                    *slot = id;
                }
                st.timers_system.arm(timer_handle, expiry, interval, enabled);
            }
            ClockKind::Monotonic => {
                if let Some(slot) = st.timers_monotonic.get_mut(timer_handle) {
                    *slot = id;
                }
                st.timers_monotonic.arm(timer_handle, expiry, interval, enabled);
            }
        }

        Ok(id)
    }

    /// Arm `delay` from now on `clock`.
    pub fn add_timer_watch_rel(
        &self,
        clock: ClockKind,
        delay: ClockTime,
        interval: ClockTime,
        priority: i64,
        enabled: bool,
        callback: TimerCallback,
    ) -> ReactorResult<WatcherId> {
        let expiry = clock_now(clock) + delay;
        self.add_timer_watch_abs(clock, expiry, interval, priority, enabled, callback)
    }

    /// Re-arm an existing timer watcher at a new absolute expiry,
    /// without deregistering it.
    pub fn rearm_timer_watch_abs(
        &self,
        id: WatcherId,
        expiry: ClockTime,
        interval: ClockTime,
        enabled: bool,
    ) -> ReactorResult<()> {
        let mut st = self.state.lock();
        let Some(entry) = st.watchers.get_mut(id) else { return Err(ReactorError::NotRegistered) };
        let Payload::Timer { data, .. } = &entry.payload else {
            return Err(ReactorError::Unsupported("rearm_timer_watch_abs on a non-timer watcher"));
        };
        let (clock, handle) = (data.clock, data.timer_handle);
        match clock {
            ClockKind::System => st.timers_system.arm(handle, expiry, interval, enabled),
            ClockKind::Monotonic => st.timers_monotonic.arm(handle, expiry, interval, enabled),
        };
        Ok(())
    }

    /// Stop expiry delivery without deregistering the watcher: this
    /// removes it from the heap, but the handle stays valid for a
    /// later `rearm_timer_watch_abs`/`_rel`.
    pub fn stop_timer(&self, id: WatcherId) -> ReactorResult<()> {
        let mut st = self.state.lock();
        let Some(entry) = st.watchers.get_mut(id) else { return Err(ReactorError::NotRegistered) };
        let Payload::Timer { data, .. } = &entry.payload else {
            return Err(ReactorError::Unsupported("stop_timer on a non-timer watcher"));
        };
        match data.clock {
            ClockKind::System => st.timers_system.stop(data.timer_handle),
            ClockKind::Monotonic => st.timers_monotonic.stop(data.timer_handle),
        }
        Ok(())
    }

    /// Enable/disable expiry delivery in place: disabling stops expiry
    /// delivery but accumulates count until re-enabled.
    pub fn set_timer_enabled(&self, id: WatcherId, enabled: bool) -> ReactorResult<()> {
        self.apply_enable(id, enabled)
    }

    /// Deregister a timer watch.
    pub fn remove_timer_watch(&self, id: WatcherId) -> ReactorResult<()> {
        self.deregister(id)
    }
}
