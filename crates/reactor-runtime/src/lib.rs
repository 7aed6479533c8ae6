//! The event loop: wires the priority queue, per-clock timer heaps,
//! pluggable `Backend`, signal integration, child reaper, cross-thread
//! interrupt, wait/attention locking, and the typed watcher API together
//! into `EventLoop`'s dispatch loop.
//!
//! Every public method takes `&self`: mutable state lives behind
//! `base_lock::BaseLock`, the way `gvthread_runtime`'s scheduler state
//! sits behind its own interior locking rather than requiring `&mut`
//! access from every worker. This is what lets a watcher's own callback
//! register or deregister other watchers on the same loop, and (with the
//! `thread-safe` feature) lets the loop be driven from an `Arc` shared
//! across threads.

pub mod attention;
mod base_lock;
pub mod config;
mod dispatch;
mod reaper;
pub mod watchers;

use reactor_backend::{Backend, BackendEvent, SelectedBackend};
use reactor_core::clock::{ClockKind, ClockTime};
use reactor_core::pid_map::PidMap;
use reactor_core::timer_heap::{TimerHandle, TimerHeap};
use reactor_core::watcher::{BidiCoordination, IoEvents, ProcStatus, SigInfo};
use reactor_core::{kdebug, kwarn, ReactorError, ReactorResult, Rearm};

use attention::AttentionLock;
use base_lock::BaseLock;
pub use config::EventLoopConfig;
use dispatch::{verdict_action, EventQueue, VerdictAction};
use reaper::ReaperLock;
use watchers::{ChildCallback, FdCallback, Payload, RemovedCallback, SignalCallback, TimerCallback, WatcherTable};
pub use watchers::WatcherId;

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Per-descriptor coordination for a bidi fd watch pair, keyed by the
/// primary side's [`WatcherId`]. The `FdWatcherData`/`Payload` on each
/// side only ever needs to know the *other* side's id (`coord`); this
/// table holds what's shared between them.
struct BidiShared {
    coord: BidiCoordination,
    fd: RawFd,
    on_removed: Option<RemovedCallback>,
}

struct LoopState {
    /// `None` only for the duration of a blocking `Backend::poll` call,
    /// during which the base lock is released so other operations can
    /// proceed — they just can't touch the backend itself until
    /// the poller, who holds the attention queue's head, puts it back.
    backend: Option<SelectedBackend>,
    watchers: WatcherTable,
    queue: EventQueue,
    timers_system: TimerHeap<WatcherId>,
    timers_monotonic: TimerHeap<WatcherId>,
    pid_map: PidMap<WatcherId>,
    bidi: HashMap<WatcherId, BidiShared>,
}

/// The event loop. Construct with [`EventLoop::new`] or
/// [`EventLoop::with_default_config`], drive it with [`EventLoop::run`]
/// or [`EventLoop::poll`], and register watchers with the typed methods
/// in `watchers/{fd,signal,child,timer}.rs`.
pub struct EventLoop {
    state: BaseLock<LoopState>,
    attention: AttentionLock,
    pub(crate) reaper_lock: ReaperLock,
    /// Raw fd to wake a blocked poller from any thread, captured once at
    /// construction so it stays reachable even while `backend` is
    /// checked out.
    wake_fd: RawFd,
    config: EventLoopConfig,
}

impl EventLoop {
    pub fn new(config: EventLoopConfig) -> ReactorResult<Self> {
        let backend = SelectedBackend::new()?;
        let wake_fd = backend.interrupt_fd();
        kdebug!("reactor: event loop starting on backend {}", SelectedBackend::name());

        let mut queue = EventQueue::new();
        let mut timers_system = TimerHeap::new();
        let mut timers_monotonic = TimerHeap::new();
        queue.reserve(config.initial_heap_capacity);
        timers_system.reserve(config.initial_heap_capacity);
        timers_monotonic.reserve(config.initial_heap_capacity);

        let lp = EventLoop {
            state: BaseLock::new(LoopState {
                backend: Some(backend),
                watchers: WatcherTable::new(),
                queue,
                timers_system,
                timers_monotonic,
                pid_map: PidMap::new(),
                bidi: HashMap::new(),
            }),
            attention: AttentionLock::new(),
            reaper_lock: ReaperLock::new(),
            wake_fd,
            config,
        };

        if lp.config.install_child_reaper {
            reaper::install(&lp)?;
        }

        Ok(lp)
    }

    pub fn with_default_config() -> ReactorResult<Self> {
        Self::new(EventLoopConfig::default())
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        SelectedBackend::name()
    }

    /// Wake a thread currently blocked in [`EventLoop::run`] from any
    /// other thread. Also used internally by the attention lock
    /// to jump a pending unregistration ahead of a long poll.
    pub fn interrupt_wait(&self) {
        write_wake(self.wake_fd);
    }

    /// Block until at least one event is ready (or a timer expires),
    /// then dispatch up to `limit` watchers. Returns the number
    /// dispatched.
    pub fn run(&self, limit: usize) -> ReactorResult<usize> {
        self.pull_events(true)?;
        self.process_events(limit)
    }

    /// Non-blocking: pick up whatever is already ready, dispatch up to
    /// `limit` watchers, and return immediately either way.
    pub fn poll(&self, limit: usize) -> ReactorResult<usize> {
        self.pull_events(false)?;
        self.process_events(limit)
    }

    /// [`EventLoop::run`] using `config.dispatch_batch_limit` as the
    /// per-iteration cap, for callers happy with the configured default.
    pub fn run_default(&self) -> ReactorResult<usize> {
        self.run(self.config.dispatch_batch_limit)
    }

    /// [`EventLoop::poll`] using `config.dispatch_batch_limit`.
    pub fn poll_default(&self) -> ReactorResult<usize> {
        self.poll(self.config.dispatch_batch_limit)
    }

    /// Deregister a watcher. If the watcher is
    /// mid-dispatch (`active`), removal is deferred until its callback
    /// returns; otherwise it happens immediately, with `on_removed`
    /// invoked once all locks are released.
    pub fn deregister(&self, id: WatcherId) -> ReactorResult<()> {
        let _attn = self.attention.acquire_attention(|| self.interrupt_wait());
        let needs_removal_now = {
            let mut st = self.state.lock();
            match st.watchers.get_mut(id) {
                None => return Err(ReactorError::NotRegistered),
                Some(entry) => {
                    if entry.base.active {
                        entry.base.deleteme = true;
                        false
                    } else {
                        if entry.base.is_queued() {
                            if let Some(h) = entry.base.queue_handle.take() {
                                st.queue.remove(h);
                            }
                        }
                        true
                    }
                }
            }
        };
        if needs_removal_now {
            self.finalize_removal(id)
        } else {
            Ok(())
        }
    }

    /// Register the `watch_removed` callback fired once a
    /// non-bidi watcher is structurally unregistered, with all locks
    /// released (immediately if it is idle, or after its in-flight
    /// dispatch returns if `active`). Bidi fd pairs take their
    /// `on_removed` through `add_bidi_fd_watch` instead, since theirs
    /// fires once for the *pair* rather than per side.
    pub fn set_removed_callback(&self, id: WatcherId, cb: RemovedCallback) -> ReactorResult<()> {
        let mut st = self.state.lock();
        match st.watchers.get_mut(id) {
            Some(entry) => {
                entry.on_removed = Some(cb);
                Ok(())
            }
            None => Err(ReactorError::NotRegistered),
        }
    }

    /// Called by the reaper once `waitid` reports a pid's termination.
    /// Dispatches the registered child watcher, if any, with the
    /// next poll/run — termination is recorded immediately but the
    /// user's callback only runs from inside the dispatch loop, same as
    /// every other watcher kind.
    pub(crate) fn mark_child_terminated(&self, pid: i32, status: ProcStatus) {
        let mut st = self.state.lock();
        let Some(&id) = st.pid_map.get(pid) else {
            kwarn!("reactor: reaped untracked pid {}", pid);
            return;
        };
        if let Some(entry) = st.watchers.get_mut(id) {
            if let Payload::Child { data, .. } = &mut entry.payload {
                data.status = Some(status);
                data.terminated = true;
            }
        }
        enqueue_if_needed(&mut st, id);
    }

    pub(crate) fn send_signal_to_child(&self, pid: i32, signo: i32) -> ReactorResult<()> {
        reaper::send_signal(self, pid, signo)
    }

    // --- internal dispatch machinery -----------------------------------

    fn pull_events(&self, do_wait: bool) -> ReactorResult<()> {
        let _attn = if do_wait {
            self.attention.acquire_poll_wait()
        } else {
            match self.attention.try_acquire_attention() {
                Some(g) => g,
                None => return Ok(()),
            }
        };

        let (timeout, mut backend) = {
            let mut st = self.state.lock();
            let now_sys = clock_now(ClockKind::System);
            let now_mono = clock_now(ClockKind::Monotonic);
            let deadline = earliest_deadline(&st, now_sys, now_mono);
            let timeout = if !do_wait { Some(Duration::ZERO) } else { deadline };
            let backend = st.backend.take().expect("backend checked out twice");
            (timeout, backend)
        };

        let mut events = Vec::new();
        let poll_result = backend.poll(timeout, &mut events);

        let mut st = self.state.lock();
        st.backend = Some(backend);
        poll_result?;

        for ev in events {
            handle_backend_event(&mut st, ev);
        }

        let now_sys = clock_now(ClockKind::System);
        let now_mono = clock_now(ClockKind::Monotonic);
        let fired_sys = st.timers_system.process_expired(now_sys);
        let fired_mono = st.timers_monotonic.process_expired(now_mono);
        for f in fired_sys {
            enqueue_timer_fired(&mut st, ClockKind::System, f);
        }
        for f in fired_mono {
            enqueue_timer_fired(&mut st, ClockKind::Monotonic, f);
        }

        Ok(())
    }

    fn process_events(&self, limit: usize) -> ReactorResult<usize> {
        // Cap to the queue's size at the start of this call so a
        // self-requeuing watcher can't starve the rest of the batch.
        let cap = {
            let st = self.state.lock();
            st.queue.len().min(limit)
        };

        let mut dispatched = 0;
        for _ in 0..cap {
            let id = {
                let mut st = self.state.lock();
                let Some(h) = st.queue.pull_root() else { break };
                let id = *st.queue.get(h).expect("pulled handle must still have data");
                st.queue.remove(h);
                if let Some(entry) = st.watchers.get_mut(id) {
                    entry.base.queue_handle = None;
                    entry.base.active = true;
                }
                id
            };
            self.dispatch_one(id)?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    fn dispatch_one(&self, id: WatcherId) -> ReactorResult<()> {
        let verdict = self.invoke_callback(id);

        let forced_remove = {
            let mut st = self.state.lock();
            match st.watchers.get_mut(id) {
                None => return Ok(()),
                Some(entry) => {
                    entry.base.active = false;
                    entry.base.deleteme
                }
            }
        };

        if forced_remove {
            return self.finalize_removal(id);
        }

        match verdict_action(verdict) {
            VerdictAction::AlreadyUnregistered => Ok(()),
            VerdictAction::Unregister => self.finalize_removal(id),
            VerdictAction::Requeue => self.requeue(id),
            VerdictAction::Enable => self.apply_enable(id, true),
            VerdictAction::Disable => self.apply_enable(id, false),
            VerdictAction::Noop => Ok(()),
        }
    }

    fn invoke_callback(&self, id: WatcherId) -> Rearm {
        enum Extracted {
            Fd(FdCallback, IoEvents),
            Signal(SignalCallback, SigInfo),
            Child(ChildCallback, ProcStatus),
            Timer(TimerCallback, u64),
        }

        let extracted = {
            let mut st = self.state.lock();
            let Some(entry) = st.watchers.get_mut(id) else { return Rearm::Removed };
            match &mut entry.payload {
                Payload::Fd { data, callback }
                | Payload::BidiPrimary { data, callback, .. }
                | Payload::BidiSecondary { data, callback, .. } => {
                    let events = std::mem::replace(&mut data.pending, IoEvents::NONE);
                    let cb = std::mem::replace(callback, Box::new(|_, _| Rearm::Noop));
                    Extracted::Fd(cb, events)
                }
                Payload::Signal { data, callback } => {
                    let info = data.last_siginfo.take().unwrap_or_default();
                    let cb = std::mem::replace(callback, Box::new(|_, _| Rearm::Noop));
                    Extracted::Signal(cb, info)
                }
                Payload::Child { data, callback } => {
                    let status = data.status.take().unwrap_or(ProcStatus { si_code: 0, si_status: 0 });
                    let cb = std::mem::replace(callback, Box::new(|_, _| Rearm::Noop));
                    Extracted::Child(cb, status)
                }
                Payload::Timer { callback, pending_count, .. } => {
                    let count = std::mem::take(pending_count);
                    let cb = std::mem::replace(callback, Box::new(|_, _| Rearm::Noop));
                    Extracted::Timer(cb, count)
                }
            }
        };

        match extracted {
            Extracted::Fd(mut cb, events) => {
                let v = cb(self, events);
                self.restore_callback(id, RestoreCallback::Fd(cb));
                v
            }
            Extracted::Signal(mut cb, info) => {
                let v = cb(self, info);
                self.restore_callback(id, RestoreCallback::Signal(cb));
                v
            }
            Extracted::Child(mut cb, status) => {
                let v = cb(self, status);
                self.restore_callback(id, RestoreCallback::Child(cb));
                v
            }
            Extracted::Timer(mut cb, count) => {
                let v = cb(self, count);
                self.restore_callback(id, RestoreCallback::Timer(cb));
                v
            }
        }
    }

    fn restore_callback(&self, id: WatcherId, cb: RestoreCallback) {
        let mut st = self.state.lock();
        let Some(entry) = st.watchers.get_mut(id) else { return };
        match (&mut entry.payload, cb) {
            (Payload::Fd { callback, .. }, RestoreCallback::Fd(c))
            | (Payload::BidiPrimary { callback, .. }, RestoreCallback::Fd(c))
            | (Payload::BidiSecondary { callback, .. }, RestoreCallback::Fd(c)) => *callback = c,
            (Payload::Signal { callback, .. }, RestoreCallback::Signal(c)) => *callback = c,
            (Payload::Child { callback, .. }, RestoreCallback::Child(c)) => *callback = c,
            (Payload::Timer { callback, .. }, RestoreCallback::Timer(c)) => *callback = c,
            _ => {}
        }
    }

    fn requeue(&self, id: WatcherId) -> ReactorResult<()> {
        let mut st = self.state.lock();
        enqueue_if_needed(&mut st, id);
        Ok(())
    }

    fn apply_enable(&self, id: WatcherId, enable: bool) -> ReactorResult<()> {
        let _attn = self.attention.acquire_attention(|| self.interrupt_wait());
        let mut st = self.state.lock();

        // Disabling removes the watcher from the event queue if queued.
        // Applies uniformly across watcher kinds, ahead of the
        // kind-specific kernel-level work below.
        if !enable {
            if let Some(entry) = st.watchers.get_mut(id) {
                if let Some(h) = entry.base.queue_handle.take() {
                    st.queue.remove(h);
                }
            }
        }

        enum Kind {
            Fd { fd: RawFd, events: IoEvents, emulated: bool },
            BidiSide { fd: RawFd, this_event: IoEvents, other_id: WatcherId },
            Signal,
            Inert,
            Timer { clock: ClockKind, handle: TimerHandle },
        }

        let Some(entry) = st.watchers.get_mut(id) else { return Ok(()) };
        let kind = match &mut entry.payload {
            Payload::Fd { data, .. } => {
                data.kernel_enabled = enable;
                Kind::Fd { fd: data.fd, events: data.watched, emulated: data.emulated }
            }
            Payload::BidiPrimary { data, coord, .. } => {
                data.kernel_enabled = enable;
                Kind::BidiSide { fd: data.fd, this_event: IoEvents::IN, other_id: *coord }
            }
            Payload::BidiSecondary { data, coord, .. } => {
                data.kernel_enabled = enable;
                Kind::BidiSide { fd: data.fd, this_event: IoEvents::OUT, other_id: *coord }
            }
            Payload::Signal { data, .. } => {
                data.enabled = enable;
                Kind::Signal
            }
            Payload::Child { .. } => Kind::Inert,
            Payload::Timer { data, .. } => Kind::Timer { clock: data.clock, handle: data.timer_handle },
        };

        match kind {
            Kind::Fd { fd, events, emulated } => {
                if emulated {
                    if enable {
                        mark_emulated_ready(&mut st, id, IoEvents::IN);
                    }
                    Ok(())
                } else {
                    let backend = st.backend.as_mut().unwrap();
                    backend.disable_fd_watch(fd, id.to_token())?;
                    if enable {
                        backend.enable_fd_watch(fd, id.to_token(), events)
                    } else {
                        Ok(())
                    }
                }
            }
            Kind::BidiSide { fd, this_event, other_id } => {
                recompute_bidi_mask(&mut st, fd, id, this_event, enable, other_id)
            }
            Kind::Signal | Kind::Inert => Ok(()),
            Kind::Timer { clock, handle } => {
                let fired = match clock {
                    ClockKind::System => st.timers_system.set_enabled(handle, enable),
                    ClockKind::Monotonic => st.timers_monotonic.set_enabled(handle, enable),
                };
                if let Some(f) = fired {
                    enqueue_timer_fired(&mut st, clock, f);
                }
                Ok(())
            }
        }
    }

    fn finalize_removal(&self, id: WatcherId) -> ReactorResult<()> {
        let (on_removed, result) = {
            let mut st = self.state.lock();
            finalize_removal_locked(&mut st, id)
        };
        let result = result;
        if let Some(cb) = on_removed {
            cb(self);
        }
        result
    }
}

enum RestoreCallback {
    Fd(FdCallback),
    Signal(SignalCallback),
    Child(ChildCallback),
    Timer(TimerCallback),
}

fn finalize_removal_locked(st: &mut LoopState, id: WatcherId) -> (Option<RemovedCallback>, ReactorResult<()>) {
    let Some(entry) = st.watchers.remove(id) else { return (None, Ok(())) };
    match entry.payload {
        Payload::Fd { data, .. } => {
            // An emulated watch was never added to the backend's kernel
            // set (the descriptor type isn't pollable), so there's
            // nothing to remove at that level — calling through would
            // surface a spurious OS error (e.g. ENOENT) for a
            // perfectly normal deregister.
            let res = if data.emulated {
                Ok(())
            } else {
                st.backend.as_mut().unwrap().remove_fd_watch(data.fd, id.to_token())
            };
            (entry.on_removed, res)
        }
        Payload::BidiPrimary { .. } => finalize_bidi_side(st, id, true),
        Payload::BidiSecondary { coord, .. } => finalize_bidi_side(st, coord, false),
        Payload::Signal { data, .. } => {
            let res = st.backend.as_mut().unwrap().remove_signal_watch(data.signo);
            (entry.on_removed, res)
        }
        Payload::Child { data, .. } => {
            st.pid_map.remove_by_pid(data.pid);
            (entry.on_removed, Ok(()))
        }
        Payload::Timer { data, .. } => {
            match data.clock {
                ClockKind::System => st.timers_system.remove(data.timer_handle),
                ClockKind::Monotonic => st.timers_monotonic.remove(data.timer_handle),
            }
            (entry.on_removed, Ok(()))
        }
    }
}

fn finalize_bidi_side(st: &mut LoopState, primary_id: WatcherId, is_primary: bool) -> (Option<RemovedCallback>, ReactorResult<()>) {
    let Some(shared) = st.bidi.get_mut(&primary_id) else { return (None, Ok(())) };
    if is_primary {
        shared.coord.read_removed = true;
    } else {
        shared.coord.write_removed = true;
    }
    if !shared.coord.fully_removed() {
        return (None, Ok(()));
    }
    let shared = st.bidi.remove(&primary_id).expect("checked above");
    let res = st.backend.as_mut().unwrap().remove_bidi_fd_watch(shared.fd);
    (shared.on_removed, res)
}

fn recompute_bidi_mask(
    st: &mut LoopState,
    fd: RawFd,
    id: WatcherId,
    this_event: IoEvents,
    this_enabled: bool,
    other_id: WatcherId,
) -> ReactorResult<()> {
    let other_event = st.watchers.get(other_id).and_then(|e| match &e.payload {
        Payload::BidiPrimary { data, .. } if data.kernel_enabled => Some(IoEvents::IN),
        Payload::BidiSecondary { data, .. } if data.kernel_enabled => Some(IoEvents::OUT),
        _ => None,
    });

    let mut combined = IoEvents::NONE;
    if this_enabled {
        combined = combined.union(this_event);
    }
    if let Some(ev) = other_event {
        combined = combined.union(ev);
    }

    let backend = st.backend.as_mut().unwrap();
    backend.disable_fd_watch(fd, id.to_token())?;
    if !combined.is_empty() {
        backend.enable_fd_watch(fd, id.to_token(), combined)?;
    }
    Ok(())
}

fn handle_backend_event(st: &mut LoopState, ev: BackendEvent) {
    match ev {
        BackendEvent::FdReady { token, events } => {
            let id = WatcherId::from_token(token);
            let Some(entry) = st.watchers.get_mut(id) else { return };
            match &mut entry.payload {
                Payload::Fd { data, .. }
                | Payload::BidiPrimary { data, .. }
                | Payload::BidiSecondary { data, .. } => {
                    data.pending = data.pending.union(events);
                }
                _ => return,
            }
            enqueue_if_needed(st, id);
        }
        BackendEvent::SignalReceived { token, info } => {
            let id = WatcherId::from_token(token);
            let Some(entry) = st.watchers.get_mut(id) else { return };
            match &mut entry.payload {
                Payload::Signal { data, .. } if data.enabled => data.last_siginfo = Some(info),
                Payload::Signal { .. } => return,
                _ => return,
            }
            enqueue_if_needed(st, id);
        }
    }
}

fn enqueue_timer_fired(st: &mut LoopState, clock: ClockKind, fired: reactor_core::timer_heap::TimerFired) {
    let id = match clock {
        ClockKind::System => st.timers_system.get(fired.handle).copied(),
        ClockKind::Monotonic => st.timers_monotonic.get(fired.handle).copied(),
    };
    let Some(id) = id else { return };
    if let Some(entry) = st.watchers.get_mut(id) {
        if let Payload::Timer { pending_count, .. } = &mut entry.payload {
            *pending_count += fired.count;
        }
    }
    enqueue_if_needed(st, id);
}

/// Mark an emulated fd side's pending mask ready and enqueue it. For an
/// emulated side, readiness is always reported as IN-ready, and on
/// rearm the engine re-queues it immediately rather than reinstating a
/// kernel watch. Shared by initial registration and by `apply_enable`'s
/// rearm path so both go through the same readiness bookkeeping.
pub(crate) fn mark_emulated_ready(st: &mut LoopState, id: WatcherId, ev: IoEvents) {
    if let Some(entry) = st.watchers.get_mut(id) {
        match &mut entry.payload {
            Payload::Fd { data, .. }
            | Payload::BidiPrimary { data, .. }
            | Payload::BidiSecondary { data, .. } => data.pending = data.pending.union(ev),
            _ => return,
        }
    }
    enqueue_if_needed(st, id);
}

/// Enqueue `id` for dispatch unless it's already queued or currently
/// being dispatched.
pub(crate) fn enqueue_if_needed(st: &mut LoopState, id: WatcherId) {
    let Some(entry) = st.watchers.get_mut(id) else { return };
    if entry.base.is_queued() || entry.base.active {
        return;
    }
    let priority = entry.base.priority;
    let Ok(h) = st.queue.allocate(id) else { return };
    st.queue.insert(h, priority);
    if let Some(entry) = st.watchers.get_mut(id) {
        entry.base.queue_handle = Some(h);
    }
}

fn earliest_deadline(st: &LoopState, now_sys: ClockTime, now_mono: ClockTime) -> Option<Duration> {
    let rel_sys = st.timers_system.next_expiry().map(|exp| relative(exp, now_sys));
    let rel_mono = st.timers_monotonic.next_expiry().map(|exp| relative(exp, now_mono));
    match (rel_sys, rel_mono) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn relative(expiry: ClockTime, now: ClockTime) -> Duration {
    if expiry <= now {
        Duration::ZERO
    } else {
        (expiry - now).as_duration()
    }
}

pub(crate) fn clock_now(clock: ClockKind) -> ClockTime {
    let id = match clock {
        ClockKind::System => nix::time::ClockId::CLOCK_REALTIME,
        ClockKind::Monotonic => nix::time::ClockId::CLOCK_MONOTONIC,
    };
    let ts = nix::time::clock_gettime(id).expect("clock_gettime should not fail for these clocks");
    ClockTime::new(ts.tv_sec(), ts.tv_nsec() as i32)
}

fn write_wake(fd: RawFd) {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            let val: u64 = 1;
            unsafe { libc::write(fd, &val as *const u64 as *const libc::c_void, 8); }
        } else {
            let val: u8 = 1;
            unsafe { libc::write(fd, &val as *const u8 as *const libc::c_void, 1); }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn run_dispatches_ready_pipe_and_removes_oneshot_watch() {
        let lp = EventLoop::new(EventLoopConfig::new().install_child_reaper(false)).unwrap();
        let (r, w) = nix::unistd::pipe().unwrap();
        let rfd = r.as_raw_fd();

        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();

        lp.add_fd_watch(rfd, IoEvents::IN, 0, true, Box::new(move |_lp, ev| {
            assert!(ev.contains(IoEvents::IN));
            fired2.store(true, std::sync::atomic::Ordering::SeqCst);
            Rearm::Remove
        }))
        .unwrap();

        nix::unistd::write(&w, b"x").unwrap();

        let n = lp.run(16).unwrap();
        assert_eq!(n, 1);
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn priority_orders_equal_readiness_dispatch() {
        let lp = EventLoop::new(EventLoopConfig::new().install_child_reaper(false)).unwrap();
        let (r1, w1) = nix::unistd::pipe().unwrap();
        let (r2, w2) = nix::unistd::pipe().unwrap();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        lp.add_fd_watch(r1.as_raw_fd(), IoEvents::IN, 10, true, Box::new(move |_lp, _ev| {
            o1.lock().unwrap().push(1);
            Rearm::Remove
        }))
        .unwrap();
        let o2 = order.clone();
        lp.add_fd_watch(r2.as_raw_fd(), IoEvents::IN, 0, true, Box::new(move |_lp, _ev| {
            o2.lock().unwrap().push(2);
            Rearm::Remove
        }))
        .unwrap();

        nix::unistd::write(&w1, b"x").unwrap();
        nix::unistd::write(&w2, b"x").unwrap();

        lp.run(16).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }
}
