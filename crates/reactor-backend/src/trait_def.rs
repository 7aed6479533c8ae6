//! The `Backend` contract that `reactor-runtime`'s dispatch core
//! drives. Implemented once per OS facility (`epoll`, `kqueue`,
//! `pselect`); which one compiles in is chosen at build time by
//! `lib.rs`'s `cfg_if` block, keeping the hot arming path monomorphic
//! rather than going through a vtable.

use reactor_core::watcher::{IoEvents, SigInfo};
use reactor_core::ReactorResult;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Opaque identifier the runtime assigns to a registered watch and gets
/// back in the corresponding [`BackendEvent`]. Backends treat this as a
/// plain `u64` payload (epoll's `data.u64`, kqueue's `udata`, or an
/// index the pselect backend keeps in its own fd table).
pub type WatchToken = u64;

/// A single readiness/signal notification produced by a backend poll.
#[derive(Debug, Clone, Copy)]
pub enum BackendEvent {
    FdReady { token: WatchToken, events: IoEvents },
    SignalReceived { token: WatchToken, info: SigInfo },
}

/// Which side of a bidi fd watch needed emulation — the result of
/// `add_bidi_fd_watch`, which reports `{0 | IN | OUT | IN|OUT}`.
pub type EmulatedSides = IoEvents;

/// The per-OS polling/signal/timer primitive contract.
pub trait Backend: Sized {
    /// Backend can watch IN+OUT on one native handle.
    const HAS_BIDI_FD_WATCH: bool;
    /// Backend requires two separate watches to cover IN and OUT.
    const HAS_SEPARATE_RW_FD_WATCHES: bool;
    /// Backend persists a level-triggered watch across notifications
    /// instead of requiring rearm after every fire.
    const SUPPORTS_NON_ONESHOT_FD: bool;
    /// Adding/enabling an fd watch while a poll is in progress requires
    /// waking the poller so it observes the new registration.
    const INTERRUPT_AFTER_FD_ADD: bool;
    /// Same, for signal watches.
    const INTERRUPT_AFTER_SIGNAL_ADD: bool;
    /// Backend tracks both clocks independently at the OS level and
    /// remains correct across wall-clock adjustments.
    const FULL_TIMER_SUPPORT: bool;

    fn name() -> &'static str;

    fn new() -> ReactorResult<Self>;

    /// Register `fd` for `events`. Returns `Ok(true)` if natively
    /// watchable, `Ok(false)` if the descriptor type is unsupported and
    /// the caller must fall back to emulation.
    fn add_fd_watch(
        &mut self,
        fd: RawFd,
        token: WatchToken,
        events: IoEvents,
        enabled: bool,
    ) -> ReactorResult<bool>;

    /// Register a bidi pair sharing `fd`. Returns which side(s) need
    /// emulation (`IoEvents::NONE` if both sides are natively watched).
    fn add_bidi_fd_watch(
        &mut self,
        fd: RawFd,
        read_token: WatchToken,
        write_token: WatchToken,
        enabled: IoEvents,
    ) -> ReactorResult<EmulatedSides>;

    fn enable_fd_watch(&mut self, fd: RawFd, token: WatchToken, events: IoEvents) -> ReactorResult<()>;
    fn disable_fd_watch(&mut self, fd: RawFd, token: WatchToken) -> ReactorResult<()>;
    fn remove_fd_watch(&mut self, fd: RawFd, token: WatchToken) -> ReactorResult<()>;
    fn remove_bidi_fd_watch(&mut self, fd: RawFd) -> ReactorResult<()>;

    fn add_signal_watch(&mut self, signo: i32, token: WatchToken) -> ReactorResult<()>;
    fn rearm_signal_watch(&mut self, signo: i32) -> ReactorResult<()>;
    fn remove_signal_watch(&mut self, signo: i32) -> ReactorResult<()>;

    /// Poll once, blocking up to `timeout` (`None` = infinite, `Some(ZERO)`
    /// = non-blocking probe). Appends any ready events to `out`.
    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<BackendEvent>) -> ReactorResult<()>;

    /// Wake a thread currently blocked in `poll` from any other thread.
    fn interrupt_wait(&self);

    /// Raw fd backing `interrupt_wait`'s wakeup channel. The runtime
    /// caches this once at construction so a thread can still wake a
    /// blocked poller even while the `EventLoop`'s base lock holds the
    /// `Backend` value itself checked out for the duration of a blocking
    /// `poll` call.
    fn interrupt_fd(&self) -> RawFd;
}
