//! # reactor - portable asynchronous event-dispatch engine
//!
//! An init-system-style event loop: one dispatch core multiplexing file
//! descriptor readiness, POSIX signals, child-process termination, and
//! dual-clock (wall/monotonic) timers behind a single typed watcher API,
//! backed by whichever of epoll, kqueue, or pselect the target OS
//! actually offers.
//!
//! ## Quick start
//!
//! ```ignore
//! use reactor::{EventLoop, IoEvents, Rearm};
//!
//! let lp = EventLoop::with_default_config().unwrap();
//! lp.add_fd_watch(fd, IoEvents::IN, 0, true, Box::new(|_lp, _events| {
//!     // read the fd here
//!     Rearm::Rearm
//! })).unwrap();
//! loop {
//!     lp.run(32).unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     reactor (this crate)                  │
//! │        re-exports: EventLoop, watcher API, config         │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │  reactor-core    │ │ reactor-backend │ │ reactor-runtime │
//! │  heap, timer heap│ │ epoll / kqueue  │ │ dispatch core,  │
//! │  pid map, watcher│ │ / pselect       │ │ wait lock,      │
//! │  records         │ │ drivers         │ │ typed API       │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```

// Re-export the dispatch core.
pub use reactor_runtime::config::EventLoopConfig;
pub use reactor_runtime::watchers::{
    ChildCallback, FdCallback, RemovedCallback, SignalCallback, TimerCallback, WatcherId,
};
pub use reactor_runtime::EventLoop;
pub use reactor_runtime::watchers::child::ForkOutcome;

// Re-export platform-agnostic data types.
pub use reactor_core::clock::{ClockKind, ClockTime};
pub use reactor_core::watcher::{
    ChildWatcherData, IoEvents, ProcStatus, SigInfo, TimerWatcherData, WatcherKind,
};
pub use reactor_core::{ReactorError, ReactorResult, Rearm};

// Re-export the pid-map reservation handle, needed by callers that fork
// through a path other than `EventLoop::fork_with_watch`.
pub use reactor_core::pid_map::PidHandle;

// Re-export kprint-style leveled debug logging.
pub use reactor_core::kprint::{
    init as init_logging, set_log_level, LogLevel,
};
pub use reactor_core::{kdebug, kerror, kinfo, kprintln, ktrace, kwarn};

// Re-export environment-variable configuration helpers.
pub use reactor_core::env::{env_get, env_get_bool, env_get_opt};

// Re-export the selected backend's name, for diagnostics.
pub use reactor_backend::SelectedBackend;
