//! Platform-agnostic data model for the reactor event-dispatch engine.
//!
//! This crate has no OS dependency: the d-ary priority queue, the
//! per-clock timer heap, the pid map, watcher records, and the
//! rearm-verdict enum are pure data structures and algorithms.
//! `reactor-backend` and `reactor-runtime` build the OS-facing engine on
//! top of these.

pub mod clock;
pub mod env;
pub mod error;
pub mod heap;
#[macro_use]
pub mod kprint;
pub mod pid_map;
pub mod rearm;
pub mod timer_heap;
pub mod watcher;

pub use clock::{ClockKind, ClockTime};
pub use error::{ReactorError, ReactorResult};
pub use rearm::Rearm;
