//! OS-specific backend drivers behind the [`Backend`] trait. Only
//! one backend module is compiled in, chosen by target OS; `lib.rs` just
//! re-exports it as [`SelectedBackend`] so `reactor-runtime` never has to
//! name a concrete backend type.

pub mod interrupt;
pub mod signal_capture;
pub mod signal_mask;
pub mod trait_def;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod epoll;
        pub use epoll::EpollBackend as SelectedBackend;
    } else if #[cfg(any(
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
        target_os = "macos",
        target_os = "ios"
    ))] {
        mod kqueue;
        pub use kqueue::KqueueBackend as SelectedBackend;
    } else {
        mod pselect;
        pub use pselect::PselectBackend as SelectedBackend;
    }
}

pub use trait_def::{Backend, BackendEvent, EmulatedSides, WatchToken};
