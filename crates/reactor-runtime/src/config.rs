//! Event loop configuration, grounded on
//! `gvthread_runtime::config::SchedulerConfig::from_env()`: compile-time
//! defaults layered with environment-variable overrides, plus a builder
//! for programmatic construction.

use reactor_core::env::{env_get, env_get_bool};

mod defaults {
    pub const INITIAL_HEAP_CAPACITY: usize = 64;
    pub const DISPATCH_BATCH_LIMIT: usize = 256;
    pub const INSTALL_CHILD_REAPER: bool = true;
}

/// Runtime knobs for an [`crate::EventLoop`][EventLoop]. Use
/// [`EventLoopConfig::from_env`] for the default+override path, or
/// [`EventLoopConfig::new`] for full explicit control (useful in tests).
///
/// [EventLoop]: ../struct.EventLoop.html
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    /// Initial capacity reserved in the priority heap and each timer
    /// heap, to avoid early reallocation churn.
    pub initial_heap_capacity: usize,
    /// Upper bound on events drained from the event queue per
    /// `EventLoop::run_once` call.
    pub dispatch_batch_limit: usize,
    /// Install the SIGCHLD no-op handler and reap loop on
    /// construction. Disable when the host process manages SIGCHLD
    /// itself and only wants fd/timer/signal watches.
    pub install_child_reaper: bool,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl EventLoopConfig {
    /// Compile-time defaults with environment overrides:
    ///
    /// - `REACTOR_INITIAL_HEAP_CAPACITY`
    /// - `REACTOR_DISPATCH_BATCH_LIMIT`
    /// - `REACTOR_INSTALL_CHILD_REAPER` (0/1)
    pub fn from_env() -> Self {
        Self {
            initial_heap_capacity: env_get(
                "REACTOR_INITIAL_HEAP_CAPACITY",
                defaults::INITIAL_HEAP_CAPACITY,
            ),
            dispatch_batch_limit: env_get(
                "REACTOR_DISPATCH_BATCH_LIMIT",
                defaults::DISPATCH_BATCH_LIMIT,
            ),
            install_child_reaper: env_get_bool(
                "REACTOR_INSTALL_CHILD_REAPER",
                defaults::INSTALL_CHILD_REAPER,
            ),
        }
    }

    /// Explicit compile-time defaults, no environment lookup.
    pub fn new() -> Self {
        Self {
            initial_heap_capacity: defaults::INITIAL_HEAP_CAPACITY,
            dispatch_batch_limit: defaults::DISPATCH_BATCH_LIMIT,
            install_child_reaper: defaults::INSTALL_CHILD_REAPER,
        }
    }

    pub fn initial_heap_capacity(mut self, n: usize) -> Self {
        self.initial_heap_capacity = n;
        self
    }

    pub fn dispatch_batch_limit(mut self, n: usize) -> Self {
        self.dispatch_batch_limit = n;
        self
    }

    pub fn install_child_reaper(mut self, enable: bool) -> Self {
        self.install_child_reaper = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EventLoopConfig::new();
        assert!(cfg.initial_heap_capacity > 0);
        assert!(cfg.dispatch_batch_limit > 0);
    }

    #[test]
    fn builder_overrides_fields() {
        let cfg = EventLoopConfig::new().dispatch_batch_limit(16).install_child_reaper(false);
        assert_eq!(cfg.dispatch_batch_limit, 16);
        assert!(!cfg.install_child_reaper);
    }
}
