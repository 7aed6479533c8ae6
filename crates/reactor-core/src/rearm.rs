//! Rearm verdicts returned by a watcher's dispatch callback.

/// Exhaustive set of instructions a dispatch callback can hand back to
/// the engine after a watcher fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Re-enable the watch at the kernel level.
    Rearm,
    /// Keep the watcher registered but disabled.
    Disarm,
    /// Leave the current enabled/disabled state untouched.
    Noop,
    /// Unregister the watcher and notify via `watch_removed`.
    Remove,
    /// The callback already deregistered the watcher itself; the engine
    /// must not touch it further.
    Removed,
    /// Invoke the callback again after the current dispatch batch.
    Requeue,
}
