//! Typed child-process watcher registration.
//!
//! `fork` is exposed as a combined reserve/fork/register primitive,
//! but `reserve_child_watch`/`add_reserved_child_watch` are public on
//! their own too: a caller that forks through some other
//! path (e.g. `posix_spawn`, or a fork performed before the loop even
//! exists) still needs the reservation to happen before the child is
//! live and the insertion to happen after, without either step being
//! able to fail from allocation exhaustion.

use reactor_core::pid_map::PidHandle;
use reactor_core::watcher::{ChildWatcherData, WatcherBase, WatcherKind};
use reactor_core::{ReactorError, ReactorResult};

use crate::watchers::{ChildCallback, Payload, WatcherEntry, WatcherId};
use crate::EventLoop;

/// Outcome of [`EventLoop::fork_with_watch`], which provides `fork` as
/// a combined reserve/fork/register primitive.
pub enum ForkOutcome {
    /// Running in the parent; `watcher` is already registered and will
    /// dispatch once the reaper observes `pid`'s termination.
    Parent { pid: i32, watcher: WatcherId },
    /// Running in the child. The caller is responsible for `exec`ing or
    /// exiting — this `EventLoop` instance should not be driven further
    /// from here; its kernel state (epoll/kqueue fd, signalfd) was
    /// inherited but is the parent's to own.
    Child,
}

impl EventLoop {
    /// Allocate a pid-map slot before `fork()`. The
    /// returned handle is valid until `add_reserved_child_watch` (or
    /// dropping it by forking and never registering) consumes it.
    pub fn reserve_child_watch(&self) -> PidHandle {
        let mut st = self.state.lock();
        st.pid_map.reserve()
    }

    /// Associate a reservation with the child's pid after `fork()` and
    /// register its watcher. Infallible by construction: the pid-map
    /// slot already exists.
    pub fn add_reserved_child_watch(
        &self,
        handle: PidHandle,
        pid: i32,
        priority: i64,
        callback: ChildCallback,
    ) -> WatcherId {
        let mut st = self.state.lock();
        let data = ChildWatcherData { pid, status: None, terminated: false };
        let id = st.watchers.insert(WatcherEntry {
            base: WatcherBase::new(WatcherKind::Child, priority),
            payload: Payload::Child { data, callback },
            on_removed: None,
        });
        st.pid_map.add_from_reserve(handle, pid, id);
        id
    }

    /// Convenience combination of `reserve_child_watch` +
    /// `add_reserved_child_watch` for callers not working around a fork
    /// boundary (e.g. watching a pid that already exists).
    pub fn add_child_watch(&self, pid: i32, priority: i64, callback: ChildCallback) -> WatcherId {
        let handle = self.reserve_child_watch();
        self.add_reserved_child_watch(handle, pid, priority, callback)
    }

    /// Reserve, `fork()`, and — in the parent — register the child
    /// watcher before returning. The slot is allocated strictly before
    /// `fork()`, so the parent-side insertion after it can't fail and
    /// orphan the child. Safety: the same constraints as `libc::fork`/
    /// `nix::unistd::fork` apply in the child (async-signal-safe
    /// operations only until `exec`/`_exit`).
    ///
    /// # Safety
    ///
    /// Forking a multi-threaded process carries the usual POSIX hazards
    /// (only async-signal-safe calls are well-defined in the child until
    /// it execs or exits). Callers driving a `thread-safe` `EventLoop`
    /// from multiple threads must ensure the child does not touch this
    /// loop beyond what `ForkOutcome::Child` documents.
    pub unsafe fn fork_with_watch(&self, priority: i64, callback: ChildCallback) -> ReactorResult<ForkOutcome> {
        let reservation = self.reserve_child_watch();
        match nix::unistd::fork() {
            Ok(nix::unistd::ForkResult::Parent { child }) => {
                let pid = child.as_raw();
                let watcher = self.add_reserved_child_watch(reservation, pid, priority, callback);
                Ok(ForkOutcome::Parent { pid, watcher })
            }
            Ok(nix::unistd::ForkResult::Child) => {
                let mut st = self.state.lock();
                st.pid_map.unreserve(reservation);
                Ok(ForkOutcome::Child)
            }
            Err(e) => {
                let mut st = self.state.lock();
                st.pid_map.unreserve(reservation);
                Err(ReactorError::Os(e as i32))
            }
        }
    }

    /// Send a signal to a watched child, holding the reaper lock so the
    /// kernel can't reap and recycle the pid between this watcher's
    /// "has it terminated" state and the actual `kill()`. Returns
    /// `ESRCH` (wrapped as `ReactorError::Os`) iff the child had already
    /// been reaped before the call.
    pub fn send_signal(&self, id: WatcherId, signo: i32) -> ReactorResult<()> {
        let pid = {
            let st = self.state.lock();
            match st.watchers.get(id) {
                Some(entry) => match &entry.payload {
                    Payload::Child { data, .. } => data.pid,
                    _ => return Err(ReactorError::Unsupported("send_signal on a non-child watcher")),
                },
                None => return Err(ReactorError::NotRegistered),
            }
        };
        self.send_signal_to_child(pid, signo)
    }

    /// Deregister a child watch without affecting the child process
    /// itself.
    pub fn remove_child_watch(&self, id: WatcherId) -> ReactorResult<()> {
        self.deregister(id)
    }
}
