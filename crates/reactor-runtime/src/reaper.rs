//! Child-process reaper, grounded on
//! `original_source/dasynq/include/dasynq/childproc.h`'s pre-fork
//! reservation scheme and `waitid(P_ALL, WNOHANG|WEXITED)` drain loop.
//!
//! Reaping piggybacks on the ordinary signal-watcher machinery: SIGCHLD
//! is registered like any other watched signal, and its callback is
//! this module's drain loop rather than user code. A dedicated
//! `reaper_lock`, independent of whatever locks guard the rest of the
//! loop's state, serializes `waitid` against `send_signal` so that a
//! `kill()` racing a child's exit either succeeds or observes `ESRCH`
//! only after the engine has already recorded the termination.

use nix::errno::Errno;
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use reactor_core::watcher::ProcStatus;
use reactor_core::{ReactorError, ReactorResult};
use std::sync::Mutex;

use crate::EventLoop;

pub(crate) const REAPER_PRIORITY: i64 = i64::MIN;

#[derive(Default)]
pub(crate) struct ReaperLock {
    lock: Mutex<()>,
}

impl ReaperLock {
    pub fn new() -> Self {
        ReaperLock { lock: Mutex::new(()) }
    }
}

pub(crate) fn install(lp: &EventLoop) -> ReactorResult<()> {
    lp.add_signal_watch(libc::SIGCHLD, REAPER_PRIORITY, Box::new(|lp, _info| {
        drain(lp);
        reactor_core::Rearm::Rearm
    }))
    .map(|_| ())
}

/// Reap every child currently waitable without blocking, dispatching
/// each reaped pid's watcher (if one is registered) immediately.
pub(crate) fn drain(lp: &EventLoop) {
    let _guard = lp.reaper_lock.lock.lock().unwrap();
    loop {
        let status = match waitid(Id::All, WaitPidFlag::WNOHANG | WaitPidFlag::WEXITED) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => status,
            Err(_) => break,
        };

        let (pid, proc_status) = match status {
            WaitStatus::Exited(pid, code) => (pid.as_raw(), ProcStatus::exited(code)),
            WaitStatus::Signaled(pid, sig, _core) => (pid.as_raw(), ProcStatus::signalled(sig as i32)),
            _ => continue,
        };

        lp.mark_child_terminated(pid, proc_status);
    }
}

pub(crate) fn send_signal(lp: &EventLoop, pid: i32, signo: i32) -> ReactorResult<()> {
    let _guard = lp.reaper_lock.lock.lock().unwrap();
    let sig = nix::sys::signal::Signal::try_from(signo).map_err(|e| ReactorError::Os(e as i32))?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), sig).map_err(|e| ReactorError::Os(e as i32))
}
