//! Shared `siginfo_t` capture table for backends that learn *that* a
//! signal arrived from the kernel by another path (`pselect`'s EINTR,
//! kqueue's `EVFILT_SIGNAL`) but still need the payload (`pid`, `uid`,
//! `status`) a `SA_SIGINFO` handler sees. Grounded on
//! `original_source/dasynq/include/dasynq/kqueue.h`'s `sig_capture_templ`
//! fallback path, adapted to avoid `sigsuspend`/`sigtimedwait` spinning:
//! the handler just latches the fields into async-signal-safe atomics and
//! wakes the poller through the ordinary interrupt self-pipe.

use reactor_core::ReactorResult;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

const NSIG: usize = 65;

static PENDING: [AtomicBool; NSIG] = [const { AtomicBool::new(false) }; NSIG];
static SIG_PID: [AtomicI32; NSIG] = [const { AtomicI32::new(0) }; NSIG];
static SIG_UID: [AtomicI32; NSIG] = [const { AtomicI32::new(0) }; NSIG];
static SIG_STATUS: [AtomicI32; NSIG] = [const { AtomicI32::new(0) }; NSIG];

static mut WAKE_FD: RawFd = -1;

/// Fd written to (a single byte) whenever a captured signal fires, so a
/// blocked poller wakes even though its own wait mechanism may not see
/// the signal directly.
pub fn set_wake_fd(fd: RawFd) {
    unsafe {
        WAKE_FD = fd;
    }
}

extern "C" fn handle_signal(signo: libc::c_int, info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    let idx = signo as usize;
    if idx >= NSIG {
        return;
    }
    unsafe {
        if let Some(info) = info.as_ref() {
            SIG_PID[idx].store(info.si_pid(), Ordering::Relaxed);
            SIG_UID[idx].store(info.si_uid() as i32, Ordering::Relaxed);
            SIG_STATUS[idx].store(info.si_status(), Ordering::Relaxed);
        }
        PENDING[idx].store(true, Ordering::Release);
        if WAKE_FD >= 0 {
            let val: u8 = 1;
            libc::write(WAKE_FD, &val as *const u8 as *const libc::c_void, 1);
        }
    }
}

pub fn install_handler(signo: i32) -> ReactorResult<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use reactor_core::ReactorError;

    let sig = Signal::try_from(signo).map_err(|e| ReactorError::Os(e as i32))?;
    let action = SigAction::new(SigHandler::SigAction(handle_signal), SaFlags::SA_SIGINFO, SigSet::empty());
    unsafe {
        sigaction(sig, &action).map_err(|e| ReactorError::Os(e as i32))?;
    }
    Ok(())
}

pub fn take_pending(signo: i32) -> Option<(i32, u32, i32)> {
    let idx = signo as usize;
    if idx >= NSIG {
        return None;
    }
    if PENDING[idx].swap(false, Ordering::AcqRel) {
        Some((
            SIG_PID[idx].load(Ordering::Relaxed),
            SIG_UID[idx].load(Ordering::Relaxed) as u32,
            SIG_STATUS[idx].load(Ordering::Relaxed),
        ))
    } else {
        None
    }
}

pub fn is_pending(signo: i32) -> bool {
    let idx = signo as usize;
    idx < NSIG && PENDING[idx].load(Ordering::Acquire)
}
