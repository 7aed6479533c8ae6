//! Portable fallback backend built on `pselect`, grounded on
//! `original_source/dasynq/include/dasynq/pselect.h`.
//!
//! dasynq captures the interrupting signal's `siginfo_t` by installing a
//! handler that `siglongjmp`s back into `pull_events`. `sigsetjmp`/
//! `siglongjmp` across arbitrary Rust stack frames is unsound (it skips
//! destructors and can jump over borrows), so instead we install a
//! `SA_SIGINFO` handler that stores each signal's `siginfo_t` fields into
//! a fixed, async-signal-safe table of atomics and wakes `pselect` through
//! the ordinary [`InterruptChannel`] self-pipe — the Rust-safe answer to
//! capturing siginfo without `sigtimedwait`. The fd side only ever sees
//! plain fd sets, so the `kqueue` backend's fd-type gaps don't apply here.

use crate::interrupt::InterruptChannel;
use crate::signal_capture;
use crate::signal_mask::WatchedSignals;
use crate::trait_def::{Backend, BackendEvent, EmulatedSides, WatchToken};

use nix::sys::select::{pselect, FdSet};
use nix::sys::time::{TimeSpec, TimeValLike};
use reactor_core::watcher::{IoEvents, SigInfo};
use reactor_core::{ReactorError, ReactorResult};
use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

struct FdState {
    read_token: Option<WatchToken>,
    write_token: Option<WatchToken>,
}

pub struct PselectBackend {
    interrupt: InterruptChannel,
    fds: HashMap<RawFd, FdState>,
    read_watched: Vec<RawFd>,
    write_watched: Vec<RawFd>,
    signal_tokens: HashMap<i32, WatchToken>,
    watched_signals: WatchedSignals,
}

impl PselectBackend {
    fn max_fd(&self) -> i32 {
        let mut m = self.interrupt.read_fd();
        for &fd in self.read_watched.iter().chain(self.write_watched.iter()) {
            if fd > m {
                m = fd;
            }
        }
        m
    }

    fn drain_pending_signals(&self, out: &mut Vec<BackendEvent>) {
        for (&signo, &token) in self.signal_tokens.iter() {
            if let Some((pid, uid, status)) = signal_capture::take_pending(signo) {
                out.push(BackendEvent::SignalReceived {
                    token,
                    info: SigInfo { signo, pid, uid, status },
                });
            }
        }
    }
}

impl Backend for PselectBackend {
    const HAS_BIDI_FD_WATCH: bool = true;
    const HAS_SEPARATE_RW_FD_WATCHES: bool = true;
    const SUPPORTS_NON_ONESHOT_FD: bool = true;
    const INTERRUPT_AFTER_FD_ADD: bool = true;
    const INTERRUPT_AFTER_SIGNAL_ADD: bool = true;
    const FULL_TIMER_SUPPORT: bool = false;

    fn name() -> &'static str {
        "pselect"
    }

    fn new() -> ReactorResult<Self> {
        let interrupt = InterruptChannel::new()?;
        signal_capture::set_wake_fd(interrupt.read_fd());
        Ok(PselectBackend {
            interrupt,
            fds: HashMap::new(),
            read_watched: Vec::new(),
            write_watched: Vec::new(),
            signal_tokens: HashMap::new(),
            watched_signals: WatchedSignals::new(),
        })
    }

    fn add_fd_watch(
        &mut self,
        fd: RawFd,
        token: WatchToken,
        events: IoEvents,
        enabled: bool,
    ) -> ReactorResult<bool> {
        if fd as usize >= libc::FD_SETSIZE {
            return Err(ReactorError::ResourceExhausted);
        }
        let mut state = FdState { read_token: None, write_token: None };
        if events.contains(IoEvents::IN) {
            state.read_token = Some(token);
            if enabled {
                self.read_watched.push(fd);
            }
        }
        if events.contains(IoEvents::OUT) {
            state.write_token = Some(token);
            if enabled {
                self.write_watched.push(fd);
            }
        }
        self.fds.insert(fd, state);
        Ok(true)
    }

    fn add_bidi_fd_watch(
        &mut self,
        fd: RawFd,
        read_token: WatchToken,
        write_token: WatchToken,
        enabled: IoEvents,
    ) -> ReactorResult<EmulatedSides> {
        if fd as usize >= libc::FD_SETSIZE {
            return Err(ReactorError::ResourceExhausted);
        }
        if enabled.contains(IoEvents::IN) {
            self.read_watched.push(fd);
        }
        if enabled.contains(IoEvents::OUT) {
            self.write_watched.push(fd);
        }
        self.fds.insert(fd, FdState { read_token: Some(read_token), write_token: Some(write_token) });
        Ok(IoEvents::NONE)
    }

    fn enable_fd_watch(&mut self, fd: RawFd, _token: WatchToken, events: IoEvents) -> ReactorResult<()> {
        if events.contains(IoEvents::IN) && !self.read_watched.contains(&fd) {
            self.read_watched.push(fd);
        }
        if events.contains(IoEvents::OUT) && !self.write_watched.contains(&fd) {
            self.write_watched.push(fd);
        }
        Ok(())
    }

    fn disable_fd_watch(&mut self, fd: RawFd, _token: WatchToken) -> ReactorResult<()> {
        self.read_watched.retain(|&x| x != fd);
        self.write_watched.retain(|&x| x != fd);
        Ok(())
    }

    fn remove_fd_watch(&mut self, fd: RawFd, _token: WatchToken) -> ReactorResult<()> {
        self.fds.remove(&fd);
        self.read_watched.retain(|&x| x != fd);
        self.write_watched.retain(|&x| x != fd);
        Ok(())
    }

    fn remove_bidi_fd_watch(&mut self, fd: RawFd) -> ReactorResult<()> {
        self.remove_fd_watch(fd, 0)
    }

    fn add_signal_watch(&mut self, signo: i32, token: WatchToken) -> ReactorResult<()> {
        signal_capture::install_handler(signo)?;
        self.watched_signals.add(signo);
        self.signal_tokens.insert(signo, token);
        Ok(())
    }

    fn rearm_signal_watch(&mut self, _signo: i32) -> ReactorResult<()> {
        Ok(())
    }

    fn remove_signal_watch(&mut self, signo: i32) -> ReactorResult<()> {
        self.watched_signals.remove(signo);
        self.signal_tokens.remove(&signo);
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<BackendEvent>) -> ReactorResult<()> {
        // Drain any signal latched since the previous call before we
        // decide whether to block at all.
        self.drain_pending_signals(out);
        if !out.is_empty() {
            return Ok(());
        }

        let mut read_set = FdSet::new();
        let mut write_set = FdSet::new();
        read_set.insert(self.interrupt.read_fd());
        for &fd in &self.read_watched {
            read_set.insert(fd);
        }
        for &fd in &self.write_watched {
            write_set.insert(fd);
        }
        let nfds = self.max_fd();

        let process_mask = nix::sys::signal::SigSet::thread_get_mask().map_err(|e| ReactorError::Os(e as i32))?;
        let poll_mask = self.watched_signals.unblocked_during_poll(process_mask);

        // Zero-timeout probes are used by the dispatch loop to check for
        // already-ready fds without blocking. On at least one platform a
        // zero-timeout pselect misses a signal that became pending in the
        // unblock window between the mask swap and the syscall itself.
        // Work around it by briefly installing the poll mask via
        // sigprocmask and restoring the prior mask right
        // after, which forces any already-pending watched signal to be
        // delivered (and latched by signal_capture) before we probe.
        if timeout == Some(Duration::ZERO) {
            use nix::sys::signal::{sigprocmask, SigmaskHow};
            sigprocmask(SigmaskHow::SIG_SETMASK, Some(&poll_mask), None).map_err(|e| ReactorError::Os(e as i32))?;
            sigprocmask(SigmaskHow::SIG_SETMASK, Some(&process_mask), None).map_err(|e| ReactorError::Os(e as i32))?;
            self.drain_pending_signals(out);
            if !out.is_empty() {
                return Ok(());
            }
        }

        let ts: Option<TimeSpec> = timeout.map(|d| TimeSpec::nanoseconds(d.as_nanos() as i64));

        let r = pselect(nfds + 1, Some(&mut read_set), Some(&mut write_set), None, ts.as_ref(), Some(&poll_mask));

        match r {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => {
                self.drain_pending_signals(out);
                return Ok(());
            }
            Err(e) => return Err(ReactorError::Os(e as i32)),
        }

        self.drain_pending_signals(out);

        if read_set.contains(self.interrupt.read_fd()) {
            self.interrupt.drain();
        }

        for &fd in &self.read_watched {
            if read_set.contains(fd) {
                if let Some(state) = self.fds.get(&fd) {
                    if let Some(token) = state.read_token {
                        out.push(BackendEvent::FdReady { token, events: IoEvents::IN });
                    }
                }
            }
        }
        for &fd in &self.write_watched {
            if write_set.contains(fd) {
                if let Some(state) = self.fds.get(&fd) {
                    if let Some(token) = state.write_token {
                        out.push(BackendEvent::FdReady { token, events: IoEvents::OUT });
                    }
                }
            }
        }

        Ok(())
    }

    fn interrupt_wait(&self) {
        self.interrupt.interrupt();
    }

    fn interrupt_fd(&self) -> RawFd {
        self.interrupt.read_fd()
    }
}
