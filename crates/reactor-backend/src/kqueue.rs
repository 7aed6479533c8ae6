//! `kqueue` backend (BSDs and macOS), grounded on
//! `original_source/dasynq/include/dasynq/kqueue.h`. `kqueue` only ever
//! reports that a watched signal's delivery was *attempted*, not how many
//! times or with what `siginfo_t` — the same gap dasynq documents — so
//! `EVFILT_SIGNAL` is used purely as a wakeup, and the payload comes from
//! [`signal_capture`], the same latch the `pselect` backend uses.
//!
//! Regular-file readiness under `kqueue` is handled as: request
//! `NOTE_FILE_POLL` where the kernel exposes it (FreeBSD) and fall back
//! to poll-on-every-wakeup semantics elsewhere (macOS has no equivalent
//! flag usable from userspace) — see DESIGN.md.

use crate::signal_capture;
use crate::signal_mask::WatchedSignals;
use crate::trait_def::{Backend, BackendEvent, EmulatedSides, WatchToken};

use nix::sys::event::{kevent_ts, kqueue, KEvent, EventFilter, EventFlag, FilterFlag};
use nix::sys::time::{TimeSpec, TimeValLike};
use reactor_core::watcher::{IoEvents, SigInfo};
use reactor_core::{ReactorError, ReactorResult};
use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

#[cfg(target_os = "freebsd")]
const POLL_SEMANTICS: FilterFlag = FilterFlag::NOTE_FILE_POLL;
#[cfg(not(target_os = "freebsd"))]
const POLL_SEMANTICS: FilterFlag = FilterFlag::empty();

struct FdState {
    read_token: Option<WatchToken>,
    write_token: Option<WatchToken>,
}

pub struct KqueueBackend {
    kq: OwnedFd,
    interrupt_read: RawFd,
    interrupt_write: RawFd,
    fds: HashMap<RawFd, FdState>,
    signal_tokens: HashMap<i32, WatchToken>,
    watched_signals: WatchedSignals,
}

impl KqueueBackend {
    fn submit(&self, changes: &[KEvent]) -> ReactorResult<()> {
        let mut empty: [KEvent; 0] = [];
        kevent_ts(self.kq.as_raw_fd(), changes, &mut empty, None).map_err(|e| ReactorError::Os(e as i32))?;
        Ok(())
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

impl Backend for KqueueBackend {
    const HAS_BIDI_FD_WATCH: bool = false;
    const HAS_SEPARATE_RW_FD_WATCHES: bool = true;
    const SUPPORTS_NON_ONESHOT_FD: bool = true;
    const INTERRUPT_AFTER_FD_ADD: bool = false;
    const INTERRUPT_AFTER_SIGNAL_ADD: bool = false;
    const FULL_TIMER_SUPPORT: bool = false;

    fn name() -> &'static str {
        "kqueue"
    }

    fn new() -> ReactorResult<Self> {
        let kq = kqueue().map_err(|e| ReactorError::Os(e as i32))?;

        let mut pipe_fds: [RawFd; 2] = [-1, -1];
        let ret = unsafe { libc::pipe(pipe_fds.as_mut_ptr()) };
        if ret < 0 {
            return Err(ReactorError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(-1)));
        }
        for &fd in &pipe_fds {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL, 0);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                let fdflags = libc::fcntl(fd, libc::F_GETFD, 0);
                libc::fcntl(fd, libc::F_SETFD, fdflags | libc::FD_CLOEXEC);
            }
        }

        let backend = KqueueBackend {
            kq,
            interrupt_read: pipe_fds[0],
            interrupt_write: pipe_fds[1],
            fds: HashMap::new(),
            signal_tokens: HashMap::new(),
            watched_signals: WatchedSignals::new(),
        };

        let ev = KEvent::new(backend.interrupt_read as usize, EventFilter::EVFILT_READ, EventFlag::EV_ADD, FilterFlag::empty(), 0, 0);
        backend.submit(&[ev])?;
        signal_capture::set_wake_fd(backend.interrupt_write);

        Ok(backend)
    }

    fn add_fd_watch(
        &mut self,
        fd: RawFd,
        token: WatchToken,
        events: IoEvents,
        enabled: bool,
    ) -> ReactorResult<bool> {
        let add_flag = if enabled { EventFlag::EV_ADD } else { EventFlag::EV_ADD | EventFlag::EV_DISABLE };
        let mut state = self.fds.remove(&fd).unwrap_or(FdState { read_token: None, write_token: None });

        if events.contains(IoEvents::IN) {
            state.read_token = Some(token);
            let filter_flags = POLL_SEMANTICS;
            let ev = KEvent::new(fd as usize, EventFilter::EVFILT_READ, add_flag, filter_flags, 0, token as isize);
            self.submit(&[ev])?;
        }
        if events.contains(IoEvents::OUT) {
            state.write_token = Some(token);
            let ev = KEvent::new(fd as usize, EventFilter::EVFILT_WRITE, add_flag, FilterFlag::empty(), 0, token as isize);
            self.submit(&[ev])?;
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
        // kqueue has no single combined filter; register both EVFILT_READ
        // and EVFILT_WRITE with their own udata. No emulation required.
        self.add_fd_watch(fd, read_token, IoEvents::IN, enabled.contains(IoEvents::IN))?;
        self.add_fd_watch(fd, write_token, IoEvents::OUT, enabled.contains(IoEvents::OUT))?;
        Ok(IoEvents::NONE)
    }

    fn enable_fd_watch(&mut self, fd: RawFd, token: WatchToken, events: IoEvents) -> ReactorResult<()> {
        if events.contains(IoEvents::IN) {
            let ev = KEvent::new(fd as usize, EventFilter::EVFILT_READ, EventFlag::EV_ENABLE, POLL_SEMANTICS, 0, token as isize);
            self.submit(&[ev])?;
        }
        if events.contains(IoEvents::OUT) {
            let ev = KEvent::new(fd as usize, EventFilter::EVFILT_WRITE, EventFlag::EV_ENABLE, FilterFlag::empty(), 0, token as isize);
            self.submit(&[ev])?;
        }
        Ok(())
    }

    fn disable_fd_watch(&mut self, fd: RawFd, token: WatchToken) -> ReactorResult<()> {
        let ev_r = KEvent::new(fd as usize, EventFilter::EVFILT_READ, EventFlag::EV_DISABLE, FilterFlag::empty(), 0, token as isize);
        let ev_w = KEvent::new(fd as usize, EventFilter::EVFILT_WRITE, EventFlag::EV_DISABLE, FilterFlag::empty(), 0, token as isize);
        let _ = self.submit(&[ev_r]);
        let _ = self.submit(&[ev_w]);
        Ok(())
    }

    fn remove_fd_watch(&mut self, fd: RawFd, _token: WatchToken) -> ReactorResult<()> {
        self.fds.remove(&fd);
        let ev_r = KEvent::new(fd as usize, EventFilter::EVFILT_READ, EventFlag::EV_DELETE, FilterFlag::empty(), 0, 0);
        let ev_w = KEvent::new(fd as usize, EventFilter::EVFILT_WRITE, EventFlag::EV_DELETE, FilterFlag::empty(), 0, 0);
        let _ = self.submit(&[ev_r]);
        let _ = self.submit(&[ev_w]);
        Ok(())
    }

    fn remove_bidi_fd_watch(&mut self, fd: RawFd) -> ReactorResult<()> {
        self.remove_fd_watch(fd, 0)
    }

    fn add_signal_watch(&mut self, signo: i32, token: WatchToken) -> ReactorResult<()> {
        signal_capture::install_handler(signo)?;
        self.watched_signals.add(signo);
        self.signal_tokens.insert(signo, token);
        let ev = KEvent::new(signo as usize, EventFilter::EVFILT_SIGNAL, EventFlag::EV_ADD, FilterFlag::empty(), 0, token as isize);
        self.submit(&[ev])
    }

    fn rearm_signal_watch(&mut self, _signo: i32) -> ReactorResult<()> {
        Ok(())
    }

    fn remove_signal_watch(&mut self, signo: i32) -> ReactorResult<()> {
        self.watched_signals.remove(signo);
        self.signal_tokens.remove(&signo);
        let ev = KEvent::new(signo as usize, EventFilter::EVFILT_SIGNAL, EventFlag::EV_DELETE, FilterFlag::empty(), 0, 0);
        self.submit(&[ev])
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<BackendEvent>) -> ReactorResult<()> {
        self.drain_pending_signals(out);
        if !out.is_empty() {
            return Ok(());
        }

        let ts: Option<TimeSpec> = timeout.map(|d| TimeSpec::nanoseconds(d.as_nanos() as i64));
        let mut events = [KEvent::new(0, EventFilter::EVFILT_READ, EventFlag::empty(), FilterFlag::empty(), 0, 0); 64];

        let n = match kevent_ts(self.kq.as_raw_fd(), &[], &mut events, ts) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => 0,
            Err(e) => return Err(ReactorError::Os(e as i32)),
        };

        self.drain_pending_signals(out);

        for ev in &events[..n] {
            let ident = ev.ident() as RawFd;
            match ev.filter() {
                Ok(EventFilter::EVFILT_READ) if ident == self.interrupt_read => {
                    let mut buf = [0u8; 64];
                    loop {
                        let r = unsafe { libc::read(self.interrupt_read, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
                        if r <= 0 {
                            break;
                        }
                    }
                }
                Ok(EventFilter::EVFILT_READ) => {
                    if let Some(state) = self.fds.get(&ident) {
                        if let Some(token) = state.read_token {
                            out.push(BackendEvent::FdReady { token, events: IoEvents::IN });
                        }
                    }
                }
                Ok(EventFilter::EVFILT_WRITE) => {
                    if let Some(state) = self.fds.get(&ident) {
                        if let Some(token) = state.write_token {
                            out.push(BackendEvent::FdReady { token, events: IoEvents::OUT });
                        }
                    }
                }
                Ok(EventFilter::EVFILT_SIGNAL) => {
                    // payload already latched by the SA_SIGINFO handler;
                    // this filter exists only to unblock kevent().
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn interrupt_wait(&self) {
        let val: u8 = 1;
        unsafe {
            libc::write(self.interrupt_write, &val as *const u8 as *const libc::c_void, 1);
        }
    }

    fn interrupt_fd(&self) -> RawFd {
        self.interrupt_write
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.interrupt_read);
            libc::close(self.interrupt_write);
        }
    }
}
