//! Linux backend: `epoll` + `signalfd`, dinit-style fd-based signal
//! delivery. Timer expiry is not given a dedicated `timerfd`: the
//! runtime's two `TimerHeap`s already know the soonest deadline and pass
//! it straight through as `epoll_wait`'s millisecond timeout, so a
//! separate kernel timer would only duplicate that computation — see
//! DESIGN.md.

use crate::signal_mask::WatchedSignals;
use crate::trait_def::{Backend, BackendEvent, EmulatedSides, WatchToken};
use crate::interrupt::InterruptChannel;

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::signal::{pthread_sigmask, SigmaskHow};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use reactor_core::watcher::{IoEvents, SigInfo};
use reactor_core::{ReactorError, ReactorResult};
use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

const INTERRUPT_TOKEN: WatchToken = u64::MAX;

struct FdState {
    read_token: Option<WatchToken>,
    write_token: Option<WatchToken>,
    armed: IoEvents,
}

fn to_epoll_flags(events: IoEvents, oneshot: bool) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if events.contains(IoEvents::IN) {
        flags |= EpollFlags::EPOLLIN;
    }
    if events.contains(IoEvents::OUT) {
        flags |= EpollFlags::EPOLLOUT;
    }
    if oneshot {
        flags |= EpollFlags::EPOLLONESHOT;
    }
    flags
}

pub struct EpollBackend {
    epoll: Epoll,
    interrupt: InterruptChannel,
    fds: HashMap<RawFd, FdState>,
    signal_fd: Option<SignalFd>,
    signal_tokens: HashMap<i32, WatchToken>,
    watched_signals: WatchedSignals,
}

impl EpollBackend {
    fn rebuild_signalfd(&mut self) -> ReactorResult<()> {
        let mask = self.watched_signals.as_sigset();
        pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)
            .map_err(|e| ReactorError::Os(e as i32))?;

        if self.signal_tokens.is_empty() {
            if let Some(sfd) = self.signal_fd.take() {
                let fd = sfd.as_raw_fd();
                let _ = self.epoll.delete(fd);
            }
            return Ok(());
        }

        match &mut self.signal_fd {
            Some(sfd) => {
                sfd.set_mask(&mask).map_err(|e| ReactorError::Os(e as i32))?;
            }
            None => {
                let sfd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
                    .map_err(|e| ReactorError::Os(e as i32))?;
                let fd = sfd.as_raw_fd();
                let ev = EpollEvent::new(EpollFlags::EPOLLIN, fd as u64);
                self.epoll.add(fd, ev).map_err(|e| ReactorError::Os(e as i32))?;
                self.fds.insert(fd, FdState { read_token: None, write_token: None, armed: IoEvents::IN });
                self.signal_fd = Some(sfd);
            }
        }
        Ok(())
    }
}

impl Backend for EpollBackend {
    const HAS_BIDI_FD_WATCH: bool = true;
    const HAS_SEPARATE_RW_FD_WATCHES: bool = false;
    const SUPPORTS_NON_ONESHOT_FD: bool = true;
    const INTERRUPT_AFTER_FD_ADD: bool = false;
    const INTERRUPT_AFTER_SIGNAL_ADD: bool = false;
    const FULL_TIMER_SUPPORT: bool = true;

    fn name() -> &'static str {
        "epoll"
    }

    fn new() -> ReactorResult<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(|e| ReactorError::Os(e as i32))?;
        let interrupt = InterruptChannel::new()?;
        let ifd = interrupt.read_fd();
        let ev = EpollEvent::new(EpollFlags::EPOLLIN, INTERRUPT_TOKEN);
        epoll.add(ifd, ev).map_err(|e| ReactorError::Os(e as i32))?;

        let mut fds = HashMap::new();
        fds.insert(ifd, FdState { read_token: None, write_token: None, armed: IoEvents::IN });

        Ok(EpollBackend {
            epoll,
            interrupt,
            fds,
            signal_fd: None,
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
        let armed = if enabled { events } else { IoEvents::NONE };
        let flags = to_epoll_flags(armed, true);
        // `data` must be the fd itself, not the watch token: `poll` looks
        // entries up in `self.fds` (keyed by fd) via `ev.data()`. The
        // token is still recorded per-side in `FdState` for dispatch —
        // read_token/write_token are set according to `events` (a
        // non-bidi watch only ever sets the side it actually watches),
        // matching `kqueue.rs`/`pselect.rs`.
        let ev = EpollEvent::new(flags, fd as u64);
        match self.epoll.add(fd, ev) {
            Ok(()) => {
                let read_token = events.contains(IoEvents::IN).then_some(token);
                let write_token = events.contains(IoEvents::OUT).then_some(token);
                self.fds.insert(fd, FdState { read_token, write_token, armed });
                Ok(true)
            }
            // Regular files (and a handful of other descriptor types)
            // aren't pollable; epoll_ctl(EPOLL_CTL_ADD) reports this as
            // EPERM rather than an unsupported-operation error.
            Err(nix::errno::Errno::EPERM) => Ok(false),
            Err(e) => Err(ReactorError::Os(e as i32)),
        }
    }

    fn add_bidi_fd_watch(
        &mut self,
        fd: RawFd,
        read_token: WatchToken,
        write_token: WatchToken,
        enabled: IoEvents,
    ) -> ReactorResult<EmulatedSides> {
        let flags = to_epoll_flags(enabled, true);
        let ev = EpollEvent::new(flags, fd as u64);
        self.epoll.add(fd, ev).map_err(|e| ReactorError::Os(e as i32))?;
        self.fds.insert(fd, FdState { read_token: Some(read_token), write_token: Some(write_token), armed: enabled });
        Ok(IoEvents::NONE)
    }

    fn enable_fd_watch(&mut self, fd: RawFd, _token: WatchToken, events: IoEvents) -> ReactorResult<()> {
        // Runtime always passes the full desired mask (it recomputes the
        // union for bidi pairs itself), so this replaces rather than
        // accumulates onto whatever was armed before.
        let state = self.fds.get_mut(&fd).ok_or(ReactorError::NotRegistered)?;
        state.armed = events;
        let flags = to_epoll_flags(state.armed, true);
        let mut ev = EpollEvent::new(flags, fd as u64);
        self.epoll.modify(fd, &mut ev).map_err(|e| ReactorError::Os(e as i32))
    }

    fn disable_fd_watch(&mut self, fd: RawFd, _token: WatchToken) -> ReactorResult<()> {
        let state = self.fds.get_mut(&fd).ok_or(ReactorError::NotRegistered)?;
        state.armed = IoEvents::NONE;
        let mut ev = EpollEvent::new(EpollFlags::empty(), fd as u64);
        self.epoll.modify(fd, &mut ev).map_err(|e| ReactorError::Os(e as i32))
    }

    fn remove_fd_watch(&mut self, fd: RawFd, _token: WatchToken) -> ReactorResult<()> {
        self.fds.remove(&fd);
        self.epoll.delete(fd).map_err(|e| ReactorError::Os(e as i32))
    }

    fn remove_bidi_fd_watch(&mut self, fd: RawFd) -> ReactorResult<()> {
        self.fds.remove(&fd);
        self.epoll.delete(fd).map_err(|e| ReactorError::Os(e as i32))
    }

    fn add_signal_watch(&mut self, signo: i32, token: WatchToken) -> ReactorResult<()> {
        self.watched_signals.add(signo);
        self.signal_tokens.insert(signo, token);
        self.rebuild_signalfd()
    }

    fn rearm_signal_watch(&mut self, _signo: i32) -> ReactorResult<()> {
        // signalfd is level-triggered for the watched mask as a whole;
        // nothing to do per-signal.
        Ok(())
    }

    fn remove_signal_watch(&mut self, signo: i32) -> ReactorResult<()> {
        self.watched_signals.remove(signo);
        self.signal_tokens.remove(&signo);
        self.rebuild_signalfd()
    }

    fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<BackendEvent>) -> ReactorResult<()> {
        let epoll_timeout = match timeout {
            None => EpollTimeout::NONE,
            Some(d) => EpollTimeout::try_from(d.as_millis() as isize).unwrap_or(EpollTimeout::MAX),
        };

        let mut events = [EpollEvent::empty(); 64];
        let n = match self.epoll.wait(&mut events, epoll_timeout) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => 0,
            Err(e) => return Err(ReactorError::Os(e as i32)),
        };

        for ev in &events[..n] {
            let raw_fd = ev.data() as RawFd;
            let flags = ev.events();

            if ev.data() == INTERRUPT_TOKEN {
                self.interrupt.drain();
                continue;
            }

            if self.signal_fd.as_ref().map(|s| s.as_raw_fd()) == Some(raw_fd) {
                self.drain_signalfd(out);
                continue;
            }

            let Some(state) = self.fds.get(&raw_fd) else { continue };
            let mut ready = IoEvents::NONE;
            if flags.contains(EpollFlags::EPOLLIN) || flags.contains(EpollFlags::EPOLLHUP) || flags.contains(EpollFlags::EPOLLERR) {
                ready = ready.union(IoEvents::IN);
            }
            if flags.contains(EpollFlags::EPOLLOUT) {
                ready = ready.union(IoEvents::OUT);
            }

            // bidi: primary (IN/read_token) reported before secondary
            // (OUT/write_token) so that, for equal priorities, the
            // primary side is enqueued first and therefore dispatched
            // first under the priority queue's FIFO tie-break —
            // matching `kqueue.rs`/`pselect.rs`, which both report IN
            // before OUT for the same fd.
            if ready.contains(IoEvents::IN) {
                if let Some(token) = state.read_token {
                    out.push(BackendEvent::FdReady { token, events: IoEvents::IN });
                }
            }
            if ready.contains(IoEvents::OUT) {
                if let Some(token) = state.write_token {
                    out.push(BackendEvent::FdReady { token, events: IoEvents::OUT });
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

impl EpollBackend {
    fn drain_signalfd(&mut self, out: &mut Vec<BackendEvent>) {
        let Some(sfd) = self.signal_fd.as_mut() else { return };
        loop {
            match sfd.read_signal() {
                Ok(Some(si)) => {
                    let signo = si.ssi_signo as i32;
                    if let Some(&token) = self.signal_tokens.get(&signo) {
                        out.push(BackendEvent::SignalReceived {
                            token,
                            info: SigInfo {
                                signo,
                                pid: si.ssi_pid as i32,
                                uid: si.ssi_uid,
                                status: si.ssi_status,
                            },
                        });
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }
}
