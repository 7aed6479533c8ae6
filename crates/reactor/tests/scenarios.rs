//! End-to-end behavioral tests covering one-shot fd dispatch, priority
//! ordering, deferred removal during an active callback, bidi
//! half-removal, interval-timer overrun, and the race-free child
//! reap/signal interaction.

use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nix::sys::signal::{pthread_sigmask, raise, SigSet, Signal, SigmaskHow};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

use reactor::{
    ClockKind, ClockTime, EventLoop, EventLoopConfig, ForkOutcome, IoEvents, ReactorError, Rearm,
};

fn loop_no_reaper() -> EventLoop {
    EventLoop::new(EventLoopConfig::new().install_child_reaper(false)).expect("construct event loop")
}

/// One-shot fd ready/read.
#[test]
fn fd_watch_dispatches_once_per_ready_and_fires_watch_removed() {
    let lp = loop_no_reaper();
    let (r, w) = nix::unistd::pipe().unwrap();
    let rfd = r.as_raw_fd();

    let calls = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicBool::new(false));
    let calls_cb = calls.clone();

    let id = lp
        .add_fd_watch(
            rfd,
            IoEvents::IN,
            0,
            true,
            Box::new(move |_lp, ev| {
                assert!(ev.contains(IoEvents::IN));
                calls_cb.fetch_add(1, Ordering::SeqCst);
                Rearm::Rearm
            }),
        )
        .unwrap();
    let removed_cb = removed.clone();
    lp.set_removed_callback(id, Box::new(move |_lp| removed_cb.store(true, Ordering::SeqCst))).unwrap();

    nix::unistd::write(&w, b"x").unwrap();
    lp.run(16).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    nix::unistd::write(&w, b"y").unwrap();
    lp.run(16).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(!removed.load(Ordering::SeqCst));
    lp.remove_fd_watch(id).unwrap();
    assert!(removed.load(Ordering::SeqCst), "watch_removed must fire exactly once on deregister");
}

/// Two timers expiring at the same instant, priorities 10 and 20 — the
/// lower-priority (10) watcher's callback must run first.
#[test]
fn simultaneous_timers_dispatch_in_priority_order() {
    let lp = loop_no_reaper();
    let order = Arc::new(Mutex::new(Vec::new()));
    let now = ClockTime::new(0, 0);

    let o1 = order.clone();
    lp.add_timer_watch_abs(
        ClockKind::Monotonic,
        now,
        ClockTime::ZERO,
        20,
        true,
        Box::new(move |_lp, _count| {
            o1.lock().unwrap().push(20);
            Rearm::Remove
        }),
    )
    .unwrap();
    let o2 = order.clone();
    lp.add_timer_watch_abs(
        ClockKind::Monotonic,
        now,
        ClockTime::ZERO,
        10,
        true,
        Box::new(move |_lp, _count| {
            o2.lock().unwrap().push(10);
            Rearm::Remove
        }),
    )
    .unwrap();

    // Both timers are already due (armed in the past relative to "now");
    // a non-blocking poll picks up both in one pass.
    lp.poll(16).unwrap();
    assert_eq!(*order.lock().unwrap(), vec![10, 20]);
}

/// A signal watcher's callback deregisters a second, already-queued
/// watcher. The second watcher's own callback must never run, and its
/// `watch_removed` must fire exactly once.
#[test]
fn deregistering_an_already_queued_watcher_skips_its_callback() {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGUSR1);
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).expect("block SIGUSR1 in this thread");

    let lp = loop_no_reaper();

    // A pipe that is already readable before `run` is ever called, so
    // its watcher is enqueued in the very first poll alongside the
    // signal.
    let (r, w) = nix::unistd::pipe().unwrap();
    nix::unistd::write(&w, b"x").unwrap();
    let second_ran = Arc::new(AtomicBool::new(false));
    let second_removed = Arc::new(AtomicBool::new(false));
    let second_ran_cb = second_ran.clone();
    let second_id = lp
        .add_fd_watch(
            r.as_raw_fd(),
            IoEvents::IN,
            10,
            true,
            Box::new(move |_lp, _ev| {
                second_ran_cb.store(true, Ordering::SeqCst);
                Rearm::Remove
            }),
        )
        .unwrap();
    let second_removed_cb = second_removed.clone();
    lp.set_removed_callback(second_id, Box::new(move |_lp| second_removed_cb.store(true, Ordering::SeqCst)))
        .unwrap();

    let first_ran = Arc::new(AtomicBool::new(false));
    let first_ran_cb = first_ran.clone();
    lp.add_signal_watch(
        Signal::SIGUSR1 as i32,
        0, // lower priority value than the fd watch's 10: dispatched first
        Box::new(move |lp, info| {
            assert_eq!(info.signo, Signal::SIGUSR1 as i32);
            first_ran_cb.store(true, Ordering::SeqCst);
            lp.remove_fd_watch(second_id).expect("deregister the already-queued fd watch");
            Rearm::Disarm
        }),
    )
    .unwrap();

    raise(Signal::SIGUSR1).unwrap();

    lp.run(16).unwrap();

    assert!(first_ran.load(Ordering::SeqCst), "signal watcher must have dispatched");
    assert!(!second_ran.load(Ordering::SeqCst), "deregistered watcher's callback must never run");
    assert!(second_removed.load(Ordering::SeqCst), "watch_removed must fire for the deregistered watcher");
}

/// Bidi half-removal. The primary (read) side returns `Remove` while
/// the secondary (write) side stays alive; only once the secondary
/// also returns `Remove` does the combined watch's `watch_removed`
/// fire, exactly once.
#[test]
fn bidi_pair_removed_callback_waits_for_both_sides() {
    let lp = loop_no_reaper();

    let (a, b) = socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::SOCK_NONBLOCK).unwrap();
    let fd = a.as_raw_fd();

    let read_fired = Arc::new(AtomicUsize::new(0));
    let write_fired = Arc::new(AtomicUsize::new(0));
    let pair_removed = Arc::new(AtomicUsize::new(0));

    let read_fired_cb = read_fired.clone();
    let write_fired_cb = write_fired.clone();
    let pair_removed_cb = pair_removed.clone();

    let (primary_id, secondary_id) = lp
        .add_bidi_fd_watch(
            fd,
            0,
            0,
            IoEvents::IN | IoEvents::OUT,
            Box::new(move |_lp, ev| {
                assert!(ev.contains(IoEvents::IN));
                read_fired_cb.fetch_add(1, Ordering::SeqCst);
                Rearm::Remove
            }),
            Box::new(move |_lp, ev| {
                assert!(ev.contains(IoEvents::OUT));
                let n = write_fired_cb.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    // stay alive past the primary's removal
                    Rearm::Rearm
                } else {
                    Rearm::Remove
                }
            }),
            Some(Box::new(move |_lp| {
                pair_removed_cb.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
    assert_ne!(primary_id, secondary_id);

    // Make the read side ready by writing from the peer end, `b`.
    nix::unistd::write(&b, b"x").unwrap();
    // The socket's write buffer is free from the start, so OUT is ready
    // immediately too: both sides dispatch in this first run.
    lp.run(16).unwrap();

    assert_eq!(read_fired.load(Ordering::SeqCst), 1);
    assert_eq!(write_fired.load(Ordering::SeqCst), 1);
    assert_eq!(pair_removed.load(Ordering::SeqCst), 0, "secondary is still alive, pair must not be removed yet");

    // Secondary fires again (OUT stays ready on an empty send buffer)
    // and this time returns Remove, completing the pair.
    lp.run(16).unwrap();
    assert_eq!(write_fired.load(Ordering::SeqCst), 2);
    assert_eq!(pair_removed.load(Ordering::SeqCst), 1, "watch_removed must fire exactly once for the pair");
}

/// An interval timer with period 100ms, disabled at registration,
/// re-enabled after two and a half periods have already elapsed.
/// Expect one callback reporting expiry count 3 (1 + the 2 full
/// periods overrun).
#[test]
fn disabled_interval_timer_accumulates_overrun_until_reenabled() {
    let lp = loop_no_reaper();
    let period = ClockTime::new(0, 100_000_000);

    // Arm a timer whose first expiry is already 2.5 periods in the
    // past, while disabled — equivalent to "scheduled at t0, observed
    // at t0 + 2.5*period" without needing a real sleep. The 50ms margin
    // on either side of the quotient boundary comfortably absorbs the
    // sub-millisecond gap between capturing `now` and the `poll` call
    // below.
    let now = now_monotonic();
    let first_expiry = now - (period + period + ClockTime::new(0, 50_000_000));

    let counts = Arc::new(Mutex::new(Vec::new()));
    let counts_cb = counts.clone();
    let id = lp
        .add_timer_watch_abs(
            ClockKind::Monotonic,
            first_expiry,
            period,
            0,
            false,
            Box::new(move |_lp, count| {
                counts_cb.lock().unwrap().push(count);
                Rearm::Remove
            }),
        )
        .unwrap();

    // While disabled, a poll should silently accumulate expiries without
    // dispatching anything.
    lp.poll(16).unwrap();
    assert!(counts.lock().unwrap().is_empty());

    lp.set_timer_enabled(id, true).unwrap();
    lp.poll(16).unwrap();

    let got = counts.lock().unwrap().clone();
    assert_eq!(got.len(), 1, "exactly one delivery once re-enabled");
    assert_eq!(got[0], 3, "accumulated expiry count must equal the number of elapsed periods");
}

fn now_monotonic() -> ClockTime {
    let ts = nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC).unwrap();
    ClockTime::new(ts.tv_sec(), ts.tv_nsec() as i32)
}

/// Race-free child reap/signal. `send_signal` must succeed while the
/// child is alive, and the reaper must observe the child's termination
/// exactly once before a subsequent `send_signal` reports `ESRCH`.
#[test]
fn send_signal_reports_esrch_only_after_child_is_reaped() {
    let lp = EventLoop::with_default_config().expect("construct event loop");

    let terminated = Arc::new(AtomicBool::new(false));
    let terminated_cb = terminated.clone();

    let outcome = unsafe {
        lp.fork_with_watch(
            0,
            Box::new(move |_lp, status| {
                assert!(status.did_exit_clean());
                terminated_cb.store(true, Ordering::SeqCst);
                Rearm::Remove
            }),
        )
    }
    .expect("fork");

    match outcome {
        ForkOutcome::Child => {
            // Async-signal-safe only: sleep briefly, then exit. No Rust
            // allocation or locking past this point.
            let ts = libc::timespec { tv_sec: 0, tv_nsec: 150_000_000 };
            unsafe {
                libc::nanosleep(&ts, std::ptr::null_mut());
                libc::_exit(0);
            }
        }
        ForkOutcome::Parent { watcher, .. } => {
            // Child is still alive: a harmless signal must be delivered
            // without ESRCH.
            lp.send_signal(watcher, Signal::SIGCONT as i32).expect("child is alive, send_signal must succeed");

            let mut iterations = 0;
            while !terminated.load(Ordering::SeqCst) && iterations < 200 {
                lp.run(16).unwrap();
                iterations += 1;
            }
            assert!(terminated.load(Ordering::SeqCst), "child termination must be observed");

            match lp.send_signal(watcher, Signal::SIGCONT as i32) {
                Err(ReactorError::Os(errno)) => assert_eq!(errno, libc::ESRCH),
                other => panic!("expected ESRCH after reap, got {:?}", other),
            }
        }
    }
}

/// Registering and deregistering watchers with no events ever becoming
/// ready invokes no callbacks, and every deregister produces exactly
/// one `watch_removed`.
#[test]
fn property_no_events_means_no_callbacks() {
    let lp = loop_no_reaper();
    let (r, _w) = nix::unistd::pipe().unwrap();

    let callback_ran = Arc::new(AtomicBool::new(false));
    let removed_count = Arc::new(AtomicUsize::new(0));

    let cb_ran = callback_ran.clone();
    let id = lp
        .add_fd_watch(
            r.as_raw_fd(),
            IoEvents::IN,
            0,
            true,
            Box::new(move |_lp, _ev| {
                cb_ran.store(true, Ordering::SeqCst);
                Rearm::Remove
            }),
        )
        .unwrap();
    let removed_cb = removed_count.clone();
    lp.set_removed_callback(id, Box::new(move |_lp| {
        removed_cb.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();

    // Nothing was ever written to the pipe, so a non-blocking poll finds
    // nothing ready.
    lp.poll(16).unwrap();
    assert!(!callback_ran.load(Ordering::SeqCst));

    lp.deregister(id).unwrap();
    assert!(!callback_ran.load(Ordering::SeqCst));
    assert_eq!(removed_count.load(Ordering::SeqCst), 1);
}

/// Deregistering a watcher while its callback is active defers removal
/// until the callback returns, with exactly one `watch_removed`
/// afterward and no re-entry.
#[test]
fn property_deferred_removal_of_active_watcher() {
    let lp = loop_no_reaper();
    let (r, w) = nix::unistd::pipe().unwrap();
    nix::unistd::write(&w, b"x").unwrap();

    let reentered = Arc::new(AtomicBool::new(false));
    let removed = Arc::new(AtomicBool::new(false));
    let removed_cb = removed.clone();

    // Use a cell to stash the watcher's own id so the callback can
    // deregister itself mid-dispatch.
    let id_cell: Arc<Mutex<Option<reactor::WatcherId>>> = Arc::new(Mutex::new(None));
    let id_cell_cb = id_cell.clone();
    let reentered_cb = reentered.clone();

    let id = lp
        .add_fd_watch(
            r.as_raw_fd(),
            IoEvents::IN,
            0,
            true,
            Box::new(move |lp, _ev| {
                if reentered_cb.swap(true, Ordering::SeqCst) {
                    panic!("callback re-entered while still active");
                }
                let self_id = id_cell_cb.lock().unwrap().unwrap();
                lp.deregister(self_id).expect("deregister self while active");
                Rearm::Noop
            }),
        )
        .unwrap();
    *id_cell.lock().unwrap() = Some(id);
    lp.set_removed_callback(id, Box::new(move |_lp| removed_cb.store(true, Ordering::SeqCst))).unwrap();

    lp.run(16).unwrap();
    assert!(removed.load(Ordering::SeqCst), "watch_removed must fire once dispatch finishes");
}

/// An OUT-only (non-bidi) fd watch must dispatch on write-readiness —
/// a logger registering a watcher on its output sink (§6) is exactly
/// this shape, and only ever watches OUT, never IN.
#[test]
fn out_only_fd_watch_dispatches_on_write_ready() {
    let lp = loop_no_reaper();
    let (a, _b) = socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty()).unwrap();
    let afd = a.as_raw_fd();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = calls.clone();

    lp.add_fd_watch(
        afd,
        IoEvents::OUT,
        0,
        true,
        Box::new(move |_lp, ev| {
            assert!(ev.contains(IoEvents::OUT));
            calls_cb.fetch_add(1, Ordering::SeqCst);
            Rearm::Remove
        }),
    )
    .unwrap();

    // A fresh socketpair's send buffer is empty, so the write side is
    // writable immediately without sending anything.
    lp.run(16).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// A regular file isn't pollable natively, so `add_fd_watch` falls
/// back to emulation. Deregistering an emulated watcher must succeed
/// (and still fire `watch_removed`) rather than surfacing a spurious
/// OS error from a backend `remove` call against state that was never
/// armed at the kernel level.
#[test]
fn emulated_fd_watch_removal_succeeds() {
    let lp = loop_no_reaper();
    let path = std::env::temp_dir().join(format!("reactor-emulated-fd-test-{}", std::process::id()));
    let file = std::fs::File::create(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    let fd = file.as_raw_fd();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = calls.clone();
    let removed = Arc::new(AtomicBool::new(false));
    let removed_cb = removed.clone();

    let id = lp
        .add_fd_watch(
            fd,
            IoEvents::IN,
            0,
            true,
            Box::new(move |_lp, ev| {
                assert!(ev.contains(IoEvents::IN));
                calls_cb.fetch_add(1, Ordering::SeqCst);
                Rearm::Rearm
            }),
        )
        .unwrap();

    // Emulated readiness: always reported ready, no write needed.
    lp.run(16).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    lp.set_removed_callback(id, Box::new(move |_lp| removed_cb.store(true, Ordering::SeqCst))).unwrap();
    lp.remove_fd_watch(id).expect("deregistering an emulated watcher must not surface an OS error");
    assert!(removed.load(Ordering::SeqCst));
}
