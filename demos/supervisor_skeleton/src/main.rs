//! Minimal init-style supervisor: forks a child command, watches it via
//! the reactor event loop's reaper, and respawns it with exponential
//! backoff whenever it exits, until SIGINT/SIGTERM asks it to stop.
//!
//! Run: `supervisor_skeleton -- /bin/sleep 1` (defaults to `/bin/sleep 1`
//! with no arguments).

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nix::sys::signal::{pthread_sigmask, SigSet, Signal, SigmaskHow};
use nix::unistd::execvp;

use reactor::{
    init_logging, kerror, kinfo, kwarn, ClockKind, ClockTime, EventLoop, ForkOutcome, ProcStatus,
    Rearm,
};

fn initial_backoff() -> ClockTime {
    ClockTime::new(0, 200_000_000)
}

fn max_backoff() -> ClockTime {
    ClockTime::new(5, 0)
}

struct SpawnSpec {
    argv: Vec<CString>,
}

struct Backoff {
    next: ClockTime,
}

impl Backoff {
    fn new() -> Self {
        Backoff { next: initial_backoff() }
    }

    /// Grow the delay for the next respawn attempt (doubling, capped),
    /// returning the delay to use *this* time. A clean exit resets the
    /// backoff — only a crash-loop should slow respawns down.
    fn step(&mut self, status: &ProcStatus) -> ClockTime {
        let delay = self.next;
        if status.did_exit_clean() {
            self.next = initial_backoff();
        } else {
            let doubled = self.next + self.next;
            let cap = max_backoff();
            self.next = if doubled > cap { cap } else { doubled };
        }
        delay
    }
}

fn main() {
    init_logging();

    let argv: Vec<CString> = std::env::args()
        .skip(1)
        .map(|a| CString::new(a).expect("argv must not contain NUL"))
        .collect();
    let argv = if argv.is_empty() {
        vec![CString::new("/bin/sleep").unwrap(), CString::new("1").unwrap()]
    } else {
        argv
    };
    let spec = Arc::new(SpawnSpec { argv });

    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).expect("block shutdown signals");

    let lp = EventLoop::with_default_config().expect("construct event loop");
    kinfo!("supervisor_skeleton: running on backend {}", lp.backend_name());

    let shutdown = Arc::new(AtomicBool::new(false));
    let backoff = Arc::new(Mutex::new(Backoff::new()));

    for signo in [Signal::SIGINT as i32, Signal::SIGTERM as i32] {
        let shutdown_flag = shutdown.clone();
        lp.add_signal_watch(
            signo,
            i64::MIN,
            Box::new(move |_lp, info| {
                kinfo!("supervisor_skeleton: caught signal {}, stopping respawns", info.signo);
                shutdown_flag.store(true, Ordering::SeqCst);
                Rearm::Disarm
            }),
        )
        .expect("watch shutdown signal");
    }

    spawn_child(&lp, spec.clone(), backoff.clone(), shutdown.clone());

    while !shutdown.load(Ordering::SeqCst) {
        lp.run(16).expect("event loop iteration");
    }
}

fn spawn_child(
    lp: &EventLoop,
    spec: Arc<SpawnSpec>,
    backoff: Arc<Mutex<Backoff>>,
    shutdown: Arc<AtomicBool>,
) {
    if shutdown.load(Ordering::SeqCst) {
        return;
    }

    // Safety: single-threaded at this point in the skeleton; the child
    // branch only calls `execvp`/`_exit`, both async-signal-safe.
    let outcome = unsafe { lp.fork_with_watch(0, child_exit_callback(spec.clone(), backoff.clone(), shutdown.clone())) };

    match outcome {
        Ok(ForkOutcome::Parent { pid, .. }) => {
            kinfo!("supervisor_skeleton: spawned child pid {}", pid);
        }
        Ok(ForkOutcome::Child) => {
            let argv = &spec.argv;
            let _ = execvp(&argv[0], argv);
            // execvp only returns on failure. `_exit`, not `exit`: no
            // atexit handlers or buffered stdio inherited from the
            // parent should run in this child.
            unsafe { libc::_exit(127) };
        }
        Err(e) => {
            kerror!("supervisor_skeleton: fork failed: {}", e);
            schedule_respawn(lp, spec, backoff, shutdown, initial_backoff());
        }
    }
}

fn child_exit_callback(
    spec: Arc<SpawnSpec>,
    backoff: Arc<Mutex<Backoff>>,
    shutdown: Arc<AtomicBool>,
) -> Box<dyn FnMut(&EventLoop, ProcStatus) -> Rearm + Send> {
    Box::new(move |lp, status| {
        if status.did_exit() {
            kinfo!("supervisor_skeleton: child exited with status {}", status.si_status);
        } else {
            kwarn!("supervisor_skeleton: child killed by signal {}", status.si_status);
        }

        let delay = backoff.lock().unwrap().step(&status);
        schedule_respawn(lp, spec.clone(), backoff.clone(), shutdown.clone(), delay);
        Rearm::Remove
    })
}

fn schedule_respawn(
    lp: &EventLoop,
    spec: Arc<SpawnSpec>,
    backoff: Arc<Mutex<Backoff>>,
    shutdown: Arc<AtomicBool>,
    delay: ClockTime,
) {
    if shutdown.load(Ordering::SeqCst) {
        return;
    }
    let spec_cb = spec.clone();
    let backoff_cb = backoff.clone();
    let shutdown_cb = shutdown.clone();
    let _ = lp.add_timer_watch_rel(
        ClockKind::Monotonic,
        delay,
        ClockTime::ZERO,
        0,
        true,
        Box::new(move |lp, _count| {
            spawn_child(lp, spec_cb.clone(), backoff_cb.clone(), shutdown_cb.clone());
            Rearm::Remove
        }),
    );
}
