//! TCP echo server driven entirely off the reactor event loop: one fd
//! watch on the listener, one fd watch per connection, SIGINT/SIGTERM
//! watched for a clean shutdown.

use std::collections::HashMap;
use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use nix::sys::signal::{pthread_sigmask, SigSet, Signal, SigmaskHow};

use reactor::{env_get, init_logging, kinfo, kwarn, EventLoop, IoEvents, Rearm, WatcherId};

const READ_BUF: usize = 4096;

struct Conn {
    fd: RawFd,
    watcher: WatcherId,
}

fn main() {
    init_logging();

    let addr = env_get("REACTOR_ECHO_ADDR", "127.0.0.1:7711".to_string());
    let listener = TcpListener::bind(&addr).expect("bind echo listener");
    listener.set_nonblocking(true).expect("set listener nonblocking");
    let listener_fd = listener.as_raw_fd();

    // Block SIGINT/SIGTERM in this thread before registering them with
    // the loop: the engine only unblocks a watched signal for the
    // duration of a poll, so it must already be blocked here.
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).expect("block shutdown signals");

    let lp = EventLoop::with_default_config().expect("construct event loop");
    kinfo!("echo_server: listening on {} via {}", addr, lp.backend_name());

    let conns: Arc<Mutex<HashMap<RawFd, Conn>>> = Arc::new(Mutex::new(HashMap::new()));
    let shutdown = Arc::new(Mutex::new(false));

    {
        let conns_accept = conns.clone();
        lp.add_fd_watch(
            listener_fd,
            IoEvents::IN,
            0,
            true,
            Box::new(move |lp, _events| {
                loop {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            stream.set_nonblocking(true).ok();
                            let fd = stream.as_raw_fd();
                            kinfo!("echo_server: accepted {}", peer);
                            let conns_cb = conns_accept.clone();
                            let watcher = lp
                                .add_fd_watch(
                                    fd,
                                    IoEvents::IN,
                                    0,
                                    true,
                                    Box::new(move |lp, _events| on_readable(lp, fd, &conns_cb)),
                                )
                                .expect("watch accepted connection");
                            // Leak the std socket; the raw fd now lives on
                            // in `Conn`/the watch and is closed explicitly
                            // in `close_conn`.
                            std::mem::forget(stream);
                            conns_accept.lock().unwrap().insert(fd, Conn { fd, watcher });
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            kwarn!("echo_server: accept failed: {}", e);
                            break;
                        }
                    }
                }
                Rearm::Rearm
            }),
        )
        .expect("watch listener");
    }

    {
        for signo in [Signal::SIGINT as i32, Signal::SIGTERM as i32] {
            let shutdown_flag = shutdown.clone();
            lp.add_signal_watch(
                signo,
                i64::MIN,
                Box::new(move |_lp, info| {
                    kinfo!("echo_server: caught signal {}, shutting down", info.signo);
                    *shutdown_flag.lock().unwrap() = true;
                    Rearm::Disarm
                }),
            )
            .expect("watch shutdown signal");
        }
    }

    while !*shutdown.lock().unwrap() {
        lp.run(64).expect("event loop iteration");
    }

    for (_, conn) in conns.lock().unwrap().drain() {
        let _ = lp.remove_fd_watch(conn.watcher);
        unsafe { libc::close(conn.fd) };
    }
}

fn on_readable(lp: &EventLoop, fd: RawFd, conns: &Arc<Mutex<HashMap<RawFd, Conn>>>) -> Rearm {
    let mut buf = [0u8; READ_BUF];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    match n {
        0 => {
            close_conn(lp, fd, conns);
            Rearm::Removed
        }
        n if n > 0 => {
            if write_all(fd, &buf[..n as usize]).is_err() {
                close_conn(lp, fd, conns);
                return Rearm::Removed;
            }
            Rearm::Rearm
        }
        _ if std::io::Error::last_os_error().kind() == std::io::ErrorKind::WouldBlock => Rearm::Rearm,
        _ => {
            close_conn(lp, fd, conns);
            Rearm::Removed
        }
    }
}

fn write_all(fd: RawFd, mut data: &[u8]) -> std::io::Result<()> {
    while !data.is_empty() {
        let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                continue;
            }
            return Err(err);
        }
        data = &data[n as usize..];
    }
    Ok(())
}

fn close_conn(lp: &EventLoop, fd: RawFd, conns: &Arc<Mutex<HashMap<RawFd, Conn>>>) {
    if let Some(conn) = conns.lock().unwrap().remove(&fd) {
        let _ = lp.remove_fd_watch(conn.watcher);
        unsafe { libc::close(conn.fd) };
    }
}
