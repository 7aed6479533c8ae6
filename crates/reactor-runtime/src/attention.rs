//! Wait/attention locking: exactly one thread polls the backend at a
//! time, and unregistration takes precedence over an in-progress poll.
//! Two FIFO queues behind a short mutex implement that priority.
//!
//! The single-threaded build (default; enable the `thread-safe` feature
//! for the real lock) compiles this down to a no-op: `reactor-runtime`
//! is typically driven by one thread calling `run`, and
//! `gvthread_runtime`'s own single-threaded/thread-safe split (its
//! scheduler vs the degenerate single-worker case) is the model for
//! keeping both paths in the same module rather than two copies of
//! `EventLoop`.

#[cfg(feature = "thread-safe")]
mod locked {
    use std::collections::VecDeque;
    use std::sync::{Condvar, Mutex};

    struct Inner {
        attention_queue: VecDeque<u64>,
        pollwait_queue: VecDeque<u64>,
        long_poll_running: bool,
        next_ticket: u64,
    }

    pub struct AttentionLock {
        inner: Mutex<Inner>,
        cv: Condvar,
    }

    pub struct AttentionGuard<'a> {
        lock: &'a AttentionLock,
        ticket: u64,
    }

    impl AttentionLock {
        pub fn new() -> Self {
            AttentionLock {
                inner: Mutex::new(Inner {
                    attention_queue: VecDeque::new(),
                    pollwait_queue: VecDeque::new(),
                    long_poll_running: false,
                    next_ticket: 0,
                }),
                cv: Condvar::new(),
            }
        }

        /// Unregistration path: jumps ahead of any in-progress poll.
        pub fn acquire_attention(&self, interrupt: impl Fn()) -> AttentionGuard<'_> {
            let mut guard = self.inner.lock().unwrap();
            let ticket = guard.next_ticket;
            guard.next_ticket += 1;
            guard.attention_queue.push_back(ticket);

            if guard.attention_queue.len() == 2 && guard.long_poll_running {
                interrupt();
            }

            while guard.attention_queue.front() != Some(&ticket) {
                guard = self.cv.wait(guard).unwrap();
            }
            drop(guard);
            AttentionGuard { lock: self, ticket }
        }

        /// Poll-without-wait path: fails immediately if a long poll is
        /// already running rather than queueing behind it.
        pub fn try_acquire_attention(&self) -> Option<AttentionGuard<'_>> {
            let mut guard = self.inner.lock().unwrap();
            if guard.long_poll_running {
                return None;
            }
            let ticket = guard.next_ticket;
            guard.next_ticket += 1;
            guard.attention_queue.push_back(ticket);
            while guard.attention_queue.front() != Some(&ticket) {
                guard = self.cv.wait(guard).unwrap();
            }
            drop(guard);
            Some(AttentionGuard { lock: self, ticket })
        }

        /// Poll path: joins the attention queue directly if it's empty
        /// (becoming head immediately), otherwise waits behind
        /// `pollwait_queue`. Sets `long_poll_running` once it is head.
        pub fn acquire_poll_wait(&self) -> AttentionGuard<'_> {
            let mut guard = self.inner.lock().unwrap();
            let ticket = guard.next_ticket;
            guard.next_ticket += 1;
            if guard.attention_queue.is_empty() {
                guard.attention_queue.push_back(ticket);
            } else {
                guard.pollwait_queue.push_back(ticket);
            }
            while guard.attention_queue.front() != Some(&ticket) {
                guard = self.cv.wait(guard).unwrap();
            }
            guard.long_poll_running = true;
            drop(guard);
            AttentionGuard { lock: self, ticket }
        }
    }

    impl Drop for AttentionGuard<'_> {
        fn drop(&mut self) {
            let mut guard = self.lock.inner.lock().unwrap();
            guard.long_poll_running = false;
            debug_assert_eq!(guard.attention_queue.front(), Some(&self.ticket));
            guard.attention_queue.pop_front();
            if !guard.attention_queue.is_empty() {
                self.lock.cv.notify_all();
            } else if let Some(next) = guard.pollwait_queue.pop_front() {
                guard.attention_queue.push_back(next);
                self.lock.cv.notify_all();
            }
        }
    }
}

#[cfg(not(feature = "thread-safe"))]
mod unlocked {
    pub struct AttentionLock;

    pub struct AttentionGuard<'a>(std::marker::PhantomData<&'a ()>);

    impl AttentionLock {
        pub fn new() -> Self {
            AttentionLock
        }

        pub fn acquire_attention(&self, _interrupt: impl Fn()) -> AttentionGuard<'_> {
            AttentionGuard(std::marker::PhantomData)
        }

        pub fn try_acquire_attention(&self) -> Option<AttentionGuard<'_>> {
            Some(AttentionGuard(std::marker::PhantomData))
        }

        pub fn acquire_poll_wait(&self) -> AttentionGuard<'_> {
            AttentionGuard(std::marker::PhantomData)
        }
    }
}

#[cfg(feature = "thread-safe")]
pub use locked::{AttentionGuard, AttentionLock};
#[cfg(not(feature = "thread-safe"))]
pub use unlocked::{AttentionGuard, AttentionLock};

#[cfg(all(test, feature = "thread-safe"))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn attention_overtakes_pending_poll_wait() {
        let lock = Arc::new(AttentionLock::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let g1 = lock.acquire_poll_wait();
        let lock2 = lock.clone();
        let order2 = order.clone();
        let t = thread::spawn(move || {
            let _g = lock2.acquire_attention(|| {});
            order2.lock().unwrap().push("attention");
        });
        thread::sleep(Duration::from_millis(20));
        order.lock().unwrap().push("poll-wait-holds");
        drop(g1);
        t.join().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["poll-wait-holds", "attention"]);
    }
}
