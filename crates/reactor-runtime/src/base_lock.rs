//! The base lock guarding `EventLoop`'s watcher table, event queue,
//! timer heaps, pid map, and (transiently, see `LoopState::backend` and
//! `EventLoop::pull_events` in `lib.rs`) the backend itself.
//!
//! In a `thread-safe` build this is a real `Mutex`, making `EventLoop`
//! `Sync` and safe to share via `Arc` across threads (every callback
//! type is `Send`, see `watchers/mod.rs`). In the default single-threaded
//! build it's a `RefCell`, which is *not* `Sync` — so the type system
//! itself rejects sharing an `EventLoop` across threads rather than
//! silently letting a data race compile, matching `attention.rs`'s
//! locked/unlocked split.

#[cfg(feature = "thread-safe")]
mod imp {
    use std::sync::{Mutex, MutexGuard};

    pub struct BaseLock<T>(Mutex<T>);

    impl<T> BaseLock<T> {
        pub fn new(value: T) -> Self {
            BaseLock(Mutex::new(value))
        }

        pub fn lock(&self) -> MutexGuard<'_, T> {
            self.0.lock().unwrap_or_else(|e| e.into_inner())
        }
    }
}

#[cfg(not(feature = "thread-safe"))]
mod imp {
    use std::cell::{RefCell, RefMut};

    pub struct BaseLock<T>(RefCell<T>);

    impl<T> BaseLock<T> {
        pub fn new(value: T) -> Self {
            BaseLock(RefCell::new(value))
        }

        pub fn lock(&self) -> RefMut<'_, T> {
            self.0.borrow_mut()
        }
    }
}

pub(crate) use imp::BaseLock;
