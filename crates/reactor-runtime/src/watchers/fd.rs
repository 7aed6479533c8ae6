//! Typed fd watcher registration, including the bidi pair.
//!
//! These are inherent `EventLoop` methods that reach directly into its
//! private `state`/`bidi` fields rather than going back through a
//! narrower public surface — the same way `lib.rs`'s own dispatch
//! machinery does, since both live under the one base lock.

use std::os::unix::io::RawFd;

use reactor_core::watcher::{BidiCoordination, FdWatcherData, IoEvents, WatcherBase, WatcherKind};
use reactor_core::ReactorResult;

use crate::watchers::{FdCallback, Payload, RemovedCallback, WatcherEntry, WatcherId};
use crate::{mark_emulated_ready, BidiShared, EventLoop};

impl EventLoop {
    /// Register a one-shot fd watch for `events` on `fd`. If the backend
    /// can't natively poll `fd`'s descriptor type (e.g. a regular file),
    /// the watch is transparently emulated: readiness is reported as
    /// IN-ready immediately and on every rearm, without touching kernel
    /// state.
    pub fn add_fd_watch(
        &self,
        fd: RawFd,
        events: IoEvents,
        priority: i64,
        enabled: bool,
        callback: FdCallback,
    ) -> ReactorResult<WatcherId> {
        let mut st = self.state.lock();
        let data = FdWatcherData {
            fd,
            watched: events,
            pending: IoEvents::NONE,
            emulated: false,
            kernel_enabled: enabled,
        };
        let id = st.watchers.insert(WatcherEntry {
            base: WatcherBase::new(WatcherKind::Fd, priority),
            payload: Payload::Fd { data, callback },
            on_removed: None,
        });

        let backend = st.backend.as_mut().unwrap();
        match backend.add_fd_watch(fd, id.to_token(), events, enabled) {
            Ok(true) => Ok(id),
            Ok(false) => {
                // Descriptor type unsupported by the backend (regular
                // files and the like): fall back to emulation rather
                // than failing the registration outright.
                if let Some(entry) = st.watchers.get_mut(id) {
                    if let Payload::Fd { data, .. } = &mut entry.payload {
                        data.emulated = true;
                    }
                }
                if enabled {
                    mark_emulated_ready(&mut st, id, IoEvents::IN);
                }
                Ok(id)
            }
            Err(e) => {
                st.watchers.remove(id);
                Err(e)
            }
        }
    }

    /// Register a bidi fd watch pair sharing `fd`: a primary side for IN
    /// readiness and a secondary side for OUT readiness. Every backend
    /// in this engine's set watches IN+OUT
    /// natively on one kernel handle (`HAS_BIDI_FD_WATCH`); the pair's
    /// coordination (read-removed/write-removed, combined kernel mask)
    /// lives in `LoopState::bidi`, keyed by the primary's id.
    pub fn add_bidi_fd_watch(
        &self,
        fd: RawFd,
        priority_primary: i64,
        priority_secondary: i64,
        enabled: IoEvents,
        on_read: FdCallback,
        on_write: FdCallback,
        on_removed: Option<RemovedCallback>,
    ) -> ReactorResult<(WatcherId, WatcherId)> {
        let mut st = self.state.lock();

        let primary_data = FdWatcherData {
            fd,
            watched: IoEvents::IN,
            pending: IoEvents::NONE,
            emulated: false,
            kernel_enabled: enabled.contains(IoEvents::IN),
        };
        let secondary_data = FdWatcherData {
            fd,
            watched: IoEvents::OUT,
            pending: IoEvents::NONE,
            emulated: false,
            kernel_enabled: enabled.contains(IoEvents::OUT),
        };

        let primary_id = st.watchers.insert(WatcherEntry {
            base: WatcherBase::new(WatcherKind::BidiPrimary, priority_primary),
            payload: Payload::BidiPrimary { data: primary_data, coord: WatcherId::PLACEHOLDER, callback: on_read },
            on_removed: None,
        });
        let secondary_id = st.watchers.insert(WatcherEntry {
            base: WatcherBase::new(WatcherKind::BidiSecondary, priority_secondary),
            payload: Payload::BidiSecondary { data: secondary_data, coord: primary_id, callback: on_write },
            on_removed: None,
        });
        if let Some(entry) = st.watchers.get_mut(primary_id) {
            if let Payload::BidiPrimary { coord, .. } = &mut entry.payload {
                *coord = secondary_id;
            }
        }

        let backend = st.backend.as_mut().unwrap();
        let emulated_sides =
            match backend.add_bidi_fd_watch(fd, primary_id.to_token(), secondary_id.to_token(), enabled) {
                Ok(sides) => sides,
                Err(e) => {
                    st.watchers.remove(primary_id);
                    st.watchers.remove(secondary_id);
                    return Err(e);
                }
            };

        if emulated_sides.contains(IoEvents::IN) {
            if let Some(entry) = st.watchers.get_mut(primary_id) {
                if let Payload::BidiPrimary { data, .. } = &mut entry.payload {
                    data.emulated = true;
                }
            }
        }
        if emulated_sides.contains(IoEvents::OUT) {
            if let Some(entry) = st.watchers.get_mut(secondary_id) {
                if let Payload::BidiSecondary { data, .. } = &mut entry.payload {
                    data.emulated = true;
                }
            }
        }

        st.bidi.insert(primary_id, BidiShared { coord: BidiCoordination::default(), fd, on_removed });

        if enabled.contains(IoEvents::IN) && emulated_sides.contains(IoEvents::IN) {
            mark_emulated_ready(&mut st, primary_id, IoEvents::IN);
        }
        if enabled.contains(IoEvents::OUT) && emulated_sides.contains(IoEvents::OUT) {
            mark_emulated_ready(&mut st, secondary_id, IoEvents::OUT);
        }

        Ok((primary_id, secondary_id))
    }

    /// Enable or disable one fd (or bidi-side) watch at the kernel
    /// level, atomically per side. The rearm-verdict path
    /// (`Rearm::Rearm`/`Rearm::Disarm`) calls through the same internal
    /// `apply_enable`; this is the entry point for doing so outside of a
    /// dispatch callback.
    pub fn set_fd_watch_enabled(&self, id: WatcherId, enabled: bool) -> ReactorResult<()> {
        self.apply_enable(id, enabled)
    }

    /// Deregister a single fd watch, or one side of a bidi pair. For a
    /// bidi pair the fd isn't released at the kernel level until both
    /// sides have been deregistered (`read_removed ∧ write_removed`).
    pub fn remove_fd_watch(&self, id: WatcherId) -> ReactorResult<()> {
        self.deregister(id)
    }
}
