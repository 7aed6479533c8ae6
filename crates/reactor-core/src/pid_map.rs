//! Pid-keyed watcher map with pre-fork reservation, supplemented from
//! `original_source/dasynq/include/dasynq/childproc.h`'s `pid_map`:
//! reservation is a distinct handle type from the live map entry, with
//! `reserve`/`unreserve`/`add_from_reserve` kept as separate operations
//! from a plain fallible `add` — race-free child reaping depends on
//! `add_from_reserve` being infallible once a slot has been reserved, so
//! a child watch can be installed after `fork()` with no allocation on
//! the hot path.

use std::collections::BTreeMap;

/// Stable handle into a [`PidMap`], valid from `reserve` until
/// `unreserve`/`remove_handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PidHandle(usize, u32);

struct Slot<T> {
    data: Option<T>,
    pid: Option<i32>,
    generation: u32,
}

/// Ordered map from pid to watcher payload, generic over `T` (the
/// runtime's child-watcher record).
pub struct PidMap<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    index: BTreeMap<i32, usize>,
}

impl<T> PidMap<T> {
    pub fn new() -> Self {
        PidMap { slots: Vec::new(), free: Vec::new(), index: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn check(&self, handle: PidHandle) -> Option<usize> {
        self.slots
            .get(handle.0)
            .filter(|s| s.generation == handle.1)
            .map(|_| handle.0)
    }

    /// Allocate a slot without associating a pid yet. Cannot fail with
    /// allocator exhaustion in the sense `bad_alloc` would in the
    /// original — `Vec::push` aborts on true OOM, which is the same
    /// failure mode the rest of the engine accepts for in-process
    /// allocation. The point of reservation is to do this *before*
    /// `fork()`, not to make it infallible in an absolute sense.
    pub fn reserve(&mut self) -> PidHandle {
        if let Some(idx) = self.free.pop() {
            PidHandle(idx, self.slots[idx].generation)
        } else {
            self.slots.push(Slot { data: None, pid: None, generation: 0 });
            PidHandle(self.slots.len() - 1, 0)
        }
    }

    /// Release a reservation that was never associated with a pid.
    pub fn unreserve(&mut self, handle: PidHandle) {
        if let Some(idx) = self.check(handle) {
            if self.slots[idx].pid.is_none() {
                self.slots[idx].data = None;
                self.slots[idx].generation = self.slots[idx].generation.wrapping_add(1);
                self.free.push(idx);
            }
        }
    }

    /// Associate a reserved handle with `pid` and `data`. Infallible:
    /// this is the operation the reserve/fork/add_from_reserve protocol
    /// exists to guarantee can't fail after the point of reservation.
    pub fn add_from_reserve(&mut self, handle: PidHandle, pid: i32, data: T) {
        if let Some(idx) = self.check(handle) {
            self.slots[idx].data = Some(data);
            self.slots[idx].pid = Some(pid);
            self.index.insert(pid, idx);
        }
    }

    /// Convenience combination of `reserve` + `add_from_reserve` for
    /// callers not working around a fork boundary.
    pub fn add(&mut self, pid: i32, data: T) -> PidHandle {
        let handle = self.reserve();
        self.add_from_reserve(handle, pid, data);
        handle
    }

    pub fn get(&self, pid: i32) -> Option<&T> {
        self.index.get(&pid).and_then(|&idx| self.slots[idx].data.as_ref())
    }

    /// Remove and fully release the slot for `pid` (used by the reaper
    /// after `waitid` reports termination).
    pub fn remove_by_pid(&mut self, pid: i32) -> Option<T> {
        let idx = self.index.remove(&pid)?;
        let slot = &mut self.slots[idx];
        let data = slot.data.take();
        slot.pid = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx);
        data
    }

    /// Stop watching via handle but retain the reservation, so the same
    /// handle can be associated with a different pid later without a
    /// fresh `reserve`.
    pub fn stop(&mut self, handle: PidHandle) {
        if let Some(idx) = self.check(handle) {
            if let Some(pid) = self.slots[idx].pid.take() {
                self.index.remove(&pid);
            }
        }
    }

    /// Stop watching and release the reservation entirely.
    pub fn remove_handle(&mut self, handle: PidHandle) {
        self.stop(handle);
        self.unreserve(handle);
    }
}

impl<T> Default for PidMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_add_from_reserve_is_infallible() {
        let mut m: PidMap<u32> = PidMap::new();
        let handle = m.reserve();
        // simulate work done between reserve (pre-fork) and add (post-fork)
        m.add_from_reserve(handle, 4242, 99);
        assert_eq!(*m.get(4242).unwrap(), 99);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn unreserve_without_pid_frees_slot() {
        let mut m: PidMap<u32> = PidMap::new();
        let handle = m.reserve();
        m.unreserve(handle);
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn remove_by_pid_frees_slot_for_reuse() {
        let mut m: PidMap<u32> = PidMap::new();
        let h1 = m.add(111, 1);
        assert_eq!(m.remove_by_pid(111), Some(1));
        assert!(m.get(111).is_none());

        // slot should be recycled
        let h2 = m.add(222, 2);
        assert_eq!(*m.get(222).unwrap(), 2);
        assert_ne!(h1, h2, "generation must differ after reuse");
    }

    #[test]
    fn stop_retains_reservation_for_reuse() {
        let mut m: PidMap<u32> = PidMap::new();
        let handle = m.add(111, 1);
        m.stop(handle);
        assert!(m.get(111).is_none());

        // same handle, new pid, no fresh reservation needed
        m.add_from_reserve(handle, 222, 2);
        assert_eq!(*m.get(222).unwrap(), 2);
    }
}
