//! Loopback device slot pool
//!
//! A fixed table of loopback endpoint pairs. Each entry can be held by at most
//! one connection at a time; holding is represented by a [`SlotLease`], which
//! returns the slot to the pool when dropped.
//!
//! The ALSA loopback card exposes 8 substreams per direction, so the default
//! table pairs capture `hw:0,0,N` with playback `hw:0,1,N` for N in 0..8.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Number of loopback substreams on the default loopback card
pub const DEFAULT_SLOT_COUNT: usize = 8;

/// Endpoint names of one loopback slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    /// Capture side, read by the transfer engine and forwarded to the real device
    pub capture: String,
    /// Playback side, handed to clients that want to reach the real device
    pub playback: String,
}

impl SlotSpec {
    pub fn new(capture: impl Into<String>, playback: impl Into<String>) -> Self {
        Self {
            capture: capture.into(),
            playback: playback.into(),
        }
    }

    /// Slot for substream `subdevice` of the default ALSA loopback card
    pub fn alsa_loopback(subdevice: usize) -> Self {
        Self::new(
            format!("hw:0,0,{}", subdevice),
            format!("hw:0,1,{}", subdevice),
        )
    }
}

/// The default table: all substreams of the first loopback card
pub fn default_slots() -> Vec<SlotSpec> {
    (0..DEFAULT_SLOT_COUNT).map(SlotSpec::alsa_loopback).collect()
}

/// Fixed-size pool of loopback slots
///
/// Slot names never change after construction; only the used flags are guarded.
#[derive(Debug)]
pub struct DevicePool {
    slots: Vec<SlotSpec>,
    used: Mutex<Vec<bool>>,
}

impl DevicePool {
    /// Create a pool over the given slot table
    pub fn new(slots: Vec<SlotSpec>) -> Self {
        let used = vec![false; slots.len()];
        Self {
            slots,
            used: Mutex::new(used),
        }
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots not held by anyone
    pub fn available(&self) -> usize {
        self.lock_used().iter().filter(|used| !**used).count()
    }

    /// Whether the slot at `index` is currently held
    pub fn is_used(&self, index: usize) -> bool {
        self.lock_used().get(index).copied().unwrap_or(false)
    }

    /// Endpoint names of the slot at `index`
    pub fn slot(&self, index: usize) -> Option<&SlotSpec> {
        self.slots.get(index)
    }

    /// All slots in table order
    pub fn slots(&self) -> &[SlotSpec] {
        &self.slots
    }

    /// Take the first free slot
    ///
    /// Returns `None` when every slot is held.
    pub fn acquire(self: &Arc<Self>) -> Option<SlotLease> {
        let mut used = self.lock_used();
        let index = used.iter().position(|used| !*used)?;
        used[index] = true;
        drop(used);

        log::debug!(
            "[pool] acquired slot {} ({} / {})",
            index,
            self.slots[index].capture,
            self.slots[index].playback
        );

        Some(SlotLease {
            pool: Arc::clone(self),
            index,
        })
    }

    fn release(&self, index: usize) {
        let mut used = self.lock_used();
        match used.get_mut(index) {
            Some(flag) if *flag => {
                *flag = false;
                log::debug!("[pool] released slot {}", index);
            }
            _ => {
                // A lease is the only way to release, so this means the table was corrupted
                log::error!("[pool] slot {} released while not held", index);
                debug_assert!(false, "slot {} released while not held", index);
            }
        }
    }

    fn lock_used(&self) -> std::sync::MutexGuard<'_, Vec<bool>> {
        self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DevicePool {
    fn default() -> Self {
        Self::new(default_slots())
    }
}

/// Exclusive hold on one slot of a [`DevicePool`]
///
/// Dropping the lease frees the slot.
#[derive(Debug)]
pub struct SlotLease {
    pool: Arc<DevicePool>,
    index: usize,
}

impl SlotLease {
    /// Position of the slot in the pool table
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn spec(&self) -> &SlotSpec {
        &self.pool.slots[self.index]
    }

    pub fn capture_device(&self) -> &str {
        &self.spec().capture
    }

    pub fn playback_device(&self) -> &str {
        &self.spec().playback
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let pool = DevicePool::default();
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.slot(0).unwrap().capture, "hw:0,0,0");
        assert_eq!(pool.slot(7).unwrap().playback, "hw:0,1,7");
        assert_eq!(pool.available(), 8);
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = Arc::new(DevicePool::default());
        let leases: Vec<SlotLease> = (0..8).map(|_| pool.acquire().unwrap()).collect();

        // First-free scan hands slots out in table order
        let indices: Vec<usize> = leases.iter().map(|l| l.index()).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());

        assert!(pool.acquire().is_none());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_drop_frees_slot_for_reuse() {
        let pool = Arc::new(DevicePool::default());
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_eq!(second.index(), 1);

        drop(first);
        assert!(!pool.is_used(0));
        assert!(pool.is_used(1));

        let again = pool.acquire().unwrap();
        assert_eq!(again.index(), 0);
        assert_eq!(again.capture_device(), "hw:0,0,0");
        assert_eq!(again.playback_device(), "hw:0,1,0");
    }

    #[test]
    fn test_concurrent_acquire_hands_out_distinct_slots() {
        let pool = Arc::new(DevicePool::new((0..4).map(SlotSpec::alsa_loopback).collect()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.acquire())
            })
            .collect();
        let results: Vec<Option<SlotLease>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut indices: Vec<usize> = results.iter().flatten().map(|l| l.index()).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 4);
    }
}
