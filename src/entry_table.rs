//! Definition and implementation of the entry table (§3, §4.B).
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::error::Error;
use crate::marker::MARKER_COUNT;
use crate::util;

/// One per-thread protection record. Aligned and padded to a cache line so
/// adjacent threads' entries never false-share; with the default
/// [`MARKER_COUNT`] of 13 the struct is exactly 64 bytes
/// (`local_epoch` + `thread_id` + `reentrant` = 12B, `markers` = 52B).
#[repr(align(64))]
pub(crate) struct Entry {
    /// Most recent global epoch observed while protected; 0 = not protected.
    pub(crate) local_epoch: AtomicI32,
    /// Owning thread id; 0 = slot free. The sole freeness signal (§3 inv. 4).
    pub(crate) thread_id: AtomicU32,
    /// Reserved for nested protection; unused (see `DESIGN.md` open question).
    pub(crate) reentrant: AtomicU32,
    /// Per-phase marker versions (§4.E).
    pub(crate) markers: [AtomicU32; MARKER_COUNT],
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            local_epoch: AtomicI32::new(0),
            thread_id: AtomicU32::new(0),
            reentrant: AtomicU32::new(0),
            markers: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }
}

/// Fixed-size hashed slot table. Index 0 is the invalid sentinel; usable
/// slots occupy `1..=table_size`. Allocated once at construction and never
/// moved or resized for the life of the owning `EpochManager` (§3
/// lifecycle).
pub(crate) struct EntryTable {
    entries: Box<[Entry]>,
    table_size: usize,
}

impl EntryTable {
    /// `table_size` must already be validated as a power of two by the
    /// caller (`EpochManager::new`); this allocates `table_size + 2` slots,
    /// mirroring the reference layout's alignment padding, even though
    /// `Entry`'s own `repr(align(64))` already guarantees slot 1 starts on
    /// a cache line.
    pub(crate) fn new(table_size: usize) -> Self {
        let entries = (0..table_size + 2)
            .map(|_| Entry::default())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        EntryTable {
            entries,
            table_size,
        }
    }

    pub(crate) fn table_size(&self) -> usize {
        self.table_size
    }

    pub(crate) fn entry(&self, index: usize) -> &Entry {
        &self.entries[index]
    }

    /// Hashed linear probe (§4.B): starting from `fmix32(thread_id) % N`,
    /// CAS each candidate slot's `thread_id` from 0. Restarts the scan until
    /// success or `3 * table_size` total probes are spent, at which point it
    /// fails with [`Error::TableExhausted`].
    pub(crate) fn reserve(&self, thread_id: u32) -> Result<usize, Error> {
        let n = self.table_size;
        let start = util::fmix32(thread_id) as usize % n;
        let max_attempts = 3 * n;
        let mut attempts = 0usize;
        loop {
            for i in 0..n {
                if attempts >= max_attempts {
                    log::warn!(
                        "entry table exhausted after {} probes reserving thread_id={} (table_size={})",
                        attempts, thread_id, n
                    );
                    return Err(Error::TableExhausted);
                }
                attempts += 1;
                let idx = 1 + ((start + i) % n);
                if self.entries[idx]
                    .thread_id
                    .compare_exchange(0, thread_id, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(idx);
                }
            }
        }
    }

    /// Clears occupancy: `local_epoch` first, then `thread_id`, so a
    /// concurrent scan never sees a slot that reads as free while it is
    /// still publishing a stale epoch.
    pub(crate) fn free(&self, index: usize) {
        let entry = &self.entries[index];
        entry.local_epoch.store(0, Ordering::Release);
        entry.thread_id.store(0, Ordering::Release);
    }

    /// §4.D `compute_safe_to_reclaim`'s scan: the minimum `local_epoch`
    /// among currently-protected slots, or `None` if nobody is protected.
    pub(crate) fn min_local_epoch(&self) -> Option<i32> {
        self.entries[1..=self.table_size]
            .iter()
            .map(|e| e.local_epoch.load(Ordering::Acquire))
            .filter(|&epoch| epoch != 0)
            .min()
    }

    /// §4.E step 2: false iff some protected entry's marker differs from
    /// `version`.
    pub(crate) fn all_markers_match(&self, marker_index: usize, version: u32) -> bool {
        self.entries[1..=self.table_size].iter().all(|e| {
            e.local_epoch.load(Ordering::Acquire) == 0
                || e.markers[marker_index].load(Ordering::Acquire) == version
        })
    }
}
