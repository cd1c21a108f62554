//! Definition and implementation of `EpochManager`.
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use crate::drain_list::{Action, DrainList};
use crate::entry_table::EntryTable;
use crate::error::Error;
use crate::marker::MARKER_COUNT;
use crate::thread_handle::ThreadHandle;
use crate::util;

/// Drain-list length (§3). 16 deferred actions in flight is enough
/// headroom for a checkpoint service bumping the epoch far faster than any
/// single slow thread can refresh past it; once exhausted, `enqueue`
/// reclaims ripe slots opportunistically rather than growing.
const DRAIN_LIST_LEN: usize = 16;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Epoch-based thread protection and deferred reclamation primitive.
///
/// Threads call [`acquire`](Self::acquire) once to reserve a slot, then
/// [`protect_and_drain`](Self::protect_and_drain) on every protected
/// operation to publish the current epoch and opportunistically service
/// deferred actions. Any thread may call
/// [`bump_current_epoch_with_action`](Self::bump_current_epoch_with_action)
/// to advance the global epoch and register a callback that fires once
/// every thread has moved past the epoch that was current at the time of
/// the call.
///
/// # Examples
///
/// ```
/// use epoch_manager::EpochManager;
///
/// let epochs = EpochManager::new(128);
/// epochs.acquire().unwrap();
/// assert_eq!(epochs.protect_and_drain(), 1);
/// assert_eq!(epochs.bump_current_epoch(), 2);
/// assert_eq!(epochs.protect_and_drain(), 2);
/// epochs.release();
/// ```
pub struct EpochManager {
    id: u64,
    table: EntryTable,
    drain: DrainList,
    current_epoch: AtomicI32,
    safe_to_reclaim_epoch: AtomicI32,
    disposed: AtomicBool,
}

impl EpochManager {
    /// Builds a manager with `table_size` usable slots. `table_size` must
    /// be a positive power of two, at most 32768 (§6); this is checked once
    /// at construction, not on the hot path, so a panic here mirrors the
    /// construction-time assertions the rest of this crate's ancestry uses
    /// for caller misuse.
    pub fn new(table_size: usize) -> Self {
        assert!(
            table_size > 0 && table_size.is_power_of_two() && table_size <= 32768,
            "table_size must be a power of two in (0, 32768], got {}",
            table_size
        );
        EpochManager {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            table: EntryTable::new(table_size),
            drain: DrainList::new(DRAIN_LIST_LEN),
            current_epoch: AtomicI32::new(1),
            safe_to_reclaim_epoch: AtomicI32::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Builds a manager with the default 128-slot table.
    pub fn default_table_size() -> Self {
        Self::new(128)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Marks the manager disposed. Actions still sitting in the drain list
    /// are dropped silently (§5); subsequent operations are no-ops in
    /// release builds and debug-assert in debug builds (§7).
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Reserves a slot for the calling thread (§4.B via §4.A). Idempotent:
    /// a thread that calls `acquire` twice keeps its original slot.
    pub fn acquire(&self) -> Result<(), Error> {
        debug_assert!(!self.is_disposed(), "acquire called after dispose");
        if ThreadHandle::is_initialized_for_thread(self.id) {
            return Ok(());
        }
        let slot = self.table.reserve(util::thread_id())?;
        ThreadHandle::bind(self.id, slot as u32);
        Ok(())
    }

    /// Releases the calling thread's slot. Calling without a matching
    /// `acquire` is a programmer error (`NotProtected`, §7): a debug
    /// assertion fires and a warning is logged, but release builds simply
    /// do nothing.
    pub fn release(&self) {
        let slot = ThreadHandle::value(self.id);
        if slot == 0 {
            debug_assert!(false, "release called by a thread that never acquired");
            log::warn!("EpochManager::release called without a matching acquire");
            return;
        }
        self.table.free(slot as usize);
        ThreadHandle::clear(self.id);
    }

    /// True iff the calling thread holds a slot and that slot currently
    /// publishes a non-zero `local_epoch` (§4.D).
    pub fn is_protected(&self) -> bool {
        let slot = ThreadHandle::value(self.id);
        slot != 0 && self.table.entry(slot as usize).local_epoch.load(Ordering::Acquire) != 0
    }

    /// Publishes the current epoch into the calling thread's slot, then
    /// opportunistically drains if anything is waiting. Wait-free and
    /// allocation-free whenever the drain list is empty (§4.D, the hot
    /// path). Calling without a prior `acquire` is a programmer error; it
    /// debug-asserts and returns the last observed epoch without publishing
    /// anything.
    pub fn protect_and_drain(&self) -> i32 {
        if self.is_disposed() {
            debug_assert!(false, "protect_and_drain called after dispose");
            return self.current_epoch.load(Ordering::Acquire);
        }
        let slot = ThreadHandle::value(self.id);
        debug_assert!(slot != 0, "protect_and_drain called without acquire");
        if slot == 0 {
            log::warn!("EpochManager::protect_and_drain called without a matching acquire");
            return self.current_epoch.load(Ordering::Acquire);
        }
        let epoch = self.current_epoch.load(Ordering::SeqCst);
        self.table.entry(slot as usize).local_epoch.store(epoch, Ordering::Release);
        if self.drain.count() > 0 {
            self.drain_ripe(epoch);
        }
        epoch
    }

    /// Atomically advances the global epoch by one and returns the new
    /// value, opportunistically draining (§4.D).
    pub fn bump_current_epoch(&self) -> i32 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if self.drain.count() > 0 {
            self.drain_ripe(new_epoch);
        }
        new_epoch
    }

    /// Advances the global epoch and registers `action` to fire once every
    /// thread has moved past the epoch that was current before this call
    /// (`trigger_epoch = new_epoch - 1`). Concludes with a
    /// [`protect_and_drain`](Self::protect_and_drain) by the caller, per
    /// §4.D.
    ///
    /// `action` must be safe to run on an arbitrary thread that has called
    /// `protect_and_drain`, and must not depend on its own completion to
    /// make progress (§6) — a panic inside `action` propagates to whichever
    /// thread happened to fire it (§7).
    pub fn bump_current_epoch_with_action(&self, action: Action) -> i32 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let trigger_epoch = i64::from(new_epoch) - 1;
        self.drain.enqueue(trigger_epoch, action, &self.safe_to_reclaim_epoch);
        self.protect_and_drain();
        new_epoch
    }

    /// Recomputes and publishes `safe_to_reclaim_epoch` (§4.D): the
    /// largest epoch no entry still holds a `local_epoch` at or below,
    /// bounded above by `reference_epoch`.
    fn compute_safe_to_reclaim(&self, reference_epoch: i32) -> i32 {
        let bound = match self.table.min_local_epoch() {
            Some(min_local) => reference_epoch.min(min_local),
            None => reference_epoch,
        };
        let safe = bound - 1;
        self.safe_to_reclaim_epoch.store(safe, Ordering::Release);
        safe
    }

    fn drain_ripe(&self, reference_epoch: i32) {
        let safe = self.compute_safe_to_reclaim(reference_epoch);
        self.drain.fire_ripe(safe);
    }

    /// Writes `version` into the calling thread's marker slot `marker_index`,
    /// then returns whether every currently-protected thread's marker for
    /// that index already reads `version` (§4.E). The caller must already
    /// hold a slot; calling without one is a programmer error
    /// (`NotProtected`).
    pub fn mark_and_check_is_complete(&self, marker_index: usize, version: u32) -> bool {
        assert!(
            marker_index < MARKER_COUNT,
            "marker_index {} out of range (MARKER_COUNT = {})",
            marker_index,
            MARKER_COUNT
        );
        let slot = ThreadHandle::value(self.id);
        if slot == 0 {
            debug_assert!(false, "mark_and_check_is_complete called without acquire");
            log::warn!("EpochManager::mark_and_check_is_complete called without a matching acquire");
            return false;
        }
        self.table.entry(slot as usize).markers[marker_index].store(version, Ordering::Release);
        self.table.all_markers_match(marker_index, version)
    }

    /// The most recently published global epoch.
    pub fn current_epoch(&self) -> i32 {
        self.current_epoch.load(Ordering::Acquire)
    }

    /// The largest epoch known safe to reclaim up to.
    pub fn safe_to_reclaim_epoch(&self) -> i32 {
        self.safe_to_reclaim_epoch.load(Ordering::Acquire)
    }

    /// The number of usable slots this manager was built with.
    pub fn table_size(&self) -> usize {
        self.table.table_size()
    }
}
