//! Definition and implementation of the drain list (§3, §4.C).
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use crate::util;

/// A zero-argument side-effecting callback registered against a trigger
/// epoch. Boxed and type-erased since each slot in the drain list may hold
/// an action of a different concrete closure type.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

const EMPTY: i64 = i64::MAX;
const CLAIMING: i64 = i64::MAX - 1;
const WRAP_WARN_EVERY: u32 = 500;

struct DrainSlot {
    trigger_epoch: AtomicI64,
    action: UnsafeCell<Option<Action>>,
}

// SAFETY: `action` is only ever read or written by the single thread that
// has just won the CAS moving `trigger_epoch` into `CLAIMING`; no other
// thread can observe `CLAIMING` and proceed past its own CAS at the same
// time, so there is never more than one live `&mut` access.
unsafe impl Sync for DrainSlot {}

impl Default for DrainSlot {
    fn default() -> Self {
        DrainSlot {
            trigger_epoch: AtomicI64::new(EMPTY),
            action: UnsafeCell::new(None),
        }
    }
}

/// Small fixed-size set of `(trigger_epoch, action)` pairs awaiting
/// safety. Every slot cycles `EMPTY -> CLAIMING -> occupied -> CLAIMING ->
/// EMPTY`, each transition gated by a CAS on `trigger_epoch` (§4.D state
/// machine), so at most one thread ever fires a given action.
pub(crate) struct DrainList {
    slots: Box<[DrainSlot]>,
    drain_count: AtomicI32,
}

impl DrainList {
    pub(crate) fn new(len: usize) -> Self {
        DrainList {
            slots: (0..len)
                .map(|_| DrainSlot::default())
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            drain_count: AtomicI32::new(0),
        }
    }

    pub(crate) fn count(&self) -> i32 {
        self.drain_count.load(Ordering::Acquire)
    }

    /// §4.C `enqueue`: scans from slot 0, claiming the first empty slot for
    /// the new action. Any ripe slot encountered along the way (its trigger
    /// epoch is already `<= safe_to_reclaim_epoch`) is fired synchronously
    /// before the scan continues, providing opportunistic fairness under
    /// pressure. Spins across full wraps of the list if every slot is
    /// occupied and unripe, logging once every 500 wraps.
    pub(crate) fn enqueue(&self, trigger_epoch: i64, action: Action, safe_to_reclaim_epoch: &AtomicI32) {
        let mut pending = Some(action);
        let mut wraps = 0u32;
        loop {
            for slot in self.slots.iter() {
                let observed = slot.trigger_epoch.load(Ordering::Acquire);
                if observed == EMPTY {
                    if slot
                        .trigger_epoch
                        .compare_exchange(EMPTY, CLAIMING, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        // SAFETY: see `DrainSlot`'s `Sync` impl.
                        unsafe {
                            *slot.action.get() = pending.take();
                        }
                        slot.trigger_epoch.store(trigger_epoch, Ordering::Release);
                        self.drain_count.fetch_add(1, Ordering::AcqRel);
                        return;
                    }
                } else if observed != CLAIMING
                    && observed <= safe_to_reclaim_epoch.load(Ordering::Acquire) as i64
                    && slot
                        .trigger_epoch
                        .compare_exchange(observed, CLAIMING, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                {
                    self.fire_claimed(slot);
                }
            }
            wraps += 1;
            if wraps % WRAP_WARN_EVERY == 0 {
                log::warn!(
                    "drain list enqueue spinning after {} complete wraps over {} slots",
                    wraps,
                    self.slots.len()
                );
            }
            util::pause();
        }
    }

    /// §4.D's half of "drain": fires every slot whose trigger epoch is
    /// already `<= safe_to_reclaim_epoch`, stopping early once
    /// `drain_count` reaches 0.
    pub(crate) fn fire_ripe(&self, safe_to_reclaim_epoch: i32) {
        for slot in self.slots.iter() {
            if self.drain_count.load(Ordering::Acquire) == 0 {
                return;
            }
            let observed = slot.trigger_epoch.load(Ordering::Acquire);
            if observed != EMPTY
                && observed != CLAIMING
                && observed <= safe_to_reclaim_epoch as i64
                && slot
                    .trigger_epoch
                    .compare_exchange(observed, CLAIMING, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                self.fire_claimed(slot);
            }
        }
    }

    /// Fires and frees a slot this thread has just claimed (moved to
    /// `CLAIMING`). Private to the two scan loops above.
    fn fire_claimed(&self, slot: &DrainSlot) {
        // SAFETY: see `DrainSlot`'s `Sync` impl.
        let ripe = unsafe { (*slot.action.get()).take() };
        slot.trigger_epoch.store(EMPTY, Ordering::Release);
        self.drain_count.fetch_sub(1, Ordering::AcqRel);
        if let Some(ripe) = ripe {
            ripe();
        }
    }
}
