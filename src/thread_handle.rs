//! Per-thread handle (§4.A): caches a thread's reserved slot index so
//! repeated calls into an `EpochManager` don't re-hash `thread_id()` every
//! time. Several `EpochManager`s may exist in one process, so bindings are
//! keyed by the owning manager's id; in the common case of a single manager
//! per thread this is a one-element scan, no slower than a dedicated TLS
//! cell would be.
use std::cell::RefCell;

thread_local! {
    static BINDINGS: RefCell<Vec<(u64, u32)>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct ThreadHandle;

impl ThreadHandle {
    /// Whether the calling thread has ever bound a slot for `manager_id`.
    pub(crate) fn is_initialized_for_thread(manager_id: u64) -> bool {
        Self::value(manager_id) != 0
    }

    /// The calling thread's slot index for `manager_id`, or the invalid
    /// sentinel `0` if it never acquired one.
    pub(crate) fn value(manager_id: u64) -> u32 {
        BINDINGS.with(|bindings| {
            bindings
                .borrow()
                .iter()
                .find(|(id, _)| *id == manager_id)
                .map(|&(_, slot)| slot)
                .unwrap_or(0)
        })
    }

    pub(crate) fn bind(manager_id: u64, slot: u32) {
        BINDINGS.with(|bindings| {
            let mut bindings = bindings.borrow_mut();
            match bindings.iter_mut().find(|(id, _)| *id == manager_id) {
                Some(existing) => existing.1 = slot,
                None => bindings.push((manager_id, slot)),
            }
        });
    }

    /// Relinquishes the cached index, resetting it to the invalid sentinel.
    pub(crate) fn clear(manager_id: u64) {
        BINDINGS.with(|bindings| bindings.borrow_mut().retain(|(id, _)| *id != manager_id));
    }
}
