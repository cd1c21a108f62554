//! Small shared helpers: thread ids and the probe hash.
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

// 0 is reserved as the entry table's "slot free" sentinel (§3), so the
// counter starts at 1 and every thread gets a strictly positive id.
static GLOBAL_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic per-thread id, lazily assigned on first use and cached in TLS.
/// Never 0, matching the entry table's freeness sentinel.
pub(crate) fn thread_id() -> u32 {
    thread_local! {
        static THREAD_ID: Cell<u32> = const { Cell::new(0) };
    }
    THREAD_ID.with(|tid| {
        let mut id = tid.get();
        if id == 0 {
            id = GLOBAL_THREAD_ID.fetch_add(1, Ordering::Relaxed) as u32;
            tid.set(id);
        }
        id
    })
}

#[inline]
pub(crate) fn pause() {
    std::hint::spin_loop();
}

/// Murmur3's 32-bit finalizer. An avalanche-good hash used to pick each
/// thread a near-dedicated starting slot in the entry table (§4.B).
#[inline]
pub(crate) fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_is_never_zero_and_is_stable() {
        let a = thread_id();
        let b = thread_id();
        assert_eq!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn distinct_threads_get_distinct_ids() {
        let t1 = std::thread::spawn(thread_id).join().unwrap();
        let t2 = std::thread::spawn(thread_id).join().unwrap();
        assert_ne!(t1, t2);
        assert_ne!(t1, 0);
        assert_ne!(t2, 0);
    }

    #[test]
    fn fmix32_is_deterministic() {
        assert_eq!(fmix32(0), fmix32(0));
        assert_ne!(fmix32(1), fmix32(2));
    }
}
