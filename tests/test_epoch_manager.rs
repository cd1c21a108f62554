//! Multi-thread integration scenarios for `EpochManager`, mirroring the
//! concrete scenarios catalogued for this primitive.
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use epoch_manager::EpochManager;

// S3 — reclamation gated by the slowest thread. Eight threads protect at
// epoch 1; one of them bumps with an action, the rest refresh one at a
// time, and the action must fire only once the last straggler refreshes.
#[test]
fn reclamation_waits_for_the_slowest_thread() {
    let _ = env_logger::try_init();

    const RELAY_THREADS: usize = 7;
    let epochs = Arc::new(EpochManager::new(128));
    let all_protected = Arc::new(Barrier::new(RELAY_THREADS + 1));
    let bumped = Arc::new(AtomicBool::new(false));
    let fired = Arc::new(AtomicBool::new(false));
    let refresh_turn = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for id in 0..RELAY_THREADS {
        let epochs = epochs.clone();
        let all_protected = all_protected.clone();
        let bumped = bumped.clone();
        let refresh_turn = refresh_turn.clone();
        handles.push(thread::spawn(move || {
            epochs.acquire().unwrap();
            assert_eq!(epochs.protect_and_drain(), 1);
            all_protected.wait();
            while !bumped.load(Ordering::Acquire) {
                thread::yield_now();
            }
            // Refresh past the bump in a fixed order, one at a time, so the
            // deferred action's firing point stays deterministic.
            while refresh_turn.load(Ordering::Acquire) != id {
                thread::yield_now();
            }
            assert_eq!(epochs.protect_and_drain(), 2);
            refresh_turn.fetch_add(1, Ordering::AcqRel);
            epochs.release();
        }));
    }

    epochs.acquire().unwrap();
    assert_eq!(epochs.protect_and_drain(), 1);
    all_protected.wait();

    let fired_clone = fired.clone();
    let new_epoch = epochs.bump_current_epoch_with_action(Box::new(move || {
        fired_clone.store(true, Ordering::Release);
    }));
    assert_eq!(new_epoch, 2);
    // Every relay thread is still blocked on `bumped`, so the action cannot
    // have fired yet no matter how the scheduler interleaves threads.
    assert!(!fired.load(Ordering::Acquire), "action fired before every thread refreshed");
    bumped.store(true, Ordering::Release);

    for h in handles {
        h.join().unwrap();
    }

    // Every thread has now refreshed past epoch 1 (or released); a final
    // drain observes that and fires the action if it hasn't already.
    epochs.protect_and_drain();
    assert!(fired.load(Ordering::Acquire));
    epochs.release();
}

// S6 — stress: many threads cycling protect/bump-with-action concurrently.
// Every registered action must fire exactly once, `current_epoch` only
// grows, and the table returns to a quiescent `safe_to_reclaim_epoch =
// current_epoch - 1` once everyone has released.
#[test]
fn stress_many_threads_every_action_fires_exactly_once() {
    let _ = env_logger::try_init();

    const THREADS: usize = 32;
    const ITERATIONS: usize = 2_000;

    let epochs = Arc::new(EpochManager::new(128));
    let fire_count = Arc::new(AtomicUsize::new(0));
    let last_epoch_seen = Arc::new(AtomicI32::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let epochs = epochs.clone();
            let fire_count = fire_count.clone();
            let last_epoch_seen = last_epoch_seen.clone();
            thread::spawn(move || {
                epochs.acquire().unwrap();
                for i in 0..ITERATIONS {
                    let epoch = epochs.protect_and_drain();
                    last_epoch_seen.fetch_max(epoch, Ordering::AcqRel);
                    if i % 7 == 0 {
                        let fire_count = fire_count.clone();
                        epochs.bump_current_epoch_with_action(Box::new(move || {
                            fire_count.fetch_add(1, Ordering::AcqRel);
                        }));
                    } else if i % 11 == 0 {
                        epochs.bump_current_epoch();
                    }
                }
                epochs.release();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // Quiesce: nobody is protected; one more drain flushes any stragglers
    // left by the opportunistic (non-guaranteed-prompt) drain schedule.
    epochs.acquire().unwrap();
    let final_epoch = epochs.protect_and_drain();
    epochs.release();

    let fires_per_thread = (ITERATIONS + 6) / 7;
    let expected_fires = THREADS * fires_per_thread;
    assert_eq!(fire_count.load(Ordering::Acquire), expected_fires);
    assert_eq!(epochs.current_epoch(), final_epoch);
    // `safe_to_reclaim_epoch` is only ever refreshed when something is
    // draining, so it can lag; it must never run ahead of the epoch every
    // protected thread has actually published.
    assert!(epochs.safe_to_reclaim_epoch() < epochs.current_epoch());
}

// Boundary: a full drain list makes `enqueue` spin rather than silently
// drop or overwrite an action. Sixteen actions are registered while a
// straggler thread holds `local_epoch` at 1 forever, so none of them can
// ever become safe; this fills every drain slot. A 17th concurrent
// `bump_current_epoch_with_action` call must then block until the
// straggler is retired and a slot is freed up for it.
#[test]
fn enqueue_blocks_once_the_drain_list_is_full() {
    let _ = env_logger::try_init();

    // Matches this crate's internal drain-list capacity; kept as a local
    // constant since the integration tests only see the public API.
    const DRAIN_LIST_LEN: usize = 16;

    let epochs = Arc::new(EpochManager::new(128));

    let release_straggler = Arc::new(AtomicBool::new(false));
    let straggler = {
        let epochs = epochs.clone();
        let release_straggler = release_straggler.clone();
        thread::spawn(move || {
            epochs.acquire().unwrap();
            assert_eq!(epochs.protect_and_drain(), 1);
            while !release_straggler.load(Ordering::Acquire) {
                thread::yield_now();
            }
            epochs.release();
        })
    };

    epochs.acquire().unwrap();
    assert_eq!(epochs.protect_and_drain(), 1);

    // The straggler's `local_epoch` stays pinned at 1 throughout this
    // block, so `safe_to_reclaim_epoch` stays at 0 and every one of these
    // never becomes ripe: the drain list fills to capacity.
    let fired_count = Arc::new(AtomicUsize::new(0));
    for _ in 0..DRAIN_LIST_LEN {
        let fired_count = fired_count.clone();
        epochs.bump_current_epoch_with_action(Box::new(move || {
            fired_count.fetch_add(1, Ordering::AcqRel);
        }));
    }
    assert_eq!(fired_count.load(Ordering::Acquire), 0, "no action can be safe yet");

    let waiter_done = Arc::new(AtomicBool::new(false));
    let waiter = {
        let epochs = epochs.clone();
        let fired_count = fired_count.clone();
        let waiter_done = waiter_done.clone();
        thread::spawn(move || {
            epochs.acquire().unwrap();
            epochs.bump_current_epoch_with_action(Box::new(move || {
                fired_count.fetch_add(1, Ordering::AcqRel);
            }));
            waiter_done.store(true, Ordering::Release);
        })
    };

    // Give the waiter plenty of chances to (wrongly) return early; the
    // drain list has no free or ripe slot, so `enqueue` must still be
    // spinning.
    for _ in 0..50 {
        thread::yield_now();
    }
    assert!(!waiter_done.load(Ordering::Acquire), "enqueue returned with the drain list still full");

    // Retire the straggler and let another thread's drain observe it,
    // which ripens every slot filled above and frees room for the waiter.
    release_straggler.store(true, Ordering::Release);
    straggler.join().unwrap();
    epochs.protect_and_drain();

    waiter.join().unwrap();
    assert!(waiter_done.load(Ordering::Acquire));
    assert_eq!(fired_count.load(Ordering::Acquire), DRAIN_LIST_LEN + 1);
    epochs.release();
}

// Boundary: the smallest useful table still behaves (two slots, two
// threads, no false TableExhausted).
#[test]
fn smallest_table_size_holds_exactly_two_threads() {
    let epochs = Arc::new(EpochManager::new(2));
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let epochs = epochs.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                epochs.acquire().expect("table of size 2 holds 2 threads");
                barrier.wait();
                assert_eq!(epochs.protect_and_drain(), 1);
                epochs.release();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

// Boundary: the largest legal table size constructs without overflow.
#[test]
fn largest_table_size_constructs_and_accepts_one_thread() {
    let epochs = EpochManager::new(32768);
    assert_eq!(epochs.table_size(), 32768);
    epochs.acquire().unwrap();
    assert_eq!(epochs.protect_and_drain(), 1);
    epochs.release();
}

#[test]
#[should_panic(expected = "table_size must be a power of two")]
fn non_power_of_two_table_size_panics() {
    let _ = EpochManager::new(100);
}
