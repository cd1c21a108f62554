//! Load test: a handful of reader threads chase a pointer published by a
//! handful of writer threads, with every retired value reclaimed through
//! `EpochManager::bump_current_epoch_with_action` instead of being freed
//! directly. A debug thread prints progress once a second. Mirrors the
//! shape of this crate's ancestor's own hazard-epoch stress harness, ported
//! onto safe atomics and `Arc` instead of raw pointer sharing.
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use epoch_manager::EpochManager;
use log::info;

struct Node {
    data: i32,
}

/// Raw pointers aren't `Send`; this carries a retired node's pointer into
/// the boxed reclamation action, the way the ancestor harness's `ShardPtr`
/// carried raw pointers across its thread boundaries.
struct RetiredPtr(*mut Node);

unsafe impl Send for RetiredPtr {}

struct GlobalControl {
    epochs: EpochManager,
    current: AtomicPtr<Node>,
    live_count: AtomicI64,
    read: AtomicI64,
    written: AtomicI64,
}

fn set_cpu_affinity(index: usize) {
    if let Some(cpus) = core_affinity::get_core_ids() {
        if !cpus.is_empty() {
            core_affinity::set_for_current(cpus[index % cpus.len()]);
        }
    }
}

fn reader_thread(id: usize, control: Arc<GlobalControl>, loops: i64, barrier: Arc<Barrier>) {
    set_cpu_affinity(id);
    control.epochs.acquire().expect("reader ran out of table slots");
    barrier.wait();
    let mut tally = 0i64;
    for _ in 0..loops {
        control.epochs.protect_and_drain();
        let ptr = control.current.load(Ordering::Acquire);
        // SAFETY: the node this points at cannot be reclaimed until every
        // protected thread, including this one, has refreshed past the
        // epoch the retiring writer bumped to.
        let seen = unsafe { (*ptr).data };
        let _ = seen;
        tally += 1;
        if tally % 1024 == 0 {
            control.read.fetch_add(tally, Ordering::AcqRel);
            tally = 0;
        }
    }
    control.read.fetch_add(tally, Ordering::AcqRel);
    control.epochs.release();
}

fn writer_thread(id: usize, control: Arc<GlobalControl>, loops: i64, barrier: Arc<Barrier>) {
    set_cpu_affinity(id);
    control.epochs.acquire().expect("writer ran out of table slots");
    barrier.wait();
    let mut tally = 0i64;
    for i in 0..loops {
        control.live_count.fetch_add(1, Ordering::AcqRel);
        let next = Box::into_raw(Box::new(Node { data: i as i32 }));
        let old = RetiredPtr(control.current.swap(next, Ordering::AcqRel));
        let reclaim_control = control.clone();
        control.epochs.bump_current_epoch_with_action(Box::new(move || {
            let old = old;
            // SAFETY: reclaimed only after `compute_safe_to_reclaim`
            // confirms no protected reader can still hold `old`.
            unsafe {
                drop(Box::from_raw(old.0));
            }
            reclaim_control.live_count.fetch_sub(1, Ordering::AcqRel);
        }));
        tally += 1;
        if tally % 1024 == 0 {
            control.written.fetch_add(tally, Ordering::AcqRel);
            tally = 0;
        }
    }
    control.written.fetch_add(tally, Ordering::AcqRel);
    control.epochs.release();
}

fn main() {
    env_logger::init();

    let cpu_count = core_affinity::get_core_ids().map(|c| c.len()).unwrap_or(4).max(2);
    let reader_count = (cpu_count + 1) / 2;
    let writer_count = cpu_count / 2;

    info!("readers={} writers={}", reader_count, writer_count);

    let loops = 200_000i64;

    let control = Arc::new(GlobalControl {
        epochs: EpochManager::new(1024),
        current: AtomicPtr::new(Box::into_raw(Box::new(Node { data: 0 }))),
        live_count: AtomicI64::new(1),
        read: AtomicI64::new(0),
        written: AtomicI64::new(0),
    });

    let stop = Arc::new(AtomicUsize::new(0));
    let debug_control = control.clone();
    let debug_stop = stop.clone();
    let debugger = thread::spawn(move || {
        while debug_stop.load(Ordering::Acquire) == 0 {
            info!(
                "current_epoch={} safe_to_reclaim_epoch={} drain_count written={} read={}",
                debug_control.epochs.current_epoch(),
                debug_control.epochs.safe_to_reclaim_epoch(),
                debug_control.written.load(Ordering::Acquire),
                debug_control.read.load(Ordering::Acquire),
            );
            thread::sleep(Duration::from_millis(1000));
        }
    });

    let barrier = Arc::new(Barrier::new(reader_count + writer_count));
    let mut readers = Vec::new();
    for id in 0..reader_count {
        let control = control.clone();
        let barrier = barrier.clone();
        readers.push(thread::spawn(move || reader_thread(id, control, loops, barrier)));
    }
    let mut writers = Vec::new();
    for id in 0..writer_count {
        let control = control.clone();
        let barrier = barrier.clone();
        writers.push(thread::spawn(move || writer_thread(id, control, loops, barrier)));
    }

    for t in readers {
        t.join().unwrap();
    }
    info!("readers joined");
    for t in writers {
        t.join().unwrap();
    }
    info!("writers joined");

    stop.store(1, Ordering::Release);
    debugger.join().unwrap();

    // Quiesce the last retired node: nobody is protected, so one final
    // drain from a thread that re-acquires reclaims everything still
    // waiting in the drain list.
    control.epochs.acquire().unwrap();
    control.epochs.protect_and_drain();
    control.epochs.release();

    unsafe {
        drop(Box::from_raw(control.current.load(Ordering::Acquire)));
    }
    control.live_count.fetch_sub(1, Ordering::AcqRel);

    info!(
        "done: written={} read={} live_count={}",
        control.written.load(Ordering::Acquire),
        control.read.load(Ordering::Acquire),
        control.live_count.load(Ordering::Acquire)
    );
    assert_eq!(control.live_count.load(Ordering::Acquire), 0);
}
