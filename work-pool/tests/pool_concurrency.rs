//! Concurrency tests for the bounded work pool
//!
//! These exercise the blocking paths with real threads:
//! - Reservation ceilings block the over-quota producer only
//! - Backpressure is per-owner, not global
//! - Shutdown broadcast wakes blocked adders and removers
//! - `wait_until_empty` observes a drain performed by another thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use work_pool::{BoundedWorkPool, Error, WorkItem};

#[test]
fn test_add_blocks_at_reservation_ceiling() {
    let pool = Arc::new(BoundedWorkPool::new());
    let third_add_done = Arc::new(AtomicBool::new(false));

    let producer = {
        let pool = Arc::clone(&pool);
        let third_add_done = Arc::clone(&third_add_done);
        thread::spawn(move || {
            pool.reserve(2);
            pool.add("k1", WorkItem::new(1)).unwrap();
            pool.add("k2", WorkItem::new(2)).unwrap();
            // Third add must block until the consumer frees a slot
            pool.add("k3", WorkItem::new(3)).unwrap();
            third_add_done.store(true, Ordering::SeqCst);
        })
    };

    // Give the producer time to hit the ceiling
    thread::sleep(Duration::from_millis(100));
    assert_eq!(pool.len(), 2);
    assert!(!third_add_done.load(Ordering::SeqCst));

    let (key, item) = pool.remove_front(true).unwrap();
    assert_eq!(key, "k1");
    assert_eq!(*item, 1);

    producer.join().unwrap();
    assert!(third_add_done.load(Ordering::SeqCst));
    assert_eq!(pool.len(), 2);
}

#[test]
fn test_backpressure_is_per_owner() {
    let pool: Arc<BoundedWorkPool<u32>> = Arc::new(BoundedWorkPool::new());

    crossbeam::thread::scope(|s| {
        let a = s.spawn(|_| {
            pool.reserve(5);
            for i in 0..5 {
                pool.add(format!("a{}", i), WorkItem::new(i)).unwrap();
            }
        });
        a.join().unwrap();

        // Thread A is at its ceiling; thread B must still be able to add
        // its full quota without being throttled by A's usage.
        let b = s.spawn(|_| {
            pool.reserve(5);
            for i in 0..5 {
                pool.add(format!("b{}", i), WorkItem::new(100 + i)).unwrap();
            }
        });
        b.join().unwrap();
    })
    .unwrap();

    assert_eq!(pool.len(), 10);
}

#[test]
fn test_shutdown_wakes_blocked_remover() {
    let pool: Arc<BoundedWorkPool<u32>> = Arc::new(BoundedWorkPool::new());

    let consumer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.remove_front(true))
    };

    thread::sleep(Duration::from_millis(50));
    pool.shutdown();

    let result = consumer.join().unwrap();
    assert_eq!(result.unwrap_err(), Error::ShuttingDown);
}

#[test]
fn test_shutdown_wakes_blocked_adder() {
    let pool = Arc::new(BoundedWorkPool::new());

    let producer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            pool.reserve(1);
            pool.add("k1", WorkItem::new(1)).unwrap();
            // Blocks: ceiling reached, nobody consumes
            pool.add("k2", WorkItem::new(2))
        })
    };

    thread::sleep(Duration::from_millis(50));
    pool.shutdown();

    let result = producer.join().unwrap();
    assert_eq!(result.unwrap_err(), Error::ShuttingDown);
}

#[test]
fn test_hand_off_between_watcher_and_worker() {
    let pool: Arc<BoundedWorkPool<String>> = Arc::new(BoundedWorkPool::new());
    const ITEMS: usize = 50;

    let watcher = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            for i in 0..ITEMS {
                pool.add(format!("msg-{}", i), WorkItem::new(format!("payload-{}", i)))
                    .unwrap();
            }
        })
    };

    let worker = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let mut seen = Vec::with_capacity(ITEMS);
            for _ in 0..ITEMS {
                let (key, item) = pool.remove_front(true).unwrap();
                assert_eq!(key.replace("msg-", "payload-"), *item);
                seen.push(key);
            }
            seen
        })
    };

    watcher.join().unwrap();
    let seen = worker.join().unwrap();

    // Single producer: FIFO order must survive the hand-off
    let expected: Vec<String> = (0..ITEMS).map(|i| format!("msg-{}", i)).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_wait_until_empty_sees_drain() {
    let pool: Arc<BoundedWorkPool<u32>> = Arc::new(BoundedWorkPool::new());
    for i in 0..10 {
        pool.add(format!("k{}", i), WorkItem::new(i)).unwrap();
    }

    let worker = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            for _ in 0..10 {
                thread::sleep(Duration::from_millis(5));
                pool.remove_front(true).unwrap();
            }
        })
    };

    assert!(pool.wait_until_empty(Some(Duration::from_secs(5))).unwrap());
    worker.join().unwrap();
}

#[test]
fn test_peek_then_remove_by_key() {
    let pool = Arc::new(BoundedWorkPool::new());
    pool.add("first", WorkItem::new(1)).unwrap();
    pool.add("second", WorkItem::new(2)).unwrap();

    let (key, item) = pool.peek_front(true).unwrap();
    assert_eq!(key, "first");
    assert_eq!(item.ref_count(), 2);

    // Keyed removal extracts out of FIFO order; the peeked entry stays
    let removed = pool.remove_by_key("second").unwrap();
    assert_eq!(*removed, 2);
    assert_eq!(pool.len(), 1);
}
