// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-threaded scenarios (S4-S6) and invariant properties (P1-P6) that
//! need real OS threads rather than a single-threaded unit test.

use anamnesis_core::{HandleQueue, PoolConfig, QueueConfig, SlotPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

/// S4. Queue SPSC: push 0..99 in order, pop 100 integers, expect order
/// preserved and final length 0.
#[test]
fn s4_queue_spsc_preserves_order() {
    let queue = Arc::new(HandleQueue::create(QueueConfig::new(4, 100)).unwrap());

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0u32..100 {
                while !queue.push(&i.to_le_bytes()) {
                    thread::yield_now();
                }
            }
        })
    };

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut popped = Vec::with_capacity(100);
            let mut buf = [0u8; 4];
            while popped.len() < 100 {
                if queue.pop(&mut buf) {
                    popped.push(u32::from_le_bytes(buf));
                } else {
                    thread::yield_now();
                }
            }
            popped
        })
    };

    producer.join().unwrap();
    let popped = consumer.join().unwrap();

    assert_eq!(popped, (0u32..100).collect::<Vec<_>>());
    assert_eq!(queue.len(), 0);
}

/// S5. Queue MPMC: four producers each push 5000 distinct integers
/// (producer_id * ITEMS + i); four consumers drain until 20000 total.
/// Expect the popped sum equals sum(0..19999) and push_count == pop_count
/// == 20000 (P4, P6).
#[test]
fn s5_queue_mpmc_conserves_multiset() {
    const PRODUCERS: u32 = 4;
    const ITEMS: u32 = 5000;
    const TOTAL: u32 = PRODUCERS * ITEMS;

    let queue = Arc::new(HandleQueue::create(QueueConfig::new(4, 256)).unwrap());
    let start = Arc::new(Barrier::new((PRODUCERS * 2) as usize));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for i in 0..ITEMS {
                    let value = p * ITEMS + i;
                    while !queue.push(&value.to_le_bytes()) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let consumed_count = Arc::new(AtomicUsize::new(0));
    let consumed_sum = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let consumers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let start = Arc::clone(&start);
            let consumed_count = Arc::clone(&consumed_count);
            let consumed_sum = Arc::clone(&consumed_sum);
            thread::spawn(move || {
                start.wait();
                let mut buf = [0u8; 4];
                loop {
                    if queue.pop(&mut buf) {
                        let value = u32::from_le_bytes(buf);
                        consumed_sum.fetch_add(u64::from(value), Ordering::Relaxed);
                        if consumed_count.fetch_add(1, Ordering::Relaxed) + 1 == TOTAL as usize {
                            break;
                        }
                    } else if consumed_count.load(Ordering::Relaxed) >= TOTAL as usize {
                        break;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    for c in consumers {
        c.join().unwrap();
    }

    let expected_sum: u64 = (0..u64::from(TOTAL)).sum();
    assert_eq!(consumed_sum.load(Ordering::Relaxed), expected_sum);
    assert_eq!(consumed_count.load(Ordering::Relaxed), TOTAL as usize);

    let stats = queue.stats();
    assert_eq!(stats.push_count, u64::from(TOTAL));
    assert_eq!(stats.pop_count, u64::from(TOTAL));
    assert!(queue.is_empty());
}

/// S6. Stress with intentional stale access: eight threads each allocate a
/// batch of 100 handles, release the first half, then validate all 100 -
/// expecting exactly the released half to read as counterfeit. Final
/// `slots_free == slot_count` after every thread drains its batch.
#[test]
fn s6_stress_stale_access_is_rejected() {
    const THREADS: usize = 8;
    const BATCH: usize = 100;

    let pool = Arc::new(SlotPool::create(PoolConfig::new(32, THREADS * BATCH)).unwrap());
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut handles = Vec::with_capacity(BATCH);
                for _ in 0..BATCH {
                    let h = pool.alloc();
                    assert!(!h.is_null());
                    handles.push(h);
                }

                for h in &handles[..BATCH / 2] {
                    assert!(pool.release(*h));
                }

                for (i, h) in handles.iter().enumerate() {
                    let expected_live = i >= BATCH / 2;
                    assert_eq!(pool.validate(*h), expected_live);
                }

                for h in &handles[BATCH / 2..] {
                    assert!(pool.release(*h));
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.slots_free, pool.slot_count());
    assert_eq!(stats.slots_live, 0);
}

/// P1/P2. Generation monotonicity and handle uniqueness: repeated
/// alloc/release cycles on a shared single-slot pool produce strictly
/// increasing generations and no two successful allocs are ever equal.
#[test]
fn p1_p2_generation_monotonic_and_handles_unique() {
    let pool = Arc::new(SlotPool::create(PoolConfig::new(16, 1)).unwrap());
    let start = Arc::new(Barrier::new(4));

    let results: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut seen = Vec::new();
                for _ in 0..200 {
                    let h = pool.alloc();
                    if !h.is_null() {
                        seen.push(h);
                        assert!(pool.release(h));
                    }
                }
                seen
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|t| t.join().unwrap())
        .collect();

    let mut all: Vec<_> = results.into_iter().flatten().collect();
    let total = all.len();
    all.sort_by_key(|h| h.decode_gen());
    all.dedup();
    assert_eq!(all.len(), total, "every successful alloc produced a distinct handle");
}

/// P3. Counterfeit rejection: after a successful release, get and release
/// on the same handle fail until the slot is reallocated.
#[test]
fn p3_counterfeit_rejection_holds_under_contention() {
    let pool = Arc::new(SlotPool::create(PoolConfig::new(16, 64)).unwrap());
    let h = pool.alloc();
    assert!(pool.release(h));

    let start = Arc::new(Barrier::new(4));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let start = Arc::clone(&start);
            let stale = h;
            thread::spawn(move || {
                start.wait();
                for _ in 0..1000 {
                    assert!(pool.get(stale).is_none());
                    assert!(!pool.release(stale));
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }
    assert!(pool.stats().anamnesis_count >= 8000);
}

/// P5. FIFO on a single producer / single consumer pair (a weaker
/// restatement of S4, run concurrently instead of joined sequentially, to
/// exercise genuine interleaving rather than an already-drained queue).
#[test]
fn p5_fifo_holds_under_concurrent_spsc() {
    let queue = Arc::new(HandleQueue::create(QueueConfig::new(4, 16)).unwrap());
    let start = Arc::new(Barrier::new(2));

    let producer = {
        let queue = Arc::clone(&queue);
        let start = Arc::clone(&start);
        thread::spawn(move || {
            start.wait();
            for i in 0u32..2000 {
                while !queue.push(&i.to_le_bytes()) {
                    thread::yield_now();
                }
            }
        })
    };

    let consumer = {
        let queue = Arc::clone(&queue);
        let start = Arc::clone(&start);
        thread::spawn(move || {
            start.wait();
            let mut expected = 0u32;
            let mut buf = [0u8; 4];
            while expected < 2000 {
                if queue.pop(&mut buf) {
                    assert_eq!(u32::from_le_bytes(buf), expected);
                    expected += 1;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();
}
