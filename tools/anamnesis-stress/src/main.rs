// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! anamnesis-stress - Stress/soak testing tool for anamnesis-core
//!
//! Drives the pool and queue MPMC/stale-access scenarios at configurable
//! thread counts and durations, outside of `cargo test`, for manual soak
//! testing.

use anamnesis_core::{HandleQueue, PoolConfig, QueueConfig, SlotPool};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

/// anamnesis stress testing tool
#[derive(Parser, Debug)]
#[command(name = "anamnesis-stress")]
#[command(version)]
#[command(about = "Stress test the slot pool and handle queue")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Pool alloc/release churn across many threads (exercises generation
    /// wrap and free-list contention).
    Pool {
        /// Number of worker threads
        #[arg(short, long, default_value = "8")]
        threads: usize,

        /// Slots in the pool
        #[arg(short = 'n', long, default_value = "1024")]
        slot_count: usize,

        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },

    /// Queue MPMC push/pop soak test (scenario S5 at larger scale).
    QueueMpmc {
        /// Number of producer threads
        #[arg(short, long, default_value = "4")]
        producers: usize,

        /// Number of consumer threads
        #[arg(short, long, default_value = "4")]
        consumers: usize,

        /// Queue capacity
        #[arg(short = 'n', long, default_value = "256")]
        capacity: usize,

        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },

    /// Intentional stale-access soak test (scenario S6 at larger scale):
    /// allocate batches, release half, validate all, expect exactly the
    /// released half to read as counterfeit.
    StaleAccess {
        /// Number of worker threads
        #[arg(short, long, default_value = "8")]
        threads: usize,

        /// Batch size per round
        #[arg(short, long, default_value = "100")]
        batch: usize,

        /// Number of rounds per thread
        #[arg(short, long, default_value = "1000")]
        rounds: usize,
    },
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    match &args.mode {
        Mode::Pool { threads, slot_count, duration } => run_pool_churn(*threads, *slot_count, *duration),
        Mode::QueueMpmc { producers, consumers, capacity, duration } => {
            run_queue_mpmc(*producers, *consumers, *capacity, *duration)
        }
        Mode::StaleAccess { threads, batch, rounds } => run_stale_access(*threads, *batch, *rounds),
    }
}

fn install_ctrlc_handler() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

fn run_pool_churn(threads: usize, slot_count: usize, duration_secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== anamnesis pool churn: {threads} threads, {slot_count} slots, {duration_secs}s ===\n");

    let pool = Arc::new(SlotPool::create(PoolConfig::new(64, slot_count))?);
    let running = install_ctrlc_handler()?;
    println!("  Press Ctrl+C to stop early\n");

    let start = Instant::now();
    let end_time = start + Duration::from_secs(duration_secs);
    let ops = Arc::new(AtomicU64::new(0));

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let running = Arc::clone(&running);
            let ops = Arc::clone(&ops);
            std::thread::spawn(move || {
                let mut local_ops = 0u64;
                while running.load(Ordering::Relaxed) && Instant::now() < end_time {
                    let h = pool.alloc();
                    if !h.is_null() {
                        pool.release(h);
                    }
                    local_ops += 1;
                    if local_ops % 4096 == 0 {
                        ops.fetch_add(4096, Ordering::Relaxed);
                    }
                }
                ops.fetch_add(local_ops % 4096, Ordering::Relaxed);
            })
        })
        .collect();

    for w in workers {
        w.join().expect("worker thread panicked");
    }

    let elapsed = start.elapsed();
    let stats = pool.stats();
    println!("=== Results ===");
    println!("  Operations: {}", ops.load(Ordering::Relaxed));
    println!("  Duration: {elapsed:?}");
    println!(
        "  Throughput: {:.0} ops/s",
        ops.load(Ordering::Relaxed) as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  Pool stats: slots_free={} alloc_count={} release_count={} anamnesis_count={} generation_max={}",
        stats.slots_free, stats.alloc_count, stats.release_count, stats.anamnesis_count, stats.generation_max
    );

    Ok(())
}

fn run_queue_mpmc(
    producer_count: usize,
    consumer_count: usize,
    capacity: usize,
    duration_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "=== anamnesis queue MPMC: {producer_count} producers, {consumer_count} consumers, capacity={capacity}, {duration_secs}s ===\n"
    );

    let queue = Arc::new(HandleQueue::create(QueueConfig::new(8, capacity))?);
    let running = install_ctrlc_handler()?;
    println!("  Press Ctrl+C to stop early\n");

    let start = Instant::now();
    let end_time = start + Duration::from_secs(duration_secs);
    let barrier = Arc::new(Barrier::new(producer_count + consumer_count));

    let producers: Vec<_> = (0..producer_count)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let mut i = 0u64;
                while running.load(Ordering::Relaxed) && Instant::now() < end_time {
                    let value = (p as u64) << 32 | i;
                    if queue.push(&value.to_le_bytes()) {
                        i += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
                i
            })
        })
        .collect();

    let consumers: Vec<_> = (0..consumer_count)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let mut buf = [0u8; 8];
                let mut count = 0u64;
                while running.load(Ordering::Relaxed) && Instant::now() < end_time {
                    if queue.pop(&mut buf) {
                        count += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
                count
            })
        })
        .collect();

    let pushed: u64 = producers.into_iter().map(|t| t.join().expect("producer panicked")).sum();
    let popped: u64 = consumers.into_iter().map(|t| t.join().expect("consumer panicked")).sum();

    let elapsed = start.elapsed();
    let stats = queue.stats();
    println!("=== Results ===");
    println!("  Duration: {elapsed:?}");
    println!("  Pushed (this run): {pushed}  Popped (this run): {popped}");
    println!(
        "  Queue stats: push_count={} pop_count={} push_fails={} pop_fails={} aba_prevented={}",
        stats.push_count, stats.pop_count, stats.push_fails, stats.pop_fails, stats.aba_prevented
    );
    println!("  Remaining in queue: {}", queue.len());

    Ok(())
}

fn run_stale_access(threads: usize, batch: usize, rounds: usize) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== anamnesis stale-access soak: {threads} threads, batch={batch}, rounds={rounds} ===\n");

    let pool = Arc::new(SlotPool::create(PoolConfig::new(32, threads * batch))?);
    let running = install_ctrlc_handler()?;
    println!("  Press Ctrl+C to stop early\n");

    let start = Instant::now();
    let mismatches = Arc::new(AtomicU64::new(0));
    let completed_rounds = Arc::new(AtomicU64::new(0));

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let running = Arc::clone(&running);
            let mismatches = Arc::clone(&mismatches);
            let completed_rounds = Arc::clone(&completed_rounds);
            std::thread::spawn(move || {
                let mut handles = Vec::with_capacity(batch);
                for round in 0..rounds {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    handles.clear();
                    for _ in 0..batch {
                        handles.push(pool.alloc());
                    }
                    for h in &handles[..batch / 2] {
                        pool.release(*h);
                    }
                    for (i, h) in handles.iter().enumerate() {
                        let expected_live = i >= batch / 2;
                        if pool.validate(*h) != expected_live {
                            mismatches.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    for h in &handles[batch / 2..] {
                        pool.release(*h);
                    }
                    if round % 50 == 0 {
                        completed_rounds.fetch_add(50.min((round + 1) as u64), Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for w in workers {
        w.join().expect("worker thread panicked");
    }

    let elapsed = start.elapsed();
    let stats = pool.stats();
    println!("=== Results ===");
    println!("  Duration: {elapsed:?}");
    println!("  Mismatches (should be 0): {}", mismatches.load(Ordering::Relaxed));
    println!(
        "  Pool stats: slots_free={} anamnesis_count={}",
        stats.slots_free, stats.anamnesis_count
    );

    if mismatches.load(Ordering::Relaxed) == 0 {
        println!("\n  All rounds validated correctly.");
    } else {
        eprintln!("\n  FAILURE: validation mismatches detected.");
        std::process::exit(1);
    }

    Ok(())
}
