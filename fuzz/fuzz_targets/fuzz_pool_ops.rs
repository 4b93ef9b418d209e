// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fuzz target for slot pool operations
//!
//! Drives a small pool through an arbitrary sequence of alloc/release/get
//! calls against handles the fuzzer controls directly (including stale and
//! out-of-range ones). None of these operations should panic.

#![no_main]

use anamnesis_core::{Handle, PoolConfig, SlotPool};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Op {
    Alloc,
    Release(u64),
    Get(u64),
    Validate(u64),
}

#[derive(Arbitrary, Debug)]
struct Input {
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let pool = match SlotPool::create(PoolConfig::new(16, 8)) {
        Ok(p) => p,
        Err(_) => return,
    };

    let mut live = Vec::new();

    for op in input.ops.into_iter().take(256) {
        match op {
            Op::Alloc => {
                let h = pool.alloc();
                if !h.is_null() {
                    live.push(h);
                }
            }
            Op::Release(raw) => {
                let _ = pool.release(Handle::from_raw(raw));
            }
            Op::Get(raw) => {
                let _ = pool.get(Handle::from_raw(raw));
            }
            Op::Validate(raw) => {
                let _ = pool.validate(Handle::from_raw(raw));
            }
        }
    }

    for h in live {
        let _ = pool.release(h);
    }
});
