// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fuzz target for the handle queue
//!
//! Drives a small queue through an arbitrary sequence of push/pop/peek
//! calls with arbitrary payload bytes. None of these operations should
//! panic, and pop/peek must never touch `out` on failure.

#![no_main]

use anamnesis_core::{HandleQueue, QueueConfig};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

const ITEM_SIZE: usize = 8;

#[derive(Arbitrary, Debug)]
enum Op {
    Push([u8; ITEM_SIZE]),
    Pop,
    Peek,
}

#[derive(Arbitrary, Debug)]
struct Input {
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let queue = match HandleQueue::create(QueueConfig::new(ITEM_SIZE, 8)) {
        Ok(q) => q,
        Err(_) => return,
    };

    let mut out = [0u8; ITEM_SIZE];

    for op in input.ops.into_iter().take(256) {
        match op {
            Op::Push(bytes) => {
                let _ = queue.push(&bytes);
            }
            Op::Pop => {
                let _ = queue.pop(&mut out);
            }
            Op::Peek => {
                let _ = queue.peek(&mut out);
            }
        }
    }
});
