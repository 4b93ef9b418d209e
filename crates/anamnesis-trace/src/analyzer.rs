// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Offline entropy analyzer for completed trace files.
//!
//! A LIFO free-list reuses the most recently released slot next (see
//! `anamnesis_core::pool`'s module docs), which leaves a measurable
//! locality signature in the sequence of `alloc` events: under low
//! contention, consecutive allocs tend to return the same slot index
//! repeatedly rather than cycling uniformly through the pool. This module
//! reads a completed `trace_thread_NNN.bin` file and reports that
//! distribution, without opinion on whether a given distribution is
//! "good" - it is a descriptive report, not a pass/fail check.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::format::{TraceRecord, OP_ALLOC, OP_GET_STALE, OP_GET_VALID, OP_RELEASE, RECORD_SIZE};

/// A summary of one trace file's `alloc` reuse pattern and event mix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntropyReport {
    pub alloc_count: u64,
    pub release_count: u64,
    pub get_valid_count: u64,
    pub get_stale_count: u64,
    /// Number of consecutive alloc events that returned the same slot index
    /// as the immediately preceding alloc event.
    pub immediate_reuse_count: u64,
    /// Number of distinct slot indices observed across all alloc events.
    pub distinct_slots_allocated: usize,
}

/// Read every fixed-size record in `path` and fold them into an
/// [`EntropyReport`].
pub fn analyze_file(path: impl AsRef<Path>) -> io::Result<EntropyReport> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(analyze_bytes(&bytes))
}

/// Fold raw trace bytes (a whole number of 16-byte records) into a report.
/// Any trailing partial record (a file flushed mid-write) is ignored.
#[must_use]
pub fn analyze_bytes(bytes: &[u8]) -> EntropyReport {
    let mut report = EntropyReport::default();
    let mut seen_slots = std::collections::HashSet::new();
    let mut last_alloc_slot: Option<u32> = None;

    for chunk in bytes.chunks_exact(RECORD_SIZE) {
        let raw: [u8; RECORD_SIZE] = chunk.try_into().unwrap();
        let record = TraceRecord::decode(raw);
        match record.op_type {
            OP_ALLOC => {
                report.alloc_count += 1;
                seen_slots.insert(record.slot_index);
                if last_alloc_slot == Some(record.slot_index) {
                    report.immediate_reuse_count += 1;
                }
                last_alloc_slot = Some(record.slot_index);
            }
            OP_RELEASE => report.release_count += 1,
            OP_GET_VALID => report.get_valid_count += 1,
            OP_GET_STALE => report.get_stale_count += 1,
            _ => {}
        }
    }

    report.distinct_slots_allocated = seen_slots.len();
    report
}
