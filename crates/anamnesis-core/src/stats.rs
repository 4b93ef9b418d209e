// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stats surface (component E).
//!
//! All counters are monotonically non-decreasing atomics. A snapshot is
//! assembled field by field with `Ordering::Relaxed` loads; fields are not
//! guaranteed to be mutually consistent and consumers must tolerate
//! off-by-one skew between them.

/// A point-in-time snapshot of a [`crate::pool::SlotPool`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub slot_count: usize,
    pub slots_free: usize,
    pub slots_live: usize,
    pub alloc_count: u64,
    pub release_count: u64,
    pub anamnesis_count: u64,
    pub generation_max: u16,
}

/// A point-in-time snapshot of a [`crate::queue::HandleQueue`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub capacity: usize,
    pub push_count: u64,
    pub pop_count: u64,
    pub push_fails: u64,
    pub pop_fails: u64,
    pub aba_prevented: u64,
}
