// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The collaborator interface consumed by the `anamnesis-trace` crate.
//!
//! This module only exists when the `trace` feature is enabled on this
//! crate. It defines the four event kinds a [`crate::pool::SlotPool`]
//! reports into a caller-supplied recorder; it does not implement a ring
//! buffer or a file format itself — that lives entirely in the
//! `anamnesis-trace` collaborator, which this crate has no dependency on.

/// One of the four events a pool reports through an [`EventRecorder`].
///
/// `op_type` numbering for on-disk encoding is fixed by the external
/// interface: `0=alloc, 1=release, 2=get_valid, 3=get_stale`. A fifth value,
/// `4=validate_fail`, is reserved for collaborators that want to
/// distinguish a failed `validate` from a failed `get`; this crate never
/// emits it itself, since `validate` is implemented in terms of `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Alloc { slot_index: u32, generation: u16 },
    Release { slot_index: u32, generation: u16 },
    GetValid { slot_index: u32, generation: u16 },
    GetStale { slot_index: u32, generation: u16 },
}

impl TraceEvent {
    /// The `op_type` byte for this event kind, per the on-disk tuple format.
    #[must_use]
    pub const fn op_type(self) -> u8 {
        match self {
            TraceEvent::Alloc { .. } => 0,
            TraceEvent::Release { .. } => 1,
            TraceEvent::GetValid { .. } => 2,
            TraceEvent::GetStale { .. } => 3,
        }
    }

    #[must_use]
    pub const fn slot_index(self) -> u32 {
        match self {
            TraceEvent::Alloc { slot_index, .. }
            | TraceEvent::Release { slot_index, .. }
            | TraceEvent::GetValid { slot_index, .. }
            | TraceEvent::GetStale { slot_index, .. } => slot_index,
        }
    }

    #[must_use]
    pub const fn generation(self) -> u16 {
        match self {
            TraceEvent::Alloc { generation, .. }
            | TraceEvent::Release { generation, .. }
            | TraceEvent::GetValid { generation, .. }
            | TraceEvent::GetStale { generation, .. } => generation,
        }
    }
}

/// Implemented by tracing collaborators (see the `anamnesis-trace` crate).
///
/// `record` is called on the hot path of `alloc`/`release`/`get` whenever
/// the `trace` feature is on, so implementations must be cheap and must
/// not block: the expectation is a lock-free per-thread ring buffer, not a
/// direct file write.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: TraceEvent);
}
