// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A generational slot pool and a lock-free MPMC queue, both keyed on
//! forgery-resistant 64-bit handles instead of raw pointers.
//!
//! - [`handle`] — the `(generation, location, state)` bit-packing codec.
//! - [`pool`] — [`pool::SlotPool`], the fixed-size arena allocator.
//! - [`queue`] — [`queue::HandleQueue`], a bounded Michael & Scott queue
//!   built on top of a private `SlotPool`.
//! - [`stats`] — point-in-time counter snapshots for both.
//! - [`error`] — the one typed error this crate has, raised only at
//!   construction time.
//! - [`trace_hooks`] — the collaborator interface used by the `trace`
//!   Cargo feature; only compiled when that feature is enabled.

pub mod error;
pub mod handle;
pub mod pool;
pub mod queue;
pub mod stats;

#[cfg(feature = "trace")]
pub mod trace_hooks;

pub use error::ConfigError;
pub use handle::{Handle, SlotState};
pub use pool::{PoolConfig, SlotPool};
pub use queue::{HandleQueue, QueueConfig};
pub use stats::{PoolStats, QueueStats};

#[cfg(feature = "trace")]
pub use trace_hooks::{EventRecorder, TraceEvent};
