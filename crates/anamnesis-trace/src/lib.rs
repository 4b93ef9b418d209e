// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A concrete [`anamnesis_core::EventRecorder`] and offline entropy
//! analyzer for the `trace` feature of `anamnesis-core`.
//!
//! This crate is a collaborator, not a dependency of the core: `anamnesis-core`
//! defines the trait, this crate supplies one implementation of it.

mod analyzer;
mod format;
mod ring;

pub use analyzer::{analyze_bytes, analyze_file, EntropyReport};
pub use format::{TraceRecord, OP_ALLOC, OP_GET_STALE, OP_GET_VALID, OP_RELEASE, RECORD_SIZE};
pub use ring::FileTraceRecorder;
