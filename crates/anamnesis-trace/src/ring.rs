// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-thread ring buffer and the [`FileTraceRecorder`] that owns the
//! output directory.
//!
//! Each thread that ever calls into an instrumented pool gets its own
//! buffer (via `thread_local!`) and its own `trace_thread_NNN.bin` file, so
//! there is no cross-thread synchronization on the hot path at all: the
//! only shared state is the atomic counter that hands out thread ids.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anamnesis_core::{EventRecorder, TraceEvent};

use crate::format::{TraceRecord, RECORD_SIZE};

/// Ring capacity in records; must be a power of two. 4096 records is 64 KiB,
/// flushed to disk at 75% fill.
const CAPACITY: usize = 4096;
const FLUSH_THRESHOLD: usize = (CAPACITY * 3) / 4;

struct ThreadRingBuffer {
    thread_id: u8,
    file: BufWriter<File>,
    buffer: Vec<[u8; RECORD_SIZE]>,
}

impl ThreadRingBuffer {
    fn create(dir: &Path, thread_id: u8, raw_thread_id: u32) -> io::Result<Self> {
        let path = dir.join(format!("trace_thread_{raw_thread_id:03}.bin"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        log::debug!("anamnesis-trace: opened {}", path.display());
        Ok(ThreadRingBuffer {
            thread_id,
            file: BufWriter::new(file),
            buffer: Vec::with_capacity(CAPACITY),
        })
    }

    fn push(&mut self, event: TraceEvent) {
        let timestamp = now_nanos();
        let record = TraceRecord::from_event(event, timestamp, self.thread_id);
        self.buffer.push(record.encode());
        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        for record in &self.buffer {
            if let Err(err) = self.file.write_all(record) {
                log::warn!("anamnesis-trace: failed to flush trace record: {err}");
                return;
            }
        }
        if let Err(err) = self.file.flush() {
            log::warn!("anamnesis-trace: failed to sync trace file: {err}");
        }
        self.buffer.clear();
    }
}

impl Drop for ThreadRingBuffer {
    fn drop(&mut self) {
        self.flush();
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

thread_local! {
    static BUFFER: RefCell<Option<ThreadRingBuffer>> = const { RefCell::new(None) };
}

/// An [`EventRecorder`] that writes every event into a per-thread ring
/// buffer, flushing to `trace_thread_NNN.bin` under `dir` at 75% fill and
/// on thread exit.
pub struct FileTraceRecorder {
    dir: PathBuf,
    next_thread_id: AtomicU32,
}

impl FileTraceRecorder {
    /// Create the output directory (if missing) and a recorder rooted at it.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileTraceRecorder {
            dir,
            next_thread_id: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl EventRecorder for FileTraceRecorder {
    fn record(&self, event: TraceEvent) {
        BUFFER.with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.is_none() {
                let raw_id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
                match ThreadRingBuffer::create(&self.dir, (raw_id % 256) as u8, raw_id) {
                    Ok(buffer) => *slot = Some(buffer),
                    Err(err) => {
                        log::warn!("anamnesis-trace: could not open trace file for thread {raw_id}: {err}");
                        return;
                    }
                }
            }
            if let Some(buffer) = slot.as_mut() {
                buffer.push(event);
            }
        });
    }
}
