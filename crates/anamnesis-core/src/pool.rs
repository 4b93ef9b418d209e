// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The generational slot pool (component B).
//!
//! A fixed-size arena of uniformly sized slots. Callers acquire and release
//! slots through opaque [`Handle`]s; every access cross-checks the
//! generation embedded in the handle against the one stored in the slot, so
//! a handle that outlives its slot's lifetime is rejected on use instead of
//! corrupting memory (the "anamnesis" failure kind — see [`crate::error`]).
//!
//! The free list is itself threaded through handles rather than bare
//! indices: the atomic free-list head and each slot's `next_free` link hold
//! full `(generation, location, FREE)` handles. This is what makes the
//! Treiber-stack pop in [`SlotPool::alloc`] itself immune to the classic
//! ABA hazard that plain index-chained free lists suffer from — a slot
//! popped and pushed back onto the list between a reader's snapshot and its
//! CAS carries a different generation (bumped by the intervening
//! `release`), so the CAS sees a changed word and retries instead of
//! silently corrupting the list. It is the same trick the queue (component
//! D) uses for its own node chain, applied one level down.

use crate::error::ConfigError;
use crate::handle::{Handle, SlotState};
use crate::stats::PoolStats;
#[cfg(feature = "trace")]
use crate::trace_hooks::{EventRecorder, TraceEvent};

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
#[cfg(feature = "trace")]
use std::sync::Arc;

/// Bytes reserved at the front of every slot for pool bookkeeping: an 8-byte
/// `next_free` link followed by a 2-byte generation counter, padded out to
/// an 8-byte boundary so the payload region that follows stays 8-aligned.
const HEADER_SIZE: usize = 16;

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

const fn is_power_of_two(v: usize) -> bool {
    v != 0 && (v & (v - 1)) == 0
}

/// Construction-time configuration for a [`SlotPool`].
///
/// Matches the recognized options in the external interface: `slot_size`
/// and `slot_count` must be supplied (there is no sane default for either),
/// while `alignment` defaults to 8 and both zero-on-* policies default to
/// `false`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    pub slot_size: usize,
    pub slot_count: usize,
    pub alignment: usize,
    pub zero_on_alloc: bool,
    pub zero_on_release: bool,
}

impl PoolConfig {
    #[must_use]
    pub fn new(slot_size: usize, slot_count: usize) -> Self {
        PoolConfig {
            slot_size,
            slot_count,
            ..Default::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            slot_size: 0,
            slot_count: 0,
            alignment: 8,
            zero_on_alloc: false,
            zero_on_release: false,
        }
    }
}

/// A fixed-size arena of `slot_count` uniformly sized slots.
///
/// `SlotPool` is independently useful and may be instantiated directly by
/// client code; the queue (component D) is simply one such client, using a
/// private pool sized to `capacity + 1` for its own nodes.
pub struct SlotPool {
    base: *mut u8,
    layout: Layout,
    stride: usize,
    slot_size: usize,
    slot_count: usize,
    #[allow(dead_code)] // retained for API parity with the address-form encoding; see module docs.
    alignment: usize,
    zero_on_alloc: bool,
    zero_on_release: bool,

    free_head: AtomicU64,
    slots_free: AtomicUsize,
    alloc_count: AtomicU64,
    release_count: AtomicU64,
    anamnesis_count: AtomicU64,
    generation_max: AtomicU16,

    #[cfg(feature = "trace")]
    recorder: parking_lot::RwLock<Option<Arc<dyn EventRecorder>>>,
}

// SAFETY: all mutable state reachable through `&self` (slot headers,
// payload bytes, and the pool's own counters) is either a genuine atomic or
// is protected by the generation-checked handle protocol documented above;
// the raw `base` pointer never escapes except through those guarded paths.
unsafe impl Send for SlotPool {}
unsafe impl Sync for SlotPool {}

impl SlotPool {
    /// Validate `config` and allocate its backing storage.
    ///
    /// Every slot starts at generation 0 and is pushed onto the free list
    /// in reverse order, so the first `alloc()` returns slot 0.
    pub fn create(config: PoolConfig) -> Result<Self, ConfigError> {
        if config.slot_size == 0 {
            return Err(ConfigError::ZeroSize { field: "slot_size" });
        }
        if config.slot_count == 0 {
            return Err(ConfigError::ZeroCount { field: "slot_count" });
        }
        if !is_power_of_two(config.alignment) {
            return Err(ConfigError::AlignmentNotPowerOfTwo {
                alignment: config.alignment,
            });
        }
        if config.alignment < 8 {
            return Err(ConfigError::AlignmentTooSmall {
                alignment: config.alignment,
            });
        }

        let stride = align_up(HEADER_SIZE + align_up(config.slot_size, config.alignment), 8);
        let total_bytes = stride
            .checked_mul(config.slot_count)
            .ok_or(ConfigError::AllocationFailed {
                requested_bytes: usize::MAX,
            })?;

        let layout = Layout::from_size_align(total_bytes, config.alignment).map_err(|_| {
            ConfigError::AllocationFailed {
                requested_bytes: total_bytes,
            }
        })?;

        // SAFETY: `total_bytes` is nonzero because `slot_size` and
        // `slot_count` are both checked nonzero above, and `stride >=
        // HEADER_SIZE > 0`.
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            log::warn!(
                "anamnesis: pool allocation of {total_bytes} bytes at align {} refused",
                config.alignment
            );
            return Err(ConfigError::AllocationFailed {
                requested_bytes: total_bytes,
            });
        }

        let pool = SlotPool {
            base,
            layout,
            stride,
            slot_size: config.slot_size,
            slot_count: config.slot_count,
            alignment: config.alignment,
            zero_on_alloc: config.zero_on_alloc,
            zero_on_release: config.zero_on_release,
            free_head: AtomicU64::new(Handle::NULL.to_raw()),
            slots_free: AtomicUsize::new(config.slot_count),
            alloc_count: AtomicU64::new(0),
            release_count: AtomicU64::new(0),
            anamnesis_count: AtomicU64::new(0),
            generation_max: AtomicU16::new(0),
            #[cfg(feature = "trace")]
            recorder: parking_lot::RwLock::new(None),
        };

        // Construction is single-threaded (the pool is not yet shared), so
        // plain relaxed stores are enough to thread the initial free list.
        for idx in (0..config.slot_count).rev() {
            pool.generation_ref(idx).store(0, Ordering::Relaxed);
            let current_head = pool.free_head.load(Ordering::Relaxed);
            pool.next_free_ref(idx).store(current_head, Ordering::Relaxed);
            let free_handle = Handle::encode(0, idx as u64, SlotState::Free);
            pool.free_head.store(free_handle.to_raw(), Ordering::Relaxed);
        }

        log::debug!(
            "anamnesis: pool created with {} slots of {} bytes (stride {stride})",
            config.slot_count,
            config.slot_size
        );

        Ok(pool)
    }

    #[inline]
    fn slot_base(&self, idx: usize) -> *mut u8 {
        debug_assert!(idx < self.slot_count);
        // SAFETY: idx < slot_count, and the allocation is stride * slot_count bytes.
        unsafe { self.base.add(idx * self.stride) }
    }

    #[inline]
    fn next_free_ref(&self, idx: usize) -> &AtomicU64 {
        // SAFETY: the slot base is 8-byte aligned (stride is a multiple of
        // 8 and the allocation itself is aligned to at least 8), so the
        // first 8 bytes can be soundly viewed as an AtomicU64.
        unsafe { &*(self.slot_base(idx) as *const AtomicU64) }
    }

    #[inline]
    fn generation_ref(&self, idx: usize) -> &AtomicU16 {
        // SAFETY: offset 8 within an 8-byte-aligned slot base is 2-byte aligned.
        unsafe { &*(self.slot_base(idx).add(8) as *const AtomicU16) }
    }

    #[inline]
    fn payload_ptr(&self, idx: usize) -> *mut u8 {
        // SAFETY: offset HEADER_SIZE stays within the slot's stride by construction.
        unsafe { self.slot_base(idx).add(HEADER_SIZE) }
    }

    fn raise_generation_max(&self, gen: u16) {
        let mut cur = self.generation_max.load(Ordering::Relaxed);
        while gen > cur {
            match self.generation_max.compare_exchange_weak(
                cur,
                gen,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Pop a slot off the free-list Treiber stack. Returns [`Handle::NULL`]
    /// without touching any counter if the pool is exhausted.
    pub fn alloc(&self) -> Handle {
        loop {
            let head = Handle::from_raw(self.free_head.load(Ordering::Acquire));
            if head.is_null() {
                log::trace!("anamnesis: alloc found the pool exhausted");
                return Handle::NULL;
            }
            let idx = head.decode_loc() as usize;
            let next = self.next_free_ref(idx).load(Ordering::Acquire);
            if self
                .free_head
                .compare_exchange(head.to_raw(), next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let gen = head.decode_gen();
                self.slots_free.fetch_sub(1, Ordering::Relaxed);
                self.alloc_count.fetch_add(1, Ordering::Relaxed);
                self.raise_generation_max(gen);

                if self.zero_on_alloc {
                    // SAFETY: idx is in range and payload_ptr..+slot_size lies
                    // within this slot's reserved storage.
                    unsafe { ptr::write_bytes(self.payload_ptr(idx), 0, self.slot_size) };
                }

                log::trace!("anamnesis: alloc slot={idx} gen={gen}");
                #[cfg(feature = "trace")]
                self.emit(TraceEvent::Alloc {
                    slot_index: idx as u32,
                    generation: gen,
                });

                return Handle::encode(gen, idx as u64, SlotState::Live);
            }
            // CAS lost the race: someone else popped or pushed first. Retry.
        }
    }

    /// Release `h` back to the pool, bumping the slot's generation so any
    /// other copy of `h` still in circulation becomes unusable.
    ///
    /// Returns `false` and counts an anamnesis event without mutating the
    /// slot if `h` is null, not `LIVE`, out of range, or stale.
    pub fn release(&self, h: Handle) -> bool {
        let Some(idx) = self.bounds_check_live(h) else {
            self.anamnesis_count.fetch_add(1, Ordering::Relaxed);
            log::debug!("anamnesis: release rejected malformed handle {h:?}");
            return false;
        };

        let gen_ref = self.generation_ref(idx);
        let new_gen = loop {
            let cur = gen_ref.load(Ordering::Acquire);
            if cur != h.decode_gen() {
                self.anamnesis_count.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "anamnesis: release rejected stale generation for slot {idx} (handle had {}, slot has {cur})",
                    h.decode_gen()
                );
                return false;
            }
            let candidate = cur.wrapping_add(1);
            if gen_ref
                .compare_exchange(cur, candidate, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break candidate;
            }
        };

        if self.zero_on_release {
            // SAFETY: see alloc()'s zero_on_alloc comment; same slot, same bound.
            unsafe { ptr::write_bytes(self.payload_ptr(idx), 0, self.slot_size) };
        }

        let free_handle = Handle::encode(new_gen, idx as u64, SlotState::Free);
        loop {
            let old_head = self.free_head.load(Ordering::Acquire);
            // Publish the link before the CAS that makes this slot reachable.
            self.next_free_ref(idx).store(old_head, Ordering::Release);
            if self
                .free_head
                .compare_exchange(old_head, free_handle.to_raw(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        self.slots_free.fetch_add(1, Ordering::Relaxed);
        self.release_count.fetch_add(1, Ordering::Relaxed);
        log::trace!("anamnesis: release slot={idx} new_gen={new_gen}");
        #[cfg(feature = "trace")]
        self.emit(TraceEvent::Release {
            slot_index: idx as u32,
            generation: new_gen,
        });
        true
    }

    /// Bounds/state check shared by `release` and `get`'s acceptance logic,
    /// independent of the generation comparison (which each caller performs
    /// itself so it can CAS or just compare as appropriate).
    fn bounds_check_live(&self, h: Handle) -> Option<usize> {
        if h.is_null() {
            return None;
        }
        if !matches!(SlotState::from_raw(h.decode_state_raw()), Some(SlotState::Live)) {
            return None;
        }
        let loc = h.decode_loc();
        if loc as usize >= self.slot_count {
            return None;
        }
        Some(loc as usize)
    }

    fn check_live(&self, h: Handle) -> Option<usize> {
        let idx = self.bounds_check_live(h)?;
        if self.generation_ref(idx).load(Ordering::Acquire) != h.decode_gen() {
            return None;
        }
        Some(idx)
    }

    /// Dereference `h`, returning its payload bytes if `h` is currently live.
    pub fn get(&self, h: Handle) -> Option<&[u8]> {
        match self.check_live(h) {
            Some(idx) => {
                log::trace!("anamnesis: get valid slot={idx}");
                #[cfg(feature = "trace")]
                self.emit(TraceEvent::GetValid {
                    slot_index: idx as u32,
                    generation: h.decode_gen(),
                });
                // SAFETY: idx came from a handle that just passed the
                // generation check above, so this slot is LIVE and the
                // payload region is initialized (allocation zeroed it, and
                // every write to it goes through this same bound).
                Some(unsafe { std::slice::from_raw_parts(self.payload_ptr(idx), self.slot_size) })
            }
            None => {
                self.anamnesis_count.fetch_add(1, Ordering::Relaxed);
                log::debug!("anamnesis: get rejected handle {h:?}");
                #[cfg(feature = "trace")]
                self.emit(TraceEvent::GetStale {
                    slot_index: h.decode_loc() as u32,
                    generation: h.decode_gen(),
                });
                None
            }
        }
    }

    /// Like [`SlotPool::get`] but mutable.
    ///
    /// The pool does not enforce single-writer discipline within a slot's
    /// payload (see the shared-resource policy): callers sharing a live
    /// handle across threads must coordinate themselves.
    pub fn get_mut(&self, h: Handle) -> Option<&mut [u8]> {
        match self.check_live(h) {
            // SAFETY: same as `get`, but mutable; exclusivity is the
            // caller's responsibility per the shared-resource policy.
            Some(idx) => Some(unsafe { std::slice::from_raw_parts_mut(self.payload_ptr(idx), self.slot_size) }),
            None => {
                self.anamnesis_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Equivalent to `get(h).is_some()`.
    pub fn validate(&self, h: Handle) -> bool {
        self.get(h).is_some()
    }

    /// Atomic snapshot of this pool's counters. Fields are not guaranteed
    /// to be mutually consistent under concurrent access.
    pub fn stats(&self) -> PoolStats {
        let slots_free = self.slots_free.load(Ordering::Relaxed);
        PoolStats {
            slot_count: self.slot_count,
            slots_free,
            slots_live: self.slot_count.saturating_sub(slots_free),
            alloc_count: self.alloc_count.load(Ordering::Relaxed),
            release_count: self.release_count.load(Ordering::Relaxed),
            anamnesis_count: self.anamnesis_count.load(Ordering::Relaxed),
            generation_max: self.generation_max.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Visit every currently-live slot with a freshly minted handle at its
    /// current generation.
    ///
    /// This takes `&mut self`, not `&self`: the reference implementation's
    /// contract for this operation is "debug-only, explicitly not
    /// thread-safe", which Rust can enforce at compile time by requiring
    /// exclusive access instead of merely documenting the hazard.
    pub fn foreach_live(&mut self, mut visitor: impl FnMut(Handle)) {
        let mut free_set = std::collections::HashSet::new();
        let mut cur = Handle::from_raw(self.free_head.load(Ordering::Relaxed));
        while !cur.is_null() {
            let idx = cur.decode_loc() as usize;
            free_set.insert(idx);
            cur = Handle::from_raw(self.next_free_ref(idx).load(Ordering::Relaxed));
        }
        for idx in 0..self.slot_count {
            if !free_set.contains(&idx) {
                let gen = self.generation_ref(idx).load(Ordering::Relaxed);
                visitor(Handle::encode(gen, idx as u64, SlotState::Live));
            }
        }
    }

    #[cfg(feature = "trace")]
    pub fn set_recorder(&self, recorder: Arc<dyn EventRecorder>) {
        *self.recorder.write() = Some(recorder);
    }

    #[cfg(feature = "trace")]
    fn emit(&self, event: TraceEvent) {
        if let Some(recorder) = self.recorder.read().as_ref() {
            recorder.record(event);
        }
    }
}

impl Drop for SlotPool {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated with `layout` in `create` and this
        // is the only place it is ever freed; SlotPool is not `Clone`.
        unsafe { dealloc(self.base, self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_bad_config() {
        assert_eq!(
            SlotPool::create(PoolConfig::new(0, 10)).unwrap_err(),
            ConfigError::ZeroSize { field: "slot_size" }
        );
        assert_eq!(
            SlotPool::create(PoolConfig::new(64, 0)).unwrap_err(),
            ConfigError::ZeroCount { field: "slot_count" }
        );
        let mut cfg = PoolConfig::new(64, 10);
        cfg.alignment = 6;
        assert_eq!(
            SlotPool::create(cfg).unwrap_err(),
            ConfigError::AlignmentNotPowerOfTwo { alignment: 6 }
        );
        cfg.alignment = 4;
        assert_eq!(
            SlotPool::create(cfg).unwrap_err(),
            ConfigError::AlignmentTooSmall { alignment: 4 }
        );
    }

    #[test]
    fn s1_lifecycle() {
        let pool = SlotPool::create(PoolConfig::new(64, 10)).unwrap();
        let h1 = pool.alloc();
        assert_eq!(h1.decode_gen(), 0);

        assert!(pool.release(h1));

        let h2 = pool.alloc();
        assert_eq!(h2.decode_gen(), 1);
        assert_eq!(h2.decode_loc(), h1.decode_loc());

        assert!(pool.get(h1).is_none());
        assert_eq!(pool.stats().anamnesis_count, 1);
        assert!(pool.validate(h2));
    }

    #[test]
    fn s2_exhaustion() {
        let pool = SlotPool::create(PoolConfig::new(32, 10)).unwrap();
        let mut handles = Vec::new();
        for _ in 0..10 {
            let h = pool.alloc();
            assert!(!h.is_null());
            handles.push(h);
        }

        let anamnesis_before = pool.stats().anamnesis_count;
        assert!(pool.alloc().is_null());
        assert_eq!(pool.stats().anamnesis_count, anamnesis_before);

        assert!(pool.release(handles[0]));
        let next = pool.alloc();
        assert_eq!(next.decode_gen(), 1);
    }

    #[test]
    fn s3_single_slot_cycle() {
        let pool = SlotPool::create(PoolConfig::new(16, 1)).unwrap();
        let mut handles = Vec::with_capacity(100);
        for _ in 0..100 {
            let h = pool.alloc();
            assert!(!h.is_null());
            handles.push(h);
            assert!(pool.release(h));
        }
        assert_eq!(pool.stats().generation_max, 99);
        for h in &handles[..99] {
            assert!(!pool.validate(*h));
        }
    }

    #[test]
    fn b1_alloc_after_release_bumps_generation() {
        let pool = SlotPool::create(PoolConfig::new(16, 4)).unwrap();
        for _ in 0..4 {
            assert!(!pool.alloc().is_null());
        }
        assert!(pool.alloc().is_null());

        let released = Handle::encode(0, 0, SlotState::Live);
        assert!(pool.release(released));
        let reallocated = pool.alloc();
        assert_eq!(reallocated.decode_gen(), released.decode_gen() + 1);
    }

    #[test]
    fn r2_alloc_release_is_noop_on_slots_free() {
        let pool = SlotPool::create(PoolConfig::new(16, 4)).unwrap();
        let before = pool.stats().slots_free;
        for _ in 0..5 {
            let h = pool.alloc();
            assert!(pool.release(h));
        }
        assert_eq!(pool.stats().slots_free, before);
        assert_eq!(pool.stats().generation_max, 4);
    }

    #[test]
    fn release_rejects_null_out_of_range_and_wrong_state() {
        let pool = SlotPool::create(PoolConfig::new(16, 2)).unwrap();
        assert!(!pool.release(Handle::NULL));
        assert!(!pool.release(Handle::encode(0, 50, SlotState::Live)));
        assert!(!pool.release(Handle::encode(0, 0, SlotState::Free)));
        assert_eq!(pool.stats().anamnesis_count, 3);
    }

    #[test]
    fn zero_on_alloc_clears_payload() {
        let pool = SlotPool::create(PoolConfig {
            zero_on_alloc: true,
            ..PoolConfig::new(8, 2)
        })
        .unwrap();
        let h = pool.alloc();
        {
            let buf = pool.get_mut(h).unwrap();
            buf.fill(0xAB);
        }
        assert!(pool.release(h));
        let h2 = pool.alloc();
        assert_eq!(pool.get(h2).unwrap(), &[0u8; 8]);
    }

    #[test]
    fn foreach_live_visits_only_allocated_slots() {
        let mut pool = SlotPool::create(PoolConfig::new(16, 4)).unwrap();
        let h0 = pool.alloc();
        let _h1 = pool.alloc();
        assert!(pool.release(h0));

        let mut seen = Vec::new();
        pool.foreach_live(|h| seen.push(h));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].decode_loc(), 1);
    }

    #[test]
    fn stress_release_reuses_most_recently_freed_slot() {
        // The free list is a LIFO stack: the most recently released slot
        // is the next one handed out (see module docs / design notes).
        let pool = SlotPool::create(PoolConfig::new(8, 3)).unwrap();
        let a = pool.alloc();
        let b = pool.alloc();
        let _c = pool.alloc();
        assert!(pool.release(a));
        assert!(pool.release(b));
        let next = pool.alloc();
        assert_eq!(next.decode_loc(), b.decode_loc());
    }
}
