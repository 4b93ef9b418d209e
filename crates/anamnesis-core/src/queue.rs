// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free MPMC handle queue (component D).
//!
//! A Michael & Scott queue, adapted to link nodes through [`Handle`]s
//! instead of raw pointers. Each queue owns a private [`SlotPool`] of
//! `capacity + 1` nodes (the dummy-node trick the algorithm needs so
//! `head` and `tail` are never simultaneously empty) and stores, in the
//! first 8 bytes of every node's payload, an atomic "next" handle separate
//! from the pool's own free-list link — a node is never on the free list
//! and the live chain at the same time, so the two links never collide.
//!
//! ABA safety at the node-chain level comes for free from the pool: a node
//! handle carries a generation that is bumped every time the node passes
//! through `release`, so a `next` pointer read before a concurrent
//! pop-then-reuse of that same slot carries a generation a subsequent CAS
//! will reject.

use crate::error::ConfigError;
use crate::handle::{Handle, SlotState};
use crate::pool::{PoolConfig, SlotPool};
use crate::stats::QueueStats;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const NEXT_LINK_SIZE: usize = 8;

/// Construction-time configuration for a [`HandleQueue`].
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueConfig {
    pub item_size: usize,
    pub capacity: usize,
}

impl QueueConfig {
    #[must_use]
    pub fn new(item_size: usize, capacity: usize) -> Self {
        QueueConfig { item_size, capacity }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            item_size: 0,
            capacity: 0,
        }
    }
}

/// A bounded, lock-free, multi-producer multi-consumer FIFO of fixed-size
/// items, built on the same forgery-resistant handles as [`SlotPool`].
pub struct HandleQueue {
    nodes: SlotPool,
    item_size: usize,
    capacity: usize,
    head: AtomicU64,
    tail: AtomicU64,
    len: AtomicUsize,
    push_count: AtomicU64,
    pop_count: AtomicU64,
    push_fails: AtomicU64,
    pop_fails: AtomicU64,
    aba_prevented: AtomicU64,
}

impl HandleQueue {
    /// Validate `config` and allocate the private node pool.
    ///
    /// A dummy node is allocated up front and installed as both `head` and
    /// `tail`; it is never exposed to callers and never carries a payload.
    pub fn create(config: QueueConfig) -> Result<Self, ConfigError> {
        if config.item_size == 0 {
            return Err(ConfigError::ZeroSize { field: "item_size" });
        }
        if config.capacity == 0 {
            return Err(ConfigError::ZeroCount { field: "capacity" });
        }

        let node_pool = SlotPool::create(PoolConfig::new(
            NEXT_LINK_SIZE + config.item_size,
            config.capacity + 1,
        ))?;

        let dummy = node_pool.alloc();
        debug_assert!(!dummy.is_null(), "freshly created pool must have a free slot");
        Self::next_link(&node_pool, dummy)
            .expect("freshly allocated dummy node is live and not yet visible to any other thread")
            .store(Handle::NULL.to_raw(), Ordering::Relaxed);

        Ok(HandleQueue {
            nodes: node_pool,
            item_size: config.item_size,
            capacity: config.capacity,
            head: AtomicU64::new(dummy.to_raw()),
            tail: AtomicU64::new(dummy.to_raw()),
            len: AtomicUsize::new(0),
            push_count: AtomicU64::new(0),
            pop_count: AtomicU64::new(0),
            push_fails: AtomicU64::new(0),
            pop_fails: AtomicU64::new(0),
            aba_prevented: AtomicU64::new(0),
        })
    }

    /// View the "next" link embedded in `node`'s payload as an atomic u64.
    ///
    /// Free function (rather than a method) so it can be called before
    /// `self` has finished constructing, in `create`'s dummy-node setup.
    ///
    /// Returns `None` if `node`'s slot has since been reused (its generation
    /// no longer matches) — a routine outcome under contention, not a bug:
    /// callers that dereferenced `node` from shared atomic state must treat
    /// `None` as "stale handle, retry", not unwrap it.
    fn next_link(nodes: &SlotPool, node: Handle) -> Option<&AtomicU64> {
        // SAFETY: every node slot is sized item_size + NEXT_LINK_SIZE and
        // its first 8 bytes are reserved by this queue for the next link;
        // the pool guarantees 8-byte alignment of payload starts.
        nodes
            .get(node)
            .map(|payload| unsafe { &*(payload.as_ptr() as *const AtomicU64) })
    }

    fn item_ptr(nodes: &SlotPool, node: Handle) -> Option<*const u8> {
        nodes.get(node).map(|payload| unsafe { payload.as_ptr().add(NEXT_LINK_SIZE) })
    }

    fn item_ptr_mut(nodes: &SlotPool, node: Handle) -> Option<*mut u8> {
        nodes
            .get_mut(node)
            .map(|payload| unsafe { payload.as_mut_ptr().add(NEXT_LINK_SIZE) })
    }

    /// Enqueue `item` (exactly `item_size` bytes). Returns `false` without
    /// enqueueing if the queue is at `capacity` or the node pool itself is
    /// momentarily exhausted by in-flight dequeues.
    pub fn push(&self, item: &[u8]) -> bool {
        debug_assert_eq!(item.len(), self.item_size);

        if self.len.load(Ordering::Acquire) >= self.capacity {
            self.push_fails.fetch_add(1, Ordering::Relaxed);
            log::trace!("anamnesis: push rejected, queue at capacity");
            return false;
        }

        let new_node = self.nodes.alloc();
        if new_node.is_null() {
            self.push_fails.fetch_add(1, Ordering::Relaxed);
            log::trace!("anamnesis: push rejected, node pool exhausted");
            return false;
        }

        Self::next_link(&self.nodes, new_node)
            .expect("freshly allocated node is live and not yet visible to any other thread")
            .store(Handle::NULL.to_raw(), Ordering::Relaxed);
        if let Some(dst) = Self::item_ptr_mut(&self.nodes, new_node) {
            // SAFETY: dst..+item_size lies within new_node's reserved payload.
            unsafe { std::ptr::copy_nonoverlapping(item.as_ptr(), dst, self.item_size) };
        }

        loop {
            let tail = Handle::from_raw(self.tail.load(Ordering::Acquire));
            let Some(tail_link) = Self::next_link(&self.nodes, tail) else {
                // tail's slot was reused underneath us; per the ABA-prevention
                // protocol, count it and restart from a fresh snapshot.
                self.aba_prevented.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            let next = Handle::from_raw(tail_link.load(Ordering::Acquire));

            if tail.to_raw() != self.tail.load(Ordering::Acquire) {
                // tail moved under us; restart.
                continue;
            }

            if next.is_null() {
                if tail_link
                    .compare_exchange(
                        Handle::NULL.to_raw(),
                        new_node.to_raw(),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // Linked in; swing tail forward (best-effort, as MS queue prescribes).
                    let _ = self.tail.compare_exchange(
                        tail.to_raw(),
                        new_node.to_raw(),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                    break;
                }
                // Someone else linked a node first; the stale `next` read we
                // just saw would be an ABA hazard for a naive pointer queue,
                // but our CAS above compared full handles (generation
                // included), so a concurrent reuse of `tail`'s slot would
                // have been caught here rather than corrupting the chain.
            } else {
                // tail lagged behind; help swing it forward before retrying.
                let _ = self.tail.compare_exchange(
                    tail.to_raw(),
                    next.to_raw(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }
        }

        self.len.fetch_add(1, Ordering::AcqRel);
        self.push_count.fetch_add(1, Ordering::Relaxed);
        log::trace!("anamnesis: push succeeded, node={new_node:?}");
        true
    }

    /// Dequeue the oldest item into `out` (must be exactly `item_size`
    /// bytes). Returns `false` without touching `out` if the queue is
    /// empty.
    ///
    /// The popped node's payload is copied into a local stack buffer first
    /// and only committed into `out` once the CAS that retires the node
    /// succeeds; on a lost race the local copy is simply discarded and the
    /// loop retries against the new head, so a failed attempt never
    /// observes a torn or already-reused payload through `out`.
    pub fn pop(&self, out: &mut [u8]) -> bool {
        debug_assert_eq!(out.len(), self.item_size);

        loop {
            let head = Handle::from_raw(self.head.load(Ordering::Acquire));
            let tail = Handle::from_raw(self.tail.load(Ordering::Acquire));
            let Some(head_link) = Self::next_link(&self.nodes, head) else {
                // head's slot was reused underneath us; count and restart.
                self.aba_prevented.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            let next = Handle::from_raw(head_link.load(Ordering::Acquire));

            if head.to_raw() != self.head.load(Ordering::Acquire) {
                continue;
            }

            if head == tail {
                if next.is_null() {
                    self.pop_fails.fetch_add(1, Ordering::Relaxed);
                    log::trace!("anamnesis: pop found the queue empty");
                    return false;
                }
                // tail lagged; help it along, then retry.
                let _ = self.tail.compare_exchange(
                    tail.to_raw(),
                    next.to_raw(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                continue;
            }

            if next.is_null() {
                // head == tail was false but next is null: a push is
                // mid-flight between linking and swinging tail. Retry.
                continue;
            }

            // Speculatively copy the payload before attempting to retire
            // `head`. If the CAS below loses the race, this copy is simply
            // dropped: `next`'s slot has not been released yet (it only is
            // once this CAS wins), so the bytes we read are a genuine
            // snapshot of the item, never a half-written one.
            let Some(src) = Self::item_ptr(&self.nodes, next) else {
                // `next` was retired and its slot reused between our load of
                // head's link and this dereference; count and restart.
                self.aba_prevented.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            let mut staging = vec![0u8; self.item_size];
            // SAFETY: `src` came from a successful pool dereference above and
            // its payload holds item_size bytes starting at NEXT_LINK_SIZE.
            unsafe { std::ptr::copy_nonoverlapping(src, staging.as_mut_ptr(), self.item_size) };

            if self
                .head
                .compare_exchange(head.to_raw(), next.to_raw(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                out[..self.item_size].copy_from_slice(&staging);
                self.nodes.release(head);
                self.len.fetch_sub(1, Ordering::AcqRel);
                self.pop_count.fetch_add(1, Ordering::Relaxed);
                log::trace!("anamnesis: pop succeeded, retired node={head:?}");
                return true;
            }
            // Lost the race: `staging` is discarded, retry from a fresh head.
            self.aba_prevented.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy the oldest item into `out` without dequeueing it. Returns
    /// `false` if the queue is empty or if the item was concurrently popped
    /// between the dereference and the copy (never a corrupted read: a
    /// reused node is caught the same way `pop` catches one).
    pub fn peek(&self, out: &mut [u8]) -> bool {
        debug_assert_eq!(out.len(), self.item_size);

        let head = Handle::from_raw(self.head.load(Ordering::Acquire));
        let Some(head_link) = Self::next_link(&self.nodes, head) else {
            // head's slot was reused underneath us; treat like an empty read.
            return false;
        };
        let next = Handle::from_raw(head_link.load(Ordering::Acquire));
        if next.is_null() {
            return false;
        }
        match self.nodes.get(next) {
            Some(payload) => {
                out[..self.item_size].copy_from_slice(&payload[NEXT_LINK_SIZE..NEXT_LINK_SIZE + self.item_size]);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            push_count: self.push_count.load(Ordering::Relaxed),
            pop_count: self.pop_count.load(Ordering::Relaxed),
            push_fails: self.push_fails.load(Ordering::Relaxed),
            pop_fails: self.pop_fails.load(Ordering::Relaxed),
            aba_prevented: self.aba_prevented.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(item_size: usize, capacity: usize) -> HandleQueue {
        HandleQueue::create(QueueConfig::new(item_size, capacity)).unwrap()
    }

    #[test]
    fn create_rejects_bad_config() {
        assert_eq!(
            HandleQueue::create(QueueConfig::new(0, 4)).unwrap_err(),
            ConfigError::ZeroSize { field: "item_size" }
        );
        assert_eq!(
            HandleQueue::create(QueueConfig::new(4, 0)).unwrap_err(),
            ConfigError::ZeroCount { field: "capacity" }
        );
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = q(4, 8);
        for i in 0..5u32 {
            assert!(queue.push(&i.to_le_bytes()));
        }
        let mut buf = [0u8; 4];
        for expected in 0..5u32 {
            assert!(queue.pop(&mut buf));
            assert_eq!(u32::from_le_bytes(buf), expected);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn peek_does_not_dequeue() {
        let queue = q(4, 8);
        assert!(queue.push(&7u32.to_le_bytes()));

        let mut buf = [0u8; 4];
        assert!(queue.peek(&mut buf));
        assert_eq!(u32::from_le_bytes(buf), 7);
        assert_eq!(queue.len(), 1);

        assert!(queue.pop(&mut buf));
        assert_eq!(u32::from_le_bytes(buf), 7);
        assert!(!queue.peek(&mut buf));
    }

    #[test]
    fn pop_on_empty_queue_fails_without_touching_out() {
        let queue = q(4, 2);
        let mut buf = [0xFFu8; 4];
        assert!(!queue.pop(&mut buf));
        assert_eq!(buf, [0xFF; 4]);
        assert_eq!(queue.stats().pop_fails, 1);
    }

    #[test]
    fn push_past_capacity_fails() {
        let queue = q(1, 2);
        assert!(queue.push(&[1]));
        assert!(queue.push(&[2]));
        assert!(!queue.push(&[3]));
        assert_eq!(queue.stats().push_fails, 1);
    }

    #[test]
    fn capacity_is_reusable_after_pop() {
        let queue = q(1, 2);
        assert!(queue.push(&[1]));
        assert!(queue.push(&[2]));
        assert!(!queue.push(&[3]));

        let mut buf = [0u8];
        assert!(queue.pop(&mut buf));
        assert_eq!(buf, [1]);

        assert!(queue.push(&[3]));
        assert!(queue.pop(&mut buf));
        assert_eq!(buf, [2]);
        assert!(queue.pop(&mut buf));
        assert_eq!(buf, [3]);
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_total_count() {
        use std::sync::Arc;
        use std::thread;

        let queue = Arc::new(q(4, 64));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let val = (p << 16) | i;
                        while !queue.push(&val.to_le_bytes()) {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let consumed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let consumed = Arc::clone(&consumed);
                thread::spawn(move || {
                    let mut buf = [0u8; 4];
                    loop {
                        if queue.pop(&mut buf) {
                            consumed.fetch_add(1, Ordering::Relaxed);
                        } else if consumed.load(Ordering::Relaxed) >= 800 {
                            break;
                        } else {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }

        assert_eq!(consumed.load(Ordering::Relaxed), 800);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().push_count, 800);
        assert_eq!(queue.stats().pop_count, 800);
    }
}
