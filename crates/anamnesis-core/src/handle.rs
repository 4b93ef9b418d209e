// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handle codec (component A).
//!
//! A [`Handle`] is a 64-bit opaque token packing `(generation, location,
//! state)`. Encoding is bit-exact per the external interface: the top 16
//! bits are the generation, the next 45 bits are the location, and the
//! bottom 3 bits are the lifecycle state tag. These functions are total,
//! side-effect-free, and never allocate; the codec does not validate that
//! `location` names a real slot in any particular pool, it only packs bits.

use std::fmt;

const STATE_BITS: u32 = 3;
const LOCATION_BITS: u32 = 45;

const STATE_SHIFT: u32 = 0;
const LOCATION_SHIFT: u32 = STATE_SHIFT + STATE_BITS;
const GENERATION_SHIFT: u32 = LOCATION_SHIFT + LOCATION_BITS;

const STATE_MASK: u64 = (1u64 << STATE_BITS) - 1;
const LOCATION_MASK: u64 = (1u64 << LOCATION_BITS) - 1;

/// Maximum location value the 45-bit field can hold.
pub const MAX_LOCATION: u64 = LOCATION_MASK;

/// Lifecycle tag carried in the low 3 bits of a handle.
///
/// Only [`SlotState::Free`] and [`SlotState::Live`] are load-bearing in the
/// core protocols. `Quarantine` and `Locked` are reserved: the codec will
/// round-trip them, but the pool and queue never mint them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Free = 0,
    Live = 1,
    Quarantine = 2,
    Locked = 4,
}

impl SlotState {
    /// Decode a raw 3-bit tag. Returns `None` for the two bit patterns
    /// (3, 5..=7 minus 4) that name no state in `{0,1,2,4}`.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SlotState::Free),
            1 => Some(SlotState::Live),
            2 => Some(SlotState::Quarantine),
            4 => Some(SlotState::Locked),
            _ => None,
        }
    }
}

/// An opaque 64-bit identifier for a slot incarnation.
///
/// The all-zero handle ([`Handle::NULL`]) is the distinguished null value
/// and is never a legitimate identifier: `encode` never produces it for a
/// live slot because `SlotState::Free as u8 == 0` only coincides with an
/// all-zero word when generation and location are also both zero, which no
/// real allocation produces (slot 0 at generation 0 is minted as `Live`,
/// never `Free`, by the pool's own bookkeeping).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u64);

impl Handle {
    /// The distinguished null handle: the all-zero 64-bit word.
    pub const NULL: Handle = Handle(0);

    /// Pack `(generation, location, state)` into a handle. `location` is
    /// masked to its low 45 bits; callers that pass an out-of-range
    /// location silently lose the high bits, matching the codec's
    /// contract of performing no validation.
    #[inline]
    #[must_use]
    pub const fn encode(generation: u16, location: u64, state: SlotState) -> Self {
        let g = (generation as u64) << GENERATION_SHIFT;
        let l = (location & LOCATION_MASK) << LOCATION_SHIFT;
        let s = (state as u64) & STATE_MASK;
        Handle(g | l | s)
    }

    /// Reconstruct a handle from its raw 64-bit representation, e.g. after
    /// loading it from an [`std::sync::atomic::AtomicU64`].
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// The raw 64-bit representation, e.g. for storing into an
    /// [`std::sync::atomic::AtomicU64`].
    #[inline]
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn decode_gen(self) -> u16 {
        (self.0 >> GENERATION_SHIFT) as u16
    }

    #[inline]
    #[must_use]
    pub const fn decode_loc(self) -> u64 {
        (self.0 >> LOCATION_SHIFT) & LOCATION_MASK
    }

    /// The raw 3-bit state tag. Use [`SlotState::from_raw`] to interpret it;
    /// kept raw here because the codec itself performs no validation.
    #[inline]
    #[must_use]
    pub const fn decode_state_raw(self) -> u8 {
        ((self.0 >> STATE_SHIFT) & STATE_MASK) as u8
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(SlotState::from_raw(self.decode_state_raw()), Some(SlotState::Live))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("raw", &format_args!("{:#018x}", self.0))
            .field("generation", &self.decode_gen())
            .field("location", &self.decode_loc())
            .field("state", &self.decode_state_raw())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_is_all_zero() {
        assert_eq!(Handle::NULL.to_raw(), 0);
        assert!(Handle::NULL.is_null());
    }

    #[test]
    fn round_trip_preserves_fields() {
        // R1: encode(decode_gen(h), decode_loc(h), decode_state(h)) == h
        for &(gen, loc, state) in &[
            (0u16, 0u64, SlotState::Free),
            (1, 0, SlotState::Live),
            (65535, MAX_LOCATION, SlotState::Live),
            (42, 1337, SlotState::Quarantine),
            (7, 9999, SlotState::Locked),
        ] {
            let h = Handle::encode(gen, loc, state);
            let raw_state = SlotState::from_raw(h.decode_state_raw()).unwrap();
            let roundtripped = Handle::encode(h.decode_gen(), h.decode_loc(), raw_state);
            assert_eq!(roundtripped, h);
            assert_eq!(h.decode_gen(), gen);
            assert_eq!(h.decode_loc(), loc);
        }
    }

    #[test]
    fn location_is_masked_to_45_bits() {
        let h = Handle::encode(0, u64::MAX, SlotState::Live);
        assert_eq!(h.decode_loc(), MAX_LOCATION);
    }

    #[test]
    fn bit_layout_matches_external_interface() {
        // bit 63..48 generation, 47..3 location, 2..0 state
        let h = Handle::encode(0x1234, 0x1_ABCD_EF01, SlotState::Live);
        assert_eq!(h.to_raw() >> 48, 0x1234);
        assert_eq!((h.to_raw() >> 3) & MAX_LOCATION, 0x1_ABCD_EF01);
        assert_eq!(h.to_raw() & 0b111, 1);
    }

    #[test]
    fn reserved_state_bits_do_not_parse() {
        assert!(SlotState::from_raw(3).is_none());
        assert!(SlotState::from_raw(5).is_none());
        assert!(SlotState::from_raw(6).is_none());
        assert!(SlotState::from_raw(7).is_none());
    }
}
