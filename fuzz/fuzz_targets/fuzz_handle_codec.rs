// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fuzz target for the handle codec
//!
//! Feeds arbitrary raw 64-bit words and encode() inputs through the
//! codec. None of these operations should panic on any input.

#![no_main]

use anamnesis_core::Handle;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    let raw = u64::from_le_bytes(data[0..8].try_into().unwrap());
    let h = Handle::from_raw(raw);
    assert_eq!(h.to_raw(), raw);

    let gen = h.decode_gen();
    let loc = h.decode_loc();
    let state_raw = h.decode_state_raw();
    let _ = h.is_null();
    let _ = h.is_live();

    if let Some(state) = anamnesis_core::SlotState::from_raw(state_raw) {
        let reencoded = Handle::encode(gen, loc, state);
        assert_eq!(reencoded.decode_gen(), gen);
        assert_eq!(reencoded.decode_loc(), loc);
    }

    if data.len() >= 16 {
        let gen2 = u16::from_le_bytes(data[8..10].try_into().unwrap());
        let loc2 = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let _ = Handle::encode(gen2, loc2, anamnesis_core::SlotState::Live);
    }
});
