//! Behavior every built-in convention must share.
//!
//! Each case runs against the whole convention table through a [`MemoryContext`] whose stack
//! pointer sits well below the top of its region, so every argument slot is addressable.

use iced_x86::Register;
use libcc::context::mem::MemoryContext;
use libcc::context::Context;
use libcc::convention::intel::{self, AMD64, CDECL, MACOSX64, MS64, STDCALL};
use libcc::convention::slot::{SlotError, SlotLocation, MAX_SLOTS};
use libcc::{Cleanup, ConventionError, ConventionSpec};
use proptest::prelude::*;

const BASE: u64 = 0x0010_0000;
const SIZE: usize = 0x1000;
/// Room left above the stack pointer for arguments
const FRAME: u64 = 0x200;

/// Builds a context matching the convention's word size with a frame of argument space
fn context(cc: &ConventionSpec) -> MemoryContext {
    let mut ctx = match cc.word_bits() {
        32 => MemoryContext::x86(BASE, SIZE).unwrap(),
        _ => MemoryContext::x86_64(BASE, SIZE).unwrap(),
    };
    let sp = ctx.stack_pointer().unwrap() - FRAME;
    ctx.set_stack_pointer(sp).unwrap();
    ctx
}

#[test]
fn test_slot_counts() {
    for cc in intel::ALL {
        for bits in [8, 16, 32, 64] {
            let expected = if bits <= cc.word_bits() { 1 } else { 2 };
            assert_eq!(cc.slots_needed(bits), Ok(expected), "{}", cc.name());
        }
    }
    assert_eq!(AMD64.slots_needed(64), Ok(1));
    assert_eq!(CDECL.slots_needed(64), Ok(2));
}

#[test]
/// Register slots come first, and the shadow space never shifts them
fn test_registers_before_stack() {
    for cc in intel::ALL {
        let nregs = cc.arg_registers().len();
        for slot in 0..MAX_SLOTS {
            let location = cc.slot_location(slot).unwrap();
            if slot < nregs {
                assert_eq!(location, SlotLocation::Register(cc.arg_registers()[slot]));
            } else {
                let index = (1 + cc.shadow() + slot - nregs) as u64;
                assert_eq!(location, SlotLocation::Stack(index * cc.slot_size() as u64));
            }
        }
        assert_eq!(
            cc.slot_location(MAX_SLOTS),
            Err(SlotError::InvalidSlot(MAX_SLOTS))
        );
    }
}

#[test]
fn test_register_counts() {
    assert_eq!(MS64.arg_registers().len(), 4);
    assert_eq!(AMD64.arg_registers().len(), 6);
    assert_eq!(MACOSX64.arg_registers().len(), 6);
    assert_eq!(CDECL.arg_registers().len(), 0);
    assert_eq!(STDCALL.arg_registers().len(), 0);
    assert_ne!(AMD64.arg_registers()[3], MACOSX64.arg_registers()[3]);
}

#[test]
/// stdcall drops three 4-byte arguments along with the return address
fn test_stdcall_unwind() {
    let mut ctx = context(&STDCALL);
    STDCALL.set_return_address(&mut ctx, 0x0040_2000).unwrap();
    let pushed = ctx.stack_pointer().unwrap();

    assert_eq!(STDCALL.unwind(&mut ctx, 3), Ok(0x0040_2000));
    assert_eq!(ctx.stack_pointer().unwrap() - pushed, 4 + 3 * 4);
}

#[test]
/// Full call synthesis: reserve, place arguments, push the return address, return, unwind
fn test_synthesized_call() {
    let mut ctx = MemoryContext::x86_64(BASE, SIZE).unwrap();
    let entry = ctx.stack_pointer().unwrap();

    MS64.reserve(&mut ctx, 6).unwrap();
    MS64.set_return_address(&mut ctx, 0x1400_0100).unwrap();
    for slot in 0..6 {
        MS64.set_raw(&mut ctx, slot, 0x100 + slot as u64, 64).unwrap();
    }

    assert_eq!(ctx.read_reg(Register::R9), Ok(0x103));
    let sp = ctx.stack_pointer().unwrap();
    assert_eq!(ctx.read_mem(sp + 8 * 5, 8), Ok(0x104));
    assert_eq!(ctx.read_mem(sp + 8 * 6, 8), Ok(0x105));

    MS64.set_return_value(&mut ctx, 7).unwrap();
    assert_eq!(MS64.unwind(&mut ctx, 6), Ok(0x1400_0100));
    assert_eq!(MS64.get_return_value(&ctx), Ok(7));

    // the caller still owns the shadow space and stack arguments
    assert_eq!(ctx.stack_pointer().unwrap(), entry - 8 * 6);
}

#[test]
fn test_cleanup_policy() {
    for cc in intel::ALL {
        let expected = if cc.name() == "stdcall" {
            Cleanup::Callee
        } else {
            Cleanup::Caller
        };
        assert_eq!(cc.cleanup(), expected, "{}", cc.name());
    }
}

proptest! {
    #[test]
    fn split_read_joins_halves(words in prop::collection::vec(any::<u32>(), MAX_SLOTS), slot in 0usize..MAX_SLOTS - 1) {
        for cc in [&CDECL, &STDCALL] {
            let mut ctx = context(cc);
            let sp = ctx.stack_pointer().unwrap();
            for (i, word) in words.iter().enumerate() {
                ctx.write_mem(sp + 4 * (i as u64 + 1), 4, u64::from(*word)).unwrap();
            }

            let lo = cc.get_raw(&ctx, slot, 32).unwrap();
            let hi = cc.get_raw(&ctx, slot + 1, 32).unwrap();
            prop_assert_eq!(cc.get_raw(&ctx, slot, 64), Ok((hi << 32) | lo));
        }
    }

    #[test]
    fn raw_write_is_read_back(value in any::<u64>(), slot in 0usize..MAX_SLOTS - 1, bits in prop::sample::select(vec![8u32, 16, 32, 64])) {
        for cc in intel::ALL {
            let mut ctx = context(cc);
            cc.set_raw(&mut ctx, slot, value, bits).unwrap();
            let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
            prop_assert_eq!(cc.get_raw(&ctx, slot, bits), Ok(value & mask));
        }
    }

    #[test]
    fn return_address_round_trips(addr in any::<u64>(), nslots in 0usize..8) {
        for cc in intel::ALL {
            let mut ctx = context(cc);
            let before = ctx.stack_pointer().unwrap();
            let addr = if cc.word_bits() == 32 { addr & 0xffff_ffff } else { addr };

            cc.set_return_address(&mut ctx, addr).unwrap();
            let pushed = ctx.stack_pointer().unwrap();
            prop_assert_eq!(before - pushed, cc.slot_size() as u64);

            prop_assert_eq!(cc.unwind(&mut ctx, nslots), Ok(addr));
            let released = match cc.cleanup() {
                Cleanup::Caller => cc.slot_size(),
                Cleanup::Callee => cc.slot_size() * (1 + nslots),
            };
            prop_assert_eq!(ctx.stack_pointer().unwrap() - pushed, released as u64);
        }
    }

    #[test]
    fn out_of_range_slots_are_rejected(slot in MAX_SLOTS..=usize::MAX, bits in prop::sample::select(vec![8u32, 16, 32, 64])) {
        for cc in intel::ALL {
            let mut ctx = context(cc);
            prop_assert!(matches!(cc.get_raw(&ctx, slot, bits), Err(ConventionError::InvalidSlot(_))));
            prop_assert!(matches!(cc.set_raw(&mut ctx, slot, 1, bits), Err(ConventionError::InvalidSlot(_))));
        }
    }

    #[test]
    fn oversized_widths_are_rejected(bits in 65u32..1024) {
        for cc in intel::ALL {
            let ctx = context(cc);
            prop_assert_eq!(cc.slots_needed(bits), Err(SlotError::UnsupportedWidth(bits)));
            prop_assert_eq!(cc.get_raw(&ctx, 0, bits), Err(ConventionError::UnsupportedWidth(bits)));
        }
    }
}
