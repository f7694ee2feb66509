//! Slot resolution and width arithmetic shared by every convention
//!
//! Arguments are numbered by slot. The first slots map onto the convention's argument
//! registers in order, the rest onto consecutive stack words past the return address and any
//! shadow space.

use iced_x86::Register;
use thiserror::Error;

/// Number of argument slots a convention can address, registers and stack combined
pub const MAX_SLOTS: usize = 16;

/// Where an argument slot lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLocation {
    /// Slot is passed in a register
    Register(Register),
    /// Slot is passed on the stack, at this byte offset from the stack pointer at callee entry
    Stack(u64),
}

/// Errors from slot and width arithmetic, which never touches an execution context
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SlotError {
    /// Slot index resolves to neither a register nor a stack slot
    #[error("argument slot {0} is out of range")]
    InvalidSlot(usize),
    /// Requested width is not 8, 16, 32 or 64 bits
    #[error("unsupported argument width of {0} bits")]
    UnsupportedWidth(u32),
}

/// Rejects widths no convention can carry
pub fn check_width(bits: u32) -> Result<(), SlotError> {
    if is_supported_width(bits) {
        Ok(())
    } else {
        Err(SlotError::UnsupportedWidth(bits))
    }
}

/// Index of the slot holding the high half of a two-slot argument starting at `slot`
pub fn next_slot(slot: usize) -> Result<usize, SlotError> {
    match slot.checked_add(1) {
        Some(next) if next < MAX_SLOTS => Ok(next),
        Some(next) => Err(SlotError::InvalidSlot(next)),
        None => Err(SlotError::InvalidSlot(slot)),
    }
}

/// Whether an argument of `bits` width can be accessed at all
pub fn is_supported_width(bits: u32) -> bool {
    matches!(bits, 8 | 16 | 32 | 64)
}

/// Number of slots an argument of `bits` width takes on a `word_bits` convention
pub fn slots_needed(word_bits: u32, bits: u32) -> usize {
    (bits.max(word_bits) / word_bits) as usize
}

/// Mask covering the low `bits` bits
pub fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Resolves `slot` to a register or a stack offset.
///
/// Returns `None` when the slot is past [`MAX_SLOTS`].
pub fn resolve(
    args: &[Register],
    shadow: usize,
    slot_size: usize,
    slot: usize,
) -> Option<SlotLocation> {
    if slot >= MAX_SLOTS {
        return None;
    }
    match args.get(slot) {
        Some(&reg) => Some(SlotLocation::Register(reg)),
        None => {
            // skip the return address and the shadow space
            let index = 1 + shadow + (slot - args.len());
            Some(SlotLocation::Stack((index * slot_size) as u64))
        }
    }
}

/// Number of the first `nslots` slots that live on the stack
pub fn stack_slots(args: &[Register], nslots: usize) -> usize {
    nslots.saturating_sub(args.len())
}

/// Splits a 64-bit value into its (low, high) 32-bit halves
pub fn split(value: u64) -> (u64, u64) {
    (value & mask(32), value >> 32)
}

/// Joins two 32-bit halves back into a 64-bit value
pub fn join(lo: u64, hi: u64) -> u64 {
    ((hi & mask(32)) << 32) | (lo & mask(32))
}
