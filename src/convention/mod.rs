//! # Convention
//!
//! This module describes calling conventions as plain data and implements every convention
//! operation over that data
//!
//! A [`ConventionSpec`] is fixed once an emulator has picked it for its (architecture, OS)
//! pair. It holds no state of its own; all reads and writes go through the [`Context`] passed
//! to each operation.
//!
//! ## Call lifecycle
//!
//! - argument phase: any number of [`ConventionSpec::get_raw`] / [`ConventionSpec::set_raw`]
//! - return phase: one [`ConventionSpec::set_return_address`] when the call is synthesized,
//!   then one [`ConventionSpec::unwind`] when it completes

use iced_x86::Register;
use thiserror::Error;
use tracing::{debug, trace};

use crate::context::Context;

use self::slot::{SlotError, SlotLocation};

pub mod intel;
pub mod slot;

/// Errors from convention operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConventionError<E> {
    /// Slot index resolves to neither a register nor a stack slot
    #[error("argument slot {0} is out of range")]
    InvalidSlot(usize),
    /// Requested width is not 8, 16, 32 or 64 bits
    #[error("unsupported argument width of {0} bits")]
    UnsupportedWidth(u32),
    /// Return address does not fit in a word
    #[error("return address {addr:#x} does not fit in {bits} bits")]
    AddressTooWide {
        /// Address that was pushed
        addr: u64,
        /// Word size of the convention
        bits: u32,
    },
    /// Unwinding would pop past the top of the stack, or the stack is misaligned
    #[error("stack underflow: cannot release {needed} bytes at {sp:#x}")]
    StackUnderflow {
        /// Stack pointer when unwinding started
        sp: u64,
        /// Bytes the unwind needed to release
        needed: u64,
    },
    /// Error from the underlying execution context
    #[error("{0}")]
    Context(E),
}

impl<E> From<SlotError> for ConventionError<E> {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::InvalidSlot(slot) => Self::InvalidSlot(slot),
            SlotError::UnsupportedWidth(bits) => Self::UnsupportedWidth(bits),
        }
    }
}

/// Who removes stack-passed arguments once the call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// The caller pops the arguments; unwinding only pops the return address
    Caller,
    /// The callee pops its own arguments along with the return address
    Callee,
}

/// Policy constants of a calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConventionSpec {
    /// Short name of the convention
    name: &'static str,
    /// Native word size in bits, 32 or 64
    word_bits: u32,
    /// Register the return value is passed in
    retreg: Register,
    /// Argument registers in slot order. Empty for all-stack conventions
    args: &'static [Register],
    /// Shadow space reserved above the return address, in slots
    shadow: usize,
    /// Stack cleanup responsibility
    cleanup: Cleanup,
}

impl ConventionSpec {
    /// Creates an all-stack, caller-cleanup convention.
    ///
    /// `word_bits` must be 32 or 64.
    pub const fn new(name: &'static str, word_bits: u32, retreg: Register) -> Self {
        assert!(word_bits == 32 || word_bits == 64, "word size must be 32 or 64 bits");
        Self {
            name,
            word_bits,
            retreg,
            args: &[],
            shadow: 0,
            cleanup: Cleanup::Caller,
        }
    }

    /// Sets the argument registers, in slot order
    pub const fn with_args(self, args: &'static [Register]) -> Self {
        Self { args, ..self }
    }

    /// Sets the shadow space size, in slots
    pub const fn with_shadow(self, shadow: usize) -> Self {
        Self { shadow, ..self }
    }

    /// Sets who cleans the stack after the call
    pub const fn with_cleanup(self, cleanup: Cleanup) -> Self {
        Self { cleanup, ..self }
    }

    /// Short name of the convention
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Native word size in bits
    pub fn word_bits(&self) -> u32 {
        self.word_bits
    }

    /// Size of one stack slot in bytes
    pub fn slot_size(&self) -> usize {
        (self.word_bits / 8) as usize
    }

    /// Register the return value is passed in
    pub fn return_register(&self) -> Register {
        self.retreg
    }

    /// Argument registers in slot order
    pub fn arg_registers(&self) -> &'static [Register] {
        self.args
    }

    /// Shadow space size in slots
    pub fn shadow(&self) -> usize {
        self.shadow
    }

    /// Stack cleanup responsibility
    pub fn cleanup(&self) -> Cleanup {
        self.cleanup
    }

    /// Number of slots an argument of `bits` width occupies
    pub fn slots_needed(&self, bits: u32) -> Result<usize, SlotError> {
        slot::check_width(bits)?;
        Ok(slot::slots_needed(self.word_bits, bits))
    }

    /// Resolves `slot` to its register or stack offset
    pub fn slot_location(&self, slot: usize) -> Result<SlotLocation, SlotError> {
        slot::resolve(self.args, self.shadow, self.slot_size(), slot)
            .ok_or(SlotError::InvalidSlot(slot))
    }

    /// Reads the raw value of an argument of `bits` width starting at `slot`.
    ///
    /// On 32-bit conventions a 64-bit argument spans `slot` (low half) and `slot + 1`
    /// (high half). Stack slots are addressed relative to the stack pointer at callee entry,
    /// with the return address on top.
    pub fn get_raw<C: Context>(
        &self,
        ctx: &C,
        slot: usize,
        bits: u32,
    ) -> Result<u64, ConventionError<C::Error>> {
        slot::check_width(bits)?;

        let value = if bits > self.word_bits {
            let next = slot::next_slot(slot)?;
            let lo = self.read_slot(ctx, slot, self.word_bits)?;
            let hi = self.read_slot(ctx, next, self.word_bits)?;
            slot::join(lo, hi)
        } else {
            self.read_slot(ctx, slot, bits)?
        };

        trace!(convention = self.name, slot, bits, value, "read argument");
        Ok(value)
    }

    /// Writes the raw value of an argument of `bits` width starting at `slot`.
    ///
    /// Mirrors [`Self::get_raw`], including the two-slot split on 32-bit conventions.
    pub fn set_raw<C: Context>(
        &self,
        ctx: &mut C,
        slot: usize,
        value: u64,
        bits: u32,
    ) -> Result<(), ConventionError<C::Error>> {
        slot::check_width(bits)?;
        trace!(convention = self.name, slot, bits, value, "write argument");

        if bits > self.word_bits {
            // resolve both halves before touching anything
            let next = slot::next_slot(slot)?;
            self.slot_location(slot)?;
            let (lo, hi) = slot::split(value);
            self.write_slot(ctx, slot, lo, self.word_bits)?;
            self.write_slot(ctx, next, hi, self.word_bits)
        } else {
            self.write_slot(ctx, slot, value, bits)
        }
    }

    /// Reads the return value register
    pub fn get_return_value<C: Context>(&self, ctx: &C) -> Result<u64, ConventionError<C::Error>> {
        let value = ctx.read_reg(self.retreg).map_err(ConventionError::Context)?;
        Ok(value & slot::mask(self.word_bits))
    }

    /// Writes the return value register
    pub fn set_return_value<C: Context>(
        &self,
        ctx: &mut C,
        value: u64,
    ) -> Result<(), ConventionError<C::Error>> {
        ctx.write_reg(self.retreg, value & slot::mask(self.word_bits))
            .map_err(ConventionError::Context)
    }

    /// Makes room on the stack for the stack-resident arguments of a call taking `nslots`
    /// slots, plus the shadow space
    pub fn reserve<C: Context>(
        &self,
        ctx: &mut C,
        nslots: usize,
    ) -> Result<(), ConventionError<C::Error>> {
        if nslots > slot::MAX_SLOTS {
            return Err(ConventionError::InvalidSlot(nslots));
        }
        let slots = self.shadow + slot::stack_slots(self.args, nslots);
        let bytes = (slots * self.slot_size()) as u64;
        let sp = ctx.stack_pointer().map_err(ConventionError::Context)?;
        debug!(convention = self.name, nslots, bytes, "reserving argument space");
        ctx.set_stack_pointer(sp.wrapping_sub(bytes))
            .map_err(ConventionError::Context)
    }

    /// Pushes the return address for a synthesized call.
    ///
    /// Addresses wider than the word size are rejected rather than truncated.
    pub fn set_return_address<C: Context>(
        &self,
        ctx: &mut C,
        addr: u64,
    ) -> Result<(), ConventionError<C::Error>> {
        if addr & !slot::mask(self.word_bits) != 0 {
            return Err(ConventionError::AddressTooWide {
                addr,
                bits: self.word_bits,
            });
        }
        debug!(convention = self.name, addr, "pushing return address");
        ctx.stack_push(addr, self.slot_size())
            .map_err(ConventionError::Context)
    }

    /// Pops the return address once a call completes and returns it.
    ///
    /// Callee-cleanup conventions also release the `nslots` argument slots the callee owns.
    pub fn unwind<C: Context>(
        &self,
        ctx: &mut C,
        nslots: usize,
    ) -> Result<u64, ConventionError<C::Error>> {
        let size = self.slot_size() as u64;
        let sp = ctx.stack_pointer().map_err(ConventionError::Context)?;

        let released = match self.cleanup {
            Cleanup::Caller => Some(0),
            Cleanup::Callee => (nslots as u64).checked_mul(size),
        };
        let needed = released.and_then(|r| r.checked_add(size));
        let (Some(released), Some(needed)) = (released, needed) else {
            return Err(ConventionError::StackUnderflow {
                sp,
                needed: u64::MAX,
            });
        };

        let underflow = ConventionError::StackUnderflow { sp, needed };
        if sp % size != 0 {
            return Err(underflow);
        }
        if let Some(bounds) = ctx.stack_bounds() {
            match sp.checked_add(needed) {
                Some(top) if top <= bounds.end => {}
                _ => return Err(underflow),
            }
        }

        let retaddr = ctx
            .stack_pop(self.slot_size())
            .map_err(ConventionError::Context)?;
        if released != 0 {
            let sp = ctx.stack_pointer().map_err(ConventionError::Context)?;
            ctx.set_stack_pointer(sp.wrapping_add(released))
                .map_err(ConventionError::Context)?;
        }

        debug!(convention = self.name, retaddr, released, "unwound call");
        Ok(retaddr)
    }

    /// Reads a single slot, masked to `bits`
    fn read_slot<C: Context>(
        &self,
        ctx: &C,
        slot: usize,
        bits: u32,
    ) -> Result<u64, ConventionError<C::Error>> {
        let value = match self.slot_location(slot)? {
            SlotLocation::Register(reg) => ctx.read_reg(reg),
            SlotLocation::Stack(offset) => ctx
                .stack_pointer()
                .and_then(|sp| ctx.read_mem(sp.wrapping_add(offset), self.slot_size())),
        }
        .map_err(ConventionError::Context)?;
        Ok(value & slot::mask(bits))
    }

    /// Writes a single slot, masked to `bits`
    fn write_slot<C: Context>(
        &self,
        ctx: &mut C,
        slot: usize,
        value: u64,
        bits: u32,
    ) -> Result<(), ConventionError<C::Error>> {
        let value = value & slot::mask(bits);
        match self.slot_location(slot)? {
            SlotLocation::Register(reg) => ctx.write_reg(reg, value),
            SlotLocation::Stack(offset) => ctx.stack_pointer().and_then(|sp| {
                ctx.write_mem(sp.wrapping_add(offset), self.slot_size(), value)
            }),
        }
        .map_err(ConventionError::Context)
    }
}
