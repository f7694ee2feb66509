//! # Context
//!
//! This module covers execution contexts, which give conventions access to an emulated CPU's
//! registers and stack memory

use std::ops::Range;

use iced_x86::Register;

pub mod mem;

/// Access to the register file and stack memory of a single emulated execution context.
///
/// Conventions never hold on to a context; every operation borrows it for its own duration.
/// A context is expected to be driven from one thread at a time.
pub trait Context {
    /// Errors the underlying emulator can report on register or memory access
    type Error;

    /// Reads a register. Sub-registers (e.g. `eax`) return only their own bits
    fn read_reg(&self, reg: Register) -> Result<u64, Self::Error>;
    /// Writes a register. Sub-registers (e.g. `eax`) only receive their own bits
    fn write_reg(&mut self, reg: Register, value: u64) -> Result<(), Self::Error>;

    /// Gets the current stack pointer
    fn stack_pointer(&self) -> Result<u64, Self::Error>;
    /// Moves the stack pointer
    fn set_stack_pointer(&mut self, sp: u64) -> Result<(), Self::Error>;

    /// Reads a little-endian integer of `size` bytes (1, 2, 4 or 8) at `addr`
    fn read_mem(&self, addr: u64, size: usize) -> Result<u64, Self::Error>;
    /// Writes the low `size` bytes (1, 2, 4 or 8) of `value` at `addr`, little-endian
    fn write_mem(&mut self, addr: u64, size: usize, value: u64) -> Result<(), Self::Error>;

    /// Address range occupied by the stack, if the context knows it.
    ///
    /// Used to detect stack underflow when unwinding. Contexts that return `None` are only
    /// checked for alignment.
    fn stack_bounds(&self) -> Option<Range<u64>> {
        None
    }

    /// Pushes `size` bytes of `value` onto the stack
    fn stack_push(&mut self, value: u64, size: usize) -> Result<(), Self::Error> {
        let sp = self.stack_pointer()?.wrapping_sub(size as u64);
        self.write_mem(sp, size, value)?;
        self.set_stack_pointer(sp)
    }

    /// Pops `size` bytes off the stack
    fn stack_pop(&mut self, size: usize) -> Result<u64, Self::Error> {
        let sp = self.stack_pointer()?;
        let value = self.read_mem(sp, size)?;
        self.set_stack_pointer(sp.wrapping_add(size as u64))?;
        Ok(value)
    }
}
