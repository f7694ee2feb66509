//! This module contains a flat in-memory execution context
//!
//! [`MemoryContext`] keeps a general purpose register file and one contiguous stack region.
//! It is enough to drive any convention without a full CPU emulator behind it.

use std::collections::HashMap;
use std::ops::Range;

use iced_x86::Register;
use thiserror::Error;

use super::Context;

/// Errors when accessing a [`MemoryContext`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// Access falls outside the stack region, or uses an unsupported size
    #[error("unmapped access of {size} bytes at {addr:#x}")]
    Unmapped {
        /// Address of the access
        addr: u64,
        /// Size of the access in bytes
        size: usize,
    },
    /// Only 32 and 64-bit general purpose registers are modeled
    #[error("register {0:?} is not supported")]
    UnsupportedRegister(Register),
}

/// Register file plus a single stack region, all zero-initialized
#[derive(Debug, Clone)]
pub struct MemoryContext {
    /// Stack pointer register for the context's bitness (`esp` or `rsp`)
    sp: Register,
    /// Register values, keyed by their full 64-bit register
    regs: HashMap<Register, u64>,
    /// Address of the first byte of `stack`
    base: u64,
    /// Address one past the last byte of `stack`
    top: u64,
    /// Backing store of the stack region
    stack: Vec<u8>,
}

impl MemoryContext {
    /// Creates a 32-bit context with a stack of `size` bytes at `base`.
    /// The stack pointer starts at the top of the region.
    ///
    /// Fails if the region does not end within the 32-bit address space.
    pub fn x86(base: u64, size: usize) -> Result<Self, MemoryError> {
        Self::new(Register::ESP, u64::from(u32::MAX), base, size)
    }

    /// Creates a 64-bit context with a stack of `size` bytes at `base`.
    /// The stack pointer starts at the top of the region.
    ///
    /// Fails if the region wraps around the end of the address space.
    pub fn x86_64(base: u64, size: usize) -> Result<Self, MemoryError> {
        Self::new(Register::RSP, u64::MAX, base, size)
    }

    /// Shared constructor for both bitnesses. `limit` is the highest valid stack pointer
    fn new(sp: Register, limit: u64, base: u64, size: usize) -> Result<Self, MemoryError> {
        let top = u64::try_from(size)
            .ok()
            .and_then(|len| base.checked_add(len))
            .filter(|&top| top <= limit)
            .ok_or(MemoryError::Unmapped { addr: base, size })?;

        let mut regs = HashMap::new();
        regs.insert(Register::RSP, top);
        Ok(Self {
            sp,
            regs,
            base,
            top,
            stack: vec![0; size],
        })
    }

    /// Maps a register to its storage key and the mask of bits it covers
    fn slot_of(reg: Register) -> Result<(Register, u64), MemoryError> {
        if reg.is_gpr64() {
            Ok((reg, u64::MAX))
        } else if reg.is_gpr32() {
            Ok((reg.full_register(), u64::from(u32::MAX)))
        } else {
            Err(MemoryError::UnsupportedRegister(reg))
        }
    }

    /// Resolves `addr..addr + size` to a range inside `stack`
    fn span(&self, addr: u64, size: usize) -> Result<Range<usize>, MemoryError> {
        let unmapped = MemoryError::Unmapped { addr, size };
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(unmapped);
        }
        let start = addr
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or_else(|| unmapped.clone())?;
        match start.checked_add(size) {
            Some(end) if end <= self.stack.len() => Ok(start..end),
            _ => Err(unmapped),
        }
    }
}

impl Context for MemoryContext {
    type Error = MemoryError;

    fn read_reg(&self, reg: Register) -> Result<u64, Self::Error> {
        let (key, mask) = Self::slot_of(reg)?;
        Ok(self.regs.get(&key).copied().unwrap_or(0) & mask)
    }

    fn write_reg(&mut self, reg: Register, value: u64) -> Result<(), Self::Error> {
        // 32-bit writes zero the upper half, as they do on x86-64
        let (key, mask) = Self::slot_of(reg)?;
        self.regs.insert(key, value & mask);
        Ok(())
    }

    fn stack_pointer(&self) -> Result<u64, Self::Error> {
        self.read_reg(self.sp)
    }

    fn set_stack_pointer(&mut self, sp: u64) -> Result<(), Self::Error> {
        self.write_reg(self.sp, sp)
    }

    fn read_mem(&self, addr: u64, size: usize) -> Result<u64, Self::Error> {
        let span = self.span(addr, size)?;
        let mut bytes = [0u8; 8];
        bytes[..size].copy_from_slice(&self.stack[span]);
        Ok(u64::from_le_bytes(bytes))
    }

    fn write_mem(&mut self, addr: u64, size: usize, value: u64) -> Result<(), Self::Error> {
        let span = self.span(addr, size)?;
        self.stack[span].copy_from_slice(&value.to_le_bytes()[..size]);
        Ok(())
    }

    fn stack_bounds(&self) -> Option<Range<u64>> {
        Some(self.base..self.top)
    }
}
