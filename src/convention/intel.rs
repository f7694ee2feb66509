//! # Intel
//!
//! This module provides the calling conventions used on x86 and x86-64, and picks the right
//! one for a target

use std::collections::HashMap;

use iced_x86::Register;
use lazy_static::lazy_static;

use super::{Cleanup, ConventionSpec};

/// Default convention for POSIX (x86-64).
/// First 6 arguments are passed in registers, the rest on the stack.
pub static AMD64: ConventionSpec =
    ConventionSpec::new("amd64", 64, Register::RAX).with_args(&[
        Register::RDI,
        Register::RSI,
        Register::RDX,
        Register::R10,
        Register::R8,
        Register::R9,
    ]);

/// Default convention for Windows and UEFI (x86-64).
/// First 4 arguments are passed in registers, the rest on the stack.
///
/// Each frame starts with a shadow space of 4 slots, one per register argument.
pub static MS64: ConventionSpec = ConventionSpec::new("ms64", 64, Register::RAX)
    .with_args(&[Register::RCX, Register::RDX, Register::R8, Register::R9])
    .with_shadow(4);

/// Default convention for macOS (x86-64).
/// First 6 arguments are passed in registers, the rest on the stack.
pub static MACOSX64: ConventionSpec =
    ConventionSpec::new("macosx64", 64, Register::RAX).with_args(&[
        Register::RDI,
        Register::RSI,
        Register::RDX,
        Register::RCX,
        Register::R8,
        Register::R9,
    ]);

/// C convention on every x86 OS. All arguments are passed on the stack.
///
/// The caller unwinds the stack.
pub static CDECL: ConventionSpec = ConventionSpec::new("cdecl", 32, Register::EAX);

/// Standard convention on every x86 OS. All arguments are passed on the stack.
///
/// The callee unwinds the stack.
pub static STDCALL: ConventionSpec =
    ConventionSpec::new("stdcall", 32, Register::EAX).with_cleanup(Cleanup::Callee);

/// Every built-in convention
pub static ALL: [&ConventionSpec; 5] = [&AMD64, &MS64, &MACOSX64, &CDECL, &STDCALL];

lazy_static! {
    /// Built-in conventions by name
    static ref BY_NAME: HashMap<&'static str, &'static ConventionSpec> =
        ALL.iter().map(|cc| (cc.name(), *cc)).collect();
}

/// Emulated CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// 32-bit x86
    X86,
    /// x86-64
    X8664,
}

/// Emulated operating system
#[allow(clippy::missing_docs_in_private_items)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    FreeBsd,
    MacOs,
    Windows,
    Uefi,
    Qnx,
}

/// Picks the default convention for an (architecture, OS) pair.
///
/// x86 always gets [`CDECL`]; callers that know a function is `stdcall` look it up by name.
pub fn select(arch: Arch, os: Os) -> &'static ConventionSpec {
    match (arch, os) {
        (Arch::X86, _) => &CDECL,
        (Arch::X8664, Os::Windows | Os::Uefi) => &MS64,
        (Arch::X8664, Os::MacOs) => &MACOSX64,
        (Arch::X8664, _) => &AMD64,
    }
}

/// Looks up a built-in convention by name
pub fn by_name(name: &str) -> Option<&'static ConventionSpec> {
    BY_NAME.get(name).copied()
}
