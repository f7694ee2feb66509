#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod context;
pub mod convention;

pub use context::Context;
pub use convention::intel::{by_name, select, Arch, Os};
pub use convention::slot::SlotError;
pub use convention::{Cleanup, ConventionError, ConventionSpec};
