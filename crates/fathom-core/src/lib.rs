//! # fathom-core
//!
//! Member resolution through anonymous C structs and unions, plus the
//! debugger plumbing needed to run it against a live process.
//!
//! This crate provides:
//! - A type layout index that flattens anonymous aggregates into direct
//!   name-to-offset tables ([`layout`])
//! - Expression parsing, resolution, and value rendering ([`eval`])
//! - DWARF loading for types, variables, and line tables ([`symbols`])
//! - Process control and breakpoints ([`debugger`], [`breakpoints`])
//! - A session that ties them together ([`session`])
//!
//! ## Platform Support
//!
//! - **Linux x86-64**: Uses `ptrace` and `/proc`
//! - **Everything else**: layout, DWARF, and resolution work; process
//!   control returns `Unsupported`
//!
//! ## Why unsafe code is needed
//!
//! Process control calls `fork`, `execv`, `ptrace`, and `waitpid`, which are
//! only reachable through `libc`. The calls are confined to
//! `platform::linux` and wrapped in safe functions there.

#![allow(unsafe_code)] // Required for ptrace and fork

pub mod breakpoints;
pub mod debugger;
pub mod error;
pub mod eval;
pub mod layout;
pub mod memory;
pub mod platform;
pub mod prelude;
pub mod session;
pub mod symbols;
pub mod types;

pub use debugger::{create_debugger, Debugger};
// Re-export commonly used types
pub use error::{FathomError, FathomResult};
pub use layout::{LayoutIndex, TypeGraph, TypeId};
pub use memory::MemoryReader;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use platform::linux::LinuxDebugger;
pub use session::Session;
pub use types::{Address, ProcessId, Registers};
