//! # Types
//!
//! Platform-agnostic types used throughout the debugger.

pub mod address;
pub mod process;

// Re-export all public types
pub use address::Address;
pub use process::{Architecture, ProcessId, Registers, SourceLocation, StopReason, ThreadId};
