//! # Platform-Specific Implementations
//!
//! Each supported platform has its own submodule that implements the
//! [`Debugger`](crate::debugger::Debugger) trait using that platform's
//! native debugging APIs:
//!
//! - **Linux x86-64**: `ptrace`
//!   - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//!
//! [`maps`] parses `/proc/<pid>/maps` text and is available everywhere.

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod linux;
pub mod maps;
