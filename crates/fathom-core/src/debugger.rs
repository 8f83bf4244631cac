//! # Debugger Trait
//!
//! The process-control interface that sessions drive.
//!
//! This trait defines what a debugger backend can do, regardless of the
//! underlying platform. Each backend implements it with its own system APIs:
//!
//! - **Linux x86-64**: `ptrace` (see [`crate::platform::linux`])
//! - **Everything else**: not supported; [`create_debugger`] returns
//!   `Unsupported`
//!
//! Every backend is also a [`MemoryReader`], which is all expression
//! resolution needs from it.

use std::path::Path;

use crate::breakpoints::{BreakpointId, BreakpointInfo};
use crate::error::FathomResult;
use crate::memory::MemoryReader;
use crate::types::{Address, Architecture, ProcessId, Registers, SourceLocation, StopReason, ThreadId};

/// Main debugger interface
///
/// ## Lifecycle
///
/// 1. Create a debugger: [`create_debugger`]
/// 2. Launch a program: `launch(program, args)`; it stops before running
///    any user code
/// 3. Set breakpoints, then `resume()` and `wait_for_stop()`
/// 4. Inspect: `read_registers()`, `read_memory()`, `threads()`
/// 5. `kill()` (also done on drop)
///
/// ## Thread Safety
///
/// The debugger is **not** thread-safe. On Linux, `ptrace` requests are only
/// accepted from the thread that launched the tracee, so each debugger
/// instance must stay on the thread that created it.
pub trait Debugger: MemoryReader
{
    /// Launch a new process under debugger control
    ///
    /// The process is stopped before executing its first instruction, so
    /// breakpoints can be set before anything runs.
    ///
    /// ## Parameters
    ///
    /// - `program`: Path to the executable to launch
    /// - `args`: Command-line arguments (first argument should be the program name)
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: a path or argument contains a NUL byte
    /// - `Io`: `fork` or `waitpid` failed
    /// - `ProcessNotFound`: the child exited before it could be traced
    ///
    /// ## Example
    ///
    /// ```rust,no_run
    /// use fathom_core::debugger::create_debugger;
    ///
    /// let mut debugger = create_debugger()?;
    /// let pid = debugger.launch("./anonymous", &["anonymous"])?;
    /// println!("Launched process with PID: {pid}");
    /// # Ok::<(), fathom_core::error::FathomError>(())
    /// ```
    fn launch(&mut self, program: &str, args: &[&str]) -> FathomResult<ProcessId>;

    /// PID of the traced process, if one is running
    fn pid(&self) -> Option<ProcessId>;

    /// Architecture of the traced process
    fn architecture(&self) -> Architecture;

    /// Runtime address at which `image` was mapped, from the process's
    /// memory map
    ///
    /// ## Errors
    ///
    /// - `NotAttached`: no process
    /// - `Io`: the memory map can't be read
    fn image_base(&self, image: &Path) -> FathomResult<Option<Address>>;

    /// Install a software breakpoint at `address`
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `NotStopped`: no stopped process to patch
    /// - `MemoryRead`: the address isn't mapped
    fn set_breakpoint(&mut self, address: Address, location: Option<SourceLocation>) -> FathomResult<BreakpointId>;

    /// Remove a breakpoint, restoring the original instruction
    ///
    /// ## Errors
    ///
    /// - `NoBreakpoint`: unknown id
    fn remove_breakpoint(&mut self, id: BreakpointId) -> FathomResult<()>;

    /// Every breakpoint with its state and hit count, ordered by id
    fn breakpoints(&self) -> Vec<BreakpointInfo>;

    /// Continue execution
    ///
    /// If the process is stopped on an enabled breakpoint, the original
    /// instruction is executed first and the trap re-inserted.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `NotStopped`
    fn resume(&mut self) -> FathomResult<()>;

    /// Block until the process stops or exits
    ///
    /// A stop at a breakpoint rewinds the program counter to the breakpoint
    /// address and increments its hit count.
    ///
    /// ## Errors
    ///
    /// - `NotAttached`: no process
    fn wait_for_stop(&mut self) -> FathomResult<StopReason>;

    /// Thread IDs of the process
    ///
    /// ## Errors
    ///
    /// - `NotAttached`: no process
    fn threads(&self) -> FathomResult<Vec<ThreadId>>;

    /// Why the process is stopped (or `Running`)
    fn stop_reason(&self) -> StopReason;

    /// The thread that reported the current stop
    ///
    /// Only the initial thread is traced, so by default it is the one whose
    /// id equals the process id.
    fn stopped_thread(&self) -> Option<ThreadId>
    {
        match self.stop_reason() {
            StopReason::Running => None,
            reason if !reason.is_alive() => None,
            _ => self.pid().map(|pid| ThreadId(u64::from(pid.0))),
        }
    }

    /// Program counter, stack pointer, and frame pointer of the stopped
    /// thread
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `NotStopped`
    fn read_registers(&self) -> FathomResult<Registers>;

    /// Terminate the process
    ///
    /// ## Errors
    ///
    /// - `NotAttached`: no process
    fn kill(&mut self) -> FathomResult<()>;

    /// `resume` then `wait_for_stop`
    ///
    /// ## Errors
    ///
    /// Errors of either call.
    fn continue_to_stop(&mut self) -> FathomResult<StopReason>
    {
        self.resume()?;
        self.wait_for_stop()
    }
}

/// Create the debugger backend for the current platform
///
/// ## Example
///
/// ```rust,no_run
/// use fathom_core::debugger::create_debugger;
///
/// let debugger = create_debugger()?;
/// assert!(debugger.pid().is_none());
/// # Ok::<(), fathom_core::error::FathomError>(())
/// ```
///
/// ## Platform Support
///
/// - Linux x86-64: returns `LinuxDebugger`
/// - Others: `Unsupported`
pub fn create_debugger() -> FathomResult<Box<dyn Debugger>>
{
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    {
        Ok(Box::new(crate::platform::linux::LinuxDebugger::new()))
    }

    #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
    {
        Err(crate::error::FathomError::Unsupported(format!(
            "process control is not implemented for {}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        )))
    }
}
