//! # Linux Debugger Implementation
//!
//! Linux x86-64 backend built on `ptrace`.
//!
//! ## Launch
//!
//! The child calls `PTRACE_TRACEME`, disables address randomization, and
//! `execv`s the program. The kernel stops it with `SIGTRAP` at the first
//! instruction, before the dynamic loader runs, so breakpoints can be placed
//! before any user code executes.
//!
//! ## Breakpoints
//!
//! Software breakpoints replace the first byte of an instruction with `int3`
//! (`0xCC`). After the trap fires the program counter is one past the
//! breakpoint; [`LinuxDebugger::wait_for_stop`] rewinds it. Resuming from a
//! breakpoint restores the original byte, single-steps, and re-inserts the
//! trap.
//!
//! ## Memory
//!
//! Reads go through `/proc/<pid>/mem`, which handles arbitrary lengths in
//! one call. Writes (breakpoint patches) use `PTRACE_POKEDATA`.

mod ptrace;

use std::ffi::CString;
use std::fs::{self, File};
use std::os::unix::fs::FileExt;
use std::path::Path;

use gimli::RunTimeEndian;
use libc::pid_t;
use tracing::{debug, info, trace, warn};

use self::ptrace::WaitStatus;
use crate::breakpoints::{BreakpointId, BreakpointInfo, BreakpointStore};
use crate::debugger::Debugger;
use crate::error::{FathomError, FathomResult};
use crate::memory::MemoryReader;
use crate::platform::maps;
use crate::types::{Address, Architecture, ProcessId, Registers, SourceLocation, StopReason, ThreadId};

const INT3: u8 = 0xCC;

/// `ptrace`-based debugger for Linux x86-64
///
/// ## Example
///
/// ```rust,no_run
/// use fathom_core::debugger::Debugger;
/// use fathom_core::platform::linux::LinuxDebugger;
///
/// let mut debugger = LinuxDebugger::new();
/// debugger.launch("./anonymous", &["anonymous"])?;
/// let reason = debugger.continue_to_stop()?;
/// println!("stopped: {reason}");
/// # Ok::<(), fathom_core::error::FathomError>(())
/// ```
#[derive(Debug)]
pub struct LinuxDebugger
{
    pid: Option<pid_t>,
    /// `/proc/<pid>/mem`, opened at launch
    mem: Option<File>,
    state: StopReason,
    /// Signal that stopped the process and must be delivered on resume
    pending_signal: i32,
    breakpoints: BreakpointStore,
}

impl Default for LinuxDebugger
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl LinuxDebugger
{
    /// A debugger with no process
    #[must_use]
    pub fn new() -> Self
    {
        LinuxDebugger {
            pid: None,
            mem: None,
            state: StopReason::Running,
            pending_signal: 0,
            breakpoints: BreakpointStore::new(),
        }
    }

    fn live_pid(&self) -> FathomResult<pid_t>
    {
        match self.pid {
            Some(pid) if self.state.is_alive() => Ok(pid),
            _ => Err(FathomError::NotAttached),
        }
    }

    fn stopped_pid(&self) -> FathomResult<pid_t>
    {
        let pid = self.live_pid()?;
        if self.state == StopReason::Running {
            return Err(FathomError::NotStopped);
        }
        Ok(pid)
    }

    /// Replace the low byte of the word at `address`, returning the old byte
    fn patch_byte(pid: pid_t, address: Address, byte: u8) -> FathomResult<u8>
    {
        let word = ptrace::peek_data(pid, address)?;
        let original = (word & 0xff) as u8;
        ptrace::poke_data(pid, address, (word & !0xff) | u64::from(byte))?;
        Ok(original)
    }

    /// Execute the instruction under an installed breakpoint and re-arm it
    fn step_over_breakpoint(&mut self, pid: pid_t, pc: Address) -> FathomResult<()>
    {
        let Some(original) = self
            .breakpoints
            .installed_at(pc)
            .and_then(|entry| entry.original_bytes.as_ref())
            .and_then(|bytes| bytes.first().copied())
        else {
            return Ok(());
        };

        trace!("Stepping over breakpoint at {pc}");
        Self::patch_byte(pid, pc, original)?;
        ptrace::single_step(pid)?;
        match ptrace::wait(pid)? {
            WaitStatus::Stopped(_) => {
                Self::patch_byte(pid, pc, INT3)?;
                Ok(())
            }
            status => {
                self.record_exit(status);
                Ok(())
            }
        }
    }

    fn record_exit(&mut self, status: WaitStatus) -> StopReason
    {
        self.state = match status {
            WaitStatus::Exited(code) => StopReason::Exited(code),
            WaitStatus::Signaled(signal) => StopReason::Terminated(signal),
            WaitStatus::Stopped(signal) => StopReason::Signal(signal),
        };
        if !self.state.is_alive() {
            info!("Process {:?} {}", self.pid, self.state);
            self.mem = None;
        }
        self.state
    }
}

fn to_cstring(value: &str) -> FathomResult<CString>
{
    CString::new(value).map_err(|_| FathomError::InvalidArgument(format!("argument contains a NUL byte: {value:?}")))
}

impl MemoryReader for LinuxDebugger
{
    fn read_memory(&self, addr: Address, len: usize) -> FathomResult<Vec<u8>>
    {
        let mem = self.mem.as_ref().ok_or(FathomError::NotAttached)?;
        let mut buffer = vec![0u8; len];
        mem.read_exact_at(&mut buffer, addr.value())
            .map_err(|err| FathomError::MemoryRead {
                address: addr,
                length: len,
                details: err.to_string(),
            })?;
        Ok(buffer)
    }

    fn pointer_size(&self) -> u8
    {
        8
    }

    fn endian(&self) -> RunTimeEndian
    {
        RunTimeEndian::Little
    }
}

impl Debugger for LinuxDebugger
{
    fn launch(&mut self, program: &str, args: &[&str]) -> FathomResult<ProcessId>
    {
        info!("Launching process: {} with args: {:?}", program, args);
        if self.live_pid().is_ok() {
            return Err(FathomError::InvalidArgument("a process is already running".to_string()));
        }

        // Everything the child touches is allocated before fork
        let c_program = to_cstring(program)?;
        let c_args = if args.is_empty() {
            vec![c_program.clone()]
        } else {
            args.iter().map(|arg| to_cstring(arg)).collect::<FathomResult<Vec<_>>>()?
        };
        let mut argv: Vec<*const libc::c_char> = c_args.iter().map(|arg| arg.as_ptr()).collect();
        argv.push(std::ptr::null());

        let pid = unsafe { libc::fork() };
        if pid == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
        if pid == 0 {
            unsafe {
                if ptrace::trace_me() == -1 {
                    libc::_exit(126);
                }
                libc::personality(libc::ADDR_NO_RANDOMIZE as libc::c_ulong);
                libc::execv(c_program.as_ptr(), argv.as_ptr());
                libc::_exit(127);
            }
        }

        debug!("Forked child {pid}, waiting for exec stop");
        match ptrace::wait(pid)? {
            WaitStatus::Stopped(libc::SIGTRAP) => {}
            WaitStatus::Stopped(signal) => {
                warn!("Child stopped with unexpected signal {signal} during launch");
            }
            status => {
                warn!("Child exited during launch: {status:?}");
                return Err(FathomError::ProcessNotFound(pid.unsigned_abs()));
            }
        }
        ptrace::set_exit_kill(pid)?;

        self.mem = Some(File::open(format!("/proc/{pid}/mem"))?);
        self.pid = Some(pid);
        self.state = StopReason::Launched;
        self.pending_signal = 0;
        self.breakpoints = BreakpointStore::new();

        info!("Successfully launched process with PID: {}", pid);
        Ok(ProcessId(pid.unsigned_abs()))
    }

    fn pid(&self) -> Option<ProcessId>
    {
        self.live_pid().ok().map(|pid| ProcessId(pid.unsigned_abs()))
    }

    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
    }

    fn image_base(&self, image: &Path) -> FathomResult<Option<Address>>
    {
        let pid = self.live_pid()?;
        let maps = maps::read_maps(ProcessId(pid.unsigned_abs()))?;
        Ok(maps::image_base(&maps, image).map(Address::new))
    }

    fn set_breakpoint(&mut self, address: Address, location: Option<SourceLocation>) -> FathomResult<BreakpointId>
    {
        let pid = self.stopped_pid()?;
        let id = self.breakpoints.request(address, location);
        if self.breakpoints.installed_at(address).is_some() {
            return Ok(id);
        }

        let original = Self::patch_byte(pid, address, INT3)?;
        self.breakpoints.mark_resolved(id, vec![original]);
        debug!("Installed breakpoint {id} at {address}");
        Ok(id)
    }

    fn remove_breakpoint(&mut self, id: BreakpointId) -> FathomResult<()>
    {
        let entry = self.breakpoints.remove(id).ok_or(FathomError::NoBreakpoint(id.raw()))?;
        if let (Some(bytes), Ok(pid)) = (entry.original_bytes, self.stopped_pid()) {
            if let Some(&original) = bytes.first() {
                Self::patch_byte(pid, entry.info.address, original)?;
            }
        }
        debug!("Removed breakpoint {id}");
        Ok(())
    }

    fn breakpoints(&self) -> Vec<BreakpointInfo>
    {
        self.breakpoints.list()
    }

    fn resume(&mut self) -> FathomResult<()>
    {
        let pid = self.stopped_pid()?;
        let pc = Address::new(ptrace::get_regs(pid)?.rip);
        self.step_over_breakpoint(pid, pc)?;
        if !self.state.is_alive() {
            return Ok(());
        }

        let signal = std::mem::take(&mut self.pending_signal);
        ptrace::cont(pid, signal)?;
        self.state = StopReason::Running;
        trace!("Resumed process {pid}");
        Ok(())
    }

    fn wait_for_stop(&mut self) -> FathomResult<StopReason>
    {
        let pid = self.live_pid()?;
        if self.state != StopReason::Running {
            return Ok(self.state);
        }

        let status = ptrace::wait(pid)?;
        let WaitStatus::Stopped(signal) = status else {
            return Ok(self.record_exit(status));
        };

        if signal == libc::SIGTRAP {
            let mut regs = ptrace::get_regs(pid)?;
            let trap = Address::new(regs.rip.wrapping_sub(1));
            if self.breakpoints.installed_at(trap).is_some() {
                regs.rip = trap.value();
                ptrace::set_regs(pid, &regs)?;
                self.breakpoints.record_hit(trap);
                self.state = StopReason::Breakpoint(trap.value());
                debug!("Hit breakpoint at {trap}");
                return Ok(self.state);
            }
        } else {
            self.pending_signal = signal;
        }

        self.state = StopReason::Signal(signal);
        debug!("Process stopped by signal {signal}");
        Ok(self.state)
    }

    fn threads(&self) -> FathomResult<Vec<ThreadId>>
    {
        let pid = self.live_pid()?;
        let mut threads = Vec::new();
        for entry in fs::read_dir(format!("/proc/{pid}/task"))? {
            if let Some(tid) = entry?.file_name().to_str().and_then(|name| name.parse::<u64>().ok()) {
                threads.push(ThreadId(tid));
            }
        }
        threads.sort();
        Ok(threads)
    }

    fn stop_reason(&self) -> StopReason
    {
        self.state
    }

    fn read_registers(&self) -> FathomResult<Registers>
    {
        let regs = ptrace::get_regs(self.stopped_pid()?)?;
        Ok(Registers {
            pc: regs.rip,
            sp: regs.rsp,
            fp: regs.rbp,
        })
    }

    fn kill(&mut self) -> FathomResult<()>
    {
        let pid = self.pid.ok_or(FathomError::NotAttached)?;
        if self.state.is_alive() {
            ptrace::kill(pid)?;
            let status = ptrace::wait(pid)?;
            self.record_exit(status);
        }
        self.pid = None;
        self.mem = None;
        self.breakpoints.drain();
        Ok(())
    }
}

impl Drop for LinuxDebugger
{
    fn drop(&mut self)
    {
        if self.pid.is_some() && self.state.is_alive() {
            if let Err(err) = self.kill() {
                warn!("Failed to kill traced process on drop: {err}");
            }
        }
    }
}
