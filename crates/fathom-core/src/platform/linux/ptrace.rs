//! # ptrace Wrappers
//!
//! Thin safe wrappers over the `ptrace(2)` requests the Linux backend uses.
//! Each wrapper checks the return value and converts failures into
//! [`FathomError`]s; none of them keep state.
//!
//! ## References
//!
//! - [ptrace(2)](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [waitpid(2)](https://man7.org/linux/man-pages/man2/waitpid.2.html)

use std::io;
use std::mem;
use std::ptr;

use libc::{c_void, pid_t};

use crate::error::{FathomError, FathomResult};
use crate::types::Address;

/// How a traced child changed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitStatus
{
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
}

fn check(result: libc::c_long, what: &str) -> FathomResult<libc::c_long>
{
    if result == -1 {
        let err = io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::ESRCH) => FathomError::NotAttached,
            Some(libc::EPERM) => FathomError::PermissionDenied(format!("{what}: {err}")),
            _ => FathomError::Io(io::Error::new(err.kind(), format!("{what}: {err}"))),
        });
    }
    Ok(result)
}

/// Called in the forked child before `execv`
pub(crate) fn trace_me() -> libc::c_long
{
    unsafe { libc::ptrace(libc::PTRACE_TRACEME, 0, ptr::null_mut::<c_void>(), ptr::null_mut::<c_void>()) }
}

/// Kill the tracee if the debugger exits
pub(crate) fn set_exit_kill(pid: pid_t) -> FathomResult<()>
{
    let options = libc::PTRACE_O_EXITKILL as usize;
    check(
        unsafe { libc::ptrace(libc::PTRACE_SETOPTIONS, pid, ptr::null_mut::<c_void>(), options as *mut c_void) },
        "PTRACE_SETOPTIONS",
    )?;
    Ok(())
}

/// Read one machine word of the tracee's memory
pub(crate) fn peek_data(pid: pid_t, address: Address) -> FathomResult<u64>
{
    // PEEKDATA returns the word itself; -1 is only an error if errno is set
    unsafe { *libc::__errno_location() = 0 };
    let word = unsafe {
        libc::ptrace(
            libc::PTRACE_PEEKDATA,
            pid,
            address.value() as *mut c_void,
            ptr::null_mut::<c_void>(),
        )
    };
    if word == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error().unwrap_or(0) != 0 {
            return Err(FathomError::MemoryRead {
                address,
                length: mem::size_of::<u64>(),
                details: format!("PTRACE_PEEKDATA: {err}"),
            });
        }
    }
    Ok(word as u64)
}

/// Write one machine word of the tracee's memory
pub(crate) fn poke_data(pid: pid_t, address: Address, word: u64) -> FathomResult<()>
{
    check(
        unsafe { libc::ptrace(libc::PTRACE_POKEDATA, pid, address.value() as *mut c_void, word as *mut c_void) },
        "PTRACE_POKEDATA",
    )?;
    Ok(())
}

pub(crate) fn get_regs(pid: pid_t) -> FathomResult<libc::user_regs_struct>
{
    let mut regs: libc::user_regs_struct = unsafe { mem::zeroed() };
    check(
        unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGS,
                pid,
                ptr::null_mut::<c_void>(),
                (&mut regs as *mut libc::user_regs_struct).cast::<c_void>(),
            )
        },
        "PTRACE_GETREGS",
    )?;
    Ok(regs)
}

pub(crate) fn set_regs(pid: pid_t, regs: &libc::user_regs_struct) -> FathomResult<()>
{
    check(
        unsafe {
            libc::ptrace(
                libc::PTRACE_SETREGS,
                pid,
                ptr::null_mut::<c_void>(),
                (regs as *const libc::user_regs_struct).cast_mut().cast::<c_void>(),
            )
        },
        "PTRACE_SETREGS",
    )?;
    Ok(())
}

/// Continue, delivering `signal` (0 for none)
pub(crate) fn cont(pid: pid_t, signal: i32) -> FathomResult<()>
{
    check(
        unsafe { libc::ptrace(libc::PTRACE_CONT, pid, ptr::null_mut::<c_void>(), signal as usize as *mut c_void) },
        "PTRACE_CONT",
    )?;
    Ok(())
}

pub(crate) fn single_step(pid: pid_t) -> FathomResult<()>
{
    check(
        unsafe {
            libc::ptrace(
                libc::PTRACE_SINGLESTEP,
                pid,
                ptr::null_mut::<c_void>(),
                ptr::null_mut::<c_void>(),
            )
        },
        "PTRACE_SINGLESTEP",
    )?;
    Ok(())
}

pub(crate) fn wait(pid: pid_t) -> FathomResult<WaitStatus>
{
    let mut status = 0;
    loop {
        let result = unsafe { libc::waitpid(pid, &mut status, 0) };
        if result == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(match err.raw_os_error() {
                Some(libc::ECHILD) => FathomError::NotAttached,
                _ => FathomError::Io(err),
            });
        }
        break;
    }

    if libc::WIFEXITED(status) {
        Ok(WaitStatus::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Ok(WaitStatus::Signaled(libc::WTERMSIG(status)))
    } else if libc::WIFSTOPPED(status) {
        Ok(WaitStatus::Stopped(libc::WSTOPSIG(status)))
    } else {
        Err(FathomError::Io(io::Error::other(format!("unexpected wait status {status:#x}"))))
    }
}

pub(crate) fn kill(pid: pid_t) -> FathomResult<()>
{
    if unsafe { libc::kill(pid, libc::SIGKILL) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Err(FathomError::ProcessNotFound(pid.unsigned_abs()));
        }
        return Err(err.into());
    }
    Ok(())
}
