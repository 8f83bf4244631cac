//! Process, thread, register, and source location types.

use std::fmt;

use gimli::RunTimeEndian;

use super::Address;

/// Process identifier (PID)
///
/// ## Example
///
/// ```rust
/// use fathom_core::types::ProcessId;
///
/// let pid = ProcessId::from(4242);
/// assert_eq!(u32::from(pid), 4242);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier
///
/// On Linux this is the kernel TID; the main thread's TID equals the PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Raw numeric identifier
    #[must_use]
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        ThreadId(value)
    }
}

/// Why the target is currently stopped (or not)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason
{
    /// Process is currently running (not stopped)
    Running,
    /// Stopped right after launch, before executing user code
    Launched,
    /// Stopped because a signal was delivered
    Signal(i32),
    /// Hit a breakpoint at the provided address
    Breakpoint(u64),
    /// Process exited with status code
    Exited(i32),
    /// Process was killed by a signal
    Terminated(i32),
    /// Unknown/other reason
    Unknown,
}

impl StopReason
{
    /// Whether the process can still be inspected
    #[must_use]
    pub fn is_alive(self) -> bool
    {
        !matches!(self, StopReason::Exited(_) | StopReason::Terminated(_))
    }
}

impl fmt::Display for StopReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            StopReason::Running => write!(f, "running"),
            StopReason::Launched => write!(f, "launched"),
            StopReason::Signal(sig) => write!(f, "signal {sig}"),
            StopReason::Breakpoint(_) => write!(f, "breakpoint"),
            StopReason::Exited(code) => write!(f, "exited with status = {code}"),
            StopReason::Terminated(sig) => write!(f, "terminated by signal {sig}"),
            StopReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// CPU architecture of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM
    Arm64,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// 32-bit x86
    X86,
    /// Any other architecture
    Unknown(&'static str),
}

impl Architecture
{
    /// Architecture of the running debugger binary
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(target_arch = "x86")]
        {
            Architecture::X86
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64", target_arch = "x86")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Size of a pointer in bytes for this architecture.
    #[must_use]
    pub const fn pointer_size_bytes(self) -> u8
    {
        match self {
            Architecture::X86 => 4,
            Architecture::Arm64 | Architecture::X86_64 | Architecture::Unknown(_) => 8,
        }
    }

    /// Byte order of the architecture.
    #[must_use]
    pub const fn endian(self) -> RunTimeEndian
    {
        RunTimeEndian::Little
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::X86 => write!(f, "x86"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}

/// The registers expression evaluation needs from a stopped thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers
{
    /// Program counter
    pub pc: u64,
    /// Stack pointer
    pub sp: u64,
    /// Frame pointer (rbp on x86-64)
    pub fp: u64,
}

/// A position in a source file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation
{
    /// File path as recorded in the line table
    pub file: String,
    /// 1-based line number
    pub line: Option<u32>,
    /// 1-based column number
    pub column: Option<u32>,
}

impl SourceLocation
{
    /// Location with a file and line but no column
    pub fn new(file: impl Into<String>, line: u32) -> Self
    {
        Self {
            file: file.into(),
            line: Some(line),
            column: None,
        }
    }

    /// Parse `file:line`
    ///
    /// ```rust
    /// use fathom_core::types::SourceLocation;
    ///
    /// let loc = SourceLocation::parse("main.c:42").unwrap();
    /// assert_eq!(loc.file, "main.c");
    /// assert_eq!(loc.line, Some(42));
    /// assert!(SourceLocation::parse("main.c").is_none());
    /// ```
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self>
    {
        let (file, line) = spec.rsplit_once(':')?;
        let line = line.trim().parse::<u32>().ok()?;
        if file.is_empty() || line == 0 {
            return None;
        }
        Some(Self::new(file, line))
    }
}

impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{}:{line}:{column}", self.file),
            (Some(line), None) => write!(f, "{}:{line}", self.file),
            _ => write!(f, "{}", self.file),
        }
    }
}
