//! # Debugging Session
//!
//! A [`Session`] ties together the debug info of one executable, a process
//! launched from it, and the layout index used to evaluate expressions in
//! the stopped frame.
//!
//! ## Addresses
//!
//! Debug info speaks in link-time addresses. For position-independent
//! executables the session computes the load bias once, right after launch,
//! from where the kernel mapped the image, and applies it in both directions:
//! breakpoint and static-variable addresses get the bias added, the stopped
//! program counter gets it subtracted before scope lookup.
//!
//! ## Results
//!
//! Every successful evaluation is numbered (`$0`, `$1`, ...) and can be used
//! as the root of later expressions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::breakpoints::{BreakpointId, BreakpointInfo};
use crate::debugger::Debugger;
use crate::error::{FathomError, FathomResult};
use crate::eval::{format_value, Expression, LiveVariable, Resolver};
use crate::layout::LayoutIndex;
use crate::symbols::{BinaryImage, DebugInfo, SymbolFrame, Symbolication, VariableLocation};
use crate::types::{Address, ProcessId, SourceLocation, StopReason, ThreadId};

/// Where to place a breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointSpec
{
    /// `file:line`
    Line(SourceLocation),
    /// Function name; the breakpoint goes after the prologue
    Function(String),
    /// Raw runtime address (`0x...`)
    Address(u64),
}

impl FromStr for BreakpointSpec
{
    type Err = FathomError;

    /// ```rust
    /// use fathom_core::session::BreakpointSpec;
    /// use fathom_core::types::SourceLocation;
    ///
    /// assert_eq!(
    ///     "main.c:25".parse::<BreakpointSpec>().unwrap(),
    ///     BreakpointSpec::Line(SourceLocation::new("main.c", 25))
    /// );
    /// assert_eq!("0x1139".parse::<BreakpointSpec>().unwrap(), BreakpointSpec::Address(0x1139));
    /// assert_eq!("main".parse::<BreakpointSpec>().unwrap(), BreakpointSpec::Function("main".into()));
    /// ```
    fn from_str(text: &str) -> Result<Self, Self::Err>
    {
        let text = text.trim();
        if text.is_empty() {
            return Err(FathomError::InvalidArgument("empty breakpoint location".to_string()));
        }
        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16)
                .map(BreakpointSpec::Address)
                .map_err(|_| FathomError::InvalidArgument(format!("invalid address '{text}'")));
        }
        if let Some(location) = SourceLocation::parse(text) {
            return Ok(BreakpointSpec::Line(location));
        }
        if text.contains(':') && !text.contains("::") {
            return Err(FathomError::InvalidArgument(format!("invalid line in '{text}'")));
        }
        Ok(BreakpointSpec::Function(text.to_string()))
    }
}

impl fmt::Display for BreakpointSpec
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            BreakpointSpec::Line(location) => write!(f, "{location}"),
            BreakpointSpec::Function(name) => write!(f, "{name}"),
            BreakpointSpec::Address(address) => write!(f, "{address:#x}"),
        }
    }
}

/// One numbered evaluation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation
{
    /// The `N` in `$N`
    pub number: usize,
    /// C spelling of the value's type
    pub type_name: String,
    /// Rendered value
    pub value: String,
    /// Where the value lives
    pub variable: LiveVariable,
}

impl fmt::Display for Evaluation
{
    /// `(type_y) $1 = { dummy = 2 }`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "({}) ${} = {}", self.type_name, self.number, self.value)
    }
}

/// One thread of the target and whether it reported the current stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStop
{
    /// 1-based position in the thread list
    pub index: usize,
    pub id: ThreadId,
    /// `Running` for threads that did not report the stop
    pub reason: StopReason,
    /// The breakpoint this thread is stopped at
    pub breakpoint: Option<BreakpointId>,
}

impl ThreadStop
{
    #[must_use]
    pub fn is_stopped(&self) -> bool
    {
        self.reason != StopReason::Running
    }
}

impl fmt::Display for ThreadStop
{
    /// `thread #1: tid = 4242, stopped, stop reason = breakpoint 1`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "thread #{}: tid = {}", self.index, self.id.raw())?;
        if !self.is_stopped() {
            return write!(f, ", running");
        }
        match self.breakpoint {
            Some(id) => write!(f, ", stopped, stop reason = breakpoint {id}"),
            None => write!(f, ", stopped, stop reason = {}", self.reason),
        }
    }
}

/// Why and where the process stopped
#[derive(Debug, Clone)]
pub struct StopReport
{
    pub reason: StopReason,
    /// The breakpoint that was hit, if any
    pub breakpoint: Option<BreakpointInfo>,
    /// Runtime program counter, when the process is still alive
    pub pc: Option<u64>,
    /// Function and source line of `pc`
    pub frame: Option<Symbolication>,
    /// Every thread of the process, empty once it has exited
    pub threads: Vec<ThreadStop>,
}

impl fmt::Display for StopReport
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if !self.reason.is_alive() {
            return write!(f, "process {}", self.reason);
        }
        match &self.breakpoint {
            Some(breakpoint) => write!(f, "stop reason = breakpoint {}", breakpoint.id)?,
            None => write!(f, "stop reason = {}", self.reason)?,
        }
        if let Some(pc) = self.pc {
            write!(f, "\nframe #0: 0x{pc:016x}")?;
            if let Some(frame) = &self.frame {
                write!(f, " {frame}")?;
            }
        }
        for thread in &self.threads {
            write!(f, "\n{thread}")?;
        }
        Ok(())
    }
}

/// A program, its debug info, and the process running it
///
/// ## Example
///
/// ```rust,no_run
/// use fathom_core::debugger::create_debugger;
/// use fathom_core::session::Session;
///
/// let mut session = Session::open("./anonymous", create_debugger()?)?;
/// session.launch(&[])?;
/// session.break_at(&"anonymous.c:25".parse()?)?;
/// session.continue_to_stop()?;
/// println!("{}", session.evaluate("n->foo.d")?);
/// # Ok::<(), fathom_core::error::FathomError>(())
/// ```
pub struct Session
{
    program: PathBuf,
    image: Option<BinaryImage>,
    debug_info: Arc<DebugInfo>,
    index: LayoutIndex,
    debugger: Box<dyn Debugger>,
    position_independent: bool,
    load_bias: u64,
    results: Vec<LiveVariable>,
}

impl fmt::Debug for Session
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Session")
            .field("program", &self.program)
            .field("pid", &self.debugger.pid())
            .field("load_bias", &format_args!("{:#x}", self.load_bias))
            .field("results", &self.results.len())
            .finish_non_exhaustive()
    }
}

impl Session
{
    /// Open `program` and load its debug info
    ///
    /// ## Errors
    ///
    /// Errors of [`BinaryImage::open`] and [`BinaryImage::debug_info`].
    pub fn open(program: impl AsRef<Path>, debugger: Box<dyn Debugger>) -> FathomResult<Self>
    {
        let image = BinaryImage::open(program)?;
        let debug_info = image.debug_info()?;
        let mut session = Self::with_debug_info(image.path(), debug_info, debugger);
        session.position_independent = image.is_position_independent();
        session.image = Some(image);
        Ok(session)
    }

    /// A session over debug info that was loaded elsewhere
    ///
    /// Without an image the session treats `program` as non-PIE and
    /// symbolicates from the line table only.
    pub fn with_debug_info(program: impl AsRef<Path>, debug_info: Arc<DebugInfo>, debugger: Box<dyn Debugger>) -> Self
    {
        let index = LayoutIndex::new(Arc::clone(debug_info.graph()));
        Self {
            program: program.as_ref().to_path_buf(),
            image: None,
            debug_info,
            index,
            debugger,
            position_independent: false,
            load_bias: 0,
            results: Vec::new(),
        }
    }

    #[must_use]
    pub fn debug_info(&self) -> &DebugInfo
    {
        &self.debug_info
    }

    #[must_use]
    pub fn index(&self) -> &LayoutIndex
    {
        &self.index
    }

    #[must_use]
    pub fn debugger(&self) -> &dyn Debugger
    {
        self.debugger.as_ref()
    }

    pub fn debugger_mut(&mut self) -> &mut dyn Debugger
    {
        self.debugger.as_mut()
    }

    /// Runtime address minus link-time address
    #[must_use]
    pub fn load_bias(&self) -> u64
    {
        self.load_bias
    }

    /// Launch the program, stopped before its first instruction
    ///
    /// `args` excludes the program name.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: the program path isn't valid UTF-8
    /// - Errors of [`Debugger::launch`] and [`Debugger::image_base`]
    pub fn launch(&mut self, args: &[&str]) -> FathomResult<ProcessId>
    {
        let program = self
            .program
            .to_str()
            .ok_or_else(|| FathomError::InvalidArgument(format!("non UTF-8 path {}", self.program.display())))?
            .to_string();
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(program.as_str());
        argv.extend_from_slice(args);

        let pid = self.debugger.launch(&program, &argv)?;
        self.results.clear();
        self.load_bias = if self.position_independent {
            let link_base = self.image.as_ref().map_or(0, BinaryImage::link_base);
            match self.debugger.image_base(&self.program)? {
                Some(base) => base.value().wrapping_sub(link_base),
                None => {
                    return Err(FathomError::InvalidDebugInfo(format!(
                        "{} is position independent but isn't mapped in process {pid}",
                        self.program.display()
                    )))
                }
            }
        } else {
            0
        };
        info!(%pid, load_bias = format_args!("{:#x}", self.load_bias), "launched");
        Ok(pid)
    }

    /// Runtime address and source position for a breakpoint request
    ///
    /// A line without code moves to the next line that has some. A line
    /// whose code starts a function moves past that function's prologue.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` when no code matches.
    pub fn resolve_breakpoint(&self, spec: &BreakpointSpec) -> FathomResult<(Address, Option<SourceLocation>)>
    {
        let lines = self.debug_info.lines();
        let link_address = match spec {
            BreakpointSpec::Address(address) => return Ok((Address::new(*address), None)),
            BreakpointSpec::Line(location) => {
                let address = location
                    .line
                    .and_then(|line| lines.address_for_line(&location.file, line))
                    .ok_or_else(|| FathomError::InvalidArgument(format!("no code for {location}")))?;
                // Stopping at a function's entry would read locals through the caller's frame
                match self.debug_info.variables().scope_at(address) {
                    Some(scope) if scope.low_pc == address => lines.after_prologue(scope.low_pc, scope.high_pc),
                    _ => address,
                }
            }
            BreakpointSpec::Function(name) => {
                let scope = self
                    .debug_info
                    .variables()
                    .function(name)
                    .ok_or_else(|| FathomError::InvalidArgument(format!("no function named '{name}'")))?;
                lines.after_prologue(scope.low_pc, scope.high_pc)
            }
        };

        let location = lines.entry_for_address(link_address).map(|entry| {
            let file = match spec {
                BreakpointSpec::Line(requested) => requested.file.clone(),
                _ => entry.file.clone(),
            };
            SourceLocation::new(file, entry.line)
        });
        Ok((Address::new(link_address.wrapping_add(self.load_bias)), location))
    }

    /// Resolve and install a breakpoint
    ///
    /// ## Errors
    ///
    /// Errors of [`Session::resolve_breakpoint`] and
    /// [`Debugger::set_breakpoint`].
    pub fn break_at(&mut self, spec: &BreakpointSpec) -> FathomResult<BreakpointId>
    {
        let (address, location) = self.resolve_breakpoint(spec)?;
        let id = self.debugger.set_breakpoint(address, location)?;
        debug!(%spec, %address, %id, "breakpoint set");
        Ok(id)
    }

    /// Resume and wait for the next stop
    ///
    /// ## Errors
    ///
    /// Errors of [`Debugger::continue_to_stop`].
    pub fn continue_to_stop(&mut self) -> FathomResult<StopReason>
    {
        self.debugger.continue_to_stop()
    }

    /// Describe the current stop
    ///
    /// ## Errors
    ///
    /// Register read failures while the process is alive.
    pub fn stop_report(&self) -> FathomResult<StopReport>
    {
        let reason = self.debugger.stop_reason();
        if !reason.is_alive() {
            return Ok(StopReport {
                reason,
                breakpoint: None,
                pc: None,
                frame: None,
                threads: Vec::new(),
            });
        }

        let pc = self.debugger.read_registers()?.pc;
        let breakpoint = match reason {
            StopReason::Breakpoint(address) => self
                .debugger
                .breakpoints()
                .into_iter()
                .find(|info| info.address.value() == address),
            _ => None,
        };
        Ok(StopReport {
            reason,
            breakpoint,
            pc: Some(pc),
            frame: self.symbolicate(pc),
            threads: self.threads()?,
        })
    }

    /// Every thread of the process with its part in the current stop
    ///
    /// ## Errors
    ///
    /// Errors of [`Debugger::threads`].
    pub fn threads(&self) -> FathomResult<Vec<ThreadStop>>
    {
        let reason = self.debugger.stop_reason();
        let stopped = self.debugger.stopped_thread();
        let breakpoint = match reason {
            StopReason::Breakpoint(address) => self
                .debugger
                .breakpoints()
                .into_iter()
                .find(|info| info.address.value() == address)
                .map(|info| info.id),
            _ => None,
        };

        Ok(self
            .debugger
            .threads()?
            .into_iter()
            .enumerate()
            .map(|(position, id)| {
                let reported = Some(id) == stopped;
                ThreadStop {
                    index: position + 1,
                    id,
                    reason: if reported { reason } else { StopReason::Running },
                    breakpoint: breakpoint.filter(|_| reported),
                }
            })
            .collect())
    }

    /// Threads currently stopped at a breakpoint
    ///
    /// ## Errors
    ///
    /// Errors of [`Debugger::threads`].
    pub fn threads_stopped_at_breakpoint(&self) -> FathomResult<Vec<ThreadStop>>
    {
        Ok(self
            .threads()?
            .into_iter()
            .filter(|thread| thread.breakpoint.is_some())
            .collect())
    }

    /// Function and source line of a runtime address
    #[must_use]
    pub fn symbolicate(&self, runtime_address: u64) -> Option<Symbolication>
    {
        let link_address = runtime_address.wrapping_sub(self.load_bias);
        if let Some(symbolication) = self.image.as_ref().and_then(|image| image.symbolicate(link_address)) {
            return Some(symbolication);
        }

        let scope = self.debug_info.variables().scope_at(link_address)?;
        let location = self
            .debug_info
            .lines()
            .entry_for_address(link_address)
            .map(|entry| SourceLocation::new(entry.file.clone(), entry.line));
        Some(Symbolication {
            frames: vec![SymbolFrame {
                function: scope.name.clone(),
                location,
            }],
        })
    }

    /// The variable an expression's root names, as seen from the stopped pc
    ///
    /// `$N` names the N-th evaluation result.
    ///
    /// ## Errors
    ///
    /// - `UnknownVariable`: not a result, local, or global
    /// - `NotAttached` / `NotStopped`: no frame to look in
    /// - `Unsupported`: the frame base can't be computed
    pub fn root_variable(&self, name: &str) -> FathomResult<LiveVariable>
    {
        if let Some(number) = name.strip_prefix('$') {
            return number
                .parse::<usize>()
                .ok()
                .and_then(|number| self.results.get(number))
                .map(|result| LiveVariable::new(name, result.address, result.ty))
                .ok_or_else(|| FathomError::UnknownVariable(name.to_string()));
        }

        let registers = self.debugger.read_registers()?;
        let pc = registers.pc.wrapping_sub(self.load_bias);
        let (variable, scope) = self
            .debug_info
            .variables()
            .lookup(name, Some(pc))
            .ok_or_else(|| FathomError::UnknownVariable(name.to_string()))?;

        let address = match (variable.location, scope) {
            (VariableLocation::Static(address), _) => Address::new(address.wrapping_add(self.load_bias)),
            (VariableLocation::FrameOffset(offset), Some(scope)) => {
                scope.frame_base_address(&registers)?.offset(offset)
            }
            (VariableLocation::FrameOffset(_), None) => {
                return Err(FathomError::InvalidDebugInfo(format!(
                    "frame-relative variable '{name}' outside any function"
                )))
            }
        };
        debug!(name, %address, "root variable");
        Ok(LiveVariable::new(name, address, variable.ty))
    }

    /// Resolve an expression to a typed address without reading its value
    ///
    /// ## Errors
    ///
    /// Errors of [`Session::root_variable`] and [`Resolver::resolve`].
    pub fn locate(&self, expression: &Expression) -> FathomResult<LiveVariable>
    {
        let root = self.root_variable(expression.root())?;
        Resolver::new(&self.index, self.debugger.as_ref()).resolve_expression(root, expression)
    }

    /// Parse, resolve, read, and render an expression
    ///
    /// Only successful evaluations consume a result number.
    ///
    /// ## Errors
    ///
    /// Parse, resolution, and memory errors; see [`FathomError`].
    pub fn evaluate(&mut self, text: &str) -> FathomResult<Evaluation>
    {
        let expression = Expression::parse(text)?;
        let variable = self.locate(&expression)?;
        let value = format_value(&self.index, self.debugger.as_ref(), &variable)?;

        let number = self.results.len();
        self.results.push(variable.clone());
        Ok(Evaluation {
            number,
            type_name: self.index.graph().display_name(variable.ty),
            value,
            variable,
        })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_breakpoint_specs()
    {
        assert_eq!(
            "dir/anonymous.c:40".parse::<BreakpointSpec>().unwrap(),
            BreakpointSpec::Line(SourceLocation::new("dir/anonymous.c", 40))
        );
        assert_eq!(
            "ns::function".parse::<BreakpointSpec>().unwrap(),
            BreakpointSpec::Function("ns::function".into())
        );
        assert!("main.c:abc".parse::<BreakpointSpec>().is_err());
        assert!("0xzz".parse::<BreakpointSpec>().is_err());
        assert!("".parse::<BreakpointSpec>().is_err());
    }

    #[test]
    fn test_evaluation_display()
    {
        let evaluation = Evaluation {
            number: 0,
            type_name: "type_z *".into(),
            value: "0x0000000000000000".into(),
            variable: LiveVariable::new("pz", Address::new(0x1000), crate::layout::TypeGraphBuilder::new(8).void()),
        };
        assert_eq!(evaluation.to_string(), "(type_z *) $0 = 0x0000000000000000");
    }

    #[test]
    fn test_stop_report_for_exit()
    {
        let report = StopReport {
            reason: StopReason::Exited(0),
            breakpoint: None,
            pc: None,
            frame: None,
            threads: Vec::new(),
        };
        assert_eq!(report.to_string(), "process exited with status = 0");
    }

    #[test]
    fn test_thread_stop_display()
    {
        let stopped = ThreadStop {
            index: 1,
            id: ThreadId(4242),
            reason: StopReason::Breakpoint(0x1139),
            breakpoint: Some(BreakpointId::from_raw(1)),
        };
        assert_eq!(stopped.to_string(), "thread #1: tid = 4242, stopped, stop reason = breakpoint 1");

        let signalled = ThreadStop {
            reason: StopReason::Signal(11),
            breakpoint: None,
            ..stopped.clone()
        };
        assert_eq!(signalled.to_string(), "thread #1: tid = 4242, stopped, stop reason = signal 11");

        let worker = ThreadStop {
            index: 2,
            id: ThreadId(4243),
            reason: StopReason::Running,
            breakpoint: None,
        };
        assert!(!worker.is_stopped());
        assert_eq!(worker.to_string(), "thread #2: tid = 4243, running");
    }
}
