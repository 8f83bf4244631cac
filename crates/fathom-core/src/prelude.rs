//! Common module for library exports

pub use crate::breakpoints::{BreakpointId, BreakpointInfo, BreakpointState};
pub use crate::debugger::{create_debugger, Debugger};
pub use crate::error::{FathomError, FathomResult};
pub use crate::eval::{format_value, AccessStep, Expression, LiveVariable, Resolver, ValueFormatter};
pub use crate::layout::{FlattenedLayout, FlattenedMember, LayoutIndex, TypeGraph, TypeGraphBuilder, TypeId, TypeKind};
pub use crate::memory::MemoryReader;
pub use crate::session::{BreakpointSpec, Evaluation, Session, StopReport, ThreadStop};
pub use crate::symbols::{BinaryImage, DebugInfo};
pub use crate::types::{Address, Architecture, ProcessId, Registers, SourceLocation, StopReason, ThreadId};
