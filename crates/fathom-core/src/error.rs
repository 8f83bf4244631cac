//! # Error Types
//!
//! General error handling for layout indexing, expression resolution, and
//! process control.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::types::Address;

/// Main error type for Fathom operations
///
/// Every failure is returned to the caller as a value. None of them abort the
/// evaluator: a failed resolution reports the failing step and the reason,
/// and the caller decides whether to continue with the next expression.
///
/// ## Error Categories
///
/// 1. **Resolution errors**: NotFound, NullDereference, NotAggregate, NotPointer,
///    UnknownVariable, UnknownType, InvalidExpression
/// 2. **Index errors**: AmbiguousMember, InvalidDebugInfo
/// 3. **Memory errors**: MemoryRead
/// 4. **Process errors**: ProcessNotFound, NotAttached, NotStopped, PermissionDenied
/// 5. **Breakpoint errors**: NoBreakpoint
/// 6. **Platform errors**: Unsupported, Io
#[derive(Error, Debug)]
pub enum FathomError
{
    /// A member name is absent from a type after flattening
    ///
    /// This is a user-input error: the expression named a member the type
    /// does not have, neither directly nor through an anonymous aggregate.
    #[error("no member named '{member}' in {type_name}")]
    NotFound
    {
        /// The member name that was queried
        member: String,
        /// Display name of the enclosing type
        type_name: String,
    },

    /// Two members of a type flatten to the same visible name
    ///
    /// Raised when the layout index is built for a type. The type is unusable
    /// for member access until the debug info is fixed.
    #[error("ambiguous member '{member}' in {type_name}")]
    AmbiguousMember
    {
        /// The colliding member name
        member: String,
        /// Display name of the type being flattened
        type_name: String,
    },

    /// A pointer step found the null pointer
    ///
    /// Recoverable. The expression is the step that tried to dereference.
    #[error("null pointer dereference in '{expression}'")]
    NullDereference
    {
        /// The expression text up to and including the failing step
        expression: String,
    },

    /// Reading target memory failed
    ///
    /// Propagated verbatim from the process-control collaborator (process
    /// exited, invalid address, permission denied).
    #[error("failed to read {length} bytes at {address}: {details}")]
    MemoryRead
    {
        /// Start of the failed read
        address: Address,
        /// Number of bytes requested
        length: usize,
        /// Backend-specific reason
        details: String,
    },

    /// Member access on a value that is not a struct or union
    #[error("'{expression}' has non-aggregate type {type_name}")]
    NotAggregate
    {
        /// The expression whose value was accessed
        expression: String,
        /// Display name of its type
        type_name: String,
    },

    /// Dereference of a value that is not a pointer (or array for indexing)
    #[error("'{expression}' has non-pointer type {type_name}")]
    NotPointer
    {
        /// The expression whose value was dereferenced
        expression: String,
        /// Display name of its type
        type_name: String,
    },

    /// A type name in a cast or lookup is unknown
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// A root variable is not visible in the current scope
    #[error("use of undeclared identifier '{0}'")]
    UnknownVariable(String),

    /// The expression text could not be parsed
    #[error("invalid expression '{expression}': {reason}")]
    InvalidExpression
    {
        /// The expression as written
        expression: String,
        /// What the parser expected
        reason: String,
    },

    /// Debug info is malformed or describes something we can't represent
    ///
    /// Examples:
    /// - An anonymous aggregate that contains itself by value
    /// - A type reference that points outside any unit
    #[error("invalid debug info: {0}")]
    InvalidDebugInfo(String),

    /// Invalid argument passed to a Fathom function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The process with the given PID doesn't exist or has exited
    #[error("Process not found: PID {0}")]
    ProcessNotFound(u32),

    /// Insufficient permissions to trace the target process
    ///
    /// On Linux this usually means `ptrace` is restricted by
    /// `/proc/sys/kernel/yama/ptrace_scope`.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation requires a launched process
    #[error("Not attached to a process")]
    NotAttached,

    /// Operation requires the process to be stopped
    #[error("Process must be stopped for this operation")]
    NotStopped,

    /// No breakpoint with the given id
    #[error("No breakpoint with id {0}")]
    NoBreakpoint(u64),

    /// The current platform has no process-control backend
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error (for file operations, `/proc` access, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FathomError
{
    /// Whether this error is an expected evaluation outcome
    ///
    /// Resolution errors describe a problem with the expression or the
    /// program state (a null pointer, a misspelled member) rather than with
    /// the debugger itself.
    #[must_use]
    pub fn is_resolution_error(&self) -> bool
    {
        matches!(
            self,
            FathomError::NotFound { .. }
                | FathomError::NullDereference { .. }
                | FathomError::NotAggregate { .. }
                | FathomError::NotPointer { .. }
                | FathomError::UnknownType(_)
                | FathomError::UnknownVariable(_)
                | FathomError::InvalidExpression { .. }
        )
    }
}

/// Convenience type alias for `Result<T, FathomError>`
///
/// ```rust
/// use fathom_core::error::FathomResult;
/// fn foo() -> FathomResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type FathomResult<T> = std::result::Result<T, FathomError>;
