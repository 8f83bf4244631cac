//! # Variable Resolution
//!
//! Parses member-access expressions, resolves them against a
//! [`LayoutIndex`](crate::layout::LayoutIndex) and target memory, and renders
//! the resulting values.
//!
//! ## Example
//!
//! ```rust,ignore
//! let expression = Expression::parse("n->foo.d")?;
//! let root = LiveVariable::new("n", address_of_n, type_of_n);
//! let value = Resolver::new(&index, &memory).resolve_expression(root, &expression)?;
//! println!("{}", ValueFormatter::new(&index, &memory).format(&value)?);
//! ```

pub mod expr;
pub mod format;
pub mod resolve;

pub use expr::{AccessStep, CastTarget, Expression};
pub use format::{format_value, ValueFormatter};
pub use resolve::{LiveVariable, Resolver};
