//! # Type Layout Index
//!
//! Type descriptors built from debug info, and the flattened member tables
//! that make anonymous structs and unions transparent to member access.
//!
//! ```text
//! struct N {                 flatten(N)
//!     struct {                 a    @ 0
//!         int a;               foo  @ 4
//!         struct { int c; int d; } foo;
//!     };                       b    @ 12
//!     int b;
//! };
//! ```

pub mod descriptor;
pub mod index;

pub use descriptor::{Field, ScalarEncoding, TypeDescriptor, TypeGraph, TypeGraphBuilder, TypeId, TypeKind, MAX_POINTER_DEPTH};
pub use index::{FlattenedLayout, FlattenedMember, LayoutIndex, MAX_ANONYMOUS_DEPTH};
