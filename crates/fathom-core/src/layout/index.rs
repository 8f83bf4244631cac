//! Flattened member tables with anonymous-aggregate promotion.
//!
//! `flatten` turns a struct or union into a direct name → (offset, type)
//! table. Members of anonymous nested structs/unions are promoted into the
//! enclosing table with their offsets summed, recursively; named members are
//! never looked through. Tables are computed on first use and cached per
//! type for the lifetime of the index.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use super::descriptor::{TypeGraph, TypeId};
use crate::error::{FathomError, FathomResult};

/// Deepest anonymous nesting accepted before the debug info is considered
/// self-referential.
pub const MAX_ANONYMOUS_DEPTH: usize = 32;

/// A member visible by name after flattening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedMember
{
    /// Visible member name
    pub name: String,
    /// Byte offset from the start of the flattened type
    pub offset: u64,
    /// Type of the member
    pub ty: TypeId,
}

/// The flattened member table of one struct or union
#[derive(Debug, Clone)]
pub struct FlattenedLayout
{
    type_id: TypeId,
    type_name: String,
    members: Vec<FlattenedMember>,
    by_name: HashMap<String, usize>,
}

impl FlattenedLayout
{
    /// Type this table was built for
    #[must_use]
    pub fn type_id(&self) -> TypeId
    {
        self.type_id
    }

    /// Display name of that type
    #[must_use]
    pub fn type_name(&self) -> &str
    {
        &self.type_name
    }

    /// Members in declaration order (promoted members appear where their
    /// anonymous aggregate was declared)
    #[must_use]
    pub fn members(&self) -> &[FlattenedMember]
    {
        &self.members
    }

    /// Number of visible members
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.members.len()
    }

    /// Whether the type has no visible members
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.members.is_empty()
    }

    /// Look up a member by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FlattenedMember>
    {
        self.by_name.get(name).map(|index| &self.members[*index])
    }

    /// Look up a member by name, failing with `NotFound`
    ///
    /// ## Errors
    ///
    /// `NotFound` carrying the member and this table's type name.
    pub fn member(&self, name: &str) -> FathomResult<&FlattenedMember>
    {
        self.get(name).ok_or_else(|| FathomError::NotFound {
            member: name.to_string(),
            type_name: self.type_name.clone(),
        })
    }
}

/// Why a table could not be built; cached so the diagnostic is emitted once.
#[derive(Debug, Clone)]
enum LayoutDefect
{
    Ambiguous
    {
        member: String,
        type_name: String,
    },
    NotAggregate
    {
        type_name: String
    },
    Malformed(String),
}

impl LayoutDefect
{
    fn to_error(&self, expression: &str) -> FathomError
    {
        match self {
            LayoutDefect::Ambiguous { member, type_name } => FathomError::AmbiguousMember {
                member: member.clone(),
                type_name: type_name.clone(),
            },
            LayoutDefect::NotAggregate { type_name } => FathomError::NotAggregate {
                expression: expression.to_string(),
                type_name: type_name.clone(),
            },
            LayoutDefect::Malformed(reason) => FathomError::InvalidDebugInfo(reason.clone()),
        }
    }
}

type Slot = OnceCell<Result<Arc<FlattenedLayout>, LayoutDefect>>;

/// Lazily built, shared cache of flattened member tables
///
/// The index is `Send + Sync`. Each type's table is published through a
/// `OnceCell`, so once built it is read without locking.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use fathom_core::layout::{LayoutIndex, ScalarEncoding, TypeGraphBuilder};
///
/// // struct N { struct { int a; int c; }; int b; }
/// let mut builder = TypeGraphBuilder::new(8);
/// let int = builder.scalar("int", 4, ScalarEncoding::Signed);
/// let inner = builder.structure(None, 8);
/// builder.field(inner, Some("a"), 0, int).unwrap();
/// builder.field(inner, Some("c"), 4, int).unwrap();
/// let n = builder.structure(Some("N"), 12);
/// builder.field(n, None, 0, inner).unwrap();
/// builder.field(n, Some("b"), 8, int).unwrap();
///
/// let index = LayoutIndex::new(Arc::new(builder.finish().unwrap()));
/// let layout = index.flatten(n).unwrap();
/// assert_eq!(layout.member("c").unwrap().offset, 4);
/// assert_eq!(layout.member("b").unwrap().offset, 8);
/// ```
#[derive(Debug)]
pub struct LayoutIndex
{
    graph: Arc<TypeGraph>,
    slots: Vec<Slot>,
}

impl LayoutIndex
{
    /// Create an empty cache over a type graph
    #[must_use]
    pub fn new(graph: Arc<TypeGraph>) -> Self
    {
        let slots = (0..graph.len()).map(|_| OnceCell::new()).collect();
        Self { graph, slots }
    }

    /// The underlying type graph
    #[must_use]
    pub fn graph(&self) -> &Arc<TypeGraph>
    {
        &self.graph
    }

    /// Flattened member table of `ty` (typedefs and qualifiers are peeled)
    ///
    /// ## Errors
    ///
    /// - `NotAggregate`: `ty` is not a struct or union
    /// - `AmbiguousMember`: two members flatten to the same name
    /// - `InvalidDebugInfo`: anonymous nesting deeper than [`MAX_ANONYMOUS_DEPTH`]
    /// - `InvalidArgument`: `ty` belongs to a different graph
    pub fn flatten(&self, ty: TypeId) -> FathomResult<Arc<FlattenedLayout>>
    {
        if ty.index() >= self.graph.len() {
            return Err(FathomError::InvalidArgument(format!("type {ty} is not part of this index")));
        }
        let root = self.graph.peel(ty)?;
        let slot = self
            .slots
            .get(root.index())
            .ok_or_else(|| FathomError::InvalidArgument(format!("type {root} is not part of this index")))?;

        let cached = slot.get_or_init(|| {
            let built = self.build(root);
            match &built {
                Ok(layout) => debug!(ty = %layout.type_name, members = layout.len(), "flattened type"),
                Err(LayoutDefect::Ambiguous { member, type_name }) => {
                    warn!(%member, %type_name, "member name collides after anonymous promotion");
                }
                Err(LayoutDefect::Malformed(reason)) => warn!(%reason, "cannot flatten type"),
                Err(LayoutDefect::NotAggregate { .. }) => {}
            }
            built.map(Arc::new)
        });

        match cached {
            Ok(layout) => Ok(Arc::clone(layout)),
            Err(defect) => Err(defect.to_error(&self.graph.display_name(ty))),
        }
    }

    /// Look up one visible member of `ty` by name
    ///
    /// This is the child-by-name query; it goes through the same flattened
    /// table as `.` member access.
    ///
    /// ## Errors
    ///
    /// Everything [`LayoutIndex::flatten`] returns, plus `NotFound`.
    pub fn child_member(&self, ty: TypeId, name: &str) -> FathomResult<FlattenedMember>
    {
        Ok(self.flatten(ty)?.member(name)?.clone())
    }

    /// Static offset and type of a dotted member path such as `["foo", "d"]`
    ///
    /// ## Errors
    ///
    /// Fails on the first path component that can't be found.
    pub fn offset_of(&self, ty: TypeId, path: &[&str]) -> FathomResult<(u64, TypeId)>
    {
        let mut offset = 0u64;
        let mut current = ty;
        for name in path {
            let member = self.child_member(current, name)?;
            offset = offset
                .checked_add(member.offset)
                .ok_or_else(|| FathomError::InvalidDebugInfo(format!("offset of '{name}' overflows")))?;
            current = member.ty;
        }
        Ok((offset, current))
    }

    fn build(&self, root: TypeId) -> Result<FlattenedLayout, LayoutDefect>
    {
        let type_name = self.graph.display_name(root);
        if !self.graph.get(root).kind.is_aggregate() {
            return Err(LayoutDefect::NotAggregate { type_name });
        }

        let mut layout = FlattenedLayout {
            type_id: root,
            type_name,
            members: Vec::new(),
            by_name: HashMap::new(),
        };
        self.collect(root, 0, 0, &mut layout)?;
        Ok(layout)
    }

    fn collect(&self, owner: TypeId, base: u64, depth: usize, layout: &mut FlattenedLayout) -> Result<(), LayoutDefect>
    {
        if depth > MAX_ANONYMOUS_DEPTH {
            return Err(LayoutDefect::Malformed(format!(
                "anonymous members of {} nest more than {MAX_ANONYMOUS_DEPTH} levels deep",
                layout.type_name
            )));
        }

        for field in &self.graph.get(owner).fields {
            let offset = base.checked_add(field.offset).ok_or_else(|| {
                LayoutDefect::Malformed(format!("member offset overflows in {}", layout.type_name))
            })?;

            match &field.name {
                Some(name) => {
                    if layout.by_name.contains_key(name) {
                        return Err(LayoutDefect::Ambiguous {
                            member: name.clone(),
                            type_name: layout.type_name.clone(),
                        });
                    }
                    layout.by_name.insert(name.clone(), layout.members.len());
                    layout.members.push(FlattenedMember {
                        name: name.clone(),
                        offset,
                        ty: field.ty,
                    });
                }
                None => {
                    let nested = self
                        .graph
                        .peel(field.ty)
                        .map_err(|err| LayoutDefect::Malformed(err.to_string()))?;
                    // Unnamed bit-field padding has no members to promote.
                    if self.graph.get(nested).kind.is_aggregate() {
                        self.collect(nested, offset, depth + 1, layout)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::layout::descriptor::{ScalarEncoding, TypeGraphBuilder};

    #[test]
    fn test_self_nested_anonymous_struct_is_bounded()
    {
        // An anonymous struct that contains itself by value can't come from
        // a real compiler, but the builder can describe it.
        let mut builder = TypeGraphBuilder::new(8);
        let looped = builder.structure(None, 4);
        builder.field(looped, None, 0, looped).unwrap();
        let root = builder.structure(Some("root"), 4);
        builder.field(root, None, 0, looped).unwrap();
        let index = LayoutIndex::new(Arc::new(builder.finish().unwrap()));

        assert!(matches!(index.flatten(root), Err(FathomError::InvalidDebugInfo(_))));
    }

    #[test]
    fn test_failed_build_is_cached()
    {
        let mut builder = TypeGraphBuilder::new(8);
        let int = builder.scalar("int", 4, ScalarEncoding::Signed);
        let inner = builder.structure(None, 4);
        builder.field(inner, Some("x"), 0, int).unwrap();
        let outer = builder.structure(Some("outer"), 8);
        builder.field(outer, Some("x"), 0, int).unwrap();
        builder.field(outer, None, 4, inner).unwrap();
        let index = LayoutIndex::new(Arc::new(builder.finish().unwrap()));

        for _ in 0..2 {
            match index.flatten(outer) {
                Err(FathomError::AmbiguousMember { member, type_name }) => {
                    assert_eq!(member, "x");
                    assert_eq!(type_name, "struct outer");
                }
                other => panic!("expected AmbiguousMember, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unnamed_scalar_member_is_skipped()
    {
        let mut builder = TypeGraphBuilder::new(8);
        let int = builder.scalar("int", 4, ScalarEncoding::Signed);
        let s = builder.structure(Some("padded"), 8);
        builder.field(s, Some("a"), 0, int).unwrap();
        builder.field(s, None, 4, int).unwrap();
        let index = LayoutIndex::new(Arc::new(builder.finish().unwrap()));

        let layout = index.flatten(s).unwrap();
        assert_eq!(layout.len(), 1);
        assert_eq!(layout.members()[0].name, "a");
    }

    #[test]
    fn test_flatten_scalar_is_not_aggregate()
    {
        let mut builder = TypeGraphBuilder::new(8);
        let int = builder.scalar("int", 4, ScalarEncoding::Signed);
        let index = LayoutIndex::new(Arc::new(builder.finish().unwrap()));

        assert!(matches!(index.flatten(int), Err(FathomError::NotAggregate { .. })));
    }
}
