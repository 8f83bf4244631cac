//! Type descriptors and the immutable type graph.
//!
//! A [`TypeGraph`] is an arena of [`TypeDescriptor`]s addressed by
//! [`TypeId`]. It is built once per debug-info load with a
//! [`TypeGraphBuilder`] and never mutated afterwards, so it can be shared
//! behind an `Arc` by every evaluation.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::error::{FathomError, FathomResult};

/// Identity of a type inside one [`TypeGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId
{
    /// Position of the descriptor in the graph's arena
    #[must_use]
    pub const fn index(self) -> usize
    {
        self.0 as usize
    }
}

impl fmt::Display for TypeId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// How the bytes of a scalar are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarEncoding
{
    /// Two's complement signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
    /// `char` / `signed char`
    SignedChar,
    /// `unsigned char`
    UnsignedChar,
    /// `_Bool`
    Bool,
    /// IEEE 754 binary floating point
    Float,
}

/// Shape of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind
{
    /// `struct` (or C++ `class`)
    Struct,
    /// `union`
    Union,
    /// Base type such as `int` or `double`
    Scalar(ScalarEncoding),
    /// Pointer to the given type (`None` for `void *`)
    Pointer(Option<TypeId>),
    /// Named alias for another type
    Typedef(TypeId),
    /// `const` qualified type
    Const(TypeId),
    /// `volatile` qualified type
    Volatile(TypeId),
    /// Fixed-size array (`count` is `None` for flexible array members)
    Array
    {
        /// Element type
        element: TypeId,
        /// Number of elements
        count: Option<u64>,
    },
    /// `void`
    Void,
}

impl TypeKind
{
    /// Whether this kind is a struct or union
    #[must_use]
    pub fn is_aggregate(self) -> bool
    {
        matches!(self, TypeKind::Struct | TypeKind::Union)
    }
}

/// A member declared directly in a struct or union
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field
{
    /// Member name, `None` for anonymous members
    pub name: Option<String>,
    /// Byte offset within the owning type
    pub offset: u64,
    /// Type of the member
    pub ty: TypeId,
}

impl Field
{
    /// Whether this member was declared without a name
    #[must_use]
    pub fn is_anonymous(&self) -> bool
    {
        self.name.is_none()
    }
}

/// Description of one type from debug info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor
{
    /// Identity within the graph
    pub id: TypeId,
    /// Source-level name, `None` for anonymous types
    pub name: Option<String>,
    /// Shape of the type
    pub kind: TypeKind,
    /// Byte size when known directly (typedefs and qualifiers inherit theirs)
    pub size: Option<u64>,
    /// Ordered members (empty for non-aggregates)
    pub fields: Vec<Field>,
}

impl TypeDescriptor
{
    /// Whether this type has no name of its own
    #[must_use]
    pub fn is_anonymous(&self) -> bool
    {
        self.name.is_none()
    }
}

/// Immutable arena of type descriptors
#[derive(Debug, Clone, Default)]
pub struct TypeGraph
{
    types: Vec<TypeDescriptor>,
    by_name: HashMap<String, Vec<TypeId>>,
    pointers: HashMap<TypeId, TypeId>,
    pointer_size: u8,
}

/// Upper bound on typedef/qualifier chains, mirroring the reference depth
/// limit used when reading DWARF.
const MAX_ALIAS_DEPTH: usize = 32;

/// Levels of pointer types guaranteed above every named type
pub const MAX_POINTER_DEPTH: usize = 4;

impl TypeGraph
{
    /// Look up a descriptor
    ///
    /// ## Panics
    ///
    /// Never for ids handed out by the builder that produced this graph.
    #[must_use]
    pub fn get(&self, id: TypeId) -> &TypeDescriptor
    {
        &self.types[id.index()]
    }

    /// Number of descriptors
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.types.len()
    }

    /// Whether the graph holds no types
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.types.is_empty()
    }

    /// Iterate over every descriptor in id order
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor>
    {
        self.types.iter()
    }

    /// Pointer size the graph was built for
    #[must_use]
    pub fn pointer_size(&self) -> u8
    {
        self.pointer_size
    }

    /// Strip typedefs and qualifiers
    ///
    /// ## Errors
    ///
    /// `InvalidDebugInfo` if the alias chain is cyclic or absurdly deep.
    pub fn peel(&self, mut id: TypeId) -> FathomResult<TypeId>
    {
        for _ in 0..MAX_ALIAS_DEPTH {
            match self.get(id).kind {
                TypeKind::Typedef(target) | TypeKind::Const(target) | TypeKind::Volatile(target) => id = target,
                _ => return Ok(id),
            }
        }
        Err(FathomError::InvalidDebugInfo(format!(
            "typedef chain starting at {} is too deep",
            self.display_name(id)
        )))
    }

    /// Byte size of a type, following aliases and multiplying out arrays
    #[must_use]
    pub fn size_of(&self, id: TypeId) -> Option<u64>
    {
        let peeled = self.peel(id).ok()?;
        let descriptor = self.get(peeled);
        match descriptor.kind {
            TypeKind::Pointer(_) => descriptor.size.or(Some(u64::from(self.pointer_size))),
            TypeKind::Array { element, count } => {
                descriptor.size.or_else(|| Some(self.size_of(element)?.checked_mul(count?)?))
            }
            TypeKind::Void => None,
            _ => descriptor.size,
        }
    }

    /// Find the one-level pointer type whose target is `target`
    #[must_use]
    pub fn pointer_to(&self, target: TypeId) -> Option<TypeId>
    {
        self.pointers.get(&target).copied()
    }

    /// Look up a type by its C spelling
    ///
    /// Accepts `name`, `struct name`, and `union name`. When several
    /// descriptors share a name, complete definitions win over forward
    /// declarations.
    #[must_use]
    pub fn find(&self, spelling: &str) -> Option<TypeId>
    {
        let spelling = spelling.trim();
        let (wanted_kind, name) = if let Some(rest) = spelling.strip_prefix("struct ") {
            (Some(TypeKind::Struct), rest.trim())
        } else if let Some(rest) = spelling.strip_prefix("union ") {
            (Some(TypeKind::Union), rest.trim())
        } else {
            (None, spelling)
        };

        let candidates = self.by_name.get(name)?;
        let matching = candidates.iter().copied().filter(|id| {
            let kind = self.get(*id).kind;
            match wanted_kind {
                Some(wanted) => kind == wanted,
                None => true,
            }
        });

        let mut fallback = None;
        for id in matching {
            if self.get(id).size.is_some() || !self.get(id).kind.is_aggregate() {
                return Some(id);
            }
            fallback.get_or_insert(id);
        }
        fallback
    }

    /// C-style display name (`int`, `type_z *`, `struct point`, `(anonymous union)`)
    #[must_use]
    pub fn display_name(&self, id: TypeId) -> String
    {
        self.display_name_at_depth(id, 0)
    }

    fn display_name_at_depth(&self, id: TypeId, depth: usize) -> String
    {
        if depth >= MAX_ALIAS_DEPTH {
            return "...".to_string();
        }
        let descriptor = self.get(id);
        match (&descriptor.kind, descriptor.name.as_deref()) {
            (TypeKind::Struct, Some(name)) => format!("struct {name}"),
            (TypeKind::Union, Some(name)) => format!("union {name}"),
            (TypeKind::Struct, None) => "(anonymous struct)".to_string(),
            (TypeKind::Union, None) => "(anonymous union)".to_string(),
            (TypeKind::Typedef(_), Some(name)) | (TypeKind::Scalar(_), Some(name)) => name.to_string(),
            (TypeKind::Typedef(target), None) => self.display_name_at_depth(*target, depth + 1),
            (TypeKind::Scalar(_), None) => format!("(anonymous scalar {})", descriptor.id),
            (TypeKind::Pointer(Some(target)), _) => {
                let inner = self.display_name_at_depth(*target, depth + 1);
                if inner.ends_with('*') {
                    format!("{inner}*")
                } else {
                    format!("{inner} *")
                }
            }
            (TypeKind::Pointer(None), _) => "void *".to_string(),
            (TypeKind::Const(target), _) => format!("const {}", self.display_name_at_depth(*target, depth + 1)),
            (TypeKind::Volatile(target), _) => format!("volatile {}", self.display_name_at_depth(*target, depth + 1)),
            (TypeKind::Array { element, count }, _) => {
                let inner = self.display_name_at_depth(*element, depth + 1);
                match count {
                    Some(count) => format!("{inner}[{count}]"),
                    None => format!("{inner}[]"),
                }
            }
            (TypeKind::Void, _) => "void".to_string(),
        }
    }
}

/// Incremental constructor for a [`TypeGraph`]
///
/// Types can be reserved before they are defined so that self-referential
/// structures (a list node pointing at its own type) can be described.
///
/// ## Example
///
/// ```rust
/// use fathom_core::layout::{ScalarEncoding, TypeGraphBuilder};
///
/// let mut builder = TypeGraphBuilder::new(8);
/// let int = builder.scalar("int", 4, ScalarEncoding::Signed);
/// let point = builder.structure(Some("point"), 8);
/// builder.field(point, Some("x"), 0, int).unwrap();
/// builder.field(point, Some("y"), 4, int).unwrap();
/// let graph = builder.finish().unwrap();
/// assert_eq!(graph.display_name(point), "struct point");
/// ```
#[derive(Debug, Default)]
pub struct TypeGraphBuilder
{
    types: Vec<Option<TypeDescriptor>>,
    pointer_size: u8,
}

impl TypeGraphBuilder
{
    /// Create a builder for a target with the given pointer size in bytes
    #[must_use]
    pub fn new(pointer_size: u8) -> Self
    {
        Self {
            types: Vec::new(),
            pointer_size,
        }
    }

    /// Allocate an id whose descriptor is supplied later with [`Self::define`]
    pub fn reserve(&mut self) -> TypeId
    {
        let id = TypeId(u32::try_from(self.types.len()).unwrap_or(u32::MAX));
        self.types.push(None);
        id
    }

    /// Fill in a reserved descriptor
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` if the id is unknown or already defined.
    pub fn define(&mut self, id: TypeId, name: Option<&str>, kind: TypeKind, size: Option<u64>) -> FathomResult<()>
    {
        let slot = self
            .types
            .get_mut(id.index())
            .ok_or_else(|| FathomError::InvalidArgument(format!("type {id} was never reserved")))?;
        if slot.is_some() {
            return Err(FathomError::InvalidArgument(format!("type {id} is already defined")));
        }
        *slot = Some(TypeDescriptor {
            id,
            name: name.map(str::to_string),
            kind,
            size,
            fields: Vec::new(),
        });
        Ok(())
    }

    fn push(&mut self, name: Option<&str>, kind: TypeKind, size: Option<u64>) -> TypeId
    {
        let id = self.reserve();
        self.types[id.index()] = Some(TypeDescriptor {
            id,
            name: name.map(str::to_string),
            kind,
            size,
            fields: Vec::new(),
        });
        id
    }

    /// Add a base type
    pub fn scalar(&mut self, name: &str, size: u64, encoding: ScalarEncoding) -> TypeId
    {
        self.push(Some(name), TypeKind::Scalar(encoding), Some(size))
    }

    /// Add a struct; anonymous when `name` is `None`
    pub fn structure(&mut self, name: Option<&str>, size: u64) -> TypeId
    {
        self.push(name, TypeKind::Struct, Some(size))
    }

    /// Add a union; anonymous when `name` is `None`
    pub fn union(&mut self, name: Option<&str>, size: u64) -> TypeId
    {
        self.push(name, TypeKind::Union, Some(size))
    }

    /// Add a pointer type (`None` target means `void *`)
    pub fn pointer(&mut self, target: Option<TypeId>) -> TypeId
    {
        let size = u64::from(self.pointer_size);
        self.push(None, TypeKind::Pointer(target), Some(size))
    }

    /// Add a typedef
    pub fn typedef(&mut self, name: &str, target: TypeId) -> TypeId
    {
        self.push(Some(name), TypeKind::Typedef(target), None)
    }

    /// Add an array type
    pub fn array(&mut self, element: TypeId, count: Option<u64>) -> TypeId
    {
        self.push(None, TypeKind::Array { element, count }, None)
    }

    /// Add a `const` or `volatile` wrapper
    pub fn qualified(&mut self, kind: TypeKind) -> TypeId
    {
        self.push(None, kind, None)
    }

    /// Add `void`
    pub fn void(&mut self) -> TypeId
    {
        self.push(Some("void"), TypeKind::Void, None)
    }

    /// Append a member to a struct or union
    ///
    /// Union members always live at offset 0; a non-zero offset for a union
    /// member is ignored.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` if `owner` is undefined or not an aggregate.
    pub fn field(&mut self, owner: TypeId, name: Option<&str>, offset: u64, ty: TypeId) -> FathomResult<()>
    {
        let descriptor = self
            .types
            .get_mut(owner.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| FathomError::InvalidArgument(format!("type {owner} is not defined")))?;

        let offset = match descriptor.kind {
            TypeKind::Struct => offset,
            TypeKind::Union => {
                if offset != 0 {
                    trace!(union = %owner, offset, "ignoring non-zero union member offset");
                }
                0
            }
            _ => {
                return Err(FathomError::InvalidArgument(format!(
                    "type {owner} is not a struct or union"
                )))
            }
        };

        descriptor.fields.push(Field {
            name: name.map(str::to_string),
            offset,
            ty,
        });
        Ok(())
    }

    /// Validate references and freeze the graph
    ///
    /// Every named type and every pointer type gets a chain of pointer types
    /// [`MAX_POINTER_DEPTH`] levels deep, reusing the ones the debug info
    /// already has, so that a cast such as `(type_z **)` always has a target.
    ///
    /// ## Errors
    ///
    /// `InvalidDebugInfo` if a reserved id was never defined or a reference
    /// points outside the graph.
    pub fn finish(self) -> FathomResult<TypeGraph>
    {
        let pointer_size = self.pointer_size;
        let mut types = Vec::with_capacity(self.types.len());
        for (index, slot) in self.types.into_iter().enumerate() {
            let descriptor =
                slot.ok_or_else(|| FathomError::InvalidDebugInfo(format!("type #{index} was reserved but never defined")))?;
            types.push(descriptor);
        }

        let count = types.len();
        let in_range = |id: TypeId| id.index() < count;
        for descriptor in &types {
            let referenced = match descriptor.kind {
                TypeKind::Pointer(Some(target))
                | TypeKind::Typedef(target)
                | TypeKind::Const(target)
                | TypeKind::Volatile(target)
                | TypeKind::Array { element: target, .. } => Some(target),
                _ => None,
            };
            let dangling = referenced.into_iter().chain(descriptor.fields.iter().map(|field| field.ty)).find(|id| !in_range(*id));
            if let Some(id) = dangling {
                return Err(FathomError::InvalidDebugInfo(format!(
                    "type {} references missing type {id}",
                    descriptor.id
                )));
            }
        }

        let mut pointers = HashMap::new();
        for descriptor in &types {
            if let TypeKind::Pointer(Some(target)) = descriptor.kind {
                pointers.entry(target).or_insert(descriptor.id);
            }
        }

        let mut frontier: Vec<TypeId> = types
            .iter()
            .filter(|descriptor| descriptor.name.is_some() || matches!(descriptor.kind, TypeKind::Pointer(_)))
            .map(|descriptor| descriptor.id)
            .collect();
        for _ in 0..MAX_POINTER_DEPTH {
            let mut next = Vec::with_capacity(frontier.len());
            for target in frontier {
                let pointer = match pointers.get(&target) {
                    Some(&pointer) => pointer,
                    None => {
                        let id = TypeId(u32::try_from(types.len()).unwrap_or(u32::MAX));
                        types.push(TypeDescriptor {
                            id,
                            name: None,
                            kind: TypeKind::Pointer(Some(target)),
                            size: Some(u64::from(pointer_size)),
                            fields: Vec::new(),
                        });
                        pointers.insert(target, id);
                        id
                    }
                };
                next.push(pointer);
            }
            next.sort_unstable();
            next.dedup();
            frontier = next;
        }

        let mut by_name: HashMap<String, Vec<TypeId>> = HashMap::new();
        for descriptor in &types {
            if let Some(name) = &descriptor.name {
                by_name.entry(name.clone()).or_default().push(descriptor.id);
            }
        }

        Ok(TypeGraph {
            types,
            by_name,
            pointers,
            pointer_size,
        })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_union_members_forced_to_offset_zero()
    {
        let mut builder = TypeGraphBuilder::new(8);
        let int = builder.scalar("int", 4, ScalarEncoding::Signed);
        let u = builder.union(Some("u"), 4);
        builder.field(u, Some("a"), 0, int).unwrap();
        builder.field(u, Some("b"), 12, int).unwrap();
        let graph = builder.finish().unwrap();

        assert!(graph.get(u).fields.iter().all(|field| field.offset == 0));
    }

    #[test]
    fn test_field_on_scalar_is_rejected()
    {
        let mut builder = TypeGraphBuilder::new(8);
        let int = builder.scalar("int", 4, ScalarEncoding::Signed);
        assert!(matches!(
            builder.field(int, Some("x"), 0, int),
            Err(FathomError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reserved_but_undefined_type_fails_finish()
    {
        let mut builder = TypeGraphBuilder::new(8);
        builder.reserve();
        assert!(matches!(builder.finish(), Err(FathomError::InvalidDebugInfo(_))));
    }

    #[test]
    fn test_display_names()
    {
        let mut builder = TypeGraphBuilder::new(8);
        let int = builder.scalar("int", 4, ScalarEncoding::Signed);
        let z = builder.structure(None, 4);
        builder.field(z, Some("dummy"), 0, int).unwrap();
        let type_z = builder.typedef("type_z", z);
        let pz = builder.pointer(Some(type_z));
        let ppz = builder.pointer(Some(pz));
        let arr = builder.array(int, Some(3));
        let c = builder.qualified(TypeKind::Const(int));
        let void_ptr = builder.pointer(None);
        let graph = builder.finish().unwrap();

        assert_eq!(graph.display_name(z), "(anonymous struct)");
        assert_eq!(graph.display_name(pz), "type_z *");
        assert_eq!(graph.display_name(ppz), "type_z **");
        assert_eq!(graph.display_name(arr), "int[3]");
        assert_eq!(graph.display_name(c), "const int");
        assert_eq!(graph.display_name(void_ptr), "void *");
    }

    #[test]
    fn test_size_of_follows_aliases_and_arrays()
    {
        let mut builder = TypeGraphBuilder::new(8);
        let int = builder.scalar("int", 4, ScalarEncoding::Signed);
        let alias = builder.typedef("myint", int);
        let arr = builder.array(alias, Some(5));
        let ptr = builder.pointer(Some(arr));
        let graph = builder.finish().unwrap();

        assert_eq!(graph.size_of(alias), Some(4));
        assert_eq!(graph.size_of(arr), Some(20));
        assert_eq!(graph.size_of(ptr), Some(8));
    }

    #[test]
    fn test_finish_synthesizes_pointer_for_named_types()
    {
        let mut builder = TypeGraphBuilder::new(8);
        let int = builder.scalar("int", 4, ScalarEncoding::Signed);
        let existing = builder.pointer(Some(int));
        let y = builder.structure(Some("y"), 4);
        builder.field(y, Some("dummy"), 0, int).unwrap();
        let graph = builder.finish().unwrap();

        assert_eq!(graph.pointer_to(int), Some(existing));
        let synthesized = graph.pointer_to(y).unwrap();
        assert_eq!(graph.get(synthesized).kind, TypeKind::Pointer(Some(y)));

        let mut level = y;
        for _ in 0..MAX_POINTER_DEPTH {
            level = graph.pointer_to(level).unwrap();
        }
        assert_eq!(graph.display_name(level), "struct y ****");
        assert_eq!(graph.display_name(graph.pointer_to(existing).unwrap()), "int **");
    }

    #[test]
    fn test_find_prefers_complete_definitions()
    {
        let mut builder = TypeGraphBuilder::new(8);
        let declaration = builder.reserve();
        builder.define(declaration, Some("node"), TypeKind::Struct, None).unwrap();
        let definition = builder.structure(Some("node"), 16);
        let graph = builder.finish().unwrap();

        assert_eq!(graph.find("node"), Some(definition));
        assert_eq!(graph.find("struct node"), Some(definition));
        assert_eq!(graph.find("union node"), None);
        assert_eq!(graph.find("missing"), None);
    }
}
