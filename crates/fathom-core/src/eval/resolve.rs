//! Step-by-step address computation for member-access expressions.
//!
//! Each [`AccessStep`] maps the current [`LiveVariable`] to the next one.
//! Member access is pure arithmetic on flattened offsets; only pointer
//! dereferences touch target memory, with exactly one pointer-sized read per
//! dereference.

use tracing::debug;

use super::expr::{AccessStep, CastTarget, Expression};
use crate::error::{FathomError, FathomResult};
use crate::layout::{LayoutIndex, TypeId, TypeKind};
use crate::memory::MemoryReader;
use crate::types::Address;

/// A typed location in target memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveVariable
{
    /// Address of the first byte of the value
    pub address: Address,
    /// Type of the value
    pub ty: TypeId,
    /// Expression text that produced this location
    pub path: String,
}

impl LiveVariable
{
    /// Create a root variable
    pub fn new(path: impl Into<String>, address: Address, ty: TypeId) -> Self
    {
        Self {
            address,
            ty,
            path: path.into(),
        }
    }
}

/// Resolves access steps against a layout index and a memory reader
///
/// The resolver borrows both for the duration of one evaluation and never
/// writes to target memory.
pub struct Resolver<'a, M: MemoryReader + ?Sized>
{
    index: &'a LayoutIndex,
    memory: &'a M,
}

impl<'a, M: MemoryReader + ?Sized> Resolver<'a, M>
{
    /// Create a resolver for one evaluation
    pub fn new(index: &'a LayoutIndex, memory: &'a M) -> Self
    {
        Self { index, memory }
    }

    /// Apply the steps of `expression` to `root`
    ///
    /// `root` must be the variable named by `expression.root()`.
    ///
    /// ## Errors
    ///
    /// The first failing step's error; nothing after it is evaluated.
    pub fn resolve_expression(&self, root: LiveVariable, expression: &Expression) -> FathomResult<LiveVariable>
    {
        self.resolve(root, expression.steps())
    }

    /// Apply `steps` to `root` in order
    ///
    /// ## Errors
    ///
    /// The first failing step's error; nothing after it is evaluated.
    pub fn resolve(&self, root: LiveVariable, steps: &[AccessStep]) -> FathomResult<LiveVariable>
    {
        steps.iter().try_fold(root, |current, step| self.step(&current, step))
    }

    /// Apply one step
    ///
    /// ## Errors
    ///
    /// - `NotFound`: member name absent after flattening
    /// - `NullDereference`: a dereferenced pointer is null
    /// - `NotAggregate` / `NotPointer`: the step doesn't fit the current type
    /// - `UnknownType`: a cast names an unknown type
    /// - `MemoryRead`: the pointer read failed
    pub fn step(&self, current: &LiveVariable, step: &AccessStep) -> FathomResult<LiveVariable>
    {
        let path = step.apply_to_path(&current.path);
        let next = match step {
            AccessStep::Member(name) => self.member(current, current.address, current.ty, name, path)?,
            AccessStep::Arrow(name) => {
                let target = self.pointee(current)?;
                let address = self.dereference(current, &path)?;
                self.member(current, address, target, name, path)?
            }
            AccessStep::Index(index) => self.index(current, *index, path)?,
            AccessStep::Deref => {
                let graph = self.index.graph();
                let peeled = graph.peel(current.ty)?;
                if let TypeKind::Array { element, .. } = graph.get(peeled).kind {
                    LiveVariable::new(path, current.address, element)
                } else {
                    let target = self.pointee(current)?;
                    let address = self.dereference(current, &path)?;
                    LiveVariable::new(path, address, target)
                }
            }
            AccessStep::Cast(target) => self.cast(current, target, path)?,
        };

        debug!(
            expression = %next.path,
            address = %next.address,
            ty = %self.index.graph().display_name(next.ty),
            "resolved step"
        );
        Ok(next)
    }

    fn member(
        &self,
        current: &LiveVariable,
        base: Address,
        ty: TypeId,
        name: &str,
        path: String,
    ) -> FathomResult<LiveVariable>
    {
        let graph = self.index.graph();
        let peeled = graph.peel(ty)?;
        if !graph.get(peeled).kind.is_aggregate() {
            return Err(FathomError::NotAggregate {
                expression: current.path.clone(),
                type_name: graph.display_name(ty),
            });
        }

        let member = self.index.flatten(peeled)?.member(name)?.clone();
        let address = base.checked_add(member.offset).ok_or_else(|| FathomError::MemoryRead {
            address: base,
            length: 0,
            details: format!("offset {} of '{name}' overflows the address space", member.offset),
        })?;
        Ok(LiveVariable::new(path, address, member.ty))
    }

    /// Target type of the current pointer value
    fn pointee(&self, current: &LiveVariable) -> FathomResult<TypeId>
    {
        let graph = self.index.graph();
        let peeled = graph.peel(current.ty)?;
        match graph.get(peeled).kind {
            TypeKind::Pointer(Some(target)) => Ok(target),
            TypeKind::Pointer(None) => Err(FathomError::InvalidExpression {
                expression: current.path.clone(),
                reason: "cannot dereference a 'void *'".to_string(),
            }),
            _ => Err(FathomError::NotPointer {
                expression: current.path.clone(),
                type_name: graph.display_name(current.ty),
            }),
        }
    }

    /// Read the pointer stored at the current location
    fn dereference(&self, current: &LiveVariable, path: &str) -> FathomResult<Address>
    {
        let pointer = self.memory.read_pointer(current.address)?;
        if pointer.is_null() {
            debug!(expression = %path, "null pointer dereference");
            return Err(FathomError::NullDereference {
                expression: path.to_string(),
            });
        }
        Ok(pointer)
    }

    fn index(&self, current: &LiveVariable, index: u64, path: String) -> FathomResult<LiveVariable>
    {
        let graph = self.index.graph();
        let peeled = graph.peel(current.ty)?;
        let (base, element) = match graph.get(peeled).kind {
            TypeKind::Array { element, .. } => (current.address, element),
            TypeKind::Pointer(Some(element)) => (self.dereference(current, &path)?, element),
            _ => {
                return Err(FathomError::NotPointer {
                    expression: current.path.clone(),
                    type_name: graph.display_name(current.ty),
                })
            }
        };

        let stride = graph.size_of(element).ok_or_else(|| {
            FathomError::InvalidDebugInfo(format!("element type {} has no size", graph.display_name(element)))
        })?;
        let address = stride
            .checked_mul(index)
            .and_then(|offset| base.checked_add(offset))
            .ok_or_else(|| FathomError::InvalidExpression {
                expression: path.clone(),
                reason: "index overflows the address space".to_string(),
            })?;
        Ok(LiveVariable::new(path, address, element))
    }

    /// Reinterpret a scalar or pointer value in place as another type of
    /// the same size.
    fn cast(&self, current: &LiveVariable, target: &CastTarget, path: String) -> FathomResult<LiveVariable>
    {
        let graph = self.index.graph();
        let mut ty = graph
            .find(&target.type_name)
            .ok_or_else(|| FathomError::UnknownType(target.type_name.clone()))?;
        for _ in 0..target.pointer_depth {
            ty = graph.pointer_to(ty).ok_or_else(|| FathomError::UnknownType(target.to_string()))?;
        }

        let source_kind = graph.get(graph.peel(current.ty)?).kind;
        let target_kind = graph.get(graph.peel(ty)?).kind;
        let castable = |kind: TypeKind| matches!(kind, TypeKind::Scalar(_) | TypeKind::Pointer(_));
        if !castable(source_kind) || !castable(target_kind) {
            return Err(FathomError::InvalidExpression {
                expression: path,
                reason: format!(
                    "cannot cast {} to {}",
                    graph.display_name(current.ty),
                    graph.display_name(ty)
                ),
            });
        }

        let (from, to) = (graph.size_of(current.ty), graph.size_of(ty));
        if from != to {
            return Err(FathomError::InvalidExpression {
                expression: path,
                reason: format!(
                    "cannot reinterpret {}-byte {} as {}-byte {}",
                    from.unwrap_or(0),
                    graph.display_name(current.ty),
                    to.unwrap_or(0),
                    graph.display_name(ty)
                ),
            });
        }

        Ok(LiveVariable::new(path, current.address, ty))
    }
}
