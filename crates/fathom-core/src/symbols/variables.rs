//! Global and function-local variables.
//!
//! Only the two location forms unoptimized C produces are understood:
//! `DW_OP_addr` for statics and `DW_OP_fbreg` for stack slots. Variables
//! described any other way (location lists, registers, pieces) are left out
//! of the table and surface as unknown variables.

use gimli::{constants, AttributeValue, DebuggingInformationEntry, Expression, Operation, Unit};
use tracing::trace;

use super::demangle::function_names_match;
use super::loader::{attr_to_string, flag_attr, DieKey, LoadedTypes};
use super::{map_dwarf_error, OwnedDwarf, OwnedReader};
use crate::error::{FathomError, FathomResult};
use crate::layout::TypeId;
use crate::types::{Address, Registers};

/// DWARF register number of `rbp` on x86-64
const X86_64_RBP: u16 = 6;
/// DWARF register number of `rsp` on x86-64
const X86_64_RSP: u16 = 7;

/// Where a variable lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLocation
{
    /// Link-time address; add the load bias for position-independent images
    Static(u64),
    /// Signed offset from the enclosing function's frame base
    FrameOffset(i64),
}

/// How a function computes its frame base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBase
{
    /// `DW_OP_call_frame_cfa`
    CallFrameCfa,
    /// `DW_OP_reg*` (offset 0) or `DW_OP_breg*`
    Register
    {
        register: u16,
        offset: i64,
    },
    /// No frame base, or one this debugger can't evaluate
    Unknown,
}

/// A named variable with a known type and location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo
{
    pub name: String,
    pub ty: TypeId,
    pub location: VariableLocation,
}

/// A function with a code range and its locals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionScope
{
    pub name: String,
    pub linkage_name: Option<String>,
    /// First instruction (link-time address)
    pub low_pc: u64,
    /// One past the last instruction (link-time address)
    pub high_pc: u64,
    pub frame_base: FrameBase,
    /// Parameters and locals, including those of nested lexical blocks
    pub locals: Vec<VariableInfo>,
}

impl FunctionScope
{
    /// Whether the link-time address `pc` is inside this function
    #[must_use]
    pub fn contains(&self, pc: u64) -> bool
    {
        pc >= self.low_pc && pc < self.high_pc
    }

    /// Parameter or local by name; the innermost declaration wins
    #[must_use]
    pub fn local(&self, name: &str) -> Option<&VariableInfo>
    {
        self.locals.iter().rev().find(|variable| variable.name == name)
    }

    /// Runtime frame base for the given register state
    ///
    /// The canonical frame address is computed as `rbp + 16`, which holds
    /// for frame-pointer code once the prologue has run.
    ///
    /// ## Errors
    ///
    /// `Unsupported` for frame bases other than the CFA, `rbp`, or `rsp`.
    pub fn frame_base_address(&self, registers: &Registers) -> FathomResult<Address>
    {
        match self.frame_base {
            FrameBase::CallFrameCfa => Ok(Address::new(registers.fp).offset(16)),
            FrameBase::Register {
                register: X86_64_RBP,
                offset,
            } => Ok(Address::new(registers.fp).offset(offset)),
            FrameBase::Register {
                register: X86_64_RSP,
                offset,
            } => Ok(Address::new(registers.sp).offset(offset)),
            FrameBase::Register { register, .. } => Err(FathomError::Unsupported(format!(
                "frame base in DWARF register {register} of {}",
                self.name
            ))),
            FrameBase::Unknown => Err(FathomError::Unsupported(format!("no usable frame base for {}", self.name))),
        }
    }
}

/// Variables of one image
#[derive(Debug, Clone, Default)]
pub struct VariableTable
{
    globals: Vec<VariableInfo>,
    scopes: Vec<FunctionScope>,
}

impl VariableTable
{
    /// Build a table from already-collected parts
    #[must_use]
    pub fn from_parts(globals: Vec<VariableInfo>, scopes: Vec<FunctionScope>) -> Self
    {
        Self { globals, scopes }
    }

    pub(crate) fn load(dwarf: &OwnedDwarf, units: &[Unit<OwnedReader>], types: &LoadedTypes) -> FathomResult<Self>
    {
        let mut table = Self::default();
        for (index, unit) in units.iter().enumerate() {
            table.load_unit(dwarf, index, unit, types)?;
        }
        Ok(table)
    }

    fn load_unit(&mut self, dwarf: &OwnedDwarf, index: usize, unit: &Unit<OwnedReader>, types: &LoadedTypes) -> FathomResult<()>
    {
        let mut cursor = unit.entries();
        let mut depth = 0isize;
        // Depth of the subprogram DIE currently being walked
        let mut scope_depth: Option<isize> = None;

        while let Some((delta, entry)) = cursor.next_dfs().map_err(|err| map_dwarf_error("traversing DIE tree", err))? {
            depth += delta;
            if scope_depth.is_some_and(|scope| depth <= scope) {
                scope_depth = None;
            }

            match entry.tag() {
                constants::DW_TAG_subprogram if scope_depth.is_none() => {
                    if let Some(scope) = function_scope(dwarf, unit, entry)? {
                        self.scopes.push(scope);
                        scope_depth = Some(depth);
                    }
                }
                constants::DW_TAG_variable | constants::DW_TAG_formal_parameter => {
                    let Some(variable) = variable_info(dwarf, index, unit, entry, types)? else {
                        continue;
                    };
                    match (scope_depth, variable.location) {
                        (Some(_), _) => {
                            if let Some(scope) = self.scopes.last_mut() {
                                scope.locals.push(variable);
                            }
                        }
                        (None, VariableLocation::Static(_)) => self.globals.push(variable),
                        (None, VariableLocation::FrameOffset(_)) => {
                            trace!(name = %variable.name, "frame-relative variable outside a function");
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn globals(&self) -> &[VariableInfo]
    {
        &self.globals
    }

    #[must_use]
    pub fn scopes(&self) -> &[FunctionScope]
    {
        &self.scopes
    }

    /// Global (file-scope or extern) variable by name
    #[must_use]
    pub fn global(&self, name: &str) -> Option<&VariableInfo>
    {
        self.globals.iter().find(|variable| variable.name == name)
    }

    /// Function containing the link-time address `pc`
    #[must_use]
    pub fn scope_at(&self, pc: u64) -> Option<&FunctionScope>
    {
        self.scopes.iter().find(|scope| scope.contains(pc))
    }

    /// Function by source or demangled name
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&FunctionScope>
    {
        self.scopes
            .iter()
            .find(|scope| function_names_match(name, &scope.name, scope.linkage_name.as_deref()))
    }

    /// Look `name` up as seen from `pc`: locals of the enclosing function
    /// shadow globals
    #[must_use]
    pub fn lookup(&self, name: &str, pc: Option<u64>) -> Option<(&VariableInfo, Option<&FunctionScope>)>
    {
        let scope = pc.and_then(|pc| self.scope_at(pc));
        if let Some(local) = scope.and_then(|scope| scope.local(name)) {
            return Some((local, scope));
        }
        self.global(name).map(|global| (global, None))
    }
}

fn function_scope(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
) -> FathomResult<Option<FunctionScope>>
{
    let Some(low_pc) = address_attr(dwarf, unit, entry, constants::DW_AT_low_pc)? else {
        return Ok(None);
    };
    let high_pc = match entry
        .attr(constants::DW_AT_high_pc)
        .map_err(|err| map_dwarf_error("reading DW_AT_high_pc", err))?
        .map(|attr| attr.value())
    {
        Some(value @ (AttributeValue::Addr(_) | AttributeValue::DebugAddrIndex(_))) => dwarf
            .attr_address(unit, value)
            .map_err(|err| map_dwarf_error("resolving DW_AT_high_pc", err))?,
        Some(value) => value.udata_value().map(|length| low_pc.saturating_add(length)),
        None => None,
    };
    let Some(high_pc) = high_pc else {
        return Ok(None);
    };

    let name = string_attr(dwarf, unit, entry, constants::DW_AT_name)?;
    let linkage_name = string_attr(dwarf, unit, entry, constants::DW_AT_linkage_name)?;
    let Some(name) = name.or_else(|| linkage_name.clone()) else {
        return Ok(None);
    };

    let frame_base = match entry
        .attr(constants::DW_AT_frame_base)
        .map_err(|err| map_dwarf_error("reading DW_AT_frame_base", err))?
        .map(|attr| attr.value())
    {
        Some(AttributeValue::Exprloc(expression)) => frame_base(unit, expression)?,
        _ => FrameBase::Unknown,
    };

    Ok(Some(FunctionScope {
        name,
        linkage_name,
        low_pc,
        high_pc,
        frame_base,
        locals: Vec::new(),
    }))
}

fn frame_base(unit: &Unit<OwnedReader>, expression: Expression<OwnedReader>) -> FathomResult<FrameBase>
{
    let mut operations = expression.operations(unit.encoding());
    let first = operations
        .next()
        .map_err(|err| map_dwarf_error("parsing DW_AT_frame_base", err))?;
    Ok(match first {
        Some(Operation::CallFrameCFA) => FrameBase::CallFrameCfa,
        Some(Operation::Register { register }) => FrameBase::Register {
            register: register.0,
            offset: 0,
        },
        Some(Operation::RegisterOffset { register, offset, .. }) => FrameBase::Register {
            register: register.0,
            offset,
        },
        _ => FrameBase::Unknown,
    })
}

fn variable_info(
    dwarf: &OwnedDwarf,
    unit_index: usize,
    unit: &Unit<OwnedReader>,
    entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    types: &LoadedTypes,
) -> FathomResult<Option<VariableInfo>>
{
    if flag_attr(entry, constants::DW_AT_declaration)? {
        return Ok(None);
    }
    let Some(name) = string_attr(dwarf, unit, entry, constants::DW_AT_name)? else {
        return Ok(None);
    };

    let location = match entry
        .attr(constants::DW_AT_location)
        .map_err(|err| map_dwarf_error("reading DW_AT_location", err))?
        .map(|attr| attr.value())
    {
        Some(AttributeValue::Exprloc(expression)) => location(dwarf, unit, expression)?,
        _ => None,
    };
    let Some(location) = location else {
        trace!(%name, "variable has no supported location");
        return Ok(None);
    };

    let ty = match entry
        .attr(constants::DW_AT_type)
        .map_err(|err| map_dwarf_error("reading variable type", err))?
        .map(|attr| attr.value())
    {
        Some(AttributeValue::UnitRef(offset)) => types.type_of(DieKey {
            unit: unit_index,
            offset,
        }),
        _ => None,
    };
    let ty = ty.unwrap_or_else(|| types.void());

    Ok(Some(VariableInfo { name, ty, location }))
}

fn location(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    expression: Expression<OwnedReader>,
) -> FathomResult<Option<VariableLocation>>
{
    let mut operations = expression.operations(unit.encoding());
    let first = operations
        .next()
        .map_err(|err| map_dwarf_error("parsing DW_AT_location", err))?;
    let location = match first {
        Some(Operation::Address { address }) => Some(VariableLocation::Static(address)),
        Some(Operation::AddressIndex { index }) => Some(VariableLocation::Static(
            dwarf
                .address(unit, index)
                .map_err(|err| map_dwarf_error("resolving DW_OP_addrx", err))?,
        )),
        Some(Operation::FrameOffset { offset }) => Some(VariableLocation::FrameOffset(offset)),
        _ => None,
    };

    // A trailing operation means a computed location; not supported
    let trailing = operations
        .next()
        .map_err(|err| map_dwarf_error("parsing DW_AT_location", err))?;
    Ok(if trailing.is_some() { None } else { location })
}

fn address_attr(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    name: constants::DwAt,
) -> FathomResult<Option<u64>>
{
    let Some(attr) = entry
        .attr(name)
        .map_err(|err| map_dwarf_error("reading address attribute", err))?
    else {
        return Ok(None);
    };
    dwarf
        .attr_address(unit, attr.value())
        .map_err(|err| map_dwarf_error("resolving address attribute", err))
}

pub(crate) fn string_attr(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    name: constants::DwAt,
) -> FathomResult<Option<String>>
{
    let Some(attr) = entry
        .attr(name)
        .map_err(|err| map_dwarf_error("reading string attribute", err))?
    else {
        return Ok(None);
    };
    attr_to_string(dwarf, unit, attr.value()).map(Some)
}
