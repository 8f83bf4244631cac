//! DWARF type DIEs to [`TypeGraph`].
//!
//! Loading is two passes over every unit: the first reserves a [`TypeId`]
//! for each type DIE, the second defines them. References between types
//! (including a struct pointing at itself) therefore never need a fixup.

use std::collections::HashMap;

use gimli::{
    constants, AttributeValue, DebugTypeSignature, DebuggingInformationEntry, DwAte, Operation, Unit, UnitOffset,
    UnitSectionOffset, UnitType,
};
use tracing::{debug, trace};

use super::{map_dwarf_error, OwnedDwarf, OwnedReader};
use crate::error::FathomResult;
use crate::layout::{ScalarEncoding, TypeGraph, TypeGraphBuilder, TypeId, TypeKind};

/// Position of a DIE: index into the loaded unit list plus unit offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DieKey
{
    pub(crate) unit: usize,
    pub(crate) offset: UnitOffset<usize>,
}

/// Result of a type load
#[derive(Debug)]
pub(crate) struct LoadedTypes
{
    pub(crate) graph: TypeGraph,
    dies: HashMap<DieKey, TypeId>,
    void: TypeId,
}

impl LoadedTypes
{
    /// Type defined by the DIE at `key`
    pub(crate) fn type_of(&self, key: DieKey) -> Option<TypeId>
    {
        self.dies.get(&key).copied()
    }

    /// The shared `void` descriptor
    pub(crate) fn void(&self) -> TypeId
    {
        self.void
    }
}

fn is_type_tag(tag: constants::DwTag) -> bool
{
    matches!(
        tag,
        constants::DW_TAG_base_type
            | constants::DW_TAG_structure_type
            | constants::DW_TAG_class_type
            | constants::DW_TAG_union_type
            | constants::DW_TAG_enumeration_type
            | constants::DW_TAG_pointer_type
            | constants::DW_TAG_reference_type
            | constants::DW_TAG_rvalue_reference_type
            | constants::DW_TAG_typedef
            | constants::DW_TAG_const_type
            | constants::DW_TAG_volatile_type
            | constants::DW_TAG_restrict_type
            | constants::DW_TAG_atomic_type
            | constants::DW_TAG_array_type
            | constants::DW_TAG_subroutine_type
            | constants::DW_TAG_unspecified_type
    )
}

/// Converts the type DIEs of a set of units into a [`TypeGraph`]
pub struct TypeLoader<'a>
{
    dwarf: &'a OwnedDwarf,
    units: &'a [Unit<OwnedReader>],
    builder: TypeGraphBuilder,
    dies: HashMap<DieKey, TypeId>,
    void: TypeId,
}

impl<'a> TypeLoader<'a>
{
    pub(crate) fn new(dwarf: &'a OwnedDwarf, units: &'a [Unit<OwnedReader>], pointer_size: u8) -> Self
    {
        let mut builder = TypeGraphBuilder::new(pointer_size);
        let void = builder.void();
        Self {
            dwarf,
            units,
            builder,
            dies: HashMap::new(),
            void,
        }
    }

    pub(crate) fn load(mut self) -> FathomResult<LoadedTypes>
    {
        let units = self.units;
        let mut pending = Vec::new();
        for (index, unit) in units.iter().enumerate() {
            let mut cursor = unit.entries();
            while let Some((_delta, entry)) = cursor.next_dfs().map_err(|err| map_dwarf_error("traversing DIE tree", err))? {
                if !is_type_tag(entry.tag()) {
                    continue;
                }
                let key = DieKey {
                    unit: index,
                    offset: entry.offset(),
                };
                let id = self.builder.reserve();
                self.dies.insert(key, id);
                pending.push(key);
            }
        }

        for key in &pending {
            let unit = &units[key.unit];
            let entry = unit
                .entry(key.offset)
                .map_err(|err| map_dwarf_error("resolving type DIE", err))?;
            self.define(*key, unit, &entry)?;
        }

        debug!(types = pending.len(), "converted type DIEs");
        Ok(LoadedTypes {
            graph: self.builder.finish()?,
            dies: self.dies,
            void: self.void,
        })
    }

    fn define(
        &mut self,
        key: DieKey,
        unit: &Unit<OwnedReader>,
        entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    ) -> FathomResult<()>
    {
        let id = self.dies[&key];
        let name = self.entry_name(unit, entry)?;
        let name = name.as_deref();
        let size = udata_attr(entry, constants::DW_AT_byte_size, "reading DW_AT_byte_size")?;

        match entry.tag() {
            constants::DW_TAG_base_type => {
                let encoding = base_encoding(entry)?;
                self.builder.define(id, name, TypeKind::Scalar(encoding), size)
            }
            constants::DW_TAG_enumeration_type => {
                let encoding = enum_encoding(unit, entry)?;
                self.builder.define(id, name, TypeKind::Scalar(encoding), size)
            }
            constants::DW_TAG_structure_type | constants::DW_TAG_class_type | constants::DW_TAG_union_type => {
                let kind = if entry.tag() == constants::DW_TAG_union_type {
                    TypeKind::Union
                } else {
                    TypeKind::Struct
                };
                let declaration = flag_attr(entry, constants::DW_AT_declaration)?;
                let size = if declaration { None } else { size.or(Some(0)) };
                self.builder.define(id, name, kind, size)?;
                self.define_members(key, unit, id)
            }
            constants::DW_TAG_pointer_type
            | constants::DW_TAG_reference_type
            | constants::DW_TAG_rvalue_reference_type => {
                let target = self.type_ref(key.unit, entry)?.filter(|target| *target != self.void);
                let size = size.or(Some(u64::from(unit.encoding().address_size)));
                self.builder.define(id, None, TypeKind::Pointer(target), size)
            }
            constants::DW_TAG_typedef => {
                let target = self.type_ref(key.unit, entry)?.unwrap_or(self.void);
                self.builder.define(id, name, TypeKind::Typedef(target), None)
            }
            constants::DW_TAG_const_type => {
                let target = self.type_ref(key.unit, entry)?.unwrap_or(self.void);
                self.builder.define(id, None, TypeKind::Const(target), None)
            }
            constants::DW_TAG_volatile_type => {
                let target = self.type_ref(key.unit, entry)?.unwrap_or(self.void);
                self.builder.define(id, None, TypeKind::Volatile(target), None)
            }
            constants::DW_TAG_restrict_type | constants::DW_TAG_atomic_type => {
                let target = self.type_ref(key.unit, entry)?.unwrap_or(self.void);
                self.builder.define(id, None, TypeKind::Typedef(target), None)
            }
            constants::DW_TAG_array_type => {
                let element = self.type_ref(key.unit, entry)?.unwrap_or(self.void);
                let counts = self.array_counts(unit, key.offset)?;
                let (outer, inner) = counts.split_first().map_or((None, &[][..]), |(first, rest)| (*first, rest));
                let mut element = element;
                for count in inner.iter().rev() {
                    element = self.builder.array(element, *count);
                }
                self.builder.define(id, None, TypeKind::Array { element, count: outer }, size)
            }
            _ => self.builder.define(id, name, TypeKind::Void, None),
        }
    }

    fn define_members(&mut self, key: DieKey, unit: &Unit<OwnedReader>, owner: TypeId) -> FathomResult<()>
    {
        let mut tree = unit
            .entries_tree(Some(key.offset))
            .map_err(|err| map_dwarf_error("building aggregate tree", err))?;
        let root = tree.root().map_err(|err| map_dwarf_error("navigating aggregate root", err))?;
        let mut children = root.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating aggregate members", err))?
        {
            let entry = child.entry().clone();
            if entry.tag() != constants::DW_TAG_member {
                continue;
            }
            if flag_attr(&entry, constants::DW_AT_external)? || flag_attr(&entry, constants::DW_AT_declaration)? {
                continue;
            }

            let name = self.entry_name(unit, &entry)?;
            if udata_attr(&entry, constants::DW_AT_bit_size, "reading DW_AT_bit_size")?.is_some() {
                trace!(owner = %owner, member = ?name, "skipping bit-field member");
                continue;
            }

            let ty = self.type_ref(key.unit, &entry)?.unwrap_or(self.void);
            let offset = member_offset(unit, &entry)?;
            self.builder.field(owner, name.as_deref(), offset, ty)?;
        }
        Ok(())
    }

    /// Element counts of each array dimension, outermost first
    fn array_counts(&self, unit: &Unit<OwnedReader>, offset: UnitOffset<usize>) -> FathomResult<Vec<Option<u64>>>
    {
        let mut counts = Vec::new();
        let mut tree = unit
            .entries_tree(Some(offset))
            .map_err(|err| map_dwarf_error("building array tree", err))?;
        let root = tree.root().map_err(|err| map_dwarf_error("navigating array root", err))?;
        let mut children = root.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating array dimensions", err))?
        {
            let entry = child.entry().clone();
            if entry.tag() != constants::DW_TAG_subrange_type {
                continue;
            }
            let count = match udata_attr(&entry, constants::DW_AT_count, "reading DW_AT_count")? {
                Some(count) => Some(count),
                None => udata_attr(&entry, constants::DW_AT_upper_bound, "reading DW_AT_upper_bound")?
                    .and_then(|upper| upper.checked_add(1)),
            };
            counts.push(count);
        }
        Ok(counts)
    }

    fn type_ref(&self, unit_index: usize, entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> FathomResult<Option<TypeId>>
    {
        let Some(attr) = entry
            .attr(constants::DW_AT_type)
            .map_err(|err| map_dwarf_error("reading DW_AT_type", err))?
        else {
            return Ok(None);
        };

        let key = match attr.value() {
            AttributeValue::UnitRef(offset) => Some(DieKey {
                unit: unit_index,
                offset,
            }),
            AttributeValue::DebugInfoRef(offset) => self.find_unit_for_offset(UnitSectionOffset::from(offset)),
            AttributeValue::DebugTypesRef(signature) => self.find_type_unit(signature),
            _ => None,
        };

        match key.and_then(|key| self.dies.get(&key).copied()) {
            Some(id) => Ok(Some(id)),
            None => {
                trace!(value = ?attr.value(), "unresolved type reference, using void");
                Ok(Some(self.void))
            }
        }
    }

    fn find_unit_for_offset(&self, target: UnitSectionOffset<usize>) -> Option<DieKey>
    {
        self.units.iter().enumerate().find_map(|(unit, candidate)| {
            target
                .to_unit_offset(candidate)
                .map(|offset| DieKey { unit, offset })
        })
    }

    fn find_type_unit(&self, signature: DebugTypeSignature) -> Option<DieKey>
    {
        self.units.iter().enumerate().find_map(|(unit, candidate)| match candidate.header.type_() {
            UnitType::Type {
                type_signature,
                type_offset,
            }
            | UnitType::SplitType {
                type_signature,
                type_offset,
            } if type_signature == signature => Some(DieKey {
                unit,
                offset: type_offset,
            }),
            _ => None,
        })
    }

    fn entry_name(
        &self,
        unit: &Unit<OwnedReader>,
        entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    ) -> FathomResult<Option<String>>
    {
        let Some(attr) = entry
            .attr(constants::DW_AT_name)
            .map_err(|err| map_dwarf_error("reading DW_AT_name", err))?
        else {
            return Ok(None);
        };
        attr_to_string(self.dwarf, unit, attr.value()).map(Some)
    }
}

/// Decode a DWARF string attribute
pub(crate) fn attr_to_string(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    value: AttributeValue<OwnedReader>,
) -> FathomResult<String>
{
    use gimli::Reader as _;

    let reader = dwarf
        .attr_string(unit, value)
        .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
    let owned = match reader.to_string() {
        Ok(cow) => cow.into_owned(),
        Err(_) => reader
            .to_string_lossy()
            .map_err(|err| map_dwarf_error("decoding DWARF string", err))?
            .into_owned(),
    };
    Ok(owned)
}

/// Constant value of an attribute, if it has one
pub(crate) fn udata_attr(
    entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
    name: constants::DwAt,
    context: &str,
) -> FathomResult<Option<u64>>
{
    Ok(entry
        .attr(name)
        .map_err(|err| map_dwarf_error(context, err))?
        .and_then(|attr| attr.udata_value()))
}

/// Whether a flag attribute is present and set
pub(crate) fn flag_attr(entry: &DebuggingInformationEntry<'_, '_, OwnedReader>, name: constants::DwAt) -> FathomResult<bool>
{
    let attr = entry
        .attr(name)
        .map_err(|err| map_dwarf_error("reading flag attribute", err))?;
    Ok(matches!(attr.map(|attr| attr.value()), Some(AttributeValue::Flag(true))))
}

fn base_encoding(entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> FathomResult<ScalarEncoding>
{
    let attr = entry
        .attr(constants::DW_AT_encoding)
        .map_err(|err| map_dwarf_error("reading DW_AT_encoding", err))?;
    let encoding = match attr.map(|attr| attr.value()) {
        Some(AttributeValue::Encoding(encoding)) => encoding,
        _ => return Ok(ScalarEncoding::Unsigned),
    };
    Ok(scalar_encoding(encoding))
}

/// C enums are `int` unless the underlying type says otherwise
fn enum_encoding(unit: &Unit<OwnedReader>, entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> FathomResult<ScalarEncoding>
{
    let attr = entry
        .attr(constants::DW_AT_type)
        .map_err(|err| map_dwarf_error("reading enumeration type", err))?;
    let Some(AttributeValue::UnitRef(offset)) = attr.map(|attr| attr.value()) else {
        return Ok(ScalarEncoding::Signed);
    };
    let underlying = unit
        .entry(offset)
        .map_err(|err| map_dwarf_error("resolving enumeration type", err))?;
    if underlying.tag() == constants::DW_TAG_base_type {
        base_encoding(&underlying)
    } else {
        Ok(ScalarEncoding::Signed)
    }
}

fn scalar_encoding(encoding: DwAte) -> ScalarEncoding
{
    match encoding {
        constants::DW_ATE_signed => ScalarEncoding::Signed,
        constants::DW_ATE_signed_char => ScalarEncoding::SignedChar,
        constants::DW_ATE_unsigned_char => ScalarEncoding::UnsignedChar,
        constants::DW_ATE_boolean => ScalarEncoding::Bool,
        constants::DW_ATE_float => ScalarEncoding::Float,
        _ => ScalarEncoding::Unsigned,
    }
}

/// Byte offset of a member: constant form, or a lone `DW_OP_plus_uconst`
fn member_offset(unit: &Unit<OwnedReader>, entry: &DebuggingInformationEntry<'_, '_, OwnedReader>) -> FathomResult<u64>
{
    let Some(attr) = entry
        .attr(constants::DW_AT_data_member_location)
        .map_err(|err| map_dwarf_error("reading DW_AT_data_member_location", err))?
    else {
        return Ok(0);
    };

    if let Some(offset) = attr.udata_value() {
        return Ok(offset);
    }
    if let AttributeValue::Exprloc(expression) = attr.value() {
        let mut operations = expression.operations(unit.encoding());
        if let Some(Operation::PlusConstant { value }) = operations
            .next()
            .map_err(|err| map_dwarf_error("parsing member location", err))?
        {
            return Ok(value);
        }
    }
    trace!("unsupported member location form, assuming offset 0");
    Ok(0)
}
