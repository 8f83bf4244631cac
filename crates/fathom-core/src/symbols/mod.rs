//! # Debug Information
//!
//! Reads the parts of DWARF that member resolution needs: types, variables,
//! and line tables. Everything else in the debug info is ignored.
//!
//! ## Loading
//!
//! [`BinaryImage::open`] parses an object file and keeps the raw DWARF
//! sections around. The first call to [`BinaryImage::debug_info`] walks every
//! compilation unit once and produces a [`DebugInfo`]:
//!
//! - a [`TypeGraph`] for the layout index,
//! - a [`VariableTable`] of globals and function locals,
//! - a [`LineTable`] for `file:line` and function-name breakpoints.
//!
//! Tests (and callers without an object file) can go through
//! [`DwarfSections`] directly.

mod demangle;
pub mod image;
pub mod lines;
pub mod loader;
pub mod variables;

use std::collections::HashMap;
use std::sync::Arc;

use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId, Unit};
use tracing::debug;

pub use self::demangle::demangle;
pub use self::image::{BinaryImage, SymbolFrame, Symbolication};
pub use self::lines::{LineEntry, LineTable};
pub use self::loader::TypeLoader;
pub use self::variables::{FrameBase, FunctionScope, VariableInfo, VariableLocation, VariableTable};
use crate::error::{FathomError, FathomResult};
use crate::layout::TypeGraph;

pub(crate) type OwnedReader = EndianArcSlice<RunTimeEndian>;
pub(crate) type OwnedDwarf = Dwarf<OwnedReader>;

/// Raw DWARF section contents keyed by section
#[derive(Debug, Clone)]
pub struct DwarfSections
{
    endian: RunTimeEndian,
    sections: HashMap<&'static str, Arc<[u8]>>,
}

impl DwarfSections
{
    /// Create an empty set of sections
    #[must_use]
    pub fn new(endian: RunTimeEndian) -> Self
    {
        Self {
            endian,
            sections: HashMap::new(),
        }
    }

    /// Store the contents of one section, replacing any previous contents
    pub fn insert(&mut self, id: SectionId, data: impl Into<Arc<[u8]>>)
    {
        self.sections.insert(id.name(), data.into());
    }

    /// Contents of a section, if present
    #[must_use]
    pub fn get(&self, id: SectionId) -> Option<&[u8]>
    {
        self.sections.get(id.name()).map(AsRef::as_ref)
    }

    /// Byte order of the sections
    #[must_use]
    pub fn endian(&self) -> RunTimeEndian
    {
        self.endian
    }

    pub(crate) fn load(&self) -> FathomResult<OwnedDwarf>
    {
        Dwarf::load(|section| Ok::<_, gimli::Error>(self.reader(section)))
            .map_err(|err| map_dwarf_error("loading DWARF sections", err))
    }

    fn reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .sections
            .get(id.name())
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }
}

/// Everything loaded from one image's DWARF
#[derive(Debug)]
pub struct DebugInfo
{
    graph: Arc<TypeGraph>,
    variables: VariableTable,
    lines: LineTable,
}

impl DebugInfo
{
    /// Walk every unit in `sections` once
    ///
    /// ## Errors
    ///
    /// `InvalidDebugInfo` for malformed DWARF.
    pub fn load(sections: &DwarfSections, pointer_size: u8) -> FathomResult<Self>
    {
        let dwarf = sections.load()?;
        let units = load_units(&dwarf)?;

        let types = TypeLoader::new(&dwarf, &units, pointer_size).load()?;
        let variables = VariableTable::load(&dwarf, &units, &types)?;
        let lines = LineTable::load(&dwarf, &units)?;
        debug!(
            units = units.len(),
            types = types.graph.len(),
            globals = variables.globals().len(),
            functions = variables.scopes().len(),
            rows = lines.len(),
            "loaded debug info"
        );

        Ok(Self {
            graph: Arc::new(types.graph),
            variables,
            lines,
        })
    }

    /// Assemble debug info from already-built parts
    #[must_use]
    pub fn from_parts(graph: Arc<TypeGraph>, variables: VariableTable, lines: LineTable) -> Self
    {
        Self {
            graph,
            variables,
            lines,
        }
    }

    /// Types of the image
    #[must_use]
    pub fn graph(&self) -> &Arc<TypeGraph>
    {
        &self.graph
    }

    #[must_use]
    pub fn variables(&self) -> &VariableTable
    {
        &self.variables
    }

    #[must_use]
    pub fn lines(&self) -> &LineTable
    {
        &self.lines
    }
}

/// Parse every compilation and type unit
pub(crate) fn load_units(dwarf: &OwnedDwarf) -> FathomResult<Vec<Unit<OwnedReader>>>
{
    let mut units = Vec::new();
    let mut headers = dwarf.units();
    while let Some(header) = headers
        .next()
        .map_err(|err| map_dwarf_error("reading .debug_info unit header", err))?
    {
        units.push(
            dwarf
                .unit(header)
                .map_err(|err| map_dwarf_error("parsing compilation unit", err))?,
        );
    }

    let mut type_headers = dwarf.type_units();
    while let Some(header) = type_headers
        .next()
        .map_err(|err| map_dwarf_error("reading .debug_types unit header", err))?
    {
        units.push(dwarf.unit(header).map_err(|err| map_dwarf_error("parsing type unit", err))?);
    }

    Ok(units)
}

/// Attach context to a gimli error
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> FathomError
{
    FathomError::InvalidDebugInfo(format!("{context}: {err}"))
}
