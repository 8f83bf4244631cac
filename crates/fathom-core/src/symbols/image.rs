//! Object files on disk.

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addr2line::Context;
use gimli::{RunTimeEndian, SectionId};
use object::{Object, ObjectKind, ObjectSection, ObjectSegment};
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use super::demangle::demangle;
use super::{DebugInfo, DwarfSections, OwnedReader};
use crate::error::{FathomError, FathomResult};
use crate::types::{Architecture, SourceLocation};

/// DWARF sections loaded from an image, with their ELF names
const DWARF_SECTIONS: &[SectionId] = &[
    SectionId::DebugAbbrev,
    SectionId::DebugAddr,
    SectionId::DebugInfo,
    SectionId::DebugLine,
    SectionId::DebugLineStr,
    SectionId::DebugRanges,
    SectionId::DebugRngLists,
    SectionId::DebugStr,
    SectionId::DebugStrOffsets,
    SectionId::DebugTypes,
    SectionId::DebugLoc,
    SectionId::DebugLocLists,
];

fn load_section_bytes(file: &object::File<'_>, name: &str) -> FathomResult<Option<Arc<[u8]>>>
{
    let Some(section) = file.section_by_name(name) else {
        return Ok(None);
    };
    let data = section
        .uncompressed_data()
        .map_err(|err| FathomError::InvalidDebugInfo(format!("failed to read {name}: {err}")))?;
    Ok(Some(match data {
        Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes),
        Cow::Owned(vec) => vec.into(),
    }))
}

/// One frame of a symbolicated address; inlined calls produce several
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFrame
{
    /// Demangled function name
    pub function: String,
    pub location: Option<SourceLocation>,
}

/// Result of symbolicating an address, innermost frame first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbolication
{
    pub frames: Vec<SymbolFrame>,
}

impl fmt::Display for Symbolication
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let Some(frame) = self.frames.first() else {
            return write!(f, "??");
        };
        write!(f, "{}", frame.function)?;
        if let Some(location) = &frame.location {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}

/// An executable or shared object with its debug info
pub struct BinaryImage
{
    path: PathBuf,
    architecture: Architecture,
    position_independent: bool,
    link_base: u64,
    sections: DwarfSections,
    debug_info: OnceCell<Arc<DebugInfo>>,
    context: OnceCell<Context<OwnedReader>>,
}

impl fmt::Debug for BinaryImage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("BinaryImage")
            .field("path", &self.path)
            .field("architecture", &self.architecture)
            .field("position_independent", &self.position_independent)
            .field("link_base", &format_args!("{:#x}", self.link_base))
            .finish_non_exhaustive()
    }
}

impl BinaryImage
{
    /// Read and parse an object file
    ///
    /// DWARF is only copied out here; it is parsed on first use.
    ///
    /// ## Errors
    ///
    /// - `Io`: the file can't be read
    /// - `InvalidDebugInfo`: the file isn't a supported object file
    pub fn open(path: impl AsRef<Path>) -> FathomResult<Self>
    {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let file = object::File::parse(&*bytes)
            .map_err(|err| FathomError::InvalidDebugInfo(format!("failed to parse {}: {err}", path.display())))?;

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let architecture = match file.architecture() {
            object::Architecture::Aarch64 => Architecture::Arm64,
            object::Architecture::X86_64 => Architecture::X86_64,
            object::Architecture::I386 => Architecture::X86,
            _ => Architecture::Unknown("unknown"),
        };

        let link_base = file
            .segments()
            .map(|segment| segment.address())
            .min()
            .unwrap_or(0);

        let mut sections = DwarfSections::new(endian);
        for id in DWARF_SECTIONS {
            if let Some(data) = load_section_bytes(&file, id.name())? {
                sections.insert(*id, data);
            }
        }
        if sections.get(SectionId::DebugInfo).is_none() {
            info!(path = %path.display(), "image has no .debug_info; build with -g for variable access");
        }

        let image = Self {
            path: path.to_path_buf(),
            architecture,
            position_independent: file.kind() == ObjectKind::Dynamic,
            link_base,
            sections,
            debug_info: OnceCell::new(),
            context: OnceCell::new(),
        };
        debug!(?image, "opened image");
        Ok(image)
    }

    #[must_use]
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    #[must_use]
    pub fn pointer_size(&self) -> u8
    {
        self.architecture.pointer_size_bytes()
    }

    #[must_use]
    pub fn endian(&self) -> RunTimeEndian
    {
        self.sections.endian()
    }

    /// Whether the image is loaded at an address chosen at run time
    #[must_use]
    pub fn is_position_independent(&self) -> bool
    {
        self.position_independent
    }

    /// Lowest link-time segment address
    #[must_use]
    pub fn link_base(&self) -> u64
    {
        self.link_base
    }

    /// Types, variables, and lines, parsed once
    ///
    /// ## Errors
    ///
    /// `InvalidDebugInfo` for malformed DWARF.
    pub fn debug_info(&self) -> FathomResult<Arc<DebugInfo>>
    {
        self.debug_info
            .get_or_try_init(|| DebugInfo::load(&self.sections, self.pointer_size()).map(Arc::new))
            .cloned()
    }

    fn context(&self) -> FathomResult<&Context<OwnedReader>>
    {
        self.context.get_or_try_init(|| {
            let dwarf = self.sections.load()?;
            Context::from_dwarf(dwarf)
                .map_err(|err| FathomError::InvalidDebugInfo(format!("failed to build addr2line context: {err}")))
        })
    }

    /// Function and source location of a link-time address
    #[must_use]
    pub fn symbolicate(&self, address: u64) -> Option<Symbolication>
    {
        let context = self.context().ok()?;
        let mut frames = Vec::new();
        let mut iter = context.find_frames(address).skip_all_loads().ok()?;
        while let Ok(Some(frame)) = iter.next() {
            let Some(function) = frame
                .function
                .as_ref()
                .and_then(|function| function.raw_name().ok())
                .map(|raw| demangle(&raw))
            else {
                continue;
            };
            let location = frame.location.and_then(|location| {
                location.file.map(|file| SourceLocation {
                    file: file.to_string(),
                    line: location.line,
                    column: location.column,
                })
            });
            frames.push(SymbolFrame { function, location });
        }

        if frames.is_empty() {
            None
        } else {
            Some(Symbolication { frames })
        }
    }
}
