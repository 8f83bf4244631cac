//! Source lines to code addresses.

use std::collections::HashMap;
use std::path::Path;

use gimli::Unit;

use super::loader::attr_to_string;
use super::{map_dwarf_error, OwnedDwarf, OwnedReader};
use crate::error::FathomResult;

/// One row of a line program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry
{
    /// Path of the source file as recorded by the compiler
    pub file: String,
    pub line: u32,
    /// Link-time address of the first instruction for this row
    pub address: u64,
    /// Whether the row is a recommended breakpoint location
    pub is_stmt: bool,
}

/// All line rows of an image, sorted by address
#[derive(Debug, Clone, Default)]
pub struct LineTable
{
    entries: Vec<LineEntry>,
}

impl LineTable
{
    /// Build a table from rows in any order
    #[must_use]
    pub fn from_entries(mut entries: Vec<LineEntry>) -> Self
    {
        entries.sort_by_key(|entry| entry.address);
        Self { entries }
    }

    pub(crate) fn load(dwarf: &OwnedDwarf, units: &[Unit<OwnedReader>]) -> FathomResult<Self>
    {
        let mut entries = Vec::new();
        for unit in units {
            let Some(program) = unit.line_program.clone() else {
                continue;
            };

            let mut paths: HashMap<u64, String> = HashMap::new();
            let mut rows = program.rows();
            while let Some((header, row)) = rows
                .next_row()
                .map_err(|err| map_dwarf_error("running line program", err))?
            {
                if row.end_sequence() {
                    continue;
                }
                let Some(line) = row.line().and_then(|line| u32::try_from(line.get()).ok()) else {
                    continue;
                };

                let file = match paths.get(&row.file_index()) {
                    Some(path) => path.clone(),
                    None => {
                        let Some(file) = row.file(header) else {
                            continue;
                        };
                        let name = attr_to_string(dwarf, unit, file.path_name())?;
                        let path = match file.directory(header) {
                            Some(directory) if Path::new(&name).is_relative() => {
                                let directory = attr_to_string(dwarf, unit, directory)?;
                                Path::new(&directory).join(&name).to_string_lossy().into_owned()
                            }
                            _ => name,
                        };
                        paths.insert(row.file_index(), path.clone());
                        path
                    }
                };

                entries.push(LineEntry {
                    file,
                    line,
                    address: row.address(),
                    is_stmt: row.is_stmt(),
                });
            }
        }
        Ok(Self::from_entries(entries))
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[LineEntry]
    {
        &self.entries
    }

    /// Lowest statement address for `file:line`
    ///
    /// `file` matches a recorded path exactly or as a trailing path
    /// component sequence (`main.c` matches `/src/anon/main.c`). When the
    /// line has no code, the next line of the same file that does is used.
    #[must_use]
    pub fn address_for_line(&self, file: &str, line: u32) -> Option<u64>
    {
        let in_file = || {
            self.entries
                .iter()
                .filter(move |entry| entry.is_stmt && file_matches(&entry.file, file))
        };

        if let Some(exact) = in_file().filter(|entry| entry.line == line).map(|entry| entry.address).min() {
            return Some(exact);
        }
        let next_line = in_file().map(|entry| entry.line).filter(|candidate| *candidate > line).min()?;
        in_file()
            .filter(|entry| entry.line == next_line)
            .map(|entry| entry.address)
            .min()
    }

    /// First statement after a function's entry, i.e. past its prologue
    ///
    /// Falls back to `low_pc` when the function has a single row.
    #[must_use]
    pub fn after_prologue(&self, low_pc: u64, high_pc: u64) -> u64
    {
        self.entries
            .iter()
            .find(|entry| entry.is_stmt && entry.address > low_pc && entry.address < high_pc)
            .map_or(low_pc, |entry| entry.address)
    }

    /// Row covering the link-time address `address`
    #[must_use]
    pub fn entry_for_address(&self, address: u64) -> Option<&LineEntry>
    {
        let position = self.entries.partition_point(|entry| entry.address <= address);
        position.checked_sub(1).map(|index| &self.entries[index])
    }
}

fn file_matches(recorded: &str, wanted: &str) -> bool
{
    recorded == wanted || Path::new(recorded).ends_with(wanted)
}
