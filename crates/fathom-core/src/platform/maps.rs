//! `/proc/<pid>/maps` parsing.
//!
//! Used to find where a position-independent executable was loaded. The
//! parser itself is plain text handling and is compiled everywhere.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FathomError, FathomResult};
use crate::types::ProcessId;

/// One line of a process memory map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap
{
    pub start: u64,
    pub end: u64,
    /// Permission string such as `r-xp`
    pub permissions: String,
    /// Offset of the mapping within the backing file
    pub offset: u64,
    /// Backing file, or a pseudo-name such as `[stack]`
    pub path: Option<PathBuf>,
}

/// Parse the contents of a maps file, skipping malformed lines
///
/// ```rust
/// use fathom_core::platform::maps::parse_maps;
///
/// let maps = parse_maps("555555554000-555555555000 r--p 00000000 08:01 1234 /tmp/a.out\n");
/// assert_eq!(maps[0].start, 0x5555_5555_4000);
/// assert_eq!(maps[0].path.as_deref().map(|p| p.to_str().unwrap()), Some("/tmp/a.out"));
/// ```
#[must_use]
pub fn parse_maps(text: &str) -> Vec<MemoryMap>
{
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MemoryMap>
{
    let mut fields = line.split_whitespace();
    let (start, end) = fields.next()?.split_once('-')?;
    let permissions = fields.next()?.to_string();
    let offset = u64::from_str_radix(fields.next()?, 16).ok()?;
    let _device = fields.next()?;
    let _inode = fields.next()?;
    // Paths may contain spaces; everything after the inode is the path
    let path: Vec<&str> = fields.collect();
    let path = if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path.join(" ")))
    };

    Some(MemoryMap {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        permissions,
        offset,
        path,
    })
}

/// Read and parse `/proc/<pid>/maps`
///
/// ## Errors
///
/// - `ProcessNotFound`: no such process
/// - `Io`: any other read failure
pub fn read_maps(pid: ProcessId) -> FathomResult<Vec<MemoryMap>>
{
    let path = format!("/proc/{pid}/maps");
    match fs::read_to_string(&path) {
        Ok(text) => Ok(parse_maps(&text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(FathomError::ProcessNotFound(pid.0)),
        Err(err) => Err(err.into()),
    }
}

/// Lowest mapped address of the file at `image`
///
/// `image` is canonicalized first so relative paths and symlinks match the
/// absolute paths the kernel reports.
#[must_use]
pub fn image_base(maps: &[MemoryMap], image: &Path) -> Option<u64>
{
    let canonical = image.canonicalize().unwrap_or_else(|_| image.to_path_buf());
    maps.iter()
        .filter(|map| map.path.as_deref() == Some(canonical.as_path()))
        .map(|map| map.start.saturating_sub(map.offset))
        .min()
}

#[cfg(test)]
mod tests
{
    use super::*;

    const SAMPLE: &str = "\
555555554000-555555555000 r--p 00000000 08:01 1234 /work/anon/a.out
555555555000-555555556000 r-xp 00001000 08:01 1234 /work/anon/a.out
555555556000-555555557000 rw-p 00002000 08:01 1234 /work/anon/a.out
7ffff7dd3000-7ffff7dfc000 r-xp 00000000 08:01 99 /usr/lib/ld-linux-x86-64.so.2
7ffffffde000-7ffffffff000 rw-p 00000000 00:00 0                          [stack]
7ffff7ff9000-7ffff7ffd000 r--p 00000000 00:00 0
garbage line
";

    #[test]
    fn test_parse_maps_skips_malformed_lines()
    {
        let maps = parse_maps(SAMPLE);
        assert_eq!(maps.len(), 6);
        assert_eq!(maps[1].permissions, "r-xp");
        assert_eq!(maps[1].offset, 0x1000);
        assert_eq!(maps[4].path, Some(PathBuf::from("[stack]")));
        assert_eq!(maps[5].path, None);
    }

    #[test]
    fn test_image_base_uses_lowest_mapping()
    {
        let maps = parse_maps(SAMPLE);
        assert_eq!(image_base(&maps, Path::new("/work/anon/a.out")), Some(0x5555_5555_4000));
        assert_eq!(image_base(&maps, Path::new("/work/anon/missing")), None);
    }

    #[test]
    fn test_paths_with_spaces()
    {
        let maps = parse_maps("400000-401000 r-xp 00000000 08:01 7 /tmp/my program\n");
        assert_eq!(maps[0].path, Some(PathBuf::from("/tmp/my program")));
    }
}
