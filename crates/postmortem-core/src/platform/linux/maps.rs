//! `/proc/self/maps` parsing.
//!
//! A module usually spans several file-backed mappings (text, read-only
//! data, relro, data). Mappings are merged per path: the base is the lowest
//! start, the size covers up to the highest end. Only files with at least
//! one executable mapping and an ELF header count as modules; mmapped data
//! files (locale archives, caches, inputs) do not. Modules keep the order
//! in which the kernel lists them.
//!
//! ## References
//!
//! - [proc_pid_maps(5) man page](https://man7.org/linux/man-pages/man5/proc_pid_maps.5.html)

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{PostmortemError, PostmortemResult};
use crate::types::{Address, ModuleEntry, ProcessId};

const MAPS_PATH: &str = "/proc/self/maps";

/// Suffix the kernel appends to mappings of unlinked files.
const DELETED_SUFFIX: &str = " (deleted)";

const ELF_MAGIC: [u8; 4] = *b"\x7fELF";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mapping
{
    start: u64,
    end: u64,
    executable: bool,
    path: String,
}

/// Modules of the current process.
pub(crate) fn read_modules(process_id: ProcessId) -> PostmortemResult<Vec<ModuleEntry>>
{
    let text = fs::read_to_string(MAPS_PATH)
        .map_err(|err| PostmortemError::SnapshotFailed(format!("reading {MAPS_PATH}: {err}")))?;
    let mut modules = parse_modules(&text, process_id);
    modules.retain(|module| is_elf_image(&module.path));
    Ok(modules)
}

fn is_elf_image(path: &Path) -> bool
{
    let mut magic = [0u8; 4];
    File::open(path).and_then(|mut file| file.read_exact(&mut magic)).is_ok() && magic == ELF_MAGIC
}

pub(crate) fn parse_modules(text: &str, process_id: ProcessId) -> Vec<ModuleEntry>
{
    let mut merged: Vec<Mapping> = Vec::new();

    for mapping in text.lines().filter_map(parse_line) {
        match merged.iter_mut().find(|existing| existing.path == mapping.path) {
            Some(existing) => {
                existing.start = existing.start.min(mapping.start);
                existing.end = existing.end.max(mapping.end);
                existing.executable |= mapping.executable;
            }
            None => merged.push(mapping),
        }
    }

    merged
        .into_iter()
        .filter(|mapping| mapping.executable)
        .map(|mapping| {
            ModuleEntry::new(
                process_id,
                Address::new(mapping.start),
                mapping.end - mapping.start,
                PathBuf::from(mapping.path),
            )
        })
        .collect()
}

/// `start-end perms offset dev inode path`; `None` for anonymous and
/// pseudo mappings (`[heap]`, `[stack]`, `[vdso]`).
fn parse_line(line: &str) -> Option<Mapping>
{
    let mut fields = line.splitn(6, ' ');
    let range = fields.next()?;
    let perms = fields.next()?;
    let _offset = fields.next()?;
    let _device = fields.next()?;
    let inode = fields.next()?;
    let path = fields.next()?.trim_start();

    if inode == "0" || !path.starts_with('/') {
        return None;
    }

    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    if end <= start {
        return None;
    }

    let path = path.strip_suffix(DELETED_SUFFIX).unwrap_or(path);
    Some(Mapping {
        start,
        end,
        executable: perms.contains('x'),
        path: path.to_string(),
    })
}
