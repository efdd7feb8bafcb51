//! Module and thread snapshot rows.

use std::path::{Path, PathBuf};

use super::symbols::MetadataStatus;
use super::{Address, ProcessId, ThreadId};

/// One row of a module snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry
{
    /// Process the module is mapped into.
    pub process_id: ProcessId,
    /// Lowest mapped address of the module.
    pub base: Address,
    /// Span of the mapping in bytes.
    pub size: u64,
    /// On-disk path.
    pub path: PathBuf,
    /// Short name (file name of `path`).
    pub name: String,
}

impl ModuleEntry
{
    /// Build an entry, deriving the short name from the path.
    pub fn new(process_id: ProcessId, base: Address, size: u64, path: impl Into<PathBuf>) -> Self
    {
        let path = path.into();
        let name = file_name(&path);
        Self {
            process_id,
            base,
            size,
            path,
            name,
        }
    }

    /// `true` if `address` falls inside `[base, base + size)`.
    pub fn contains(&self, address: Address) -> bool
    {
        address
            .offset_from(self.base)
            .is_some_and(|offset| offset < self.size)
    }
}

/// A module as printed in the "Loaded Modules" section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo
{
    /// Lowest mapped address.
    pub base: Address,
    /// On-disk path.
    pub path: PathBuf,
    /// Short name.
    pub name: String,
    /// Dotted version, empty if none could be read.
    pub version: String,
    /// Debug metadata status, `None` if the symbol engine does not know the module.
    pub metadata: Option<MetadataStatus>,
}

/// One row of a thread snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadEntry
{
    /// Thread identifier.
    pub thread_id: ThreadId,
    /// Process owning the thread.
    pub owner_process_id: ProcessId,
}

/// File name of `path` with directory components stripped.
pub fn file_name(path: &Path) -> String
{
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
