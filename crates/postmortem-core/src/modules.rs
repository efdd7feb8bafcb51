//! # Modules
//!
//! Mapping addresses to modules, and listing the modules of this process.
//!
//! [`resolve_module`] answers "which file does this address belong to" by
//! asking the dynamic loader; it never consults the symbol engine, so it
//! still works for modules loaded after the engine was initialized.
//!
//! [`for_each_module_in_process`] walks a module snapshot in OS order and
//! produces one [`ModuleInfo`] per module of the current process, with its
//! version and the status of its debug metadata.

use tracing::debug;

use crate::error::PostmortemResult;
use crate::platform::ModuleSource;
use crate::symbols::SymbolResolver;
use crate::types::{file_name, Address, ModuleInfo};
use crate::version::format_version_block;

/// File name of the module containing `address`, with directories stripped.
///
/// `None` when the loader knows no module at that address, which is a
/// normal outcome (JIT code, freed libraries, corrupted program counters).
pub fn resolve_module(source: &dyn ModuleSource, address: Address) -> Option<String>
{
    source.module_path_at(address).map(|path| file_name(&path))
}

/// Dotted version of the module at `path`.
///
/// A version block with a bad signature yields an empty string, as does a
/// module with neither a block nor a fallback version.
pub fn module_version(source: &dyn ModuleSource, path: &std::path::Path) -> String
{
    match source.version_block(path) {
        Some(block) => format_version_block(Some(&block)),
        None => source.fallback_version(path).unwrap_or_default(),
    }
}

/// Invoke `callback` for every module of the current process, in snapshot order.
///
/// # Errors
///
/// Returns the snapshot error when the module list could not be obtained;
/// nothing is passed to `callback` in that case.
pub fn for_each_module_in_process<F>(
    source: &dyn ModuleSource,
    symbols: &dyn SymbolResolver,
    mut callback: F,
) -> PostmortemResult<()>
where
    F: FnMut(ModuleInfo),
{
    let pid = source.process_id();
    let entries = source.module_snapshot()?;

    for entry in entries.into_iter().filter(|entry| entry.process_id == pid) {
        let version = module_version(source, &entry.path);
        let metadata = symbols.module_metadata_status(entry.base);
        debug!(module = %entry.name, base = %entry.base, %version, "module");
        callback(ModuleInfo {
            base: entry.base,
            path: entry.path,
            name: entry.name,
            version,
            metadata,
        });
    }

    Ok(())
}
