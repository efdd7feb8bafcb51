//! # Symbols
//!
//! Address-to-name resolution for the running process.
//!
//! [`SymbolEngine`] is an explicit context object: the crash reporter owns
//! one, initializes it once per process and hands `&SymbolEngine` to the
//! stack walker, the unwinder and the module enumerator. There is no hidden
//! global state.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --initialize()--> Initialized --drop--> (torn down)
//! ```
//!
//! [`SymbolEngine::initialize`] registers every module from a snapshot.
//! Module files are parsed lazily, the first time an address inside them is
//! queried, with `object` for the symbol tables, `gimli` for unwind data and
//! `addr2line` for line tables.
//!
//! ## External debug metadata
//!
//! Release builds usually ship the main executable stripped, with its DWARF
//! in a side file (`objcopy --only-keep-debug`). When the executable carries
//! no `.debug_info` of its own, the engine looks for
//! `<exe dir>/<exe file name>.debug` (the file name is configurable). If it
//! exists and is not empty, the default metadata of the main module is
//! unloaded and the side file is loaded in its place at the same addresses.
//! A load failure is logged and the default metadata stays in use.
//!
//! A side file whose GNU build-id differs from the executable's is still
//! used, but reported as mismatched in the module list.

pub mod demangle;
pub mod image;

use std::fs;
use std::path::{Path, PathBuf};

pub use image::{ImageDescriptor, ModuleImage};
use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::error::PostmortemError;
use crate::platform::ModuleSource;
use crate::types::{file_name, Address, MetadataStatus, ModuleEntry, ResolvedSymbol, SourceLocation};

/// Symbol and line queries used by the stack walker and the module enumerator.
pub trait SymbolResolver
{
    /// Nearest preceding symbol for `address`.
    fn resolve_symbol(&self, address: Address) -> Option<ResolvedSymbol>;

    /// Source location for `address`.
    fn resolve_line(&self, address: Address) -> Option<SourceLocation>;

    /// Which metadata describes the module loaded at `base`, and whether it matches.
    fn module_metadata_status(&self, base: Address) -> Option<MetadataStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState
{
    Uninitialized,
    Initialized,
}

#[derive(Debug)]
enum Metadata
{
    /// The module file itself answers symbol queries.
    Default,
    /// Default metadata dropped while a replacement loads.
    Unloaded,
    /// A side file replaced the default metadata.
    External(ModuleImage),
}

#[derive(Debug)]
struct ImageSlot
{
    descriptor: ImageDescriptor,
    image: OnceCell<Option<ModuleImage>>,
    metadata: Metadata,
}

impl ImageSlot
{
    fn new(entry: &ModuleEntry) -> Self
    {
        Self {
            descriptor: ImageDescriptor {
                path: entry.path.clone(),
                base: entry.base,
                size: entry.size,
            },
            image: OnceCell::new(),
            metadata: Metadata::Default,
        }
    }

    /// The parsed module file, loaded on first use.
    fn image(&self) -> Option<&ModuleImage>
    {
        self.image
            .get_or_init(|| match ModuleImage::parse(&self.descriptor) {
                Ok(image) => Some(image),
                Err(err) => {
                    debug!(path = %self.descriptor.path.display(), %err, "module image unavailable");
                    None
                }
            })
            .as_ref()
    }

    fn symbol_source(&self) -> Option<&ModuleImage>
    {
        match &self.metadata {
            Metadata::Default => self.image(),
            Metadata::Unloaded => None,
            Metadata::External(image) => Some(image),
        }
    }
}

/// Process-wide symbol resolution context.
#[derive(Debug)]
pub struct SymbolEngine
{
    state: EngineState,
    debug_file_name: Option<String>,
    /// Sorted by base address.
    slots: Vec<ImageSlot>,
    main: Option<usize>,
}

impl Default for SymbolEngine
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl SymbolEngine
{
    /// An uninitialized engine. Every query returns `None` until
    /// [`SymbolEngine::initialize`] runs.
    pub fn new() -> Self
    {
        Self {
            state: EngineState::Uninitialized,
            debug_file_name: None,
            slots: Vec::new(),
            main: None,
        }
    }

    /// Use `name` instead of `<exe file name>.debug` for the side file.
    pub fn with_debug_file_name(mut self, name: Option<String>) -> Self
    {
        self.debug_file_name = name;
        self
    }

    pub fn is_initialized(&self) -> bool
    {
        self.state == EngineState::Initialized
    }

    /// Number of registered modules.
    pub fn module_count(&self) -> usize
    {
        self.slots.len()
    }

    /// Register every module of the process and load external metadata for
    /// the main executable if needed.
    ///
    /// Calling this again on an initialized engine does nothing. A failed
    /// module snapshot leaves the engine initialized but empty, so every
    /// lookup degrades to `None`.
    pub fn initialize(&mut self, modules: &dyn ModuleSource)
    {
        if self.is_initialized() {
            return;
        }
        self.state = EngineState::Initialized;

        let pid = modules.process_id();
        let entries = match modules.module_snapshot() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "module snapshot failed; symbols unavailable");
                return;
            }
        };

        let main_path = modules.main_module_path();
        let main_entry = entries
            .iter()
            .filter(|entry| entry.process_id == pid)
            .position(|entry| main_path.as_deref().is_some_and(|main| same_file(main, &entry.path)));

        let mut slots: Vec<(usize, ImageSlot)> = entries
            .iter()
            .filter(|entry| entry.process_id == pid)
            .enumerate()
            .map(|(order, entry)| (order, ImageSlot::new(entry)))
            .collect();
        // Without a path match the first row of the snapshot is the executable.
        let main_order = main_entry.or(if slots.is_empty() { None } else { Some(0) });

        slots.sort_by_key(|(_, slot)| slot.descriptor.base);
        self.main = main_order.and_then(|order| slots.iter().position(|(o, _)| *o == order));
        self.slots = slots.into_iter().map(|(_, slot)| slot).collect();

        debug!(modules = self.slots.len(), "symbol engine initialized");
        self.load_external_metadata();
    }

    fn load_external_metadata(&mut self)
    {
        let Some(main) = self.main else {
            return;
        };
        let debug_file_name = self.debug_file_name.clone();
        let slot = &mut self.slots[main];

        if slot.image().is_some_and(ModuleImage::has_debug_info) {
            debug!(path = %slot.descriptor.path.display(), "executable carries full debug info");
            return;
        }

        let Some(candidate) = external_metadata_path(&slot.descriptor.path, debug_file_name.as_deref()) else {
            return;
        };
        match fs::metadata(&candidate) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return,
        }

        let link_base = slot.image().map(ModuleImage::link_base);
        slot.metadata = Metadata::Unloaded;

        let loaded = match link_base {
            Some(link_base) => ModuleImage::parse_external(&candidate, &slot.descriptor, link_base),
            None => ModuleImage::parse(&ImageDescriptor {
                path: candidate.clone(),
                ..slot.descriptor.clone()
            }),
        };

        match loaded {
            Ok(image) => {
                info!(path = %candidate.display(), "loaded external debug metadata");
                slot.metadata = Metadata::External(image);
            }
            Err(err) => {
                let err = PostmortemError::SymbolLoadFailed {
                    path: candidate,
                    details: format!("{err}; size = {}, base = {}", slot.descriptor.size, slot.descriptor.base),
                };
                error!("{err}");
                slot.metadata = Metadata::Default;
            }
        }
    }

    fn slot_for_address(&self, address: Address) -> Option<&ImageSlot>
    {
        let index = self.slots.partition_point(|slot| slot.descriptor.base <= address);
        let slot = self.slots.get(index.checked_sub(1)?)?;
        slot.descriptor.contains(address).then_some(slot)
    }

    /// Parsed module file containing `address`, for unwind data.
    pub fn image_for_address(&self, address: Address) -> Option<&ModuleImage>
    {
        self.slot_for_address(address)?.image()
    }
}

impl SymbolResolver for SymbolEngine
{
    fn resolve_symbol(&self, address: Address) -> Option<ResolvedSymbol>
    {
        self.slot_for_address(address)?.symbol_source()?.resolve_symbol(address)
    }

    fn resolve_line(&self, address: Address) -> Option<SourceLocation>
    {
        self.slot_for_address(address)?.symbol_source()?.resolve_line(address)
    }

    fn module_metadata_status(&self, base: Address) -> Option<MetadataStatus>
    {
        let slot = self.slots.iter().find(|slot| slot.descriptor.base == base)?;
        match &slot.metadata {
            // Symbol tables alone do not count as debug metadata.
            Metadata::Default => slot.image().filter(|image| image.has_debug_info()).map(|_| MetadataStatus {
                name: file_name(&slot.descriptor.path),
                mismatched: false,
            }),
            Metadata::Unloaded => None,
            Metadata::External(external) => {
                let mismatched = match (slot.image().and_then(ModuleImage::build_id), external.build_id()) {
                    (Some(module), Some(metadata)) => module != metadata,
                    _ => false,
                };
                Some(MetadataStatus {
                    name: external.name(),
                    mismatched,
                })
            }
        }
    }
}

/// `<dir of exe>/<name>`, where `name` defaults to `<exe file name>.debug`.
fn external_metadata_path(executable: &Path, name: Option<&str>) -> Option<PathBuf>
{
    let directory = executable.parent()?;
    let name = match name {
        Some(name) => name.to_string(),
        None => format!("{}.debug", executable.file_name()?.to_string_lossy()),
    };
    Some(directory.join(name))
}

fn same_file(a: &Path, b: &Path) -> bool
{
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
