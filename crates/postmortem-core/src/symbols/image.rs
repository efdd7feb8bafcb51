//! Binary image parsing and DWARF section loading.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addr2line::Context;
use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SymbolKind};
use once_cell::sync::OnceCell;
use tracing::debug;

use super::demangle::make_symbol_name;
use crate::error::{PostmortemError, PostmortemResult};
use crate::types::{file_name, Address, ResolvedSymbol, SourceLocation};

type OwnedReader = EndianArcSlice<RunTimeEndian>;

const PAGE_MASK: u64 = 0xfff;

/// Where a module file is mapped in this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor
{
    pub path: PathBuf,
    /// Lowest mapped address of the module.
    pub base: Address,
    /// Span of the mapping in bytes.
    pub size: u64,
}

impl ImageDescriptor
{
    pub fn contains(&self, address: Address) -> bool
    {
        address.offset_from(self.base).is_some_and(|offset| offset < self.size)
    }
}

#[derive(Clone)]
struct SectionBlob
{
    data: Arc<[u8]>,
    address: u64,
}

#[derive(Debug, Clone)]
struct SymbolEntry
{
    address: u64,
    size: u64,
    /// End of the section holding the symbol, 0 when unknown.
    section_end: u64,
    name: String,
}

const DWARF_SECTIONS: &[(SectionId, &str)] = &[
    (SectionId::DebugAbbrev, ".debug_abbrev"),
    (SectionId::DebugAddr, ".debug_addr"),
    (SectionId::DebugAranges, ".debug_aranges"),
    (SectionId::DebugInfo, ".debug_info"),
    (SectionId::DebugLine, ".debug_line"),
    (SectionId::DebugLineStr, ".debug_line_str"),
    (SectionId::DebugRanges, ".debug_ranges"),
    (SectionId::DebugRngLists, ".debug_rnglists"),
    (SectionId::DebugStr, ".debug_str"),
    (SectionId::DebugStrOffsets, ".debug_str_offsets"),
    (SectionId::DebugLoc, ".debug_loc"),
    (SectionId::DebugLocLists, ".debug_loclists"),
];

fn load_section_blob(file: &object::File<'_>, name: &str) -> PostmortemResult<Option<SectionBlob>>
{
    let Some(section) = file.section_by_name(name) else {
        return Ok(None);
    };
    let data = section
        .uncompressed_data()
        .map_err(|err| PostmortemError::InvalidImage(format!("failed to read {name}: {err}")))?;
    let data: Arc<[u8]> = match data {
        Cow::Borrowed(bytes) => Arc::from(bytes),
        Cow::Owned(vec) => vec.into(),
    };
    Ok(Some(SectionBlob {
        data,
        address: section.address(),
    }))
}

/// One parsed module file: symbol table, DWARF and unwind sections.
///
/// Addresses inside the file ("file addresses") differ from runtime
/// addresses by a constant `bias`.
pub struct ModuleImage
{
    path: PathBuf,
    endian: RunTimeEndian,
    bias: u64,
    runtime_range: (u64, u64),
    build_id: Option<Vec<u8>>,
    symbols: Vec<SymbolEntry>,
    debug_sections: HashMap<SectionId, Arc<[u8]>>,
    eh_frame: Option<SectionBlob>,
    eh_frame_hdr: Option<SectionBlob>,
    debug_frame: Option<SectionBlob>,
    context_cache: OnceCell<Option<Context<OwnedReader>>>,
}

impl std::fmt::Debug for ModuleImage
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("ModuleImage")
            .field("path", &self.path)
            .field("bias", &format_args!("{:#x}", self.bias))
            .field("symbols", &self.symbols.len())
            .field("has_debug_info", &self.has_debug_info())
            .finish_non_exhaustive()
    }
}

impl ModuleImage
{
    /// Parse the file at `desc.path`, mapped at `desc.base`.
    pub fn parse(desc: &ImageDescriptor) -> PostmortemResult<Self>
    {
        Self::parse_file(&desc.path, desc, None)
    }

    /// Parse a side file of debug metadata that describes the module in `desc`.
    ///
    /// `link_base` is the module's own lowest segment address, so symbols in the
    /// side file land at the same runtime addresses as the module's.
    pub fn parse_external(path: &Path, desc: &ImageDescriptor, link_base: u64) -> PostmortemResult<Self>
    {
        Self::parse_file(path, desc, Some(link_base))
    }

    fn parse_file(path: &Path, desc: &ImageDescriptor, link_base: Option<u64>) -> PostmortemResult<Self>
    {
        let bytes = fs::read(path)?;
        let file = object::File::parse(&*bytes)
            .map_err(|err| PostmortemError::InvalidImage(format!("failed to parse {}: {err}", path.display())))?;

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let link_base = link_base.or_else(|| lowest_segment(&file)).unwrap_or(0);
        let bias = desc.base.value().wrapping_sub(link_base);
        let runtime_start = desc.base.value();
        let runtime_end = runtime_start.saturating_add(desc.size);

        let build_id = file.build_id().ok().flatten().map(<[u8]>::to_vec);
        let symbols = collect_symbols(&file);

        let mut debug_sections = HashMap::new();
        for (id, name) in DWARF_SECTIONS {
            if let Some(blob) = load_section_blob(&file, name)? {
                if !blob.data.is_empty() {
                    debug_sections.insert(*id, blob.data);
                }
            }
        }

        let eh_frame = load_section_blob(&file, ".eh_frame")?.filter(|blob| !blob.data.is_empty());
        let eh_frame_hdr = load_section_blob(&file, ".eh_frame_hdr")?.filter(|blob| !blob.data.is_empty());
        let debug_frame = load_section_blob(&file, ".debug_frame")?.filter(|blob| !blob.data.is_empty());

        debug!(
            path = %path.display(),
            bias,
            symbols = symbols.len(),
            dwarf = debug_sections.contains_key(&SectionId::DebugInfo),
            "parsed module image"
        );

        Ok(Self {
            path: path.to_path_buf(),
            endian,
            bias,
            runtime_range: (runtime_start, runtime_end),
            build_id,
            symbols,
            debug_sections,
            eh_frame,
            eh_frame_hdr,
            debug_frame,
            context_cache: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// File name of the parsed file.
    pub fn name(&self) -> String
    {
        file_name(&self.path)
    }

    /// GNU build-id note, if the file carries one.
    pub fn build_id(&self) -> Option<&[u8]>
    {
        self.build_id.as_deref()
    }

    /// `true` when full DWARF debug info is present.
    pub fn has_debug_info(&self) -> bool
    {
        self.debug_sections.contains_key(&SectionId::DebugInfo)
    }

    /// Lowest segment address recorded in the file.
    pub fn link_base(&self) -> u64
    {
        self.runtime_range.0.wrapping_sub(self.bias)
    }

    pub(crate) fn endian(&self) -> RunTimeEndian
    {
        self.endian
    }

    pub fn contains(&self, address: Address) -> bool
    {
        let addr = address.value();
        addr >= self.runtime_range.0 && addr < self.runtime_range.1
    }

    /// Translate a runtime address into this file's address space.
    pub fn file_address(&self, address: Address) -> Option<u64>
    {
        self.contains(address).then(|| address.value().wrapping_sub(self.bias))
    }

    /// Translate a file address into a runtime address.
    pub(crate) fn relocated_address(&self, file_address: u64) -> u64
    {
        file_address.wrapping_add(self.bias)
    }

    pub(crate) fn eh_frame_section(&self) -> Option<(u64, &[u8])>
    {
        self.eh_frame.as_ref().map(|blob| (blob.address, blob.data.as_ref()))
    }

    pub(crate) fn eh_frame_hdr_section(&self) -> Option<(u64, &[u8])>
    {
        self.eh_frame_hdr.as_ref().map(|blob| (blob.address, blob.data.as_ref()))
    }

    pub(crate) fn debug_frame_section(&self) -> Option<&[u8]>
    {
        self.debug_frame.as_ref().map(|blob| blob.data.as_ref())
    }

    fn section_reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .debug_sections
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }

    fn symbol_context(&self) -> Option<&Context<OwnedReader>>
    {
        self.context_cache
            .get_or_init(|| {
                if !self.has_debug_info() {
                    return None;
                }
                let dwarf = Dwarf::load(|section| Ok::<_, gimli::Error>(self.section_reader(section))).ok()?;
                match Context::from_dwarf(dwarf) {
                    Ok(context) => Some(context),
                    Err(err) => {
                        debug!(path = %self.path.display(), %err, "failed to build line tables");
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Nearest preceding symbol for a runtime address.
    ///
    /// The symbol table answers first. Without a covering entry the DWARF
    /// function name is used, reported at the looked-up address itself.
    pub fn resolve_symbol(&self, address: Address) -> Option<ResolvedSymbol>
    {
        let file_addr = self.file_address(address)?;

        if let Some(entry) = self.symbol_at(file_addr) {
            return Some(ResolvedSymbol {
                name: make_symbol_name(entry.name.clone()),
                address: Address::new(self.relocated_address(entry.address)),
                displacement: file_addr - entry.address,
            });
        }

        let context = self.symbol_context()?;
        let mut frames = context.find_frames(file_addr).skip_all_loads().ok()?;
        let mut outermost = None;
        while let Ok(Some(frame)) = frames.next() {
            if let Some(raw) = frame.function.as_ref().and_then(|func| func.raw_name().ok()) {
                outermost = Some(raw.into_owned());
            }
        }

        outermost.map(|raw| ResolvedSymbol {
            name: make_symbol_name(raw),
            address,
            displacement: 0,
        })
    }

    /// Source file and line for a runtime address.
    pub fn resolve_line(&self, address: Address) -> Option<SourceLocation>
    {
        let file_addr = self.file_address(address)?;
        let location = self.symbol_context()?.find_location(file_addr).ok()??;
        Some(SourceLocation {
            file: location.file?.to_string(),
            line: location.line,
        })
    }

    /// Covering symbol. Symbols without a size only match their own address.
    fn symbol_at(&self, file_addr: u64) -> Option<&SymbolEntry>
    {
        let index = self.symbols.partition_point(|entry| entry.address <= file_addr);
        let entry = self.symbols.get(index.checked_sub(1)?)?;
        let offset = file_addr - entry.address;
        (offset < entry.size || offset == 0).then_some(entry)
    }
}

fn lowest_segment(file: &object::File<'_>) -> Option<u64>
{
    file.segments()
        .filter(|segment| segment.size() > 0)
        .map(|segment| segment.address())
        .min()
        .map(|address| address & !PAGE_MASK)
}

/// Function symbols from the static and dynamic tables, sorted by address.
fn collect_symbols(file: &object::File<'_>) -> Vec<SymbolEntry>
{
    let mut symbols: Vec<SymbolEntry> = file
        .symbols()
        .chain(file.dynamic_symbols())
        .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.address() != 0 && symbol.is_definition())
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            let section_end = symbol
                .section_index()
                .and_then(|index| file.section_by_index(index).ok())
                .map_or(0, |section| section.address().saturating_add(section.size()));
            (!name.is_empty()).then(|| SymbolEntry {
                address: symbol.address(),
                size: symbol.size(),
                section_end,
                name: name.to_string(),
            })
        })
        .collect();

    // Prefer the sized, global spelling when several names share an address.
    symbols.sort_by(|a, b| a.address.cmp(&b.address).then(b.size.cmp(&a.size)));
    symbols.dedup_by_key(|entry| entry.address);
    bound_unsized(&mut symbols);
    symbols
}

/// Give labels without a size (`_init`, `_fini`, assembly entry points) the
/// span up to the next symbol, but never past the end of their section.
fn bound_unsized(symbols: &mut [SymbolEntry])
{
    for index in 0..symbols.len() {
        if symbols[index].size != 0 {
            continue;
        }
        let limit = symbols[index].section_end;
        let end = symbols.get(index + 1).map_or(limit, |next| next.address.min(limit));
        symbols[index].size = end.saturating_sub(symbols[index].address);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn entry(address: u64, size: u64, section_end: u64, name: &str) -> SymbolEntry
    {
        SymbolEntry {
            address,
            size,
            section_end,
            name: name.into(),
        }
    }

    fn image_with_symbols(symbols: Vec<SymbolEntry>) -> ModuleImage
    {
        ModuleImage {
            path: PathBuf::from("/opt/app/libdemo.so"),
            endian: RunTimeEndian::Little,
            bias: 0x7f00_0000_0000,
            runtime_range: (0x7f00_0000_0000, 0x7f00_0010_0000),
            build_id: None,
            symbols,
            debug_sections: HashMap::new(),
            eh_frame: None,
            eh_frame_hdr: None,
            debug_frame: None,
            context_cache: OnceCell::new(),
        }
    }

    #[test]
    fn symbol_lookup_respects_sizes()
    {
        let image = image_with_symbols(vec![
            entry(0x1000, 0x40, 0x3000, "first"),
            entry(0x2000, 0x10, 0x3000, "second"),
        ]);

        let hit = image.resolve_symbol(Address::new(0x7f00_0000_1010)).unwrap();
        assert_eq!(hit.name.display_name(), "first");
        assert_eq!(hit.address, Address::new(0x7f00_0000_1000));
        assert_eq!(hit.displacement, 0x10);

        assert!(image.resolve_symbol(Address::new(0x7f00_0000_1040)).is_none());
        assert!(image.resolve_symbol(Address::new(0x7f00_0000_0fff)).is_none());
        assert!(image.resolve_symbol(Address::new(0x1000)).is_none());
    }

    #[test]
    fn unsized_symbol_without_section_matches_only_its_address()
    {
        let image = image_with_symbols(vec![entry(0x1000, 0x40, 0, "real_fn"), entry(0x2000, 0, 0, "_fini")]);

        let exact = image.resolve_symbol(Address::new(0x7f00_0000_2000)).unwrap();
        assert_eq!(exact.name.display_name(), "_fini");
        assert_eq!(exact.displacement, 0);

        assert!(image.resolve_symbol(Address::new(0x7f00_0000_2001)).is_none());
        assert!(image.resolve_symbol(Address::new(0x7f00_0009_0000)).is_none());
    }

    #[test]
    fn unsized_symbols_end_at_next_symbol_or_section_end()
    {
        let mut symbols = vec![
            entry(0x1000, 0, 0x1100, "_init"),
            entry(0x1020, 0x20, 0x1100, "init_helper"),
            entry(0x2000, 0, 0x200d, "_fini"),
        ];
        bound_unsized(&mut symbols);
        assert_eq!(symbols[0].size, 0x20);
        assert_eq!(symbols[2].size, 0xd);

        let image = image_with_symbols(symbols);
        let hit = image.resolve_symbol(Address::new(0x7f00_0000_2008)).unwrap();
        assert_eq!(hit.name.display_name(), "_fini");
        assert_eq!(hit.displacement, 8);

        assert!(image.resolve_symbol(Address::new(0x7f00_0000_200d)).is_none());
        assert!(image.resolve_symbol(Address::new(0x7f00_0009_0000)).is_none());
    }

    #[test]
    fn link_base_undoes_bias()
    {
        let image = image_with_symbols(Vec::new());
        assert_eq!(image.link_base(), 0);
        assert_eq!(image.file_address(Address::new(0x7f00_0000_2000)), Some(0x2000));
        assert!(!image.has_debug_info());
    }
}
