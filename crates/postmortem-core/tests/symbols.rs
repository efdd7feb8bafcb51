//! Symbol engine initialization against generated ELF files.

mod common;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use common::{FakeModules, FakeThreads, ScriptedUnwinder, PID};
use object::write::{Object, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use postmortem_core::config::ReportConfig;
use postmortem_core::report::ReportRenderer;
use postmortem_core::symbols::{SymbolEngine, SymbolResolver};
use postmortem_core::types::Address;
use tempfile::TempDir;

const BASE: u64 = 0x40_0000;
/// Inside the 0x20-byte function every generated file defines at 0x40.
const IN_FUNCTION: u64 = BASE + 0x44;

const NT_GNU_BUILD_ID: u32 = 3;

#[cfg(target_arch = "aarch64")]
const ARCH: Architecture = Architecture::Aarch64;
#[cfg(not(target_arch = "aarch64"))]
const ARCH: Architecture = Architecture::X86_64;

/// A small ELF object with one function, optionally `.debug_info` and a build-id note.
fn elf(function: &str, debug_info: bool, build_id: Option<&[u8]>) -> Vec<u8>
{
    let mut file = Object::new(BinaryFormat::Elf, ARCH, Endianness::Little);

    let text = file.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    file.append_section_data(text, &[0x90; 0x100], 16);
    file.add_symbol(Symbol {
        name: function.as_bytes().to_vec(),
        value: 0x40,
        size: 0x20,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });

    if debug_info {
        let section = file.add_section(Vec::new(), b".debug_info".to_vec(), SectionKind::Debug);
        file.append_section_data(section, &[0; 16], 1);
    }

    if let Some(id) = build_id {
        let mut note = Vec::new();
        note.extend(4u32.to_le_bytes());
        note.extend(u32::try_from(id.len()).unwrap().to_le_bytes());
        note.extend(NT_GNU_BUILD_ID.to_le_bytes());
        note.extend(b"GNU\0");
        note.extend(id);
        let section = file.add_section(Vec::new(), b".note.gnu.build-id".to_vec(), SectionKind::Note);
        file.append_section_data(section, &note, 4);
    }

    file.write().unwrap()
}

/// An application directory holding `render` and, optionally, `render.debug`.
struct AppDir
{
    dir: TempDir,
}

impl AppDir
{
    fn new(executable: &[u8]) -> Self
    {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("render"), executable).unwrap();
        Self { dir }
    }

    fn with_side_file(self, contents: &[u8]) -> Self
    {
        std::fs::write(self.dir.path().join("render.debug"), contents).unwrap();
        self
    }

    fn executable(&self) -> PathBuf
    {
        self.dir.path().join("render")
    }

    fn modules(&self) -> FakeModules
    {
        FakeModules::new().module(PID, BASE, 0x1000, path_str(&self.executable()))
    }

    fn engine(&self) -> SymbolEngine
    {
        let mut engine = SymbolEngine::new();
        engine.initialize(&self.modules());
        engine
    }
}

fn path_str(path: &Path) -> &str
{
    path.to_str().unwrap()
}

fn function_at(engine: &SymbolEngine, address: u64) -> String
{
    engine
        .resolve_symbol(Address::new(address))
        .map(|symbol| symbol.name.display_name().to_string())
        .unwrap_or_default()
}

fn modules_section(app: &AppDir, engine: &SymbolEngine) -> String
{
    let modules = app.modules();
    let threads = FakeThreads::new(1);
    let unwinder = ScriptedUnwinder::new();
    let config = ReportConfig::default();
    let mut out = Vec::new();
    ReportRenderer::new(&threads, &modules, engine, &unwinder, &config)
        .render_modules(&mut out)
        .unwrap();
    String::from_utf8(out).unwrap()
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>
    {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()>
    {
        Ok(())
    }
}

impl LogBuffer
{
    fn text(&self) -> String
    {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[test]
fn test_embedded_debug_info_is_kept()
{
    let app = AppDir::new(&elf("from_executable", true, None)).with_side_file(&elf("from_side_file", true, None));

    let engine = app.engine();

    assert!(engine.is_initialized());
    assert_eq!(function_at(&engine, IN_FUNCTION), "from_executable");
    let status = engine.module_metadata_status(Address::new(BASE)).unwrap();
    assert_eq!(status.name, "render");
    assert!(!status.mismatched);
}

#[test]
fn test_side_file_replaces_stripped_metadata()
{
    let id = [0x5a; 20];
    let app = AppDir::new(&elf("from_executable", false, Some(&id)))
        .with_side_file(&elf("from_side_file", true, Some(&id)));

    let engine = app.engine();

    assert_eq!(function_at(&engine, IN_FUNCTION), "from_side_file");
    let status = engine.module_metadata_status(Address::new(BASE)).unwrap();
    assert_eq!(status.name, "render.debug");
    assert!(!status.mismatched);
    assert!(modules_section(&app, &engine).ends_with(" render render.debug \n"));
}

#[test]
fn test_empty_side_file_is_ignored()
{
    let app = AppDir::new(&elf("from_executable", false, None)).with_side_file(b"");

    let engine = app.engine();

    assert_eq!(function_at(&engine, IN_FUNCTION), "from_executable");
    assert!(engine.module_metadata_status(Address::new(BASE)).is_none());
}

#[test]
fn test_failed_side_file_load_restores_default_metadata()
{
    let app = AppDir::new(&elf("from_executable", false, None)).with_side_file(b"not an object file");
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::ERROR)
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .finish();

    let engine = tracing::subscriber::with_default(subscriber, || app.engine());

    assert_eq!(function_at(&engine, IN_FUNCTION), "from_executable");
    let logged = logs.text();
    assert!(logged.contains("ERROR"), "{logged}");
    assert!(logged.contains("render.debug"), "{logged}");
}

#[test]
fn test_build_id_mismatch_is_unmatched()
{
    let app = AppDir::new(&elf("from_executable", false, Some(&[0x11; 20])))
        .with_side_file(&elf("from_side_file", true, Some(&[0x22; 20])));

    let engine = app.engine();

    let status = engine.module_metadata_status(Address::new(BASE)).unwrap();
    assert_eq!(status.name, "render.debug");
    assert!(status.mismatched);
    assert!(modules_section(&app, &engine).ends_with(" render render.debug [unmatched]\n"));
}

#[test]
fn test_symbol_table_alone_is_not_debug_metadata()
{
    let app = AppDir::new(&elf("from_executable", false, None));

    let engine = app.engine();

    assert_eq!(function_at(&engine, IN_FUNCTION), "from_executable");
    assert!(engine.module_metadata_status(Address::new(BASE)).is_none());
    let section = modules_section(&app, &engine);
    let line = section.lines().nth(1).unwrap();
    assert!(line.ends_with(" render"), "{line:?}");
}
