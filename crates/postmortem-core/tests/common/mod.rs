//! Test doubles for the platform seams.
//!
//! Every fake is deterministic and records what was asked of it, so tests
//! can check not only the rendered report but also the pause/resume
//! discipline and the order of lookups.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use postmortem_core::error::{PostmortemError, PostmortemResult};
use postmortem_core::platform::{ModuleSource, ThreadHandle, ThreadSource};
use postmortem_core::registers::{RegisterLayout, ThreadContext};
use postmortem_core::symbols::SymbolResolver;
use postmortem_core::types::{
    Address, MetadataStatus, ModuleEntry, ProcessId, ResolvedSymbol, SourceLocation, SymbolLanguage, SymbolName,
    ThreadEntry, ThreadId,
};
use postmortem_core::unwind::Unwind;

pub const PID: ProcessId = ProcessId(4242);
pub const OTHER_PID: ProcessId = ProcessId(7);

pub fn context(pc: u64, sp: u64) -> ThreadContext
{
    ThreadContext::from_frame(Address::new(pc), Address::new(sp), Address::new(sp + 0x100))
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeSymbol
{
    start: u64,
    end: u64,
    name: String,
    location: Option<SourceLocation>,
}

/// Symbol table over half-open `[start, end)` ranges.
#[derive(Debug, Default)]
pub struct FakeSymbols
{
    symbols: Vec<FakeSymbol>,
    metadata: HashMap<u64, MetadataStatus>,
    pub lookups: RefCell<Vec<u64>>,
}

impl FakeSymbols
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn function(mut self, start: u64, end: u64, name: &str) -> Self
    {
        self.symbols.push(FakeSymbol {
            start,
            end,
            name: name.to_string(),
            location: None,
        });
        self
    }

    pub fn function_at_line(mut self, start: u64, end: u64, name: &str, file: &str, line: u32) -> Self
    {
        self.symbols.push(FakeSymbol {
            start,
            end,
            name: name.to_string(),
            location: Some(SourceLocation::new(file, line)),
        });
        self
    }

    pub fn metadata(mut self, base: u64, name: &str, mismatched: bool) -> Self
    {
        self.metadata.insert(
            base,
            MetadataStatus {
                name: name.to_string(),
                mismatched,
            },
        );
        self
    }

    fn find(&self, address: Address) -> Option<&FakeSymbol>
    {
        let address = address.value();
        self.symbols
            .iter()
            .find(|symbol| address >= symbol.start && address < symbol.end)
    }
}

impl SymbolResolver for FakeSymbols
{
    fn resolve_symbol(&self, address: Address) -> Option<ResolvedSymbol>
    {
        self.lookups.borrow_mut().push(address.value());
        let symbol = self.find(address)?;
        Some(ResolvedSymbol {
            name: SymbolName::new(symbol.name.clone(), None, SymbolLanguage::C),
            address: Address::new(symbol.start),
            displacement: address.value() - symbol.start,
        })
    }

    fn resolve_line(&self, address: Address) -> Option<SourceLocation>
    {
        self.find(address)?.location.clone()
    }

    fn module_metadata_status(&self, base: Address) -> Option<MetadataStatus>
    {
        self.metadata.get(&base.value()).cloned()
    }
}

// ---------------------------------------------------------------------------
// Unwinding
// ---------------------------------------------------------------------------

/// Unwinder driven by a table `pc -> (caller pc, caller sp)`.
///
/// A pc missing from the table makes the step fail.
#[derive(Debug, Default)]
pub struct ScriptedUnwinder
{
    callers: HashMap<u64, (u64, u64)>,
    pub visited: RefCell<Vec<u64>>,
}

impl ScriptedUnwinder
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn caller(mut self, pc: u64, caller_pc: u64, caller_sp: u64) -> Self
    {
        self.callers.insert(pc, (caller_pc, caller_sp));
        self
    }

    /// A chain `pcs[0] -> pcs[1] -> ...`, each frame 0x40 bytes above the previous one.
    pub fn chain(mut self, pcs: &[u64], sp: u64) -> Self
    {
        let mut sp = sp;
        for pair in pcs.windows(2) {
            sp += 0x40;
            self.callers.insert(pair[0], (pair[1], sp));
        }
        self
    }
}

impl Unwind for ScriptedUnwinder
{
    fn step(&self, context: &mut ThreadContext, _innermost: bool) -> bool
    {
        let pc = context.pc().value();
        self.visited.borrow_mut().push(pc);
        match self.callers.get(&pc) {
            Some(&(caller_pc, caller_sp)) => {
                context.set_pc(Address::new(caller_pc));
                context.set_sp(Address::new(caller_sp));
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeModules
{
    pub process_id: Option<ProcessId>,
    pub entries: Vec<ModuleEntry>,
    pub snapshot_fails: bool,
    pub version_blocks: HashMap<PathBuf, Vec<u8>>,
    pub fallback_versions: HashMap<PathBuf, String>,
}

impl FakeModules
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn module(mut self, pid: ProcessId, base: u64, size: u64, path: &str) -> Self
    {
        self.entries.push(ModuleEntry::new(pid, Address::new(base), size, path));
        self
    }

    pub fn version_block(mut self, path: &str, block: Vec<u8>) -> Self
    {
        self.version_blocks.insert(PathBuf::from(path), block);
        self
    }

    pub fn fallback_version(mut self, path: &str, version: &str) -> Self
    {
        self.fallback_versions.insert(PathBuf::from(path), version.to_string());
        self
    }

    pub fn failing(mut self) -> Self
    {
        self.snapshot_fails = true;
        self
    }
}

impl ModuleSource for FakeModules
{
    fn process_id(&self) -> ProcessId
    {
        self.process_id.unwrap_or(PID)
    }

    fn module_snapshot(&self) -> PostmortemResult<Vec<ModuleEntry>>
    {
        if self.snapshot_fails {
            return Err(PostmortemError::SnapshotFailed("module snapshot disabled".into()));
        }
        Ok(self.entries.clone())
    }

    fn module_path_at(&self, address: Address) -> Option<PathBuf>
    {
        self.entries
            .iter()
            .find(|entry| entry.contains(address))
            .map(|entry| entry.path.clone())
    }

    fn version_block(&self, path: &Path) -> Option<Vec<u8>>
    {
        self.version_blocks.get(path).cloned()
    }

    fn fallback_version(&self, path: &Path) -> Option<String>
    {
        self.fallback_versions.get(path).cloned()
    }

    fn main_module_path(&self) -> Option<PathBuf>
    {
        self.entries.first().map(|entry| entry.path.clone())
    }
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadEvent
{
    Open(ThreadId),
    Suspend(ThreadId),
    Resume(ThreadId),
    Context(ThreadId),
    Close(ThreadId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure
{
    Open,
    Suspend,
    Context,
}

#[derive(Debug, Default)]
pub struct FakeThreads
{
    pub current: u64,
    pub rows: Vec<ThreadEntry>,
    pub contexts: HashMap<u64, ThreadContext>,
    pub failures: HashMap<u64, Failure>,
    pub current_context: Option<ThreadContext>,
    pub snapshot_fails: bool,
    pub events: Rc<RefCell<Vec<ThreadEvent>>>,
}

impl FakeThreads
{
    pub fn new(current: u64) -> Self
    {
        Self {
            current,
            ..Self::default()
        }
        .thread(PID, current, None)
    }

    pub fn thread(mut self, owner: ProcessId, tid: u64, context: Option<ThreadContext>) -> Self
    {
        self.rows.push(ThreadEntry {
            thread_id: ThreadId::from(tid),
            owner_process_id: owner,
        });
        if let Some(context) = context {
            self.contexts.insert(tid, context);
        }
        self
    }

    pub fn failing_thread(mut self, tid: u64, failure: Failure) -> Self
    {
        self.rows.push(ThreadEntry {
            thread_id: ThreadId::from(tid),
            owner_process_id: PID,
        });
        self.failures.insert(tid, failure);
        self
    }

    pub fn current_context(mut self, context: ThreadContext) -> Self
    {
        self.current_context = Some(context);
        self
    }

    pub fn failing(mut self) -> Self
    {
        self.snapshot_fails = true;
        self
    }

    pub fn events(&self) -> Vec<ThreadEvent>
    {
        self.events.borrow().clone()
    }

    pub fn count(&self, matches: impl Fn(&ThreadEvent) -> bool) -> usize
    {
        self.events.borrow().iter().filter(|event| matches(event)).count()
    }
}

pub struct FakeHandle
{
    thread_id: ThreadId,
    context: Option<ThreadContext>,
    failure: Option<Failure>,
    events: Rc<RefCell<Vec<ThreadEvent>>>,
}

impl ThreadHandle for FakeHandle
{
    fn suspend(&mut self) -> PostmortemResult<()>
    {
        self.events.borrow_mut().push(ThreadEvent::Suspend(self.thread_id));
        if self.failure == Some(Failure::Suspend) {
            return Err(PostmortemError::SuspendFailed("thread is being torn down".into()));
        }
        Ok(())
    }

    fn resume(&mut self) -> PostmortemResult<()>
    {
        self.events.borrow_mut().push(ThreadEvent::Resume(self.thread_id));
        Ok(())
    }

    fn context(&mut self) -> PostmortemResult<ThreadContext>
    {
        self.events.borrow_mut().push(ThreadEvent::Context(self.thread_id));
        if self.failure == Some(Failure::Context) {
            return Err(PostmortemError::ContextUnavailable {
                thread_id: Some(self.thread_id),
                details: "registers unreadable".into(),
            });
        }
        self.context.ok_or(PostmortemError::ContextUnavailable {
            thread_id: Some(self.thread_id),
            details: "no context scripted".into(),
        })
    }
}

impl Drop for FakeHandle
{
    fn drop(&mut self)
    {
        self.events.borrow_mut().push(ThreadEvent::Close(self.thread_id));
    }
}

impl ThreadSource for FakeThreads
{
    fn process_id(&self) -> ProcessId
    {
        PID
    }

    fn current_thread_id(&self) -> ThreadId
    {
        ThreadId::from(self.current)
    }

    fn thread_snapshot(&self) -> PostmortemResult<Vec<ThreadEntry>>
    {
        if self.snapshot_fails {
            return Err(PostmortemError::SnapshotFailed("thread snapshot disabled".into()));
        }
        Ok(self.rows.clone())
    }

    fn open_thread(&self, thread_id: ThreadId) -> PostmortemResult<Box<dyn ThreadHandle + '_>>
    {
        self.events.borrow_mut().push(ThreadEvent::Open(thread_id));
        let failure = self.failures.get(&thread_id.raw()).copied();
        if failure == Some(Failure::Open) {
            return Err(PostmortemError::ThreadUnavailable {
                thread_id,
                details: "thread exited".into(),
            });
        }
        Ok(Box::new(FakeHandle {
            thread_id,
            context: self.contexts.get(&thread_id.raw()).copied(),
            failure,
            events: Rc::clone(&self.events),
        }))
    }

    fn with_current_context(&self, visit: &mut dyn FnMut(PostmortemResult<ThreadContext>))
    {
        visit(self.current_context.ok_or(PostmortemError::ContextUnavailable {
            thread_id: None,
            details: "no current context scripted".into(),
        }));
    }
}
