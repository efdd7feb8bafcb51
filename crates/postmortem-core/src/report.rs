//! # Report rendering
//!
//! [`ReportRenderer`] writes the crash report, section by section:
//!
//! ```text
//! begin
//!   -> exception section          (only when a fault is present)
//!   -> "Stack trace:"             (faulting or current thread)
//!   -> "Threads:"                 (only when the primary trace fully resolved)
//!   -> "Loaded Modules :"
//! end
//! ```
//!
//! The thread walk is skipped after an unresolved primary trace: missing
//! symbols on the faulting thread usually mean missing symbols everywhere,
//! and suspending every thread to print numeric-only stacks is not worth it.
//! [`ReportConfig::walk_threads_on_unresolved`] forces the walk anyway.
//!
//! Sections fail independently. A missing thread list, an unreadable thread
//! or an unsymbolized frame turn into a marker line; only errors writing to
//! the sink itself are returned.
//!
//! [`write_fault_summary`] is the four-line block printed before the full
//! report is attempted, so that something useful reaches the log even if
//! the report itself crashes.

use std::io::{self, Write};

use tracing::{debug, warn};

use crate::config::ReportConfig;
use crate::error::{PostmortemError, PostmortemResult};
use crate::exception::{ExceptionRecord, FaultInfo};
use crate::modules::{for_each_module_in_process, resolve_module};
use crate::platform::{ModuleSource, ThreadSource};
use crate::registers::ThreadContext;
use crate::symbols::SymbolResolver;
use crate::threads::for_each_thread_in_process;
use crate::types::{Address, ModuleInfo, StackTrace, ThreadId};
use crate::unwind::{StackWalker, Unwind, WalkOptions};

/// Marker printed for a frame without symbols.
pub const SYMBOLS_NOT_AVAILABLE: &str = "Symbols not available";
/// Marker printed after a module whose debug metadata does not match it.
pub const UNMATCHED: &str = "[unmatched]";

/// Renders one crash report.
pub struct ReportRenderer<'a>
{
    threads: &'a dyn ThreadSource,
    modules: &'a dyn ModuleSource,
    symbols: &'a dyn SymbolResolver,
    unwinder: &'a dyn Unwind,
    config: &'a ReportConfig,
}

impl<'a> ReportRenderer<'a>
{
    pub fn new(
        threads: &'a dyn ThreadSource,
        modules: &'a dyn ModuleSource,
        symbols: &'a dyn SymbolResolver,
        unwinder: &'a dyn Unwind,
        config: &'a ReportConfig,
    ) -> Self
    {
        Self {
            threads,
            modules,
            symbols,
            unwinder,
            config,
        }
    }

    /// Write the full report for `fault`, or a voluntary trace of the
    /// calling thread when `fault` is `None`.
    ///
    /// # Errors
    ///
    /// Only I/O errors from `sink`.
    pub fn render(&self, sink: &mut dyn Write, fault: Option<&FaultInfo>) -> io::Result<()>
    {
        if let Some(fault) = fault {
            self.write_exception_section(sink, &fault.record)?;
        }

        let resolved = self.write_primary_stack(sink, fault)?;
        if resolved || self.config.walk_threads_on_unresolved {
            self.write_threads_section(sink)?;
        } else {
            warn!("primary stack trace incomplete; skipping other threads");
        }

        self.render_modules(sink)?;
        sink.flush()
    }

    fn walker(&self) -> StackWalker<'_>
    {
        StackWalker::new(self.symbols, self.modules, self.unwinder, WalkOptions::from(self.config))
    }

    /// One block per record in the chain, nested blocks prefixed with `Nested `.
    fn write_exception_section(&self, sink: &mut dyn Write, record: &ExceptionRecord) -> io::Result<()>
    {
        let mut depth = 0;
        for current in record.chain() {
            if depth > 0 {
                write!(sink, "Nested ")?;
            }
            self.write_exception_record(sink, current)?;
            depth += 1;
        }
        for _ in 0..depth {
            write!(sink, "\n\n")?;
        }
        Ok(())
    }

    fn write_exception_record(&self, sink: &mut dyn Write, record: &ExceptionRecord) -> io::Result<()>
    {
        let module = resolve_module(self.modules, record.address).unwrap_or_default();

        writeln!(sink, "Exception Record:\n")?;
        writeln!(sink, "ExceptionCode         : {}", record.code.describe())?;
        writeln!(sink, "Exception Address     : {}", pointer(record.address))?;
        writeln!(sink, "Exception Module      : {module}")?;
        writeln!(sink, "Exception Flags       : 0x{:08x}", record.flags)?;
        writeln!(sink, "Exception Parameters  : 0x{:x}", record.parameters.len())?;
        for (index, parameter) in record.parameters.iter().enumerate() {
            writeln!(sink, "\tParameters[{index}] : {}", pointer(Address::new(*parameter)))?;
        }
        Ok(())
    }

    /// The faulting thread's stack when the fault has an address, the
    /// calling thread's otherwise. Returns whether every frame resolved.
    fn write_primary_stack(&self, sink: &mut dyn Write, fault: Option<&FaultInfo>) -> io::Result<bool>
    {
        writeln!(sink, "Stack trace:")?;

        let walker = self.walker();
        let trace = match fault {
            Some(fault) if !fault.record.address.is_zero() => Ok(walker.walk(&fault.context)),
            _ => {
                // The walk has to run while the captured frame is still on the stack.
                let mut walked = None;
                self.threads.with_current_context(&mut |context| {
                    walked = Some(context.map(|context| walker.walk(&context)));
                });
                walked.unwrap_or_else(|| {
                    Err(PostmortemError::ContextUnavailable {
                        thread_id: None,
                        details: "no context was captured".into(),
                    })
                })
            }
        };

        match trace {
            Ok(trace) => {
                write_trace(sink, &trace)?;
                Ok(trace.fully_resolved)
            }
            Err(err) => {
                warn!(%err, "cannot capture the current thread");
                writeln!(sink, "Cannot get thread context : {err}")?;
                Ok(false)
            }
        }
    }

    fn write_threads_section(&self, sink: &mut dyn Write) -> io::Result<()>
    {
        writeln!(sink, "Threads:")?;

        let walker = self.walker();
        let mut written = Ok(());
        let listed = for_each_thread_in_process(self.threads, |thread_id, context| {
            if written.is_err() {
                return;
            }
            written = write_thread(&mut *sink, &walker, thread_id, context);
        });

        if let Err(err) = listed {
            warn!(%err, "thread snapshot failed");
            writeln!(sink, "Unable to retrieve threads list.")?;
        }
        written
    }

    /// Write the "Loaded Modules" section on its own.
    ///
    /// # Errors
    ///
    /// Only I/O errors from `sink`.
    pub fn render_modules(&self, sink: &mut dyn Write) -> io::Result<()>
    {
        writeln!(sink, "Loaded Modules :")?;

        let mut written = Ok(());
        let listed = for_each_module_in_process(self.modules, self.symbols, |module| {
            if written.is_err() {
                return;
            }
            written = write_module(&mut *sink, &module);
        });

        if let Err(err) = listed {
            warn!(%err, "module snapshot failed");
            writeln!(sink, " Error getting module list.")?;
        }
        written
    }
}

fn write_thread(
    sink: &mut dyn Write,
    walker: &StackWalker<'_>,
    thread_id: ThreadId,
    context: PostmortemResult<ThreadContext>,
) -> io::Result<()>
{
    writeln!(sink, "Thread : {thread_id}")?;
    match context {
        Ok(context) => write_trace(sink, &walker.walk(&context)),
        Err(err) => writeln!(sink, "Cannot get thread context : {err}"),
    }
}

/// One line per frame, then a blank-line separator.
///
/// Resolved frames show the start address of their symbol; the unresolved
/// frame that ended the walk shows its program counter.
pub fn write_trace(sink: &mut dyn Write, trace: &StackTrace) -> io::Result<()>
{
    for frame in &trace.frames {
        match &frame.symbol {
            Some(symbol) => {
                write!(
                    sink,
                    "{:<20}:{}  {}",
                    frame.module,
                    pointer(symbol.address),
                    symbol.name.display_name()
                )?;
                if let Some(location) = &frame.location {
                    write!(sink, " {location}")?;
                }
                writeln!(sink)?;
            }
            None => {
                debug!(pc = %frame.pc, "unresolved frame");
                writeln!(sink, "{:<20}:{}  {SYMBOLS_NOT_AVAILABLE}", frame.module, pointer(frame.pc))?;
            }
        }
    }
    write!(sink, "\n\n")
}

fn write_module(sink: &mut dyn Write, module: &ModuleInfo) -> io::Result<()>
{
    match &module.metadata {
        Some(metadata) => writeln!(
            sink,
            "{} {:<20} {} {} {}",
            pointer(module.base),
            module.version,
            module.name,
            metadata.name,
            if metadata.mismatched { UNMATCHED } else { "" }
        ),
        None => writeln!(sink, "{} {:<20} {}", pointer(module.base), module.version, module.name),
    }
}

/// Terse four-line summary of a fault: description, address, module, thread.
///
/// # Errors
///
/// Only I/O errors from `sink`.
pub fn write_fault_summary(sink: &mut dyn Write, fault: &FaultInfo, modules: &dyn ModuleSource) -> io::Result<()>
{
    let module = resolve_module(modules, fault.record.address).unwrap_or_default();
    writeln!(sink, "Error   : {}", fault.record.code.describe())?;
    writeln!(sink, "Address : {}", pointer(fault.record.address))?;
    writeln!(sink, "Module  : {module}")?;
    writeln!(sink, "Thread  : {}", fault.thread_id)?;
    sink.flush()
}

/// Pointer-width upper-case hex, `0x` prefixed.
fn pointer(address: Address) -> String
{
    format!("0x{address:016X}")
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::{MetadataStatus, ResolvedSymbol, SourceLocation, StackFrame, SymbolLanguage, SymbolName};

    fn resolved(index: usize, pc: u64, start: u64, name: &str) -> StackFrame
    {
        StackFrame {
            index,
            pc: Address::new(pc),
            module: "render".into(),
            symbol: Some(ResolvedSymbol {
                name: SymbolName::new(name.into(), None, SymbolLanguage::C),
                address: Address::new(start),
                displacement: pc - start,
            }),
            location: None,
        }
    }

    #[test]
    fn frames_print_symbol_start_and_location()
    {
        let mut frame = resolved(0, 0x1010, 0x1000, "draw_scene");
        frame.location = Some(SourceLocation::new("src/draw.c", 42));
        let trace = StackTrace {
            frames: vec![frame],
            fully_resolved: true,
        };

        let mut out = Vec::new();
        write_trace(&mut out, &trace).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "render              :0x0000000000001000  draw_scene src/draw.c:42\n\n\n");
    }

    #[test]
    fn unresolved_frame_prints_pc_and_marker()
    {
        let trace = StackTrace {
            frames: vec![StackFrame {
                index: 0,
                pc: Address::new(0xdead_beef),
                module: String::new(),
                symbol: None,
                location: None,
            }],
            fully_resolved: false,
        };

        let mut out = Vec::new();
        write_trace(&mut out, &trace).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("                    :0x00000000DEADBEEF  Symbols not available\n"));
    }

    #[test]
    fn module_line_marks_mismatched_metadata()
    {
        let module = ModuleInfo {
            base: Address::new(0x5555_0000_0000),
            path: "/opt/app/render".into(),
            name: "render".into(),
            version: "1.2.3.4".into(),
            metadata: Some(MetadataStatus {
                name: "render.debug".into(),
                mismatched: true,
            }),
        };

        let mut out = Vec::new();
        write_module(&mut out, &module).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "0x0000555500000000 1.2.3.4              render render.debug [unmatched]\n"
        );
    }
}
