//! # Stack walking
//!
//! [`StackWalker`] turns a register snapshot into a symbolized list of
//! frames. It owns the policy (when to stop, what counts as resolved); the
//! mechanics of finding a caller's registers are delegated to an [`Unwind`]
//! implementation, in production [`CfiUnwinder`].
//!
//! ## Walk loop
//!
//! 1. A program counter of zero ends the walk. The trace so far counts as
//!    fully resolved.
//! 2. The frame's module is looked up through the dynamic loader.
//! 3. The frame's symbol is looked up. Caller frames are looked up at
//!    `pc - 1`: their pc is a return address and may already point past the
//!    end of the calling function.
//! 4. Without a symbol the frame is recorded as unresolved and the walk
//!    stops. Everything below such a frame would be guesswork.
//! 5. Otherwise the source line is looked up, the frame is recorded and the
//!    unwinder is asked for the caller.
//!
//! The walk also stops at `max_frames` and when a step fails to move the
//! (pc, sp) pair, which would otherwise loop forever on corrupt stacks.

pub mod cfi;

pub use cfi::CfiUnwinder;
use tracing::debug;

use crate::config::ReportConfig;
use crate::modules::resolve_module;
use crate::platform::ModuleSource;
use crate::registers::{RegisterLayout, ThreadContext};
use crate::symbols::SymbolResolver;
use crate::types::{StackFrame, StackTrace};

/// One unwind step: rewrite `context` into the caller's registers.
pub trait Unwind
{
    /// Returns `false` when no caller can be computed; `context` may have
    /// been partially modified in that case and must not be used.
    ///
    /// `innermost` is `true` for the frame the walk started from, whose pc
    /// is exact rather than a return address.
    fn step(&self, context: &mut ThreadContext, innermost: bool) -> bool;
}

/// Limits applied by [`StackWalker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions
{
    /// Upper bound on recorded frames.
    pub max_frames: usize,
    /// Look up source lines for resolved frames.
    pub source_lines: bool,
}

impl Default for WalkOptions
{
    fn default() -> Self
    {
        Self::from(&ReportConfig::default())
    }
}

impl From<&ReportConfig> for WalkOptions
{
    fn from(config: &ReportConfig) -> Self
    {
        Self {
            max_frames: config.max_frames,
            source_lines: config.source_lines,
        }
    }
}

/// Symbolizing stack walker.
pub struct StackWalker<'a>
{
    symbols: &'a dyn SymbolResolver,
    modules: &'a dyn ModuleSource,
    unwinder: &'a dyn Unwind,
    options: WalkOptions,
}

impl<'a> StackWalker<'a>
{
    pub fn new(
        symbols: &'a dyn SymbolResolver,
        modules: &'a dyn ModuleSource,
        unwinder: &'a dyn Unwind,
        options: WalkOptions,
    ) -> Self
    {
        Self {
            symbols,
            modules,
            unwinder,
            options,
        }
    }

    /// Walk the stack described by `context`.
    ///
    /// `context` itself is never modified; the walk runs on a copy.
    pub fn walk(&self, context: &ThreadContext) -> StackTrace
    {
        let mut cursor = *context;
        let mut trace = StackTrace {
            frames: Vec::new(),
            fully_resolved: true,
        };

        loop {
            let pc = cursor.pc();
            if pc.is_zero() {
                break;
            }
            if trace.frames.len() >= self.options.max_frames {
                debug!(max_frames = self.options.max_frames, "frame limit reached");
                break;
            }

            let innermost = trace.frames.is_empty();
            let lookup = if innermost { pc } else { pc - 1 };
            let module = resolve_module(self.modules, pc).unwrap_or_default();
            let index = trace.frames.len();

            let Some(symbol) = self.symbols.resolve_symbol(lookup) else {
                debug!(%pc, %module, "no symbol for frame; stopping walk");
                trace.frames.push(StackFrame {
                    index,
                    pc,
                    module,
                    symbol: None,
                    location: None,
                });
                trace.fully_resolved = false;
                break;
            };

            let location = if self.options.source_lines {
                self.symbols.resolve_line(lookup)
            } else {
                None
            };
            trace.frames.push(StackFrame {
                index,
                pc,
                module,
                symbol: Some(symbol),
                location,
            });

            let sp = cursor.sp();
            if !self.unwinder.step(&mut cursor, innermost) {
                break;
            }
            if cursor.pc() == pc && cursor.sp() == sp {
                debug!(%pc, %sp, "unwind step made no progress");
                break;
            }
        }

        trace
    }
}
