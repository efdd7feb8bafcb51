//! Stack frame types.

use super::symbols::{ResolvedSymbol, SourceLocation};
use super::Address;

/// A single resolved stack entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame
{
    /// Position in the trace, 0 = innermost.
    pub index: usize,
    /// Program counter of the frame. Never zero.
    pub pc: Address,
    /// File name of the owning module, empty if the loader does not know the address.
    pub module: String,
    /// Nearest preceding symbol; `None` renders as "Symbols not available".
    pub symbol: Option<ResolvedSymbol>,
    /// Best-effort source location.
    pub location: Option<SourceLocation>,
}

impl StackFrame
{
    /// `true` when symbol data was found for this frame.
    pub fn is_resolved(&self) -> bool
    {
        self.symbol.is_some()
    }
}

/// Outcome of one stack walk, innermost frame first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace
{
    /// Visited frames.
    pub frames: Vec<StackFrame>,
    /// Every visited frame obtained a symbol name.
    ///
    /// A walk stops at the first frame without symbol data, so `false` also
    /// means the trace was cut short.
    pub fully_resolved: bool,
}

impl StackTrace
{
    /// Number of visited frames.
    pub fn len(&self) -> usize
    {
        self.frames.len()
    }

    /// `true` when no frame was visited.
    pub fn is_empty(&self) -> bool
    {
        self.frames.is_empty()
    }
}
