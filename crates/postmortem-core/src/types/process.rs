//! Process and thread identifier types.

use std::fmt;

/// Process identifier (PID)
///
/// Snapshot facilities may list entries of other processes; every
/// enumerator compares the owner PID against the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier
///
/// The exact representation is platform-specific:
///
/// - **Linux**: kernel thread ID (TID) as returned by `gettid(2)`
/// - **Windows**: thread ID from the toolhelp snapshot
///
/// Displayed as eight zero-padded hex digits, the format used in the
/// `Thread :` lines of a report.
///
/// ```rust
/// use postmortem_core::types::ThreadId;
///
/// let thread = ThreadId::from(0x2a);
/// assert_eq!(thread.to_string(), "0000002a");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw `u64` representation of the thread identifier
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:08x}", self.0)
    }
}
