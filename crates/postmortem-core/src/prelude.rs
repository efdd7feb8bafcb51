//! Common module for library exports

pub use crate::config::ReportConfig;
pub use crate::error::{PostmortemError, PostmortemResult};
pub use crate::exception::{ExceptionRecord, FaultCode, FaultInfo};
#[cfg(target_os = "linux")]
pub use crate::platform::linux::{install_fault_handler, LinuxProcess};
pub use crate::platform::{MemoryAccess, ModuleSource, Platform, ThreadHandle, ThreadSource};
pub use crate::registers::{RegisterLayout, ThreadContext};
pub use crate::reporter::CrashReporter;
pub use crate::symbols::{SymbolEngine, SymbolResolver};
pub use crate::types::{Address, ModuleInfo, ProcessId, StackFrame, StackTrace, ThreadId};
pub use crate::unwind::{StackWalker, Unwind, WalkOptions};
