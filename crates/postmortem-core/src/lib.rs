//! # postmortem-core
//!
//! Crash-time diagnostics for the running process: classify the fault, walk
//! the stack of every thread, resolve addresses to symbols and source lines,
//! list the loaded modules, and render it all as a plain-text report.
//!
//! ## Components
//!
//! - [`exception`]: fault codes and exception records
//! - [`modules`]: address-to-module lookup and module enumeration
//! - [`symbols`]: the symbol engine (`object`, `gimli`, `addr2line`)
//! - [`unwind`]: the stack walker and the DWARF CFI unwinder
//! - [`threads`]: pause/capture/resume of the other threads
//! - [`report`]: the report renderer and the terse fault summary
//! - [`reporter`]: [`CrashReporter`], which wires everything to a platform
//!
//! ## Platform Support
//!
//! - **Linux** (x86-64, AArch64): live backend in [`platform::linux`]
//! - Elsewhere the portable core builds, and runs against any
//!   [`platform::Platform`] implementation
//!
//! ## Why unsafe code is needed
//!
//! The Linux backend installs signal handlers, reads `ucontext_t` register
//! frames and asks the dynamic loader about addresses. Those calls are
//! wrapped in safe functions; nothing outside [`platform`] uses `unsafe`.

#![allow(unsafe_code)] // Required for signal handling and dladdr on Linux

pub mod config;
pub mod error;
pub mod exception;
pub mod modules;
pub mod platform;
pub mod prelude;
pub mod registers;
pub mod report;
pub mod reporter;
pub mod symbols;
pub mod threads;
pub mod types;
pub mod unwind;
pub mod version;

pub use config::ReportConfig;
pub use error::{PostmortemError, PostmortemResult};
pub use exception::{ExceptionRecord, FaultCode, FaultInfo};
pub use report::{write_fault_summary, ReportRenderer};
pub use reporter::CrashReporter;
pub use symbols::{SymbolEngine, SymbolResolver};
pub use types::{Address, ProcessId, ThreadId};
pub use unwind::{CfiUnwinder, StackWalker};
