//! # Types
//!
//! Platform-agnostic types used throughout crash reporting.
//!
//! These types abstract away platform-specific details, allowing the walker,
//! the enumerators and the renderer to work with addresses, threads and
//! modules without knowing which OS produced them.

pub mod address;
pub mod module;
pub mod process;
pub mod stack;
pub mod symbols;

// Re-export all public types
pub use address::Address;
pub use module::{file_name, ModuleEntry, ModuleInfo, ThreadEntry};
pub use process::{ProcessId, ThreadId};
pub use stack::{StackFrame, StackTrace};
pub use symbols::{MetadataStatus, ResolvedSymbol, SourceLocation, SymbolLanguage, SymbolName};
