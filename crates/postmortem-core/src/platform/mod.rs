//! # Platform seams
//!
//! Everything the reporter needs from the operating system, expressed as
//! traits so the walker, the enumerators and the renderer can run against a
//! live process or against test fakes.
//!
//! - [`ThreadSource`] / [`ThreadHandle`]: thread snapshot, pause, register capture
//! - [`ModuleSource`]: module snapshot, loader queries, version data
//! - [`MemoryAccess`]: fault-tolerant reads used by the unwinder
//! - [`Platform`]: all of the above in one backend
//!
//! ## Backends
//!
//! - **Linux**: [`linux::LinuxProcess`], built on `/proc/self`, `dladdr(3)`
//!   and a real-time signal used to pause threads and capture their registers.
//!   - See: [proc(5) man page](https://man7.org/linux/man-pages/man5/proc.5.html)
//!   - See: [signal(7) man page](https://man7.org/linux/man-pages/man7/signal.7.html)
//!
//! Other operating systems build the portable core only.

#[cfg(target_os = "linux")]
pub mod linux;

use std::path::{Path, PathBuf};

use crate::error::PostmortemResult;
use crate::registers::ThreadContext;
use crate::types::{Address, ModuleEntry, ProcessId, ThreadEntry, ThreadId};

/// An open thread of the current process.
///
/// The handle is closed when dropped.
pub trait ThreadHandle
{
    /// Pause the thread.
    ///
    /// # Errors
    ///
    /// `SuspendFailed` or `Timeout` when the thread could not be paused.
    fn suspend(&mut self) -> PostmortemResult<()>;

    /// Let a paused thread continue. Calling this on a thread that is not
    /// paused is harmless.
    ///
    /// # Errors
    ///
    /// `ResumeFailed` when the thread could not be released.
    fn resume(&mut self) -> PostmortemResult<()>;

    /// Registers of the paused thread.
    ///
    /// # Errors
    ///
    /// `ContextUnavailable` when the thread is not paused or its registers
    /// could not be read.
    fn context(&mut self) -> PostmortemResult<ThreadContext>;
}

/// Thread-level view of the current process.
pub trait ThreadSource
{
    /// Identifier of the current process.
    fn process_id(&self) -> ProcessId;

    /// Identifier of the calling thread.
    fn current_thread_id(&self) -> ThreadId;

    /// Snapshot of threads. May include threads of other processes.
    ///
    /// # Errors
    ///
    /// `SnapshotFailed` when no snapshot could be taken.
    fn thread_snapshot(&self) -> PostmortemResult<Vec<ThreadEntry>>;

    /// Open a thread for suspend/capture/resume.
    ///
    /// # Errors
    ///
    /// `ThreadUnavailable` when the thread exited or cannot be opened.
    fn open_thread(&self, thread_id: ThreadId) -> PostmortemResult<Box<dyn ThreadHandle + '_>>;

    /// Capture the calling thread's registers and hand them to `visit`.
    ///
    /// The snapshot describes a frame of this call, so it is only walkable
    /// inside `visit`; once this returns, the stack it points into is gone.
    /// `visit` receives `ContextUnavailable` when the capture failed.
    fn with_current_context(&self, visit: &mut dyn FnMut(PostmortemResult<ThreadContext>));
}

/// Module-level view of the current process.
pub trait ModuleSource
{
    /// Identifier of the current process.
    fn process_id(&self) -> ProcessId;

    /// Snapshot of loaded modules in OS order. May include other processes' modules.
    ///
    /// # Errors
    ///
    /// `SnapshotFailed` when no snapshot could be taken.
    fn module_snapshot(&self) -> PostmortemResult<Vec<ModuleEntry>>;

    /// Full path of the module containing `address`, as the dynamic loader sees it.
    fn module_path_at(&self, address: Address) -> Option<PathBuf>;

    /// Raw fixed-size version block of the module file, if it carries one.
    fn version_block(&self, path: &Path) -> Option<Vec<u8>>;

    /// Version string used when the module has no version block.
    fn fallback_version(&self, _path: &Path) -> Option<String>
    {
        None
    }

    /// Path of the main executable.
    fn main_module_path(&self) -> Option<PathBuf>
    {
        std::env::current_exe().ok()
    }
}

/// Memory reads that fail instead of faulting.
pub trait MemoryAccess
{
    /// Read one native-endian 64-bit word.
    ///
    /// # Errors
    ///
    /// `MemoryReadFailed` when the address is not readable.
    fn read_u64(&self, address: Address) -> PostmortemResult<u64>;
}

/// A complete backend for the current process.
pub trait Platform: ThreadSource + ModuleSource
{
    type Memory: MemoryAccess;

    fn memory(&self) -> &Self::Memory;
}
