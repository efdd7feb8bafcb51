//! # Linux backend
//!
//! The current process seen through `/proc/self`, the dynamic loader and a
//! sampling signal.
//!
//! | Need                 | Source                                   |
//! |----------------------|------------------------------------------|
//! | thread snapshot      | `/proc/self/task`                        |
//! | pause / capture      | `SIGRTMIN` handshake ([`sampler`])       |
//! | calling thread       | `getcontext(3)`                          |
//! | module snapshot      | `/proc/self/maps` ([`maps`])             |
//! | module at address    | `dladdr(3)` ([`loader`])                 |
//! | memory reads         | `/proc/self/mem` ([`memory`])            |
//! | fault entry point    | `sigaction(2)` handlers ([`fault`])      |
//!
//! ## References
//!
//! - [proc(5) man page](https://man7.org/linux/man-pages/man5/proc.5.html)
//! - [gettid(2) man page](https://man7.org/linux/man-pages/man2/gettid.2.html)

mod context;
pub mod fault;
pub mod loader;
pub mod maps;
pub mod memory;
pub mod sampler;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use fault::{install_fault_handler, raise_fault, SelfTestFault};
pub use loader::LinuxModules;
pub use memory::ProcMemory;
use sampler::SampledThread;

use crate::config::ReportConfig;
use crate::error::{PostmortemError, PostmortemResult};
use crate::platform::{ModuleSource, Platform, ThreadHandle, ThreadSource};
use crate::registers::ThreadContext;
use crate::types::{Address, ModuleEntry, ProcessId, ThreadEntry, ThreadId};

const TASK_DIR: &str = "/proc/self/task";

/// The current process on Linux.
#[derive(Debug)]
pub struct LinuxProcess
{
    modules: LinuxModules,
    memory: ProcMemory,
    suspend_timeout: Duration,
}

impl LinuxProcess
{
    /// Open `/proc/self/mem` and install the sampling handler.
    ///
    /// # Errors
    ///
    /// - `Io`: `/proc/self/mem` cannot be opened
    /// - `Unsupported`: the sampling handler cannot be installed
    pub fn new(config: &ReportConfig) -> PostmortemResult<Self>
    {
        sampler::install()?;
        Ok(Self {
            modules: LinuxModules::new(),
            memory: ProcMemory::open()?,
            suspend_timeout: config.suspend_timeout,
        })
    }
}

/// An open thread, paused through the sampling signal.
struct LinuxThread
{
    sample: SampledThread,
}

impl ThreadHandle for LinuxThread
{
    fn suspend(&mut self) -> PostmortemResult<()>
    {
        self.sample.pause()
    }

    fn resume(&mut self) -> PostmortemResult<()>
    {
        self.sample.release()
    }

    fn context(&mut self) -> PostmortemResult<ThreadContext>
    {
        self.sample.context()
    }
}

impl ThreadSource for LinuxProcess
{
    fn process_id(&self) -> ProcessId
    {
        ModuleSource::process_id(&self.modules)
    }

    fn current_thread_id(&self) -> ThreadId
    {
        ThreadId::from(u64::from(unsafe { libc::gettid() }.unsigned_abs()))
    }

    fn thread_snapshot(&self) -> PostmortemResult<Vec<ThreadEntry>>
    {
        let owner_process_id = ThreadSource::process_id(self);
        let entries = fs::read_dir(TASK_DIR)
            .map_err(|err| PostmortemError::SnapshotFailed(format!("reading {TASK_DIR}: {err}")))?;

        let mut threads: Vec<ThreadEntry> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u64>().ok())
            .map(|tid| ThreadEntry {
                thread_id: ThreadId::from(tid),
                owner_process_id,
            })
            .collect();
        threads.sort_by_key(|entry| entry.thread_id.raw());
        Ok(threads)
    }

    fn open_thread(&self, thread_id: ThreadId) -> PostmortemResult<Box<dyn ThreadHandle + '_>>
    {
        let task = Path::new(TASK_DIR).join(thread_id.raw().to_string());
        if !task.exists() {
            return Err(PostmortemError::ThreadUnavailable {
                thread_id,
                details: "thread exited".into(),
            });
        }
        Ok(Box::new(LinuxThread {
            sample: SampledThread::new(thread_id, self.suspend_timeout),
        }))
    }

    fn with_current_context(&self, visit: &mut dyn FnMut(PostmortemResult<ThreadContext>))
    {
        context::with_current_context(visit);
    }
}

impl ModuleSource for LinuxProcess
{
    fn process_id(&self) -> ProcessId
    {
        ModuleSource::process_id(&self.modules)
    }

    fn module_snapshot(&self) -> PostmortemResult<Vec<ModuleEntry>>
    {
        self.modules.module_snapshot()
    }

    fn module_path_at(&self, address: Address) -> Option<PathBuf>
    {
        self.modules.module_path_at(address)
    }

    fn version_block(&self, path: &Path) -> Option<Vec<u8>>
    {
        self.modules.version_block(path)
    }

    fn fallback_version(&self, path: &Path) -> Option<String>
    {
        self.modules.fallback_version(path)
    }
}

impl Platform for LinuxProcess
{
    type Memory = ProcMemory;

    fn memory(&self) -> &Self::Memory
    {
        &self.memory
    }
}
