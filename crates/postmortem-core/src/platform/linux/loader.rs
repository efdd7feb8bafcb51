//! Module queries answered by the dynamic loader and the module files.
//!
//! [`LinuxModules`] is the `ModuleSource` half of the Linux backend. It has
//! no state besides the process id, so the fault handler can build one on
//! the spot to print the fault summary without touching anything else.
//!
//! ## Versions
//!
//! ELF files have no standard version resource. A module may carry a fixed
//! version block in a section named [`VERSION_SECTION`]; otherwise the
//! numeric suffix of a versioned shared object name is used
//! (`libz.so.1.2.13` → `1.2.13`).
//!
//! ## References
//!
//! - [dladdr(3) man page](https://man7.org/linux/man-pages/man3/dladdr.3.html)

use std::ffi::CStr;
use std::fs;
use std::path::{Path, PathBuf};

use object::{Object, ObjectSection};

use super::maps;
use crate::error::PostmortemResult;
use crate::platform::ModuleSource;
use crate::types::{file_name, Address, ModuleEntry, ProcessId};
use crate::version::VERSION_SECTION;

/// Module view of the current process.
#[derive(Debug, Clone, Copy)]
pub struct LinuxModules
{
    process_id: ProcessId,
}

impl LinuxModules
{
    pub fn new() -> Self
    {
        Self {
            process_id: ProcessId(std::process::id()),
        }
    }
}

impl Default for LinuxModules
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl ModuleSource for LinuxModules
{
    fn process_id(&self) -> ProcessId
    {
        self.process_id
    }

    fn module_snapshot(&self) -> PostmortemResult<Vec<ModuleEntry>>
    {
        maps::read_modules(self.process_id)
    }

    fn module_path_at(&self, address: Address) -> Option<PathBuf>
    {
        module_path_at(address)
    }

    fn version_block(&self, path: &Path) -> Option<Vec<u8>>
    {
        let data = fs::read(path).ok()?;
        let file = object::File::parse(&*data).ok()?;
        let section = file.section_by_name(VERSION_SECTION)?;
        section.data().ok().map(<[u8]>::to_vec)
    }

    fn fallback_version(&self, path: &Path) -> Option<String>
    {
        soname_version(&file_name(path))
    }
}

/// Path of the object containing `address`, per `dladdr(3)`.
pub(crate) fn module_path_at(address: Address) -> Option<PathBuf>
{
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    let found = unsafe { libc::dladdr(address.value() as *const libc::c_void, &mut info) };
    if found == 0 || info.dli_fname.is_null() {
        return None;
    }

    let name = unsafe { CStr::from_ptr(info.dli_fname) };
    let name = name.to_string_lossy();
    if name.is_empty() {
        return None;
    }
    Some(PathBuf::from(name.into_owned()))
}

/// Version suffix of a shared object name, if every component is numeric.
pub(crate) fn soname_version(name: &str) -> Option<String>
{
    let (_, suffix) = name.split_once(".so.")?;
    let numeric = suffix
        .split('.')
        .all(|part| !part.is_empty() && part.bytes().all(|byte| byte.is_ascii_digit()));
    numeric.then(|| suffix.to_string())
}
