//! Fault-tolerant reads of this process's memory.
//!
//! Reads go through `/proc/self/mem` instead of dereferencing pointers: an
//! unmapped or protected address makes `pread(2)` fail with `EIO` rather
//! than raising `SIGSEGV` inside the crash reporter.
//!
//! ## References
//!
//! - [proc_pid_mem(5) man page](https://man7.org/linux/man-pages/man5/proc_pid_mem.5.html)

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::{PostmortemError, PostmortemResult};
use crate::platform::MemoryAccess;
use crate::types::Address;

const MEM_PATH: &str = "/proc/self/mem";

/// Reader over `/proc/self/mem`.
#[derive(Debug)]
pub struct ProcMemory
{
    file: File,
}

impl ProcMemory
{
    /// Open `/proc/self/mem` for reading.
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be opened (no `/proc`, restrictive ptrace scope).
    pub fn open() -> PostmortemResult<Self>
    {
        Ok(Self {
            file: File::open(MEM_PATH)?,
        })
    }

    /// Fill `buffer` from `address`.
    ///
    /// # Errors
    ///
    /// `MemoryReadFailed` when any byte of the range is unreadable.
    pub fn read_exact(&self, address: Address, buffer: &mut [u8]) -> PostmortemResult<()>
    {
        self.file
            .read_exact_at(buffer, address.value())
            .map_err(|err| PostmortemError::MemoryReadFailed {
                address: address.value(),
                details: err.to_string(),
            })
    }
}

impl MemoryAccess for ProcMemory
{
    fn read_u64(&self, address: Address) -> PostmortemResult<u64>
    {
        let mut bytes = [0u8; 8];
        self.read_exact(address, &mut bytes)?;
        Ok(u64::from_ne_bytes(bytes))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn reads_live_values()
    {
        let value: u64 = 0x1122_3344_5566_7788;
        let memory = ProcMemory::open().unwrap();
        let address = Address::new(std::ptr::addr_of!(value) as u64);
        assert_eq!(memory.read_u64(address).unwrap(), value);
    }

    #[test]
    fn unmapped_address_is_an_error()
    {
        let memory = ProcMemory::open().unwrap();
        let err = memory.read_u64(Address::new(0x10)).unwrap_err();
        assert!(matches!(err, PostmortemError::MemoryReadFailed { address: 0x10, .. }));
    }
}
