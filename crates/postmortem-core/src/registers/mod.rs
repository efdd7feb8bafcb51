//! # Registers
//!
//! Register snapshots of a thread, as consumed by the stack walker.
//!
//! The layout is chosen at build time: [`ThreadContext`] aliases
//! [`X86_64Context`] on x86-64 and [`Arm64Context`] on AArch64. Code that
//! only needs the program counter, stack pointer and frame pointer goes
//! through the [`RegisterLayout`] trait so it stays architecture-neutral;
//! the CFI unwinder additionally uses the DWARF register mapping.
//!
//! ## DWARF register numbers
//!
//! | Architecture | SP | FP | Return address |
//! |--------------|----|----|----------------|
//! | x86-64       | 7  | 6  | 16             |
//! | AArch64      | 31 | 29 | 30             |

pub mod arm64;
pub mod x86_64;

pub use arm64::Arm64Context;
pub use x86_64::X86_64Context;

use crate::types::Address;

/// Architecture-neutral view of a register snapshot.
pub trait RegisterLayout: Clone + Default + std::fmt::Debug + Send
{
    /// DWARF column holding the return address in CFI tables.
    const RETURN_ADDRESS_REGISTER: u16;
    /// DWARF number of the stack pointer.
    const STACK_POINTER_REGISTER: u16;
    /// DWARF number of the frame pointer.
    const FRAME_POINTER_REGISTER: u16;

    /// Build a snapshot holding only the three walk registers.
    fn from_frame(pc: Address, sp: Address, fp: Address) -> Self
    {
        let mut context = Self::default();
        context.set_pc(pc);
        context.set_sp(sp);
        context.set_fp(fp);
        context
    }

    /// Program counter.
    fn pc(&self) -> Address;
    /// Stack pointer.
    fn sp(&self) -> Address;
    /// Frame pointer.
    fn fp(&self) -> Address;

    fn set_pc(&mut self, value: Address);
    fn set_sp(&mut self, value: Address);
    fn set_fp(&mut self, value: Address);

    /// Read a register by DWARF number. `None` for registers the layout does not track.
    fn dwarf(&self, register: u16) -> Option<u64>;

    /// Write a register by DWARF number. Returns `false` for untracked registers.
    fn set_dwarf(&mut self, register: u16, value: u64) -> bool;
}

/// Register snapshot type of the running architecture.
#[cfg(target_arch = "aarch64")]
pub type ThreadContext = Arm64Context;

/// Register snapshot type of the running architecture.
#[cfg(not(target_arch = "aarch64"))]
pub type ThreadContext = X86_64Context;
