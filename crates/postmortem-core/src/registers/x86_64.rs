//! x86-64 register snapshot.

use super::RegisterLayout;
use crate::types::Address;

/// General-purpose registers of an x86-64 thread.
///
/// Field order follows the System V DWARF numbering (RAX=0, RDX=1, RCX=2,
/// RBX=3, RSI=4, RDI=5, RBP=6, RSP=7, R8..R15=8..15), with RIP standing in
/// for the return-address column 16.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct X86_64Context
{
    pub rax: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    /// R8 through R15.
    pub r: [u64; 8],
    pub rip: u64,
    pub rflags: u64,
}

impl RegisterLayout for X86_64Context
{
    const FRAME_POINTER_REGISTER: u16 = 6;
    const RETURN_ADDRESS_REGISTER: u16 = 16;
    const STACK_POINTER_REGISTER: u16 = 7;

    fn pc(&self) -> Address
    {
        Address::new(self.rip)
    }

    fn sp(&self) -> Address
    {
        Address::new(self.rsp)
    }

    fn fp(&self) -> Address
    {
        Address::new(self.rbp)
    }

    fn set_pc(&mut self, value: Address)
    {
        self.rip = value.value();
    }

    fn set_sp(&mut self, value: Address)
    {
        self.rsp = value.value();
    }

    fn set_fp(&mut self, value: Address)
    {
        self.rbp = value.value();
    }

    fn dwarf(&self, register: u16) -> Option<u64>
    {
        let value = match register {
            0 => self.rax,
            1 => self.rdx,
            2 => self.rcx,
            3 => self.rbx,
            4 => self.rsi,
            5 => self.rdi,
            6 => self.rbp,
            7 => self.rsp,
            8..=15 => self.r[usize::from(register - 8)],
            16 => self.rip,
            _ => return None,
        };
        Some(value)
    }

    fn set_dwarf(&mut self, register: u16, value: u64) -> bool
    {
        let slot = match register {
            0 => &mut self.rax,
            1 => &mut self.rdx,
            2 => &mut self.rcx,
            3 => &mut self.rbx,
            4 => &mut self.rsi,
            5 => &mut self.rdi,
            6 => &mut self.rbp,
            7 => &mut self.rsp,
            8..=15 => &mut self.r[usize::from(register - 8)],
            16 => &mut self.rip,
            _ => return false,
        };
        *slot = value;
        true
    }
}
