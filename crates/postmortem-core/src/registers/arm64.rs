//! AArch64 register snapshot.

use super::RegisterLayout;
use crate::types::Address;

/// General-purpose registers of an AArch64 thread.
///
/// X29 is the frame pointer and X30 the link register; DWARF numbers 0..=30
/// map straight onto `x`, 31 is SP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Arm64Context
{
    /// X0 through X30.
    pub x: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

impl Arm64Context
{
    /// Link register (X30).
    pub fn lr(&self) -> u64
    {
        self.x[30]
    }
}

impl RegisterLayout for Arm64Context
{
    const FRAME_POINTER_REGISTER: u16 = 29;
    const RETURN_ADDRESS_REGISTER: u16 = 30;
    const STACK_POINTER_REGISTER: u16 = 31;

    fn pc(&self) -> Address
    {
        Address::new(self.pc)
    }

    fn sp(&self) -> Address
    {
        Address::new(self.sp)
    }

    fn fp(&self) -> Address
    {
        Address::new(self.x[29])
    }

    fn set_pc(&mut self, value: Address)
    {
        self.pc = value.value();
    }

    fn set_sp(&mut self, value: Address)
    {
        self.sp = value.value();
    }

    fn set_fp(&mut self, value: Address)
    {
        self.x[29] = value.value();
    }

    fn dwarf(&self, register: u16) -> Option<u64>
    {
        match register {
            0..=30 => Some(self.x[usize::from(register)]),
            31 => Some(self.sp),
            _ => None,
        }
    }

    fn set_dwarf(&mut self, register: u16, value: u64) -> bool
    {
        match register {
            0..=30 => self.x[usize::from(register)] = value,
            31 => self.sp = value,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn frame_and_link_registers_follow_aapcs()
    {
        let mut context = Arm64Context::default();
        context.set_fp(Address::new(0x8000));
        assert!(context.set_dwarf(30, 0x4242));
        assert!(context.set_dwarf(31, 0x7000));

        assert_eq!(context.x[29], 0x8000);
        assert_eq!(context.lr(), 0x4242);
        assert_eq!(context.sp(), Address::new(0x7000));
        assert_eq!(context.dwarf(32), None);
    }
}
