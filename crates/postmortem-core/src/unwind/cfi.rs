//! DWARF call frame information unwinder.
//!
//! Recovers a caller's registers from the CFI of the module that owns the
//! program counter:
//!
//! 1. `.eh_frame_hdr` binary search table, then `.eh_frame`
//! 2. a linear scan of `.eh_frame` when there is no usable header
//! 3. `.debug_frame`
//! 4. the frame-pointer chain (`[fp]` = caller fp, `[fp + 8]` = return address)
//!
//! The frame-pointer chain is only consulted when no CFI covers the pc. A
//! row that covers it is authoritative: an undefined return address marks
//! the outermost frame (thread entry, `_start`) and ends the walk.
//!
//! All CFI lookups happen in file addresses: the pc is translated into the
//! module's address space, pointer encodings are evaluated against the
//! sections' file addresses, and only register values (which are always
//! runtime values) are read from the live context.

use gimli::{
    BaseAddresses, CfaRule, DebugFrame, EhFrame, EhFrameHdr, EndianSlice, Register, RegisterRule, RunTimeEndian,
    UnwindContext, UnwindSection, UnwindTableRow,
};
use tracing::trace;

use super::Unwind;
use crate::error::{PostmortemError, PostmortemResult};
use crate::platform::MemoryAccess;
use crate::registers::{RegisterLayout, ThreadContext};
use crate::symbols::{ModuleImage, SymbolEngine};
use crate::types::Address;

const ADDRESS_SIZE: u8 = 8;

type Slice<'s> = EndianSlice<'s, RunTimeEndian>;

/// What a covering CFI row says about a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CfiStep
{
    /// The caller's registers.
    Caller(ThreadContext),
    /// The return address is undefined: there is no caller.
    Outermost,
    /// The row could not be evaluated against the current registers.
    Unusable,
}

/// CFI-driven stack unwinder with a frame-pointer fallback.
pub struct CfiUnwinder<'a, M>
{
    symbols: &'a SymbolEngine,
    memory: &'a M,
}

impl<'a, M: MemoryAccess> CfiUnwinder<'a, M>
{
    pub fn new(symbols: &'a SymbolEngine, memory: &'a M) -> Self
    {
        Self { symbols, memory }
    }

    fn unwind_with_image(
        &self,
        image: &ModuleImage,
        regs: &ThreadContext,
        pc: Address,
    ) -> PostmortemResult<Option<CfiStep>>
    {
        let Some(file_pc) = image.file_address(pc) else {
            return Ok(None);
        };
        if let Some(next) = self.try_unwind_eh_frame(image, regs, file_pc)? {
            return Ok(Some(next));
        }
        self.try_unwind_debug_frame(image, regs, file_pc)
    }

    /// Unwind through `.eh_frame`, using the header table when available.
    fn try_unwind_eh_frame(
        &self,
        image: &ModuleImage,
        regs: &ThreadContext,
        file_pc: u64,
    ) -> PostmortemResult<Option<CfiStep>>
    {
        let Some((eh_vmaddr, eh_bytes)) = image.eh_frame_section() else {
            return Ok(None);
        };

        let mut bases = BaseAddresses::default()
            .set_text(image.link_base())
            .set_eh_frame(eh_vmaddr);
        if let Some((hdr_vmaddr, _)) = image.eh_frame_hdr_section() {
            bases = bases.set_eh_frame_hdr(hdr_vmaddr);
        }

        let mut eh_frame = EhFrame::new(eh_bytes, image.endian());
        eh_frame.set_address_size(ADDRESS_SIZE);

        if let Some((_, hdr_bytes)) = image.eh_frame_hdr_section() {
            let header = EhFrameHdr::new(hdr_bytes, image.endian());
            match self.unwind_with_eh_frame_hdr(&eh_frame, header, &bases, regs, file_pc) {
                Ok(found) => return Ok(found),
                Err(err) => trace!(%err, "eh_frame_hdr lookup failed; scanning eh_frame"),
            }
        }

        self.unwind_with_cfi(&eh_frame, &bases, regs, file_pc)
    }

    /// Unwind through `.debug_frame`, which only ever uses absolute addresses.
    fn try_unwind_debug_frame(
        &self,
        image: &ModuleImage,
        regs: &ThreadContext,
        file_pc: u64,
    ) -> PostmortemResult<Option<CfiStep>>
    {
        let Some(bytes) = image.debug_frame_section() else {
            return Ok(None);
        };
        let mut debug_frame = DebugFrame::new(bytes, image.endian());
        debug_frame.set_address_size(ADDRESS_SIZE);
        self.unwind_with_cfi(&debug_frame, &BaseAddresses::default(), regs, file_pc)
    }

    /// Use the `.eh_frame_hdr` index to locate the FDE and evaluate the row for `file_pc`.
    fn unwind_with_eh_frame_hdr(
        &self,
        eh_frame: &EhFrame<Slice<'_>>,
        header: EhFrameHdr<Slice<'_>>,
        bases: &BaseAddresses,
        regs: &ThreadContext,
        file_pc: u64,
    ) -> PostmortemResult<Option<CfiStep>>
    {
        let parsed = header
            .parse(bases, ADDRESS_SIZE)
            .map_err(|err| map_gimli_error("parsing .eh_frame_hdr", err))?;
        let Some(table) = parsed.table() else {
            return Err(PostmortemError::InvalidImage(".eh_frame_hdr has no search table".into()));
        };

        let pointer = table
            .lookup(file_pc, bases)
            .map_err(|err| map_gimli_error("looking up FDE in .eh_frame_hdr", err))?;
        let offset = table
            .pointer_to_offset(pointer)
            .map_err(|err| map_gimli_error("resolving FDE pointer", err))?;

        let fde = eh_frame
            .partial_fde_from_offset(bases, offset)
            .and_then(|partial| partial.parse(|section, bases, cie| section.cie_from_offset(bases, cie)))
            .map_err(|err| map_gimli_error("parsing frame description entry", err))?;

        if !fde.contains(file_pc) {
            return Ok(None);
        }

        let mut ctx = UnwindContext::<usize>::new();
        match fde.unwind_info_for_address(eh_frame, bases, &mut ctx, file_pc) {
            Ok(row) => Ok(Some(self.build_step_from_row(regs, row))),
            Err(gimli::Error::NoUnwindInfoForAddress) => Ok(None),
            Err(err) => Err(map_gimli_error("evaluating unwind row", err)),
        }
    }

    /// Scan an unwind section entry by entry until an FDE covers `file_pc`.
    fn unwind_with_cfi<'s, Section>(
        &self,
        section: &Section,
        bases: &BaseAddresses,
        regs: &ThreadContext,
        file_pc: u64,
    ) -> PostmortemResult<Option<CfiStep>>
    where
        Section: UnwindSection<Slice<'s>>,
    {
        let mut entries = section.entries(bases);
        let mut ctx = UnwindContext::<usize>::new();
        while let Some(entry) = entries.next().map_err(|err| map_gimli_error("reading unwind entry", err))? {
            let gimli::CieOrFde::Fde(partial) = entry else {
                continue;
            };
            let fde = partial
                .parse(|unwind_section, base_addresses, cie_offset| {
                    unwind_section.cie_from_offset(base_addresses, cie_offset)
                })
                .map_err(|err| map_gimli_error("parsing frame description entry", err))?;
            if !fde.contains(file_pc) {
                continue;
            }

            return match fde.unwind_info_for_address(section, bases, &mut ctx, file_pc) {
                Ok(row) => Ok(Some(self.build_step_from_row(regs, row))),
                Err(gimli::Error::NoUnwindInfoForAddress) => Ok(None),
                Err(err) => Err(map_gimli_error("evaluating unwind row", err)),
            };
        }

        Ok(None)
    }

    /// Apply an unwind row to `regs`.
    fn build_step_from_row(&self, regs: &ThreadContext, row: &UnwindTableRow<usize>) -> CfiStep
    {
        let return_register = Register(ThreadContext::RETURN_ADDRESS_REGISTER);
        if matches!(row.register(return_register), RegisterRule::Undefined) {
            return CfiStep::Outermost;
        }
        self.caller_from_row(regs, row, return_register)
            .map_or(CfiStep::Unusable, CfiStep::Caller)
    }

    fn caller_from_row(
        &self,
        regs: &ThreadContext,
        row: &UnwindTableRow<usize>,
        return_register: Register,
    ) -> Option<ThreadContext>
    {
        let cfa = match row.cfa() {
            CfaRule::RegisterAndOffset { register, offset } => {
                let base = regs.dwarf(register.0)?;
                base.checked_add_signed(*offset)?
            }
            CfaRule::Expression(_) => return None,
        };

        let return_address = match row.register(return_register) {
            RegisterRule::SameValue => regs.dwarf(return_register.0)?,
            rule => self.evaluate_rule(&rule, regs, cfa)?,
        };

        let mut next = *regs;
        for (register, rule) in row.registers() {
            if register.0 == return_register.0 {
                continue;
            }
            if let Some(value) = self.evaluate_rule(rule, regs, cfa) {
                next.set_dwarf(register.0, value);
            }
        }
        next.set_sp(Address::new(cfa));
        next.set_pc(Address::new(return_address));
        Some(next)
    }

    fn evaluate_rule(&self, rule: &RegisterRule<usize>, regs: &ThreadContext, cfa: u64) -> Option<u64>
    {
        match rule {
            RegisterRule::Offset(offset) => {
                let address = cfa.checked_add_signed(*offset)?;
                self.memory.read_u64(Address::new(address)).ok()
            }
            RegisterRule::ValOffset(offset) => cfa.checked_add_signed(*offset),
            RegisterRule::Register(register) => regs.dwarf(register.0),
            _ => None,
        }
    }

    /// Follow the frame record chain.
    ///
    /// Both supported architectures lay frame records out as
    /// `[fp] = caller fp, [fp + 8] = return address`, with the caller's stack
    /// pointer just above the record.
    fn frame_pointer_fallback(&self, regs: &ThreadContext) -> Option<ThreadContext>
    {
        let fp = regs.fp();
        if fp.is_zero() || fp < regs.sp() || fp.value() % 8 != 0 {
            return None;
        }

        let saved_fp = self.memory.read_u64(fp).ok()?;
        let return_address = self.memory.read_u64(fp.checked_add(8)?).ok()?;

        let mut next = *regs;
        next.set_fp(Address::new(saved_fp));
        next.set_sp(fp.checked_add(16)?);
        next.set_pc(Address::new(return_address));
        Some(next)
    }

    /// Leaf functions on AArch64 may not have pushed a frame record yet; the
    /// return address is still in the link register.
    #[cfg(target_arch = "aarch64")]
    fn link_register_fallback(regs: &ThreadContext) -> Option<ThreadContext>
    {
        let lr = regs.lr();
        if lr == 0 || lr == regs.pc {
            return None;
        }
        let mut next = *regs;
        next.pc = lr;
        Some(next)
    }

    #[cfg(not(target_arch = "aarch64"))]
    fn link_register_fallback(_regs: &ThreadContext) -> Option<ThreadContext>
    {
        None
    }

    /// Caller registers from the CFI outcome, or from the fallbacks when no CFI covers the pc.
    fn next_frame(&self, regs: &ThreadContext, from_cfi: Option<CfiStep>, innermost: bool) -> Option<ThreadContext>
    {
        match from_cfi {
            Some(CfiStep::Caller(next)) => Some(next),
            Some(CfiStep::Outermost) => {
                trace!(pc = %regs.pc(), "outermost frame");
                None
            }
            Some(CfiStep::Unusable) => None,
            None => self
                .frame_pointer_fallback(regs)
                .or_else(|| if innermost { Self::link_register_fallback(regs) } else { None }),
        }
    }
}

impl<M: MemoryAccess> Unwind for CfiUnwinder<'_, M>
{
    fn step(&self, context: &mut ThreadContext, innermost: bool) -> bool
    {
        let pc = context.pc();
        let lookup = if innermost { pc } else { pc - 1 };

        let from_cfi = self.symbols.image_for_address(lookup).and_then(|image| {
            self.unwind_with_image(image, context, lookup).unwrap_or_else(|err| {
                trace!(%pc, %err, "CFI unwind failed");
                None
            })
        });

        match self.next_frame(context, from_cfi, innermost) {
            Some(next) => {
                *context = next;
                true
            }
            None => false,
        }
    }
}

fn map_gimli_error(context: &str, err: gimli::Error) -> PostmortemError
{
    PostmortemError::InvalidImage(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    struct FakeMemory(HashMap<u64, u64>);

    impl MemoryAccess for FakeMemory
    {
        fn read_u64(&self, address: Address) -> PostmortemResult<u64>
        {
            self.0.get(&address.value()).copied().ok_or_else(|| PostmortemError::MemoryReadFailed {
                address: address.value(),
                details: "unmapped".into(),
            })
        }
    }

    fn frame(pc: u64, sp: u64, fp: u64) -> ThreadContext
    {
        ThreadContext::from_frame(Address::new(pc), Address::new(sp), Address::new(fp))
    }

    #[test]
    fn follows_frame_record_without_cfi()
    {
        let memory = FakeMemory(HashMap::from([(0x7100, 0x7200), (0x7108, 0x4000_2000)]));
        let symbols = SymbolEngine::new();
        let unwinder = CfiUnwinder::new(&symbols, &memory);

        let mut context = frame(0x4000_1000, 0x7000, 0x7100);
        assert!(unwinder.step(&mut context, false));
        assert_eq!(context.pc(), Address::new(0x4000_2000));
        assert_eq!(context.sp(), Address::new(0x7110));
        assert_eq!(context.fp(), Address::new(0x7200));
    }

    const RA: u8 = ThreadContext::RETURN_ADDRESS_REGISTER as u8;
    const SP: u8 = ThreadContext::STACK_POINTER_REGISTER as u8;

    /// Length-prefixed `.debug_frame` entry, padded with `DW_CFA_nop`.
    fn cfi_entry(mut body: Vec<u8>) -> Vec<u8>
    {
        while (body.len() + 4) % 8 != 0 {
            body.push(0);
        }
        let mut entry = u32::try_from(body.len()).unwrap().to_le_bytes().to_vec();
        entry.extend(body);
        entry
    }

    /// One CIE (`CFA = sp + 8`, return address at `CFA - 8`) and one FDE
    /// covering `[0x1000, 0x1100)` with extra `instructions`.
    fn debug_frame(instructions: &[u8]) -> Vec<u8>
    {
        let mut section = cfi_entry(vec![
            0xff, 0xff, 0xff, 0xff, // CIE id
            1,    // version
            0,    // empty augmentation
            1,    // code alignment
            0x78, // data alignment -8
            RA,   // return address column
            0x0c, SP, 8, // DW_CFA_def_cfa sp, 8
            0x80 | RA, 1, // DW_CFA_offset ra, cfa - 8
        ]);

        let mut fde = 0u32.to_le_bytes().to_vec();
        fde.extend(0x1000u64.to_le_bytes());
        fde.extend(0x100u64.to_le_bytes());
        fde.extend_from_slice(instructions);
        section.extend(cfi_entry(fde));
        section
    }

    fn unwind_debug_frame(
        unwinder: &CfiUnwinder<'_, FakeMemory>,
        bytes: &[u8],
        regs: &ThreadContext,
    ) -> Option<CfiStep>
    {
        let mut section = DebugFrame::new(bytes, RunTimeEndian::Little);
        section.set_address_size(ADDRESS_SIZE);
        unwinder
            .unwind_with_cfi(&section, &BaseAddresses::default(), regs, regs.pc().value())
            .unwrap()
    }

    #[test]
    fn cfi_row_recovers_caller()
    {
        let memory = FakeMemory(HashMap::from([(0x7000, 0x4000_2000)]));
        let symbols = SymbolEngine::new();
        let unwinder = CfiUnwinder::new(&symbols, &memory);

        let step = unwind_debug_frame(&unwinder, &debug_frame(&[]), &frame(0x1010, 0x7000, 0));

        let Some(CfiStep::Caller(caller)) = step else {
            panic!("expected a caller, got {step:?}");
        };
        assert_eq!(caller.pc(), Address::new(0x4000_2000));
        assert_eq!(caller.sp(), Address::new(0x7008));
    }

    #[test]
    fn uncovered_pc_has_no_cfi()
    {
        let memory = FakeMemory(HashMap::new());
        let symbols = SymbolEngine::new();
        let unwinder = CfiUnwinder::new(&symbols, &memory);

        assert_eq!(unwind_debug_frame(&unwinder, &debug_frame(&[]), &frame(0x2000, 0x7000, 0)), None);
    }

    #[test]
    fn undefined_return_address_is_outermost()
    {
        let memory = FakeMemory(HashMap::new());
        let symbols = SymbolEngine::new();
        let unwinder = CfiUnwinder::new(&symbols, &memory);

        // DW_CFA_undefined ra
        let step = unwind_debug_frame(&unwinder, &debug_frame(&[0x07, RA]), &frame(0x1010, 0x7000, 0x7100));
        assert_eq!(step, Some(CfiStep::Outermost));
    }

    #[test]
    fn outermost_frame_ignores_frame_records()
    {
        // A plausible frame record that must not be followed.
        let memory = FakeMemory(HashMap::from([(0x7100, 0x7200), (0x7108, 0x4000_2000)]));
        let symbols = SymbolEngine::new();
        let unwinder = CfiUnwinder::new(&symbols, &memory);
        let regs = frame(0x1010, 0x7000, 0x7100);

        assert_eq!(unwinder.next_frame(&regs, Some(CfiStep::Outermost), false), None);
        assert_eq!(unwinder.next_frame(&regs, Some(CfiStep::Unusable), false), None);
        assert_eq!(
            unwinder.next_frame(&regs, None, false).map(|next| next.pc()),
            Some(Address::new(0x4000_2000))
        );
    }

    #[test]
    fn frame_pointer_below_stack_pointer_ends_walk()
    {
        let memory = FakeMemory(HashMap::from([(0x6000, 0x7200), (0x6008, 0x4000_2000)]));
        let symbols = SymbolEngine::new();
        let unwinder = CfiUnwinder::new(&symbols, &memory);

        let mut context = frame(0x4000_1000, 0x7000, 0x6000);
        assert!(!unwinder.step(&mut context, false));
    }

    #[test]
    fn unreadable_frame_record_ends_walk()
    {
        let memory = FakeMemory(HashMap::new());
        let symbols = SymbolEngine::new();
        let unwinder = CfiUnwinder::new(&symbols, &memory);

        let mut context = frame(0x4000_1000, 0x7000, 0x7100);
        assert!(!unwinder.step(&mut context, false));
    }
}
