//! # Exception classification
//!
//! Fault codes and the exception records a crash report starts with.
//!
//! [`FaultCode`] is a closed set of twenty well-known hardware/runtime fault
//! categories plus an `Unknown` catch-all, so [`FaultCode::describe`] is a
//! total function: every raw code maps to exactly one stable string.
//!
//! Raw codes come from two places:
//!
//! - [`FaultCode::from_raw`] decodes NTSTATUS-style 32-bit codes
//!   (`0xC0000005` and friends), which is also what `classify` on the
//!   command line accepts.
//! - [`FaultCode::from_signal`] maps a POSIX fault signal and its `si_code`
//!   onto the same categories.
//!
//! ## Exception records
//!
//! An [`ExceptionRecord`] may carry a nested record (an exception raised
//! while another was being dispatched). [`ExceptionRecord::chain`] walks the
//! chain iteratively, outermost first.

use std::fmt;

use smallvec::SmallVec;

use crate::registers::ThreadContext;
use crate::types::{Address, ThreadId};

/// Category of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode
{
    AccessViolation,
    ArrayBoundsExceeded,
    Breakpoint,
    DatatypeMisalignment,
    FltDenormalOperand,
    FltDivideByZero,
    FltInexactResult,
    FltInvalidOperation,
    FltOverflow,
    FltStackCheck,
    FltUnderflow,
    IllegalInstruction,
    InPageError,
    IntDivideByZero,
    IntOverflow,
    InvalidDisposition,
    NoncontinuableException,
    PrivInstruction,
    SingleStep,
    StackOverflow,
    /// Any code outside the known set, carrying the raw value.
    Unknown(u32),
}

/// POSIX `si_code` values used by [`FaultCode::from_signal`].
///
/// These are the values shared by Linux and the BSDs for the kernel-generated
/// codes we care about.
#[cfg(unix)]
mod si_code
{
    pub const ILL_PRVOPC: i32 = 5;
    pub const ILL_PRVREG: i32 = 6;

    pub const FPE_INTDIV: i32 = 1;
    pub const FPE_INTOVF: i32 = 2;
    pub const FPE_FLTDIV: i32 = 3;
    pub const FPE_FLTOVF: i32 = 4;
    pub const FPE_FLTUND: i32 = 5;
    pub const FPE_FLTRES: i32 = 6;
    pub const FPE_FLTSUB: i32 = 8;

    pub const BUS_ADRALN: i32 = 1;

    pub const TRAP_TRACE: i32 = 2;
}

impl FaultCode
{
    /// Every known code, in description order.
    pub const KNOWN: [FaultCode; 20] = [
        FaultCode::AccessViolation,
        FaultCode::ArrayBoundsExceeded,
        FaultCode::Breakpoint,
        FaultCode::DatatypeMisalignment,
        FaultCode::FltDenormalOperand,
        FaultCode::FltDivideByZero,
        FaultCode::FltInexactResult,
        FaultCode::FltInvalidOperation,
        FaultCode::FltOverflow,
        FaultCode::FltStackCheck,
        FaultCode::FltUnderflow,
        FaultCode::IllegalInstruction,
        FaultCode::InPageError,
        FaultCode::IntDivideByZero,
        FaultCode::IntOverflow,
        FaultCode::InvalidDisposition,
        FaultCode::NoncontinuableException,
        FaultCode::PrivInstruction,
        FaultCode::SingleStep,
        FaultCode::StackOverflow,
    ];

    /// Stable, human-readable name of the fault category.
    ///
    /// ```rust
    /// use postmortem_core::exception::FaultCode;
    ///
    /// assert_eq!(FaultCode::from_raw(0xC000_0005).describe(), "EXCEPTION_ACCESS_VIOLATION");
    /// assert_eq!(FaultCode::from_raw(0x1234).describe(), "UNKNOWN EXCEPTION");
    /// ```
    pub const fn describe(self) -> &'static str
    {
        match self {
            FaultCode::AccessViolation => "EXCEPTION_ACCESS_VIOLATION",
            FaultCode::ArrayBoundsExceeded => "EXCEPTION_ARRAY_BOUNDS_EXCEEDED",
            FaultCode::Breakpoint => "EXCEPTION_BREAKPOINT",
            FaultCode::DatatypeMisalignment => "EXCEPTION_DATATYPE_MISALIGNMENT",
            FaultCode::FltDenormalOperand => "EXCEPTION_FLT_DENORMAL_OPERAND",
            FaultCode::FltDivideByZero => "EXCEPTION_FLT_DIVIDE_BY_ZERO",
            FaultCode::FltInexactResult => "EXCEPTION_FLT_INEXACT_RESULT",
            FaultCode::FltInvalidOperation => "EXCEPTION_FLT_INVALID_OPERATION",
            FaultCode::FltOverflow => "EXCEPTION_FLT_OVERFLOW",
            FaultCode::FltStackCheck => "EXCEPTION_FLT_STACK_CHECK",
            FaultCode::FltUnderflow => "EXCEPTION_FLT_UNDERFLOW",
            FaultCode::IllegalInstruction => "EXCEPTION_ILLEGAL_INSTRUCTION",
            FaultCode::InPageError => "EXCEPTION_IN_PAGE_ERROR",
            FaultCode::IntDivideByZero => "EXCEPTION_INT_DIVIDE_BY_ZERO",
            FaultCode::IntOverflow => "EXCEPTION_INT_OVERFLOW",
            FaultCode::InvalidDisposition => "EXCEPTION_INVALID_DISPOSITION",
            FaultCode::NoncontinuableException => "EXCEPTION_NONCONTINUABLE_EXCEPTION",
            FaultCode::PrivInstruction => "EXCEPTION_PRIV_INSTRUCTION",
            FaultCode::SingleStep => "EXCEPTION_SINGLE_STEP",
            FaultCode::StackOverflow => "EXCEPTION_STACK_OVERFLOW",
            FaultCode::Unknown(_) => "UNKNOWN EXCEPTION",
        }
    }

    /// Decode an NTSTATUS-style raw code.
    pub const fn from_raw(raw: u32) -> Self
    {
        match raw {
            0xC000_0005 => FaultCode::AccessViolation,
            0xC000_008C => FaultCode::ArrayBoundsExceeded,
            0x8000_0003 => FaultCode::Breakpoint,
            0x8000_0002 => FaultCode::DatatypeMisalignment,
            0xC000_008D => FaultCode::FltDenormalOperand,
            0xC000_008E => FaultCode::FltDivideByZero,
            0xC000_008F => FaultCode::FltInexactResult,
            0xC000_0090 => FaultCode::FltInvalidOperation,
            0xC000_0091 => FaultCode::FltOverflow,
            0xC000_0092 => FaultCode::FltStackCheck,
            0xC000_0093 => FaultCode::FltUnderflow,
            0xC000_001D => FaultCode::IllegalInstruction,
            0xC000_0006 => FaultCode::InPageError,
            0xC000_0094 => FaultCode::IntDivideByZero,
            0xC000_0095 => FaultCode::IntOverflow,
            0xC000_0026 => FaultCode::InvalidDisposition,
            0xC000_0025 => FaultCode::NoncontinuableException,
            0xC000_0096 => FaultCode::PrivInstruction,
            0x8000_0004 => FaultCode::SingleStep,
            0xC000_00FD => FaultCode::StackOverflow,
            other => FaultCode::Unknown(other),
        }
    }

    /// Raw NTSTATUS-style value of the code.
    pub const fn raw(self) -> u32
    {
        match self {
            FaultCode::AccessViolation => 0xC000_0005,
            FaultCode::ArrayBoundsExceeded => 0xC000_008C,
            FaultCode::Breakpoint => 0x8000_0003,
            FaultCode::DatatypeMisalignment => 0x8000_0002,
            FaultCode::FltDenormalOperand => 0xC000_008D,
            FaultCode::FltDivideByZero => 0xC000_008E,
            FaultCode::FltInexactResult => 0xC000_008F,
            FaultCode::FltInvalidOperation => 0xC000_0090,
            FaultCode::FltOverflow => 0xC000_0091,
            FaultCode::FltStackCheck => 0xC000_0092,
            FaultCode::FltUnderflow => 0xC000_0093,
            FaultCode::IllegalInstruction => 0xC000_001D,
            FaultCode::InPageError => 0xC000_0006,
            FaultCode::IntDivideByZero => 0xC000_0094,
            FaultCode::IntOverflow => 0xC000_0095,
            FaultCode::InvalidDisposition => 0xC000_0026,
            FaultCode::NoncontinuableException => 0xC000_0025,
            FaultCode::PrivInstruction => 0xC000_0096,
            FaultCode::SingleStep => 0x8000_0004,
            FaultCode::StackOverflow => 0xC000_00FD,
            FaultCode::Unknown(raw) => raw,
        }
    }

    /// Map a POSIX fault signal and its `si_code` onto a fault category.
    ///
    /// Signals without a natural counterpart (for example `SIGABRT`) become
    /// `Unknown` carrying the signal number.
    #[cfg(unix)]
    pub fn from_signal(signal: i32, code: i32) -> Self
    {
        match signal {
            libc::SIGSEGV => FaultCode::AccessViolation,
            libc::SIGBUS if code == si_code::BUS_ADRALN => FaultCode::DatatypeMisalignment,
            libc::SIGBUS => FaultCode::InPageError,
            libc::SIGFPE => match code {
                si_code::FPE_INTDIV => FaultCode::IntDivideByZero,
                si_code::FPE_INTOVF => FaultCode::IntOverflow,
                si_code::FPE_FLTDIV => FaultCode::FltDivideByZero,
                si_code::FPE_FLTOVF => FaultCode::FltOverflow,
                si_code::FPE_FLTUND => FaultCode::FltUnderflow,
                si_code::FPE_FLTRES => FaultCode::FltInexactResult,
                si_code::FPE_FLTSUB => FaultCode::ArrayBoundsExceeded,
                _ => FaultCode::FltInvalidOperation,
            },
            libc::SIGILL if code == si_code::ILL_PRVOPC || code == si_code::ILL_PRVREG => {
                FaultCode::PrivInstruction
            }
            libc::SIGILL => FaultCode::IllegalInstruction,
            libc::SIGTRAP if code == si_code::TRAP_TRACE => FaultCode::SingleStep,
            libc::SIGTRAP => FaultCode::Breakpoint,
            other => FaultCode::Unknown(other.unsigned_abs()),
        }
    }
}

impl fmt::Display for FaultCode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.describe())
    }
}

/// One exception record, possibly chained to a nested one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord
{
    /// Fault category.
    pub code: FaultCode,
    /// Instruction address where the fault was raised.
    pub address: Address,
    /// Raw exception flags.
    pub flags: u32,
    /// Code-specific parameters (for access violations: access kind, then the
    /// inaccessible address).
    pub parameters: SmallVec<[u64; 4]>,
    /// Record of the exception that was being dispatched when this one occurred.
    pub nested: Option<Box<ExceptionRecord>>,
}

impl ExceptionRecord
{
    /// A record without flags, parameters or nesting.
    pub fn new(code: FaultCode, address: Address) -> Self
    {
        Self {
            code,
            address,
            flags: 0,
            parameters: SmallVec::new(),
            nested: None,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self
    {
        self.flags = flags;
        self
    }

    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = u64>) -> Self
    {
        self.parameters = parameters.into_iter().collect();
        self
    }

    pub fn with_nested(mut self, nested: ExceptionRecord) -> Self
    {
        self.nested = Some(Box::new(nested));
        self
    }

    /// This record followed by every nested record, outermost first.
    pub fn chain(&self) -> RecordChain<'_>
    {
        RecordChain { next: Some(self) }
    }

    /// Number of records in the chain (at least 1).
    pub fn depth(&self) -> usize
    {
        self.chain().count()
    }
}

impl Drop for ExceptionRecord
{
    fn drop(&mut self)
    {
        // Unlink iteratively so deep chains cannot overflow the stack.
        let mut next = self.nested.take();
        while let Some(mut record) = next {
            next = record.nested.take();
        }
    }
}

/// Iterator returned by [`ExceptionRecord::chain`].
#[derive(Debug, Clone)]
pub struct RecordChain<'a>
{
    next: Option<&'a ExceptionRecord>,
}

impl<'a> Iterator for RecordChain<'a>
{
    type Item = &'a ExceptionRecord;

    fn next(&mut self) -> Option<Self::Item>
    {
        let current = self.next?;
        self.next = current.nested.as_deref();
        Some(current)
    }
}

/// Everything a fault hands to the reporter.
#[derive(Debug, Clone)]
pub struct FaultInfo
{
    /// Outermost exception record.
    pub record: ExceptionRecord,
    /// Registers of the faulting thread at the time of the fault.
    pub context: ThreadContext,
    /// Thread that faulted.
    pub thread_id: ThreadId,
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn raw_codes_round_trip_for_known_set()
    {
        for code in FaultCode::KNOWN {
            assert_eq!(FaultCode::from_raw(code.raw()), code);
        }
    }

    #[test]
    fn descriptions_are_distinct()
    {
        let mut seen: Vec<&str> = FaultCode::KNOWN.iter().map(|code| code.describe()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), FaultCode::KNOWN.len());
        assert!(!seen.contains(&"UNKNOWN EXCEPTION"));
    }

    #[test]
    fn chain_visits_nested_records_in_order()
    {
        let record = ExceptionRecord::new(FaultCode::AccessViolation, Address::new(0x10))
            .with_nested(ExceptionRecord::new(FaultCode::StackOverflow, Address::new(0x20)));

        let codes: Vec<FaultCode> = record.chain().map(|r| r.code).collect();
        assert_eq!(codes, vec![FaultCode::AccessViolation, FaultCode::StackOverflow]);
        assert_eq!(record.depth(), 2);
    }

    #[test]
    fn deep_chain_drops_without_recursion()
    {
        let mut record = ExceptionRecord::new(FaultCode::Breakpoint, Address::ZERO);
        for _ in 0..100_000 {
            record = ExceptionRecord::new(FaultCode::SingleStep, Address::ZERO).with_nested(record);
        }
        assert_eq!(record.depth(), 100_001);
    }

    #[cfg(unix)]
    #[test]
    fn signals_map_onto_fault_categories()
    {
        assert_eq!(FaultCode::from_signal(libc::SIGSEGV, 1), FaultCode::AccessViolation);
        assert_eq!(FaultCode::from_signal(libc::SIGFPE, 1), FaultCode::IntDivideByZero);
        assert_eq!(FaultCode::from_signal(libc::SIGBUS, 1), FaultCode::DatatypeMisalignment);
        assert_eq!(FaultCode::from_signal(libc::SIGILL, 1), FaultCode::IllegalInstruction);
        assert_eq!(FaultCode::from_signal(libc::SIGTRAP, 2), FaultCode::SingleStep);
        assert_eq!(FaultCode::from_signal(libc::SIGABRT, 0).describe(), "UNKNOWN EXCEPTION");
    }
}
