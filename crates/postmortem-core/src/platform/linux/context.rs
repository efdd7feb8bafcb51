//! Register snapshots from a `ucontext_t`, either a signal frame's or one
//! filled by `getcontext(3)` for the calling thread.
//!
//! ## References
//!
//! - [getcontext(3) man page](https://man7.org/linux/man-pages/man3/getcontext.3.html)
//! - [sigaction(2) man page](https://man7.org/linux/man-pages/man2/sigaction.2.html)

use std::mem::MaybeUninit;

use crate::error::{PostmortemError, PostmortemResult};
use crate::registers::ThreadContext;

/// Capture the calling thread and run `visit` on the snapshot.
///
/// The snapshot's pc and sp point into this function's own frame, which
/// stays live until `visit` returns.
#[inline(never)]
pub(crate) fn with_current_context(visit: &mut dyn FnMut(PostmortemResult<ThreadContext>))
{
    let mut ucontext = MaybeUninit::<libc::ucontext_t>::zeroed();
    if unsafe { libc::getcontext(ucontext.as_mut_ptr()) } != 0 {
        visit(Err(PostmortemError::ContextUnavailable {
            thread_id: None,
            details: std::io::Error::last_os_error().to_string(),
        }));
        return;
    }

    let context = unsafe { context_from_ucontext(ucontext.as_ptr()) };
    visit(Ok(context));
}

/// Copy the registers out of a `ucontext_t`.
///
/// # Safety
///
/// `ucontext` must be initialized: the third argument of a running
/// `SA_SIGINFO` handler, or filled by `getcontext(3)`.
#[cfg(target_arch = "x86_64")]
#[allow(clippy::cast_sign_loss)]
pub(crate) unsafe fn context_from_ucontext(ucontext: *const libc::ucontext_t) -> ThreadContext
{
    let gregs = unsafe { &(*ucontext).uc_mcontext.gregs };
    let reg = |index: libc::c_int| gregs[index as usize] as u64;

    ThreadContext {
        rax: reg(libc::REG_RAX),
        rdx: reg(libc::REG_RDX),
        rcx: reg(libc::REG_RCX),
        rbx: reg(libc::REG_RBX),
        rsi: reg(libc::REG_RSI),
        rdi: reg(libc::REG_RDI),
        rbp: reg(libc::REG_RBP),
        rsp: reg(libc::REG_RSP),
        r: [
            reg(libc::REG_R8),
            reg(libc::REG_R9),
            reg(libc::REG_R10),
            reg(libc::REG_R11),
            reg(libc::REG_R12),
            reg(libc::REG_R13),
            reg(libc::REG_R14),
            reg(libc::REG_R15),
        ],
        rip: reg(libc::REG_RIP),
        rflags: reg(libc::REG_EFL),
    }
}

#[cfg(target_arch = "aarch64")]
pub(crate) unsafe fn context_from_ucontext(ucontext: *const libc::ucontext_t) -> ThreadContext
{
    let mcontext = unsafe { &(*ucontext).uc_mcontext };
    ThreadContext {
        x: mcontext.regs,
        sp: mcontext.sp,
        pc: mcontext.pc,
        pstate: mcontext.pstate,
    }
}

/// Access kind of a memory fault: 0 for a read, 1 for a write.
///
/// # Safety
///
/// Same as [`context_from_ucontext`].
#[cfg(target_arch = "x86_64")]
pub(crate) unsafe fn access_kind(ucontext: *const libc::ucontext_t) -> u64
{
    // Bit 1 of the page-fault error code is set for writes.
    let error_code = unsafe { (*ucontext).uc_mcontext.gregs[libc::REG_ERR as usize] };
    u64::from(error_code & 0x2 != 0)
}

/// AArch64 keeps the syndrome in an optional `esr_context` record; the
/// access kind is reported as a read.
#[cfg(target_arch = "aarch64")]
pub(crate) unsafe fn access_kind(_ucontext: *const libc::ucontext_t) -> u64
{
    0
}
