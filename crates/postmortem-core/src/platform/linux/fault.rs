//! # Fault handler
//!
//! [`install_fault_handler`] hands a [`CrashReporter`] to signal handlers
//! for the fatal signals. When one fires, the handler:
//!
//! 1. builds a [`FaultInfo`] from `siginfo_t` and `ucontext_t`,
//! 2. writes the four-line fault summary to stderr,
//! 3. writes the full report to the configured report path, or to stderr,
//! 4. returns, letting the default action terminate the process.
//!
//! Handlers are installed with `SA_RESETHAND`, so a second fault while the
//! report is being written kills the process instead of recursing. Faults on
//! other threads during a report only get the summary.
//!
//! Handlers run on an alternate signal stack so stack overflows can still
//! be reported. The alternate stack is installed for the thread calling
//! [`install_fault_handler`].
//!
//! ## References
//!
//! - [sigaction(2) man page](https://man7.org/linux/man-pages/man2/sigaction.2.html)
//! - [sigaltstack(2) man page](https://man7.org/linux/man-pages/man2/sigaltstack.2.html)

use std::fs::File;
use std::io::{self, Write};
use std::sync::{Mutex, OnceLock, TryLockError};

use tracing::info;

use super::context::{access_kind, context_from_ucontext};
use super::{LinuxModules, LinuxProcess};
use crate::error::{PostmortemError, PostmortemResult};
use crate::exception::{ExceptionRecord, FaultCode, FaultInfo};
use crate::registers::RegisterLayout;
use crate::report::write_fault_summary;
use crate::reporter::CrashReporter;
use crate::types::ThreadId;

/// Signals treated as crashes.
pub const FAULT_SIGNALS: [libc::c_int; 6] = [
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGILL,
    libc::SIGTRAP,
    libc::SIGABRT,
];

const ALT_STACK_SIZE: usize = 256 * 1024;

static REPORTER: OnceLock<Mutex<CrashReporter<LinuxProcess>>> = OnceLock::new();

/// Install the crash handlers. Can be called once per process.
///
/// # Errors
///
/// - `Unsupported`: a handler is already installed
/// - `Io`: `sigaltstack(2)` or `sigaction(2)` failed
pub fn install_fault_handler(reporter: CrashReporter<LinuxProcess>) -> PostmortemResult<()>
{
    REPORTER
        .set(Mutex::new(reporter))
        .map_err(|_| PostmortemError::Unsupported("fault handler already installed".into()))?;

    install_alt_stack()?;
    for signal in FAULT_SIGNALS {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_fault as usize;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK | libc::SA_RESETHAND;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
    }

    info!(signals = ?FAULT_SIGNALS, "fault handler installed");
    Ok(())
}

fn install_alt_stack() -> PostmortemResult<()>
{
    let stack: &'static mut [u8] = Box::leak(vec![0u8; ALT_STACK_SIZE].into_boxed_slice());
    let alt = libc::stack_t {
        ss_sp: stack.as_mut_ptr().cast(),
        ss_flags: 0,
        ss_size: stack.len(),
    };
    if unsafe { libc::sigaltstack(&alt, std::ptr::null_mut()) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

extern "C" fn handle_fault(signal: libc::c_int, info: *mut libc::siginfo_t, ucontext: *mut libc::c_void)
{
    let fault = unsafe { fault_info(signal, info, ucontext.cast()) };

    let mut stderr = io::stderr().lock();
    let _ = write_fault_summary(&mut stderr, &fault, &LinuxModules::new());

    let Some(reporter) = REPORTER.get() else {
        return;
    };
    let mut reporter = match reporter.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return,
    };

    let report_file = reporter
        .config()
        .report_path
        .as_ref()
        .and_then(|path| File::create(path).ok());
    let _ = match report_file {
        Some(mut file) => {
            let written = reporter.write_report(&mut file, Some(&fault));
            if written.is_ok() {
                if let Some(path) = &reporter.config().report_path {
                    let _ = writeln!(stderr, "Crash report written to {}", path.display());
                }
            }
            written
        }
        None => {
            let _ = writeln!(stderr);
            reporter.write_report(&mut stderr, Some(&fault))
        }
    };
}

/// # Safety
///
/// Arguments must be those of a running `SA_SIGINFO` handler.
unsafe fn fault_info(
    signal: libc::c_int,
    info: *const libc::siginfo_t,
    ucontext: *const libc::ucontext_t,
) -> FaultInfo
{
    let context = unsafe { context_from_ucontext(ucontext) };
    let code = FaultCode::from_signal(signal, unsafe { (*info).si_code });

    let mut record = ExceptionRecord::new(code, context.pc());
    if signal == libc::SIGSEGV || signal == libc::SIGBUS {
        let address = unsafe { (*info).si_addr() } as u64;
        record = record.with_parameters([unsafe { access_kind(ucontext) }, address]);
    }

    FaultInfo {
        record,
        context,
        thread_id: ThreadId::from(u64::from(unsafe { libc::gettid() }.unsigned_abs())),
    }
}

/// Faults the `crash` self-test can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestFault
{
    Segv,
    Abort,
    Fpe,
    Ill,
}

impl SelfTestFault
{
    fn signal(self) -> libc::c_int
    {
        match self {
            Self::Segv => libc::SIGSEGV,
            Self::Abort => libc::SIGABRT,
            Self::Fpe => libc::SIGFPE,
            Self::Ill => libc::SIGILL,
        }
    }
}

/// Raise `fault` on the calling thread and terminate.
///
/// With the handler installed a report is written first. A raised signal
/// does not re-execute anything once the handler returns, so it is raised a
/// second time, now with the default disposition.
pub fn raise_fault(fault: SelfTestFault) -> !
{
    if fault == SelfTestFault::Abort {
        std::process::abort();
    }
    unsafe {
        libc::raise(fault.signal());
        libc::raise(fault.signal());
    }
    std::process::abort()
}
