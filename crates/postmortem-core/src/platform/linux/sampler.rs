//! # Thread sampling with a real-time signal
//!
//! Linux has no "suspend this thread of my own process" call. The sampler
//! gets the same effect cooperatively: it sends `SIGRTMIN` to the target
//! thread with `tgkill(2)`; the handler, running on that thread, copies the
//! interrupted registers into a static slot and then spins until the
//! reporter releases it. While it spins, the thread is paused exactly where
//! the signal interrupted it.
//!
//! ## Handshake
//!
//! ```text
//! reporter                         target thread (in handler)
//! --------                         --------------------------
//! IDLE -> ARMING, set target
//! ARMING -> REQUESTED, tgkill  -->  REQUESTED -> CAPTURING
//!                                   copy registers
//! wait for CAPTURED           <--   CAPTURING -> CAPTURED
//! read registers                    spin
//! CAPTURED -> RELEASED        -->   RELEASED -> IDLE, return
//! ```
//!
//! Every wait is bounded. The reporter gives up after the configured
//! suspend timeout; the target gives up after [`HOLD_LIMIT`] even if the
//! reporter never releases it, so a dead reporter cannot freeze a thread.
//!
//! Only one sample is in flight at a time. The calling thread is never
//! sampled: its handler would spin waiting for itself.
//!
//! ## References
//!
//! - [tgkill(2) man page](https://man7.org/linux/man-pages/man2/tgkill.2.html)
//! - [signal-safety(7) man page](https://man7.org/linux/man-pages/man7/signal-safety.7.html)

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tracing::debug;

use super::context::context_from_ucontext;
use crate::error::{PostmortemError, PostmortemResult};
use crate::registers::ThreadContext;
use crate::types::ThreadId;

const IDLE: u8 = 0;
const ARMING: u8 = 1;
const REQUESTED: u8 = 2;
const CAPTURING: u8 = 3;
const CAPTURED: u8 = 4;
const RELEASED: u8 = 5;

/// Longest time a sampled thread stays paused without being released.
pub const HOLD_LIMIT: Duration = Duration::from_secs(2);

static STATE: AtomicU8 = AtomicU8::new(IDLE);
static TARGET: AtomicI32 = AtomicI32::new(0);
static SLOT: ContextSlot = ContextSlot(UnsafeCell::new(unsafe { std::mem::zeroed() }));
static INSTALLED: OnceLock<Result<(), i32>> = OnceLock::new();

/// Register storage shared between the handler and the reporter.
///
/// Written only by the thread that moved `STATE` to `CAPTURING`, read only
/// after observing `CAPTURED`.
struct ContextSlot(UnsafeCell<ThreadContext>);

unsafe impl Sync for ContextSlot {}

/// Signal used for sampling.
pub fn sample_signal() -> libc::c_int
{
    libc::SIGRTMIN()
}

/// Install the sampling handler. Only the first call does any work.
///
/// # Errors
///
/// `Unsupported` when `sigaction(2)` rejects the handler.
pub fn install() -> PostmortemResult<()>
{
    let installed = INSTALLED.get_or_init(|| unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_sample as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(sample_signal(), &action, std::ptr::null_mut()) == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
        }
    });

    installed
        .map_err(|errno| PostmortemError::Unsupported(format!("cannot install sampling handler: errno {errno}")))
}

extern "C" fn handle_sample(_signal: libc::c_int, _info: *mut libc::siginfo_t, ucontext: *mut libc::c_void)
{
    if current_tid() != TARGET.load(Ordering::Acquire) {
        return;
    }
    if STATE
        .compare_exchange(REQUESTED, CAPTURING, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    unsafe {
        *SLOT.0.get() = context_from_ucontext(ucontext as *const libc::ucontext_t);
    }
    STATE.store(CAPTURED, Ordering::Release);

    let deadline = Instant::now() + HOLD_LIMIT;
    while STATE.load(Ordering::Acquire) == CAPTURED {
        if Instant::now() >= deadline {
            break;
        }
        std::hint::spin_loop();
        unsafe {
            libc::sched_yield();
        }
    }

    // Released or abandoned: either way the slot is free again.
    let _ = STATE.compare_exchange(RELEASED, IDLE, Ordering::AcqRel, Ordering::Acquire);
    let _ = STATE.compare_exchange(CAPTURED, IDLE, Ordering::AcqRel, Ordering::Acquire);
}

fn current_tid() -> i32
{
    unsafe { libc::gettid() }
}

fn send_signal(tid: i32) -> std::io::Result<()>
{
    let pid = unsafe { libc::getpid() };
    let result = unsafe { libc::syscall(libc::SYS_tgkill, pid, tid, sample_signal()) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u64
{
    duration.as_millis() as u64
}

/// Claim the sampler for one request aimed at `tid`.
fn arm(tid: i32) -> PostmortemResult<()>
{
    STATE
        .compare_exchange(IDLE, ARMING, Ordering::AcqRel, Ordering::Acquire)
        .map_err(|_| PostmortemError::SuspendFailed("another thread is being sampled".into()))?;
    TARGET.store(tid, Ordering::Release);
    STATE.store(REQUESTED, Ordering::Release);
    Ok(())
}

fn disarm()
{
    TARGET.store(0, Ordering::Release);
    STATE.store(IDLE, Ordering::Release);
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn raw_tid(thread_id: ThreadId) -> i32
{
    thread_id.raw() as i32
}

/// A thread being sampled.
///
/// Dropping a paused thread releases it.
#[derive(Debug)]
pub struct SampledThread
{
    thread_id: ThreadId,
    timeout: Duration,
    paused: bool,
}

impl SampledThread
{
    pub fn new(thread_id: ThreadId, timeout: Duration) -> Self
    {
        Self {
            thread_id,
            timeout,
            paused: false,
        }
    }

    pub fn thread_id(&self) -> ThreadId
    {
        self.thread_id
    }

    /// Interrupt the thread and wait until its registers are captured.
    ///
    /// # Errors
    ///
    /// - `SuspendFailed`: another sample is in flight
    /// - `ThreadUnavailable`: the thread no longer exists
    /// - `Timeout`: the thread did not answer in time (it blocks the signal,
    ///   or is stuck in uninterruptible sleep)
    pub fn pause(&mut self) -> PostmortemResult<()>
    {
        if self.paused {
            return Ok(());
        }
        install()?;

        let tid = raw_tid(self.thread_id);
        if tid == current_tid() {
            return Err(PostmortemError::SuspendFailed("cannot sample the calling thread".into()));
        }
        arm(tid)?;
        if let Err(err) = send_signal(tid) {
            disarm();
            return Err(PostmortemError::ThreadUnavailable {
                thread_id: self.thread_id,
                details: err.to_string(),
            });
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match STATE.load(Ordering::Acquire) {
                CAPTURED => break,
                REQUESTED if Instant::now() >= deadline => {
                    // Withdraw the request unless the handler claimed it meanwhile.
                    if STATE
                        .compare_exchange(REQUESTED, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        TARGET.store(0, Ordering::Release);
                        return Err(PostmortemError::Timeout {
                            operation: "thread to pause",
                            millis: millis(self.timeout),
                        });
                    }
                }
                _ => std::thread::yield_now(),
            }
        }

        self.paused = true;
        debug!(thread = %self.thread_id, "thread paused");
        Ok(())
    }

    /// Registers captured by [`SampledThread::pause`].
    ///
    /// # Errors
    ///
    /// `ContextUnavailable` when the thread is not paused.
    pub fn context(&self) -> PostmortemResult<ThreadContext>
    {
        if !self.paused {
            return Err(PostmortemError::ContextUnavailable {
                thread_id: Some(self.thread_id),
                details: "thread is not paused".into(),
            });
        }
        Ok(unsafe { *SLOT.0.get() })
    }

    /// Let the thread continue and wait until it left the handler.
    ///
    /// # Errors
    ///
    /// `Timeout` when the thread did not acknowledge the release. It still
    /// leaves the handler on its own once [`HOLD_LIMIT`] expires.
    pub fn release(&mut self) -> PostmortemResult<()>
    {
        if !self.paused {
            return Ok(());
        }
        self.paused = false;

        if STATE
            .compare_exchange(CAPTURED, RELEASED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // The thread already gave up waiting.
            TARGET.store(0, Ordering::Release);
            return Ok(());
        }

        let deadline = Instant::now() + self.timeout;
        while STATE.load(Ordering::Acquire) != IDLE {
            if Instant::now() >= deadline {
                return Err(PostmortemError::Timeout {
                    operation: "thread to resume",
                    millis: millis(self.timeout),
                });
            }
            std::thread::yield_now();
        }
        TARGET.store(0, Ordering::Release);
        debug!(thread = %self.thread_id, "thread released");
        Ok(())
    }
}

impl Drop for SampledThread
{
    fn drop(&mut self)
    {
        let _ = self.release();
    }
}
