//! # Threads
//!
//! Capturing the registers of every other thread in the process.
//!
//! [`for_each_thread_in_process`] takes a thread snapshot, keeps the threads
//! owned by this process, skips the calling thread (it is busy producing the
//! report) and, one thread at a time, pauses it, reads its registers and
//! lets it continue. The callback runs after the thread was released, so a
//! slow consumer (symbolizing a deep stack) never keeps anyone paused.
//!
//! At most one thread is paused at any moment, and every pause is undone by
//! [`SuspendGuard`] on every exit path.

use tracing::{debug, warn};

use crate::error::{PostmortemError, PostmortemResult};
use crate::platform::{ThreadHandle, ThreadSource};
use crate::registers::ThreadContext;
use crate::types::ThreadId;

/// RAII guard that pauses a thread and resumes it when dropped.
///
/// The guard resumes even when the pause itself reported an error: a thread
/// that was partly paused (timeout, interrupted handshake) must not stay
/// frozen because the reporter gave up on it.
///
/// ```rust,ignore
/// let mut handle = source.open_thread(thread_id)?;
/// let mut guard = SuspendGuard::suspend(handle.as_mut());
/// let context = guard.context();
/// drop(guard); // thread runs again
/// ```
pub struct SuspendGuard<'h>
{
    handle: &'h mut dyn ThreadHandle,
    suspend_error: Option<PostmortemError>,
}

impl<'h> SuspendGuard<'h>
{
    /// Pause the thread behind `handle`.
    pub fn suspend(handle: &'h mut dyn ThreadHandle) -> Self
    {
        let suspend_error = handle.suspend().err();
        Self { handle, suspend_error }
    }

    /// Registers of the paused thread, or the reason they are unavailable.
    ///
    /// # Errors
    ///
    /// The suspend error when the pause failed, otherwise whatever the
    /// handle reports.
    pub fn context(&mut self) -> PostmortemResult<ThreadContext>
    {
        if let Some(err) = self.suspend_error.take() {
            return Err(err);
        }
        self.handle.context()
    }
}

impl Drop for SuspendGuard<'_>
{
    fn drop(&mut self)
    {
        if let Err(err) = self.handle.resume() {
            warn!(%err, "failed to resume thread");
        }
    }
}

/// Pause one thread, read its registers, resume it.
///
/// # Errors
///
/// Any error from opening, pausing or reading the thread. The thread is
/// resumed before this returns in every case.
pub fn capture_thread_context(source: &dyn ThreadSource, thread_id: ThreadId) -> PostmortemResult<ThreadContext>
{
    let mut handle = source.open_thread(thread_id)?;
    let context = {
        let mut guard = SuspendGuard::suspend(handle.as_mut());
        guard.context()
    };
    drop(handle);
    context
}

/// Invoke `callback` for every thread of the current process except the
/// calling one, in snapshot order.
///
/// # Errors
///
/// Returns the snapshot error when the thread list could not be obtained;
/// nothing is passed to `callback` in that case. Per-thread failures are
/// handed to the callback instead.
pub fn for_each_thread_in_process<F>(source: &dyn ThreadSource, mut callback: F) -> PostmortemResult<()>
where
    F: FnMut(ThreadId, PostmortemResult<ThreadContext>),
{
    let pid = source.process_id();
    let current = source.current_thread_id();
    let entries = source.thread_snapshot()?;

    for entry in entries {
        if entry.owner_process_id != pid || entry.thread_id == current {
            continue;
        }
        let context = capture_thread_context(source, entry.thread_id);
        if let Err(err) = &context {
            debug!(thread = %entry.thread_id, %err, "thread context unavailable");
        }
        callback(entry.thread_id, context);
    }

    Ok(())
}
