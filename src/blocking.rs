//! # Synchronous Blocking Helper
//!
//! A small bridge for callers without an async runtime: polls a
//! [`CommandHandle`] to completion on the calling thread instead of awaiting
//! it. Must only be driven from a background execution context (its own
//! blocking thread, e.g. `tokio::task::spawn_blocking`) — calling it from the
//! reader or writer task would deadlock the session, since both rely on the
//! async runtime making progress while this function sleeps.

use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::proto::ReplyGroup;
use crate::queue::CommandHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Blocks the current thread until `handle` reaches a terminal state,
/// sleeping [`POLL_INTERVAL`] between polls.
pub fn await_handle(handle: &CommandHandle) -> Result<ReplyGroup> {
    await_handle_with_cancellation(handle, || None)
}

/// Like [`await_handle`], but calls `cancel_probe` between every poll. If it
/// returns `Some(cause)`, the handle is cancelled and the loop continues
/// (rather than returning immediately) so the caller still observes whatever
/// terminal result cancellation actually produced.
pub fn await_handle_with_cancellation<F>(handle: &CommandHandle, mut cancel_probe: F) -> Result<ReplyGroup>
where
    F: FnMut() -> Option<String>,
{
    loop {
        if let Some(result) = handle.try_take_result() {
            return result;
        }
        if let Some(cause) = cancel_probe() {
            handle.cancel(cause);
            continue;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
