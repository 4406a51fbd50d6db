//! # Command Queue
//!
//! Serializes command writes onto the transport and matches each synchronous
//! [`ReplyGroup`] to the command at the head of the queue, in FIFO order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::debug;

use crate::error::{Cause, Error, Result};
use crate::framer::encode_command_line;
use crate::proto::ReplyGroup;

/// An outgoing request: a verb, zero or more arguments, and an optional
/// inline data block sent as a dot-stuffed body.
#[derive(Debug, Clone)]
pub struct Command {
    pub verb: String,
    pub args: Vec<String>,
    pub data: Option<String>,
}

impl Command {
    pub fn new(verb: impl Into<String>) -> Self {
        Command {
            verb: verb.into(),
            args: Vec::new(),
            data: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Encodes this command to wire bytes: the verb/argument line, and (if
    /// present) a dot-stuffed data block terminated by a lone `.`.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = encode_command_line(&self.verb, &self.args);
        if let Some(data) = &self.data {
            for line in data.split('\n') {
                if line.starts_with('.') {
                    out.push(b'.');
                }
                out.extend_from_slice(line.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b".\r\n");
        }
        out
    }
}

/// The lifecycle state of a [`PendingCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Queued,
    Writing,
    AwaitingReply,
    Completed,
    Cancelled,
}

struct Inner {
    state: CommandState,
    result_tx: Option<oneshot::Sender<Result<ReplyGroup>>>,
}

/// A command together with its completion slot. Owned jointly by the
/// [`CommandQueue`] (which holds it until terminal) and the [`CommandHandle`]
/// returned to the caller.
struct PendingCommand {
    command: Command,
    inner: Mutex<Inner>,
}

/// Caller-facing reference to an enqueued command.
pub struct CommandHandle {
    pending: Arc<PendingCommand>,
    result_rx: tokio::sync::Mutex<Option<oneshot::Receiver<Result<ReplyGroup>>>>,
}

impl CommandHandle {
    /// Awaits the command's terminal result. May only be polled to
    /// completion once; a second call observes `Closed` rather than panicking.
    pub async fn await_result(&self) -> Result<ReplyGroup> {
        let rx = self.result_rx.lock().await.take();
        match rx {
            Some(rx) => rx.await.unwrap_or(Err(Error::Closed)),
            None => Err(Error::Closed),
        }
    }

    /// Requests cancellation. Idempotent: calling this more than once, or
    /// after the command has already reached a terminal state, has no
    /// further effect.
    pub fn cancel(&self, cause: impl Into<Cause>) {
        let mut inner = self.pending.inner.lock();
        match inner.state {
            CommandState::Queued => {
                inner.state = CommandState::Cancelled;
                if let Some(tx) = inner.result_tx.take() {
                    let _ = tx.send(Err(Error::Cancelled(cause.into())));
                }
            }
            CommandState::Writing | CommandState::AwaitingReply => {
                // The write (or in-flight reply) is left to run its course;
                // the queue discards whatever arrives for this entry.
                inner.state = CommandState::Cancelled;
                if let Some(tx) = inner.result_tx.take() {
                    let _ = tx.send(Err(Error::Cancelled(cause.into())));
                }
            }
            CommandState::Completed | CommandState::Cancelled => {}
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.pending.inner.lock().state,
            CommandState::Queued | CommandState::Writing | CommandState::AwaitingReply
        )
    }

    pub fn state(&self) -> CommandState {
        self.pending.inner.lock().state
    }

    /// Non-blocking poll for the terminal result, used by the synchronous
    /// blocking-await helper. Returns `None` while the command is still
    /// outstanding. Once a result has been observed (by this or
    /// [`CommandHandle::await_result`]), subsequent calls return `Closed`.
    pub fn try_take_result(&self) -> Option<Result<ReplyGroup>> {
        let mut guard = self.result_rx.try_lock().ok()?;
        let rx = guard.as_mut()?;
        match rx.try_recv() {
            Ok(result) => {
                *guard = None;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                *guard = None;
                Some(Err(Error::Closed))
            }
        }
    }
}

/// FIFO queue of pending commands shared between a session's writer and
/// reader tasks.
pub struct CommandQueue {
    entries: Mutex<VecDeque<Arc<PendingCommand>>>,
    in_flight: Mutex<Option<Arc<PendingCommand>>>,
    enqueued: Notify,
    cleared: Notify,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue {
            entries: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(None),
            enqueued: Notify::new(),
            cleared: Notify::new(),
        }
    }

    /// Appends a command to the tail of the queue and returns its handle.
    pub fn enqueue(&self, command: Command) -> CommandHandle {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(PendingCommand {
            command,
            inner: Mutex::new(Inner {
                state: CommandState::Queued,
                result_tx: Some(tx),
            }),
        });
        self.entries.lock().push_back(pending.clone());
        self.enqueued.notify_one();
        CommandHandle {
            pending,
            result_rx: tokio::sync::Mutex::new(Some(rx)),
        }
    }

    /// Pops the next non-cancelled entry, transitions it to `Writing`, and
    /// returns its encoded wire bytes. Returns `None` if the queue is
    /// currently empty of writable work.
    fn try_next_to_write(&self) -> Option<(Arc<PendingCommand>, Vec<u8>)> {
        loop {
            let candidate = self.entries.lock().pop_front()?;
            {
                let mut inner = candidate.inner.lock();
                if inner.state == CommandState::Cancelled {
                    continue;
                }
                inner.state = CommandState::Writing;
            }
            let bytes = candidate.command.encode();
            *self.in_flight.lock() = Some(candidate.clone());
            return Some((candidate, bytes));
        }
    }

    /// Blocks (asynchronously) until there is a writable command, then
    /// returns it and its wire bytes.
    pub(crate) async fn dequeue_for_write(&self) -> (CommandToken, Vec<u8>) {
        loop {
            if let Some((pending, bytes)) = self.try_next_to_write() {
                return (CommandToken(pending), bytes);
            }
            self.enqueued.notified().await;
        }
    }

    /// Marks the in-flight command `AwaitingReply` once its bytes are fully
    /// written.
    pub(crate) fn mark_awaiting_reply(&self, token: &CommandToken) {
        let mut inner = token.0.inner.lock();
        if inner.state == CommandState::Writing {
            inner.state = CommandState::AwaitingReply;
        }
    }

    /// Waits until the current in-flight entry has been completed (or
    /// cancelled), so the writer may proceed to the next command.
    pub(crate) async fn wait_in_flight_cleared(&self) {
        loop {
            if self.in_flight.lock().is_none() {
                return;
            }
            self.cleared.notified().await;
        }
    }

    /// Matches a synchronous reply group (the parser guarantees it is not a
    /// `6xx` event) to the current head of the queue. Returns `ProtocolError`
    /// if no command is in flight to receive it.
    pub(crate) fn complete_in_flight(&self, group: ReplyGroup) -> Result<()> {
        let head = self.in_flight.lock().take();
        let head = match head {
            Some(h) => h,
            None => {
                return Err(Error::protocol(
                    "synchronous reply arrived with no command awaiting one",
                ))
            }
        };

        let status_class = group.status() / 100;
        let result = if status_class == 2 {
            Ok(group)
        } else {
            let status = group.status();
            let message = group.first_message().to_string();
            Err(Error::CommandFailed { status, message })
        };

        let mut inner = head.inner.lock();
        let already_cancelled = inner.state == CommandState::Cancelled;
        inner.state = CommandState::Completed;
        if !already_cancelled {
            if let Some(tx) = inner.result_tx.take() {
                let _ = tx.send(result);
            }
        } else {
            debug!("discarding reply for a cancelled command");
        }
        drop(inner);
        self.cleared.notify_one();
        Ok(())
    }

    /// Resolves every still-pending entry (queued or in flight) with
    /// `Interrupted`, used during session shutdown.
    pub(crate) fn interrupt_all(&self, cause: Cause) {
        let mut pending: Vec<Arc<PendingCommand>> = self.entries.lock().drain(..).collect();
        if let Some(in_flight) = self.in_flight.lock().take() {
            pending.push(in_flight);
        }
        for entry in pending {
            let mut inner = entry.inner.lock();
            if matches!(inner.state, CommandState::Completed | CommandState::Cancelled) {
                continue;
            }
            inner.state = CommandState::Cancelled;
            if let Some(tx) = inner.result_tx.take() {
                let _ = tx.send(Err(Error::Interrupted(cause.clone())));
            }
        }
        self.cleared.notify_one();
        self.enqueued.notify_waiters();
    }
}

/// Opaque reference to the entry currently being written, threaded between
/// `dequeue_for_write` and `mark_awaiting_reply` by the writer task.
pub(crate) struct CommandToken(Arc<PendingCommand>);
