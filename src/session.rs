//! # Session Controller
//!
//! Top-level lifecycle: connect, authenticate, operate, shut down. Owns the
//! Transport's split halves, the Command Queue, the Event Router, and the
//! reader/writer tasks that drive them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::auth::{
    escape_password, generate_client_nonce, select_auth_method, verify_and_compute_safecookie,
    wait_for_cookie_bytes, AuthMaterialProvider, AuthMethod,
};
use crate::error::{Error, Result};
use crate::events::{EventRouter, SubscriptionId};
use crate::framer::{LineFramer, DEFAULT_MAX_LINE_BYTES};
use crate::proto::{EventKind, ReplyGroup, ReplyParser};
use crate::queue::{Command, CommandHandle, CommandQueue};
use crate::transport::{
    Endpoint, SocketTuning, Transport, TransportFactory, TransportReader, TransportWriter,
};

/// A session's position in its lifecycle. Transitions are monotonic forward
/// except that any state may move directly to `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Ready,
    ShuttingDown,
    Destroyed,
}

/// How long [`Session::connect`] tolerates a missing cookie file before
/// giving up, to ride out the race against Tor's own startup sequence.
const DEFAULT_COOKIE_WAIT: std::time::Duration = std::time::Duration::from_secs(5);

/// Default coalescing window for `SETEVENTS` reconciliation (see
/// [`SessionConfig::setevents_debounce`]).
const DEFAULT_SETEVENTS_DEBOUNCE: std::time::Duration = std::time::Duration::from_millis(50);

/// Builds the parameters for [`Session::connect`].
pub struct SessionConfig {
    pub endpoint: Endpoint,
    pub password: Option<String>,
    pub auth_provider: Option<Arc<dyn AuthMaterialProvider>>,
    pub take_ownership: bool,
    pub max_line_bytes: usize,
    pub cookie_wait_timeout: std::time::Duration,
    pub setevents_debounce: std::time::Duration,
    pub recv_buffer_bytes: Option<usize>,
    pub send_buffer_bytes: Option<usize>,
}

impl SessionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        SessionConfig {
            endpoint,
            password: None,
            auth_provider: None,
            take_ownership: false,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            cookie_wait_timeout: DEFAULT_COOKIE_WAIT,
            setevents_debounce: DEFAULT_SETEVENTS_DEBOUNCE,
            recv_buffer_bytes: None,
            send_buffer_bytes: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthMaterialProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Whether `TAKEOWNERSHIP` is sent once the session reaches `Ready`, and
    /// whether `destroy()` asks Tor to shut down instead of just closing the
    /// connection. Left to the caller; the core never decides this itself.
    pub fn take_ownership(mut self, yes: bool) -> Self {
        self.take_ownership = yes;
        self
    }

    pub fn max_line_bytes(mut self, n: usize) -> Self {
        self.max_line_bytes = n;
        self
    }

    /// How long to tolerate a not-yet-written cookie file before failing
    /// authentication outright (see [`crate::auth::wait_for_cookie_bytes`]).
    pub fn cookie_wait_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.cookie_wait_timeout = timeout;
        self
    }

    /// Coalescing window for `SETEVENTS` reconciliation: rapid
    /// subscribe/unsubscribe calls within this window collapse into a single
    /// `SETEVENTS` command reflecting only the final active set.
    pub fn setevents_debounce(mut self, window: std::time::Duration) -> Self {
        self.setevents_debounce = window;
        self
    }

    /// Requested OS receive-buffer size for a TCP control connection. Ignored
    /// by a Unix domain socket connection. `None` (the default) leaves the
    /// platform default in place.
    pub fn recv_buffer_bytes(mut self, n: usize) -> Self {
        self.recv_buffer_bytes = Some(n);
        self
    }

    /// Requested OS send-buffer size for a TCP control connection. Ignored
    /// by a Unix domain socket connection. `None` (the default) leaves the
    /// platform default in place.
    pub fn send_buffer_bytes(mut self, n: usize) -> Self {
        self.send_buffer_bytes = Some(n);
        self
    }
}

struct Core {
    state: SessionState,
    hooks: Vec<Box<dyn FnOnce() + Send>>,
}

struct SessionInner {
    queue: CommandQueue,
    router: EventRouter,
    core: Mutex<Core>,
    writer_io: tokio::sync::Mutex<Box<dyn TransportWriter>>,
    shutdown_tx: watch::Sender<bool>,
    expect_sentinel: AtomicBool,
    take_ownership: bool,
    max_line_bytes: usize,
    setevents_debounce: std::time::Duration,
    setevents_generation: std::sync::atomic::AtomicU64,
}

impl SessionInner {
    /// Transitions to `Destroyed` exactly once, interrupting every pending
    /// command, clearing subscriptions, and firing `on_destroy` hooks. Safe
    /// to call concurrently from the reader task, the writer task, and
    /// `Session::destroy`.
    async fn fail(&self, cause: Error) {
        let hooks = {
            let mut core = self.core.lock();
            if core.state == SessionState::Destroyed {
                return;
            }
            core.state = SessionState::Destroyed;
            std::mem::take(&mut core.hooks)
        };
        let cause_str = cause.to_interrupted_cause();
        warn!(%cause, "session failed, tearing down");
        self.queue.interrupt_all(cause_str);
        self.router.shutdown();
        let _ = self.shutdown_tx.send(true);
        for hook in hooks {
            hook();
        }
    }

    /// Applies one parsed reply group: dispatches events (suppressing the
    /// trailing `650 OK` sentinel that follows a multi-line event payload),
    /// or matches a synchronous group to the queue head.
    fn handle_group(&self, group: ReplyGroup) -> Result<()> {
        if group.is_event() {
            let awaiting_sentinel = self.expect_sentinel.swap(false, Ordering::SeqCst);
            if awaiting_sentinel && group.replies.len() == 1 && group.first_message() == "OK" {
                return Ok(());
            }
            let token = group.first_message().split_whitespace().next().unwrap_or("");
            if EventKind::parse(token).is_multiline() {
                self.expect_sentinel.store(true, Ordering::SeqCst);
            }
            self.router.dispatch(&group);
            Ok(())
        } else {
            self.queue.complete_in_flight(group)
        }
    }

    /// Schedules a `SETEVENTS` reconciliation after `setevents_debounce`
    /// elapses. Each call bumps a generation counter; only the most recent
    /// scheduling for a given debounce window actually reconciles, so a burst
    /// of subscribe/unsubscribe calls collapses into at most one `SETEVENTS`
    /// reflecting the final active set, per the reconciliation window.
    fn trigger_reconciliation(inner: Arc<SessionInner>) {
        let my_generation = inner
            .setevents_generation
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        let debounce = inner.setevents_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if inner.setevents_generation.load(Ordering::SeqCst) != my_generation {
                return;
            }
            let Some(kinds) = inner.router.reconcile_kinds() else {
                return;
            };
            let handle = inner.queue.enqueue(Command::new("SETEVENTS").args(kinds.clone()));
            if handle.await_result().await.is_err() {
                warn!("SETEVENTS reconciliation failed, retrying once");
                let retry = inner.queue.enqueue(Command::new("SETEVENTS").args(kinds));
                if retry.await_result().await.is_err() {
                    error!("SETEVENTS reconciliation failed again; active set may be stale");
                }
            }
        });
    }
}

async fn run_reader(
    inner: Arc<SessionInner>,
    mut reader: Box<dyn TransportReader>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut framer = LineFramer::new(inner.max_line_bytes);
    let mut parser = ReplyParser::new();
    let mut buf = vec![0u8; 8192];

    loop {
        loop {
            match framer.next_line() {
                Ok(Some(line)) => match parser.feed_line(&line) {
                    Ok(Some(group)) => {
                        if let Err(e) = inner.handle_group(group) {
                            inner.fail(e).await;
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        inner.fail(e).await;
                        return;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    inner.fail(e).await;
                    return;
                }
            }
        }

        let n = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            result = reader.read_into(&mut buf) => match result {
                Ok(n) => n,
                Err(e) => {
                    inner.fail(e).await;
                    return;
                }
            },
        };

        if n == 0 {
            let cause = match parser.finalize_on_eof() {
                Ok(()) if framer.has_pending_partial_line() => Error::protocol(
                    "transport closed with an unterminated line still buffered",
                ),
                Ok(()) => Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "transport closed by peer",
                )),
                Err(e) => e,
            };
            inner.fail(cause).await;
            return;
        }

        framer.ingest(&buf[..n]);
    }
}

async fn run_writer(inner: Arc<SessionInner>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let (token, bytes) = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            dequeued = inner.queue.dequeue_for_write() => dequeued,
        };

        {
            let mut writer = inner.writer_io.lock().await;
            if let Err(e) = writer.write(&bytes).await {
                inner.fail(e).await;
                return;
            }
        }
        inner.queue.mark_awaiting_reply(&token);

        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            _ = inner.queue.wait_in_flight_cleared() => {}
        }
    }
}

/// A live connection to a Tor control listener.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Opens the transport, starts the reader/writer tasks, and runs the
    /// connect sequence through to `Ready`. Fails (without leaving tasks
    /// running) if the transport can't be opened or authentication fails.
    pub async fn connect(config: SessionConfig) -> Result<Session> {
        let tuning = SocketTuning {
            recv_buffer_bytes: config.recv_buffer_bytes,
            send_buffer_bytes: config.send_buffer_bytes,
        };
        let transport: Box<dyn Transport> =
            TransportFactory::connect(&config.endpoint, &tuning).await?;
        let (reader_half, writer_half) = transport.into_split();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(SessionInner {
            queue: CommandQueue::new(),
            router: EventRouter::new(),
            core: Mutex::new(Core {
                state: SessionState::Connecting,
                hooks: Vec::new(),
            }),
            writer_io: tokio::sync::Mutex::new(writer_half),
            shutdown_tx,
            expect_sentinel: AtomicBool::new(false),
            take_ownership: config.take_ownership,
            max_line_bytes: config.max_line_bytes,
            setevents_debounce: config.setevents_debounce,
            setevents_generation: std::sync::atomic::AtomicU64::new(0),
        });

        tokio::spawn(run_reader(inner.clone(), reader_half, shutdown_rx.clone()));
        tokio::spawn(run_writer(inner.clone(), shutdown_rx));

        inner.core.lock().state = SessionState::Authenticating;

        if let Err(e) = authenticate(&inner, &config).await {
            let _ = inner.shutdown_tx.send(true);
            inner.queue.interrupt_all(e.to_interrupted_cause());
            inner.router.shutdown();
            inner.core.lock().state = SessionState::Destroyed;
            return Err(e);
        }

        inner.core.lock().state = SessionState::Ready;

        if config.take_ownership {
            let handle = inner.queue.enqueue(Command::new("TAKEOWNERSHIP"));
            handle.await_result().await?;
        }

        Ok(Session { inner })
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    /// Enqueues a command. Fails with `Closed` unless the session is
    /// currently `Ready`.
    pub fn enqueue(&self, command: Command) -> Result<CommandHandle> {
        if self.inner.core.lock().state != SessionState::Ready {
            return Err(Error::Closed);
        }
        Ok(self.inner.queue.enqueue(command))
    }

    /// Subscribes to an event kind. Triggers a `SETEVENTS` reconciliation if
    /// this is the first subscriber for `kind`.
    pub fn subscribe<F>(
        &self,
        kind: EventKind,
        tag: Option<String>,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if self.inner.core.lock().state != SessionState::Ready {
            return Err(Error::Closed);
        }
        let id = self.inner.router.add(kind, tag, callback);
        SessionInner::trigger_reconciliation(self.inner.clone());
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.router.remove(id);
        SessionInner::trigger_reconciliation(self.inner.clone());
    }

    pub fn unsubscribe_by_tag(&self, tag: &str) {
        self.inner.router.remove_by_tag(tag);
        SessionInner::trigger_reconciliation(self.inner.clone());
    }

    pub fn unsubscribe_by_event(&self, kind: &EventKind) {
        self.inner.router.remove_by_event(kind);
        SessionInner::trigger_reconciliation(self.inner.clone());
    }

    /// Registers a hook fired once the session reaches `Destroyed`. If the
    /// session is already destroyed, the hook fires immediately, inline.
    pub fn on_destroy<F: FnOnce() + Send + 'static>(&self, hook: F) {
        let mut core = self.inner.core.lock();
        if core.state == SessionState::Destroyed {
            drop(core);
            hook();
        } else {
            core.hooks.push(Box::new(hook));
        }
    }

    /// Idempotent graceful shutdown: rejects new enqueues, optionally asks
    /// Tor to stop (if ownership was taken), closes the transport, and
    /// interrupts every pending command.
    pub async fn destroy(&self) {
        {
            let mut core = self.inner.core.lock();
            if matches!(core.state, SessionState::ShuttingDown | SessionState::Destroyed) {
                return;
            }
            core.state = SessionState::ShuttingDown;
        }

        if self.inner.take_ownership {
            let handle = self
                .inner
                .queue
                .enqueue(Command::new("SIGNAL").arg("SHUTDOWN"));
            let _ = handle.await_result().await;
        }

        {
            let mut writer = self.inner.writer_io.lock().await;
            let _ = writer.close().await;
        }

        let _ = self.inner.shutdown_tx.send(true);
        self.inner.queue.interrupt_all("session destroyed".to_string());
        self.inner.router.shutdown();

        let hooks = {
            let mut core = self.inner.core.lock();
            core.state = SessionState::Destroyed;
            std::mem::take(&mut core.hooks)
        };
        for hook in hooks {
            hook();
        }
    }
}

async fn authenticate(inner: &Arc<SessionInner>, config: &SessionConfig) -> Result<()> {
    let protocolinfo = inner.queue.enqueue(Command::new("PROTOCOLINFO").arg("1"));
    let group = protocolinfo.await_result().await?;
    let methods = parse_auth_methods(&group)?;
    debug!(?methods, "advertised authentication methods");

    let method = select_auth_method(&methods, config.password.as_deref())?;

    let auth_command = match method {
        AuthMethod::Null => Command::new("AUTHENTICATE"),
        AuthMethod::Password(pw) => {
            Command::new("AUTHENTICATE").arg(format!("\"{}\"", escape_password(&pw)))
        }
        AuthMethod::Cookie => {
            let provider = config
                .auth_provider
                .as_ref()
                .ok_or_else(|| Error::unsupported("COOKIE auth requires an auth material provider"))?;
            let deadline = tokio::time::Instant::now() + config.cookie_wait_timeout;
            let cookie = wait_for_cookie_bytes(provider.as_ref(), deadline).await?;
            Command::new("AUTHENTICATE").arg(hex::encode(cookie))
        }
        AuthMethod::SafeCookie => {
            let provider = config.auth_provider.as_ref().ok_or_else(|| {
                Error::unsupported("SAFECOOKIE auth requires an auth material provider")
            })?;
            let deadline = tokio::time::Instant::now() + config.cookie_wait_timeout;
            let cookie = wait_for_cookie_bytes(provider.as_ref(), deadline).await?;
            let client_nonce = generate_client_nonce();

            let challenge = inner.queue.enqueue(
                Command::new("AUTHCHALLENGE")
                    .arg("SAFECOOKIE")
                    .arg(hex::encode(client_nonce)),
            );
            let challenge_reply = challenge.await_result().await?;
            let (server_hash, server_nonce) = parse_authchallenge_reply(&challenge_reply)?;
            let client_hash = verify_and_compute_safecookie(
                &cookie,
                &client_nonce,
                &server_nonce,
                &server_hash,
            )?;
            Command::new("AUTHENTICATE").arg(hex::encode(client_hash))
        }
    };

    let auth_handle = inner.queue.enqueue(auth_command);
    match auth_handle.await_result().await {
        Ok(_) => Ok(()),
        Err(Error::CommandFailed { status, message }) => Err(Error::AuthFailed { status, message }),
        Err(e) => Err(e),
    }
}

fn parse_auth_methods(group: &ReplyGroup) -> Result<Vec<String>> {
    for reply in &group.replies {
        if let Some(rest) = reply.message.strip_prefix("AUTH METHODS=") {
            let methods_part = rest.split_whitespace().next().unwrap_or("");
            return Ok(methods_part.split(',').map(|s| s.to_string()).collect());
        }
    }
    Err(Error::protocol("PROTOCOLINFO reply did not contain AUTH METHODS"))
}

fn parse_authchallenge_reply(group: &ReplyGroup) -> Result<([u8; 32], [u8; 32])> {
    let message = group.first_message();
    let mut server_hash = None;
    let mut server_nonce = None;
    for token in message.split_whitespace() {
        if let Some(value) = token.strip_prefix("SERVERHASH=") {
            server_hash = Some(decode_hex32(value)?);
        } else if let Some(value) = token.strip_prefix("SERVERNONCE=") {
            server_nonce = Some(decode_hex32(value)?);
        }
    }
    Ok((
        server_hash.ok_or_else(|| Error::protocol("AUTHCHALLENGE reply missing SERVERHASH"))?,
        server_nonce.ok_or_else(|| Error::protocol("AUTHCHALLENGE reply missing SERVERNONCE"))?,
    ))
}

fn decode_hex32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value).map_err(|e| Error::protocol(format!("invalid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::protocol("expected a 32-byte hex value"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::DuplexTransport;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[tokio::test]
    async fn s1_single_sync_command_resolves() {
        let (transport, mut driver) = DuplexTransport::pair();
        let config = SessionConfig::new(crate::transport::Endpoint::tcp("unused", 0));

        let connect_fut = {
            let transport = Box::new(transport) as Box<dyn Transport>;
            connect_with_transport(config, transport)
        };
        let driver_fut = async {
            driver.expect_line("PROTOCOLINFO 1").await;
            driver.send_line("250-PROTOCOLINFO 1").await;
            driver.send_line("250-AUTH METHODS=NULL").await;
            driver.send_line("250 OK").await;
            driver.expect_line("AUTHENTICATE").await;
            driver.send_line("250 OK").await;

            driver.expect_line("GETINFO version").await;
            driver.send_line("250 OK").await;
            driver
        };

        let (session, mut driver) = tokio::join!(connect_fut, driver_fut);
        let session = session.unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let handle = session.enqueue(Command::new("GETINFO").arg("version")).unwrap();
        let group = handle.await_result().await.unwrap();
        assert_eq!(group.replies.len(), 1);
        assert_eq!(group.first_message(), "OK");

        session.destroy().await;
        assert_eq!(session.state(), SessionState::Destroyed);
        driver.close().await;
    }

    #[tokio::test]
    async fn s5_command_failure_keeps_session_ready() {
        let (transport, mut driver) = DuplexTransport::pair();
        let config = SessionConfig::new(crate::transport::Endpoint::tcp("unused", 0));
        let connect_fut = connect_with_transport(config, Box::new(transport));
        let driver_fut = async {
            driver.expect_line("PROTOCOLINFO 1").await;
            driver.send_line("250-AUTH METHODS=NULL").await;
            driver.send_line("250 OK").await;
            driver.expect_line("AUTHENTICATE").await;
            driver.send_line("250 OK").await;

            driver.expect_line("SETCONF Foo=bar").await;
            driver.send_line("552 Unrecognized option").await;
        };
        let (session, _) = tokio::join!(connect_fut, driver_fut);
        let session = session.unwrap();

        let handle = session.enqueue(Command::new("SETCONF").arg("Foo=bar")).unwrap();
        let err = handle.await_result().await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { status: 552, .. }));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn s6_destroy_interrupts_pending_commands() {
        let (transport, mut driver) = DuplexTransport::pair();
        let config = SessionConfig::new(crate::transport::Endpoint::tcp("unused", 0));
        let connect_fut = connect_with_transport(config, Box::new(transport));
        let driver_fut = async {
            driver.expect_line("PROTOCOLINFO 1").await;
            driver.send_line("250-AUTH METHODS=NULL").await;
            driver.send_line("250 OK").await;
            driver.expect_line("AUTHENTICATE").await;
            driver.send_line("250 OK").await;
        };
        let (session, _) = tokio::join!(connect_fut, driver_fut);
        let session = session.unwrap();

        // Two commands queued back to back; destroy before either is written.
        let h1 = session.enqueue(Command::new("GETCONF").arg("SocksPort")).unwrap();
        let h2 = session.enqueue(Command::new("GETCONF").arg("ORPort")).unwrap();
        session.destroy().await;

        assert!(matches!(h1.await_result().await, Err(Error::Interrupted(_))));
        assert!(matches!(h2.await_result().await, Err(Error::Interrupted(_))));
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(matches!(
            session.enqueue(Command::new("GETINFO")),
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn s4_event_while_command_outstanding_neither_lost() {
        let (transport, mut driver) = DuplexTransport::pair();
        let config = SessionConfig::new(crate::transport::Endpoint::tcp("unused", 0))
            .setevents_debounce(Duration::from_millis(5));
        let connect_fut = connect_with_transport(config, Box::new(transport));
        let (session, _) = tokio::join!(connect_fut, async {
            driver.expect_line("PROTOCOLINFO 1").await;
            driver.send_line("250-AUTH METHODS=NULL").await;
            driver.send_line("250 OK").await;
            driver.expect_line("AUTHENTICATE").await;
            driver.send_line("250 OK").await;
        });
        let session = session.unwrap();

        let received: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = received.clone();
        session
            .subscribe(EventKind::Bw, None, move |payload| {
                received_clone.lock().unwrap().push(payload.to_string());
            })
            .unwrap();

        let driver_task = tokio::spawn(async move {
            driver.expect_line("SETEVENTS BW").await;
            driver.send_line("250 OK").await;
            driver.expect_line("GETINFO version").await;
            driver.send_line("650 BW 123 456").await;
            driver.send_line("250-version=0.4.7").await;
            driver.send_line("250 OK").await;
        });

        // Let the debounce window elapse so SETEVENTS is already enqueued
        // ahead of GETINFO; otherwise the two could reach the queue in
        // either order, making the driver's expected wire order flaky.
        tokio::time::sleep(Duration::from_millis(40)).await;
        let handle = session.enqueue(Command::new("GETINFO").arg("version")).unwrap();
        let group = handle.await_result().await.unwrap();
        assert_eq!(group.replies.len(), 2);
        assert_eq!(group.replies[1].message, "OK");

        driver_task.await.unwrap();
        assert_eq!(*received.lock().unwrap(), vec!["123 456".to_string()]);
    }

    #[tokio::test]
    async fn rapid_subscribe_unsubscribe_within_debounce_sends_no_setevents() {
        let (transport, mut driver) = DuplexTransport::pair();
        let config = SessionConfig::new(crate::transport::Endpoint::tcp("unused", 0))
            .setevents_debounce(Duration::from_millis(50));
        let connect_fut = connect_with_transport(config, Box::new(transport));
        let (session, _) = tokio::join!(connect_fut, async {
            driver.expect_line("PROTOCOLINFO 1").await;
            driver.send_line("250-AUTH METHODS=NULL").await;
            driver.send_line("250 OK").await;
            driver.expect_line("AUTHENTICATE").await;
            driver.send_line("250 OK").await;
        });
        let session = session.unwrap();

        // Add then remove the only subscriber for BW before the debounce
        // window elapses: the active set ends up exactly where it started,
        // so reconciliation must find nothing to send.
        let id = session.subscribe(EventKind::Bw, None, |_| {}).unwrap();
        session.unsubscribe(id);

        let driver_task = tokio::spawn(async move {
            driver.expect_line("GETINFO version").await;
            driver.send_line("250-version=0.4.7").await;
            driver.send_line("250 OK").await;
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        let handle = session.enqueue(Command::new("GETINFO").arg("version")).unwrap();
        let group = handle.await_result().await.unwrap();
        assert_eq!(group.replies.len(), 2);

        driver_task.await.unwrap();
    }

    #[tokio::test]
    async fn eof_with_dangling_partial_line_is_a_protocol_error() {
        let (transport, mut driver) = DuplexTransport::pair();
        let config = SessionConfig::new(crate::transport::Endpoint::tcp("unused", 0));
        let connect_fut = connect_with_transport(config, Box::new(transport));
        let (session, mut driver) = tokio::join!(connect_fut, async {
            driver.expect_line("PROTOCOLINFO 1").await;
            driver.send_line("250-AUTH METHODS=NULL").await;
            driver.send_line("250 OK").await;
            driver.expect_line("AUTHENTICATE").await;
            driver.send_line("250 OK").await;
            driver
        });
        let session = session.unwrap();

        let handle = session.enqueue(Command::new("GETINFO").arg("version")).unwrap();
        driver.expect_line("GETINFO version").await;
        driver.send_raw(b"250-version=0.4.7").await;
        driver.close().await;

        let err = handle.await_result().await.unwrap_err();
        match err {
            Error::Interrupted(cause) => assert!(cause.contains("unterminated line")),
            other => panic!("expected Interrupted carrying the protocol cause, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Destroyed);
    }

    #[tokio::test]
    async fn authentication_failure_never_reaches_ready() {
        let (transport, mut driver) = DuplexTransport::pair();
        let config = SessionConfig::new(crate::transport::Endpoint::tcp("unused", 0));
        let connect_fut = connect_with_transport(config, Box::new(transport));
        let driver_fut = async {
            driver.expect_line("PROTOCOLINFO 1").await;
            driver.send_line("250-AUTH METHODS=NULL").await;
            driver.send_line("250 OK").await;
            driver.expect_line("AUTHENTICATE").await;
            driver.send_line("515 Bad authentication").await;
        };
        let (session, _) = tokio::join!(connect_fut, driver_fut);
        assert!(matches!(session, Err(Error::AuthFailed { status: 515, .. })));
    }

    /// Test-only entry point mirroring `Session::connect` but taking an
    /// already-constructed transport, so tests can drive a [`DuplexTransport`]
    /// instead of a real socket.
    async fn connect_with_transport(
        config: SessionConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Session> {
        let (reader_half, writer_half) = transport.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(SessionInner {
            queue: CommandQueue::new(),
            router: EventRouter::new(),
            core: Mutex::new(Core {
                state: SessionState::Connecting,
                hooks: Vec::new(),
            }),
            writer_io: tokio::sync::Mutex::new(writer_half),
            shutdown_tx,
            expect_sentinel: AtomicBool::new(false),
            take_ownership: config.take_ownership,
            max_line_bytes: config.max_line_bytes,
            setevents_debounce: config.setevents_debounce,
            setevents_generation: std::sync::atomic::AtomicU64::new(0),
        });

        tokio::spawn(run_reader(inner.clone(), reader_half, shutdown_rx.clone()));
        tokio::spawn(run_writer(inner.clone(), shutdown_rx));

        inner.core.lock().state = SessionState::Authenticating;

        if let Err(e) = authenticate(&inner, &config).await {
            let _ = inner.shutdown_tx.send(true);
            inner.queue.interrupt_all(e.to_interrupted_cause());
            inner.router.shutdown();
            inner.core.lock().state = SessionState::Destroyed;
            return Err(e);
        }

        inner.core.lock().state = SessionState::Ready;
        Ok(Session { inner })
    }

    #[test]
    fn parses_auth_methods_from_protocolinfo() {
        use crate::proto::Reply;
        let group = ReplyGroup::new(vec![
            Reply::single(250, "PROTOCOLINFO 1".into()),
            Reply::single(
                250,
                "AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE=\"/run/tor/control.authcookie\"".into(),
            ),
            Reply::single(250, "OK".into()),
        ]);
        let methods = parse_auth_methods(&group).unwrap();
        assert_eq!(methods, vec!["COOKIE".to_string(), "SAFECOOKIE".to_string()]);
    }
}
