//! WebSocket transport session.
//!
//! ```text
//!  TransportSession (handle, Clone)
//!      │  Command (mpsc, FIFO)              watch<LinkStatus>
//!      ▼                                           ▲
//!  ┌────────────── actor task ─────────────────────┴──┐
//!  │ Outbox: queue · pending · backpressure           │
//!  │ ReconnectPolicy · KeepAlive                      │
//!  │ socket writer ◄──── writes    reader ───► frames │
//!  └──────────────────────────────────────┬───────────┘
//!                                         ▼
//!                        TransportEvent (mpsc, take_event_rx)
//! ```
//!
//! The actor task owns every piece of connection state; the handle only
//! enqueues commands and reads the published [`LinkStatus`].

mod close;
mod keepalive;
mod outbox;
mod session;

pub use close::{CloseCode, CloseInfo, ReconnectPolicy};
pub use keepalive::{KeepAlive, Tick};
pub use outbox::{ConnectionState, Outbox, Resolved};

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::TransportConfig;
use crate::context::SessionContext;
use crate::protocol::{ErrorCode, ProtocolError, Push, RequestBody, Response};
use crate::scope::LogScope;

/// Errors surfaced to callers awaiting a response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("reconnect forbidden after close {code}: {reason}")]
    ReconnectForbidden { code: CloseCode, reason: String },
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    #[error("transport disposed")]
    Disposed,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out")]
    Timeout,
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("server rejected request: {code}{}", .message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    Protocol {
        code: ErrorCode,
        message: Option<String>,
    },
    #[error(transparent)]
    Codec(#[from] ProtocolError),
    #[error("socket error: {0}")]
    Socket(String),
}

/// Lifecycle events published by the actor.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Socket open; the handshake may now be written.
    ///
    /// `epoch` numbers the sockets this session has opened, starting at 1.
    Connected { epoch: u64 },
    /// Handshake acknowledged.
    Ready,
    Push(Push),
    Closed { code: CloseCode, reason: String },
    Errored(String),
}

/// Snapshot of the connection published after every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub can_reconnect: bool,
    pub last_close: Option<CloseInfo>,
    pub in_flight: usize,
    pub queued: usize,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Closed,
            can_reconnect: true,
            last_close: None,
            in_flight: 0,
            queued: 0,
        }
    }
}

impl LinkStatus {
    /// Error a send gets when the policy forbids reopening the socket.
    pub fn forbidden(&self) -> Option<TransportError> {
        if self.can_reconnect || !self.state.is_idle() {
            return None;
        }
        let (code, reason) = match &self.last_close {
            Some(close) => (close.code, close.reason.clone()),
            None => (CloseCode::Abnormal, String::new()),
        };
        Some(TransportError::ReconnectForbidden { code, reason })
    }
}

type Responder = oneshot::Sender<Result<Response, TransportError>>;

pub(crate) enum Command {
    Submit {
        body: RequestBody,
        priority: bool,
        /// Socket the request is bound to, if any
        epoch: Option<u64>,
        responder: Responder,
    },
    Connect,
    Reconnect {
        force: bool,
    },
    Dispose,
}

/// Awaitable response to a dispatched request.
///
/// Resolves to [`TransportError::Disposed`] if the session goes away
/// before answering.
#[must_use = "dropping the handle discards the response"]
pub struct ResponseHandle {
    rx: oneshot::Receiver<Result<Response, TransportError>>,
}

impl Future for ResponseHandle {
    type Output = Result<Response, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(TransportError::Disposed)))
    }
}

/// Handle to one long-lived WebSocket connection.
#[derive(Clone)]
pub struct TransportSession {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<LinkStatus>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>>,
    scope: LogScope,
}

impl TransportSession {
    /// Start the actor task. Must be called inside a tokio runtime.
    ///
    /// No socket is opened until the first send or `connect()`.
    pub fn spawn(
        config: TransportConfig,
        context: Arc<dyn SessionContext>,
        scope: LogScope,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());

        let actor = session::Actor::new(config, context, scope.clone(), event_tx, status_tx);
        tokio::spawn(actor.run(command_rx));

        Self {
            commands: command_tx,
            status: status_rx,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
            scope,
        }
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_event_rx(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.event_rx.lock().ok()?.take()
    }

    /// Enqueue a request and return a handle to await its response.
    ///
    /// Opens the connection lazily. The actor rejects the request with
    /// [`TransportError::ReconnectForbidden`], without touching the socket,
    /// when the last close forbids reconnecting. Commands are handled in
    /// order, so a preceding `reconnect(true)` is always seen first.
    pub fn dispatch(&self, body: RequestBody, priority: bool) -> ResponseHandle {
        self.submit(body, priority, None)
    }

    /// Enqueue a request that only makes sense on the socket announced by
    /// `TransportEvent::Connected { epoch }`.
    ///
    /// Once that socket is closed the request fails with
    /// [`TransportError::ConnectionClosed`]. It is never carried over to a
    /// later socket and never opens one.
    pub fn dispatch_on(&self, epoch: u64, body: RequestBody) -> ResponseHandle {
        self.submit(body, false, Some(epoch))
    }

    fn submit(&self, body: RequestBody, priority: bool, epoch: Option<u64>) -> ResponseHandle {
        let (tx, rx) = oneshot::channel();
        log::trace!("[{}] dispatch {} (epoch {epoch:?})", self.scope, body.action());
        // A closed channel drops `tx`, which resolves the handle as disposed.
        let _ = self.commands.send(Command::Submit {
            body,
            priority,
            epoch,
            responder: tx,
        });
        ResponseHandle { rx }
    }

    pub async fn send(&self, body: RequestBody, priority: bool) -> Result<Response, TransportError> {
        self.dispatch(body, priority).await
    }

    /// Open the socket if neither a socket nor an attempt exists.
    pub fn connect(&self) -> Result<(), TransportError> {
        if let Some(error) = self.status.borrow().forbidden() {
            return Err(error);
        }
        self.commands
            .send(Command::Connect)
            .map_err(|_| TransportError::Disposed)
    }

    /// Drop the current socket and open a new one.
    ///
    /// `force` clears a reconnect prohibition left by the last close.
    pub fn reconnect(&self, force: bool) -> Result<(), TransportError> {
        if !force {
            if let Some(error) = self.status.borrow().forbidden() {
                return Err(error);
            }
        }
        self.commands
            .send(Command::Reconnect { force })
            .map_err(|_| TransportError::Disposed)
    }

    /// Close with 1001 and fail everything outstanding. Idempotent.
    pub fn dispose(&self) {
        let _ = self.commands.send(Command::Dispose);
    }

    pub fn is_disposed(&self) -> bool {
        self.commands.is_closed()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn can_reconnect(&self) -> bool {
        self.status.borrow().can_reconnect
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_only_when_idle_and_blocked() {
        let mut status = LinkStatus::default();
        assert!(status.forbidden().is_none());

        status.can_reconnect = false;
        status.last_close = Some(CloseInfo {
            code: CloseCode::Unauthorized,
            reason: "expired".into(),
        });
        assert_eq!(
            status.forbidden(),
            Some(TransportError::ReconnectForbidden {
                code: CloseCode::Unauthorized,
                reason: "expired".into(),
            })
        );

        status.state = ConnectionState::Connecting;
        assert!(status.forbidden().is_none());
    }

    #[test]
    fn test_protocol_error_display() {
        let error = TransportError::Protocol {
            code: ErrorCode::new("bad_request"),
            message: Some("rev mismatch".into()),
        };
        assert_eq!(error.to_string(), "server rejected request: bad_request (rev mismatch)");
        let bare = TransportError::Protocol {
            code: ErrorCode::new("invalid_payload"),
            message: None,
        };
        assert_eq!(bare.to_string(), "server rejected request: invalid_payload");
    }

    #[tokio::test]
    async fn test_dropped_responder_resolves_as_disposed() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let handle = ResponseHandle { rx };
        assert_eq!(handle.await, Err(TransportError::Disposed));
    }
}
