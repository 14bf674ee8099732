//! The transport actor task.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::close::{CloseCode, ReconnectPolicy};
use super::keepalive::{KeepAlive, Tick};
use super::outbox::{ConnectionState, Outbox};
use super::{Command, LinkStatus, Responder, TransportError, TransportEvent};
use crate::config::TransportConfig;
use crate::context::SessionContext;
use crate::protocol::{Inbound, Push, Request, RequestBody, Response};
use crate::scope::LogScope;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Connecting = BoxFuture<'static, Result<WsStream, TransportError>>;

/// Who is waiting on a request.
enum Waiter {
    Caller(Responder),
    /// Keep-alive ping; only the pong itself matters.
    KeepAlive,
}

impl Waiter {
    fn resolve(self, result: Result<Response, TransportError>) {
        if let Waiter::Caller(tx) = self {
            // Receiver may be gone; nothing left to notify.
            let _ = tx.send(result);
        }
    }
}

pub(super) struct Actor {
    config: TransportConfig,
    context: Arc<dyn SessionContext>,
    scope: LogScope,
    outbox: Outbox<Waiter>,
    policy: ReconnectPolicy,
    keepalive: KeepAlive,
    ticker: Interval,
    connecting: Option<Connecting>,
    writer: Option<SplitSink<WsStream, Message>>,
    reader: Option<SplitStream<WsStream>>,
    /// Sockets opened so far; the live one, if any, is number `epoch`
    epoch: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    status: watch::Sender<LinkStatus>,
}

impl Actor {
    pub(super) fn new(
        config: TransportConfig,
        context: Arc<dyn SessionContext>,
        scope: LogScope,
        events: mpsc::UnboundedSender<TransportEvent>,
        status: watch::Sender<LinkStatus>,
    ) -> Self {
        let mut ticker = interval(config.keepalive_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            outbox: Outbox::new(config.max_in_flight),
            keepalive: KeepAlive::new(config.max_missed_pings),
            policy: ReconnectPolicy::default(),
            ticker,
            connecting: None,
            writer: None,
            reader: None,
            epoch: 0,
            config,
            context,
            scope,
            events,
            status,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        log::debug!("[{}] transport started for {}", self.scope, self.config.url);
        loop {
            let ready = self.outbox.state() == ConnectionState::Ready;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.on_command(command).await.is_break() {
                            break;
                        }
                    }
                    None => break,
                },
                opened = await_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(opened).await;
                }
                frame = next_frame(&mut self.reader) => self.on_frame(frame).await,
                _ = self.ticker.tick(), if ready => self.on_tick().await,
            }
        }
        self.shutdown().await;
    }

    // ─── Commands ──────────────────────────────────────────────────

    async fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Submit {
                body,
                priority,
                epoch,
                responder,
            } => self.on_submit(body, priority, epoch, responder).await,
            Command::Connect => self.ensure_connecting(),
            Command::Reconnect { force } => self.on_reconnect(force).await,
            Command::Dispose => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn on_submit(
        &mut self,
        body: RequestBody,
        priority: bool,
        epoch: Option<u64>,
        responder: Responder,
    ) {
        if let Some(epoch) = epoch {
            if epoch != self.epoch || !self.outbox.state().is_live() {
                log::debug!(
                    "[{}] {} for socket {epoch} dropped: socket {} is {:?}",
                    self.scope,
                    body.action(),
                    self.epoch,
                    self.outbox.state()
                );
                let _ = responder.send(Err(TransportError::ConnectionClosed));
                return;
            }
        }
        if let Some(error) = self.link_status().forbidden() {
            log::debug!("[{}] {} rejected: {error}", self.scope, body.action());
            let _ = responder.send(Err(error));
            return;
        }
        let action = body.action();
        let (id, writes) = self.outbox.submit(body, priority, Waiter::Caller(responder));
        log::debug!(
            "[{}] {action} #{id} submitted ({} written, {} queued)",
            self.scope,
            writes.len(),
            self.outbox.queued_len()
        );
        self.write_all(writes).await;
        self.ensure_connecting();
        self.publish();
    }

    async fn on_reconnect(&mut self, force: bool) {
        if force {
            self.policy.allow();
        }
        if !self.policy.can_reconnect() {
            log::warn!("[{}] reconnect refused by close policy", self.scope);
            return;
        }
        if self.outbox.state().is_live() {
            self.close_socket(WsCloseCode::Normal, "reconnect").await;
            self.on_closed(CloseCode::Normal, "reconnect".to_string());
        }
        self.connecting = None;
        self.open();
    }

    /// Open a socket unless one exists or an attempt is under way.
    fn ensure_connecting(&mut self) {
        if !self.outbox.state().is_idle() || self.connecting.is_some() {
            return;
        }
        if !self.policy.can_reconnect() {
            log::warn!("[{}] not reconnecting: blocked by last close", self.scope);
            return;
        }
        self.open();
    }

    fn open(&mut self) {
        log::info!("[{}] connecting to {}", self.scope, self.config.url);
        self.outbox.begin_connect();
        self.connecting = Some(Box::pin(open_socket(
            self.config.url.clone(),
            self.config.connect_timeout(),
            Arc::clone(&self.context),
        )));
        self.publish();
    }

    // ─── Socket lifecycle ──────────────────────────────────────────

    async fn on_connect_result(&mut self, result: Result<WsStream, TransportError>) {
        match result {
            Ok(stream) => {
                let (writer, reader) = stream.split();
                self.writer = Some(writer);
                self.reader = Some(reader);
                self.keepalive.reset();
                self.epoch += 1;
                log::info!("[{}] connected (socket {})", self.scope, self.epoch);
                let writes = self.outbox.on_open();
                self.publish();
                self.emit(TransportEvent::Connected { epoch: self.epoch });
                self.write_all(writes).await;
                self.publish();
            }
            Err(error) => {
                log::warn!("[{}] connect failed: {error}", self.scope);
                for waiter in self.outbox.on_error() {
                    waiter.resolve(Err(error.clone()));
                }
                self.publish();
                self.emit(TransportEvent::Errored(error.to_string()));
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(text.as_str()).await,
            Some(Ok(Message::Binary(bytes))) => {
                log::warn!("[{}] ignoring binary frame ({} bytes)", self.scope, bytes.len());
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                    None => (1005, String::new()),
                };
                self.on_closed(CloseCode::from_u16(code), reason);
            }
            Some(Ok(_)) => {}
            Some(Err(error)) => self.on_socket_error(error.to_string()),
            None => self.on_closed(CloseCode::Abnormal, "stream ended".to_string()),
        }
    }

    async fn on_text(&mut self, text: &str) {
        let inbound = match Inbound::decode(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                log::warn!("[{}] dropping frame: {e}", self.scope);
                return;
            }
        };

        match inbound {
            Inbound::Response { id, response } => {
                if response == Response::Pong {
                    self.keepalive.on_pong();
                }
                let resolved = self.outbox.resolve(id, true);
                match resolved.responder {
                    Some(waiter) => waiter.resolve(Ok(response)),
                    None => log::warn!("[{}] response for unknown request #{id}", self.scope),
                }
                if resolved.ready {
                    log::info!("[{}] session ready", self.scope);
                    self.ticker.reset();
                    self.publish();
                    self.emit(TransportEvent::Ready);
                }
                self.write_all(resolved.writes).await;
            }
            Inbound::Error(payload) => match payload.id.filter(|id| self.outbox.is_pending(*id)) {
                Some(id) => {
                    log::warn!("[{}] request #{id} rejected: {}", self.scope, payload.error);
                    let resolved = self.outbox.resolve(id, false);
                    if let Some(waiter) = resolved.responder {
                        waiter.resolve(Err(TransportError::Protocol {
                            code: payload.error,
                            message: payload.message,
                        }));
                    }
                    self.write_all(resolved.writes).await;
                }
                None => self.emit(TransportEvent::Push(Push::Error(payload))),
            },
            Inbound::Push(push) => self.emit(TransportEvent::Push(push)),
            Inbound::Unknown => log::debug!("[{}] ignoring unknown action", self.scope),
        }
        self.publish();
    }

    async fn on_tick(&mut self) {
        match self.keepalive.on_tick() {
            Tick::Ping => {
                let (id, writes) = self.outbox.submit(RequestBody::Ping, true, Waiter::KeepAlive);
                log::trace!("[{}] ping #{id}", self.scope);
                self.write_all(writes).await;
            }
            Tick::Stale => {
                log::warn!(
                    "[{}] {} pings unanswered, reconnecting",
                    self.scope,
                    self.keepalive.unanswered()
                );
                self.close_socket(WsCloseCode::Normal, "keep-alive timeout").await;
                self.on_closed(CloseCode::Abnormal, "keep-alive timeout".to_string());
                self.ensure_connecting();
            }
        }
        self.publish();
    }

    fn on_closed(&mut self, code: CloseCode, reason: String) {
        self.writer = None;
        self.reader = None;
        log::info!("[{}] connection closed: {code} {reason}", self.scope);
        for waiter in self.outbox.on_close() {
            waiter.resolve(Err(TransportError::ConnectionClosed));
        }
        self.policy.on_close(code, reason.clone());
        self.keepalive.reset();
        if !self.policy.can_reconnect() {
            log::warn!("[{}] reconnect disabled until forced", self.scope);
        }
        self.publish();
        self.emit(TransportEvent::Closed { code, reason });
    }

    fn on_socket_error(&mut self, message: String) {
        self.writer = None;
        self.reader = None;
        log::error!("[{}] socket error: {message}", self.scope);
        for waiter in self.outbox.on_error() {
            waiter.resolve(Err(TransportError::Socket(message.clone())));
        }
        self.keepalive.reset();
        self.publish();
        self.emit(TransportEvent::Errored(message));
    }

    async fn shutdown(&mut self) {
        self.connecting = None;
        self.close_socket(WsCloseCode::Away, "disposed").await;
        self.writer = None;
        self.reader = None;
        for waiter in self.outbox.dispose() {
            waiter.resolve(Err(TransportError::Disposed));
        }
        self.policy.on_close(CloseCode::GoingAway, "disposed");
        self.publish();
        log::info!("[{}] transport disposed", self.scope);
    }

    // ─── Writes ────────────────────────────────────────────────────

    /// Write released requests in order. Requires a live socket.
    async fn write_all(&mut self, requests: Vec<Request>) {
        let mut requests = std::collections::VecDeque::from(requests);
        while let Some(request) = requests.pop_front() {
            debug_assert!(self.writer.is_some(), "write without a live socket");
            let Some(writer) = self.writer.as_mut() else {
                log::error!(
                    "[{}] {} #{} dropped: no live socket",
                    self.scope,
                    request.body.action(),
                    request.id
                );
                return;
            };

            let text = match request.encode() {
                Ok(text) => text,
                Err(e) => {
                    log::error!("[{}] cannot encode #{}: {e}", self.scope, request.id);
                    let resolved = self.outbox.resolve(request.id, false);
                    if let Some(waiter) = resolved.responder {
                        waiter.resolve(Err(e.into()));
                    }
                    requests.extend(resolved.writes);
                    continue;
                }
            };

            if let Err(e) = writer.send(Message::Text(text.into())).await {
                self.on_socket_error(e.to_string());
                return;
            }
        }
    }

    async fn close_socket(&mut self, code: WsCloseCode, reason: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        if let Err(e) = writer.send(Message::Close(Some(frame))).await {
            log::debug!("[{}] close frame not sent: {e}", self.scope);
        }
    }

    // ─── Status ────────────────────────────────────────────────────

    fn link_status(&self) -> LinkStatus {
        LinkStatus {
            state: self.outbox.state(),
            can_reconnect: self.policy.can_reconnect(),
            last_close: self.policy.last_close().cloned(),
            in_flight: self.outbox.in_flight(),
            queued: self.outbox.queued_len(),
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.link_status());
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            log::trace!("[{}] event receiver dropped", self.scope);
        }
    }
}

async fn open_socket(
    url: String,
    timeout: Duration,
    context: Arc<dyn SessionContext>,
) -> Result<WsStream, TransportError> {
    let token = context
        .token()
        .await
        .map_err(|e| TransportError::Credentials(e.to_string()))?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    if !token.is_empty() {
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::Credentials(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
    }

    let (stream, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    Ok(stream)
}

/// Resolves when the pending connect attempt finishes; never without one.
async fn await_connect(connecting: &mut Option<Connecting>) -> Result<WsStream, TransportError> {
    match connecting.as_mut() {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

/// Next frame from the socket; never resolves without one.
async fn next_frame(reader: &mut Option<SplitStream<WsStream>>) -> Option<Result<Message, WsError>> {
    match reader.as_mut() {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}
