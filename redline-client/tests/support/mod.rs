//! In-process analysis service for integration tests.
//!
//! Answers `start`, `submit_ot`, `ping` and `option` the way the real
//! service does, records every frame it receives, and lets a test push
//! arbitrary frames or close the current connection.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

/// Initialize test logging once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scripted server behavior.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Close this many connections with 4001 after their first frame
    pub reject_connections: usize,
    /// Never answer `ping`
    pub ignore_pings: bool,
    /// Never answer `submit_ot`
    pub ignore_submits: bool,
}

enum Outgoing {
    Frame(Value),
    Close(u16, String),
}

pub struct MockServer {
    pub url: String,
    frames: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    connections: Arc<AtomicUsize>,
    authorizations: Arc<StdMutex<Vec<String>>>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(Behavior::default()).await
    }

    pub async fn start_with(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let outgoing_rx = Arc::new(Mutex::new(outgoing_rx));
        let connections = Arc::new(AtomicUsize::new(0));
        let authorizations = Arc::new(StdMutex::new(Vec::new()));

        {
            let connections = connections.clone();
            let authorizations = authorizations.clone();
            tokio::spawn(async move {
                while let Ok((stream, _addr)) = listener.accept().await {
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    let connection = Connection {
                        reject: index < behavior.reject_connections,
                        ignore_pings: behavior.ignore_pings,
                        ignore_submits: behavior.ignore_submits,
                        frames: frames_tx.clone(),
                        outgoing: outgoing_rx.clone(),
                        authorizations: authorizations.clone(),
                    };
                    tokio::spawn(connection.serve(stream));
                }
            });
        }

        Self {
            url: format!("ws://127.0.0.1:{port}/check"),
            frames: frames_rx,
            outgoing: outgoing_tx,
            connections,
            authorizations,
        }
    }

    /// Next frame received from any client.
    pub async fn next_frame(&mut self) -> Value {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server stopped")
    }

    /// Skip frames until one with `action` arrives.
    pub async fn expect_action(&mut self, action: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["action"] == action {
                return frame;
            }
        }
    }

    /// True if no frame arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        timeout(wait, self.frames.recv()).await.is_err()
    }

    /// Every frame received until none arrives for `quiet`.
    pub async fn drain(&mut self, quiet: Duration) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = timeout(quiet, self.frames.recv()).await {
            frames.push(frame);
        }
        frames
    }

    /// Send a frame on the current connection.
    pub fn push(&self, frame: Value) {
        let _ = self.outgoing.send(Outgoing::Frame(frame));
    }

    /// Close the current connection.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outgoing.send(Outgoing::Close(code, reason.to_string()));
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `Authorization` header of every accepted handshake.
    pub fn authorizations(&self) -> Vec<String> {
        self.authorizations.lock().unwrap().clone()
    }
}

struct Connection {
    reject: bool,
    ignore_pings: bool,
    ignore_submits: bool,
    frames: mpsc::UnboundedSender<Value>,
    outgoing: Arc<Mutex<mpsc::UnboundedReceiver<Outgoing>>>,
    authorizations: Arc<StdMutex<Vec<String>>>,
}

impl Connection {
    async fn serve(self, stream: TcpStream) {
        let authorizations = self.authorizations.clone();
        let record_auth = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let header = request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            authorizations.lock().unwrap().push(header);
            Ok(response)
        };
        let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, record_auth).await else {
            return;
        };
        let (mut sender, mut receiver) = ws.split();
        // One live connection at a time owns the push channel.
        let mut outgoing = self.outgoing.lock().await;

        loop {
            tokio::select! {
                message = receiver.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                        let _ = self.frames.send(frame.clone());
                        if self.reject {
                            let close = CloseFrame {
                                code: CloseCode::from(4001),
                                reason: "token expired".into(),
                            };
                            let _ = sender.send(Message::Close(Some(close))).await;
                            continue;
                        }
                        if let Some(reply) = self.reply_to(&frame) {
                            if sender.send(Message::Text(reply.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|frame| u16::from(frame.code));
                        let _ = self.frames.send(json!({"action": "_close", "code": code}));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                },
                Some(out) = outgoing.recv() => match out {
                    Outgoing::Frame(frame) => {
                        let _ = sender.send(Message::Text(frame.to_string().into())).await;
                    }
                    Outgoing::Close(code, reason) => {
                        let close = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sender.send(Message::Close(Some(close))).await;
                    }
                },
            }
        }
    }

    fn reply_to(&self, frame: &Value) -> Option<Value> {
        let id = frame.get("id")?.as_u64()?;
        match frame.get("action")?.as_str()? {
            "start" => Some(json!({"id": id, "action": "start", "sid": "mock-session"})),
            "submit_ot" if self.ignore_submits => None,
            "submit_ot" => Some(json!({"id": id, "action": "submit_ot", "rev": frame["rev"]})),
            "ping" if self.ignore_pings => None,
            "ping" => Some(json!({"id": id, "action": "pong"})),
            "option" if frame["name"] == "reject" => Some(json!({
                "id": id,
                "action": "error",
                "error": "bad_request",
                "message": "unknown option",
            })),
            "option" => Some(json!({"id": id, "action": "option"})),
            _ => None,
        }
    }
}
