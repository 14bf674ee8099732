//! JSON wire protocol of the analysis service.
//!
//! Every frame is a JSON object tagged by `action`:
//! ```text
//!  client ─► server   {"id": 7, "action": "submit_ot", "rev": 3, "doc_len": 41, "deltas": [[…]]}
//!  server ─► client   {"id": 7, "action": "submit_ot", "rev": 3}                 (ack)
//!  server ─► client   {"action": "alert", "id": 912, "rev": 2, "begin": 4, …}    (push)
//! ```
//!
//! Acks and pushes are told apart by action kind, never by the presence of
//! `id`: alert pushes carry an `id` of their own which is an alert id, not
//! a request id.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use redline_core::{Delta, Revision};

/// Locally assigned request id.
pub type RequestId = u64;

/// Server-assigned alert id.
pub type AlertId = u64;

/// Protocol (codec) errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("unexpected binary frame")]
    BinaryFrame,
}

// ───────────────────────────────────────────────────────────────────
// Outgoing
// ───────────────────────────────────────────────────────────────────

/// Analysis configuration sent with the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formality: Option<String>,
}

/// Request payload, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RequestBody {
    /// Handshake. The only request allowed before the session is ready.
    Start {
        client: String,
        client_version: String,
        session_id: Uuid,
        dialect: String,
        document_context: DocumentContext,
    },
    /// Edit submission: `rev` is the revision this edit produces and
    /// `doc_len` the document length before it.
    SubmitOt {
        rev: Revision,
        doc_len: usize,
        deltas: Vec<Delta>,
    },
    Ping,
    Option {
        name: String,
        value: serde_json::Value,
    },
}

impl RequestBody {
    pub fn is_handshake(&self) -> bool {
        matches!(self, RequestBody::Start { .. })
    }

    pub fn action(&self) -> &'static str {
        match self {
            RequestBody::Start { .. } => "start",
            RequestBody::SubmitOt { .. } => "submit_ot",
            RequestBody::Ping => "ping",
            RequestBody::Option { .. } => "option",
        }
    }
}

/// A request frame: id plus tagged body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(flatten)]
    pub body: RequestBody,
}

impl Request {
    pub fn new(id: RequestId, body: RequestBody) -> Self {
        Self { id, body }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

// ───────────────────────────────────────────────────────────────────
// Incoming
// ───────────────────────────────────────────────────────────────────

/// Machine-readable error code carried by `error` frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub String);

/// How a client should react to an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credentials rejected; refresh them and reconnect.
    Unauthorized,
    /// Transient server condition.
    Retryable,
    /// Request or payload rejected; surfaced, never retried.
    Fatal,
}

impl ErrorCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ErrorKind {
        match self.0.as_str() {
            "not_authorized" | "unauthorized" | "auth_expired" => ErrorKind::Unauthorized,
            "server_busy" | "timeout" | "internal_error" | "rate_limited" => ErrorKind::Retryable,
            _ => ErrorKind::Fatal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload of an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorPayload {
    /// Request the error answers, if any
    #[serde(default)]
    pub id: Option<RequestId>,
    pub error: ErrorCode,
    #[serde(default)]
    pub message: Option<String>,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    #[default]
    Warning,
    Info,
}

/// Payload of an `alert` push. `begin..end` is relative to `rev`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlertPayload {
    pub id: AlertId,
    pub rev: Revision,
    pub begin: usize,
    pub end: usize,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub replacements: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub severity: Severity,
}

/// Payload of a `finished` push.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FinishedPayload {
    pub rev: Revision,
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub sub_scores: BTreeMap<String, u32>,
}

/// Payload of a `text_info` push.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TextInfo {
    #[serde(default)]
    pub words: usize,
    #[serde(default)]
    pub chars: usize,
    #[serde(default)]
    pub readability: Option<f64>,
}

/// Raw decoded frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Frame {
    Start {
        id: RequestId,
        #[serde(default)]
        sid: Option<String>,
    },
    SubmitOt {
        id: RequestId,
        rev: Revision,
    },
    Pong {
        id: RequestId,
    },
    Option {
        id: RequestId,
    },
    Alert(AlertPayload),
    Remove {
        id: AlertId,
    },
    Finished(FinishedPayload),
    TextInfo(TextInfo),
    Error(ErrorPayload),
    #[serde(other)]
    Unknown,
}

/// Successful acknowledgment of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Handshake accepted; the session is ready.
    Started { sid: Option<String> },
    /// Edit accepted at the authoritative revision.
    Submitted { rev: Revision },
    Pong,
    OptionSet,
}

/// Unsolicited server message.
#[derive(Debug, Clone, PartialEq)]
pub enum Push {
    Alert(AlertPayload),
    RemoveAlert { id: AlertId },
    Finished(FinishedPayload),
    TextInfo(TextInfo),
    Error(ErrorPayload),
}

/// A classified incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response { id: RequestId, response: Response },
    /// `error` frame; correlated against pending requests by the transport.
    Error(ErrorPayload),
    Push(Push),
    /// Action this client does not understand.
    Unknown,
}

impl Inbound {
    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(match frame {
            Frame::Start { id, sid } => Inbound::Response {
                id,
                response: Response::Started { sid },
            },
            Frame::SubmitOt { id, rev } => Inbound::Response {
                id,
                response: Response::Submitted { rev },
            },
            Frame::Pong { id } => Inbound::Response {
                id,
                response: Response::Pong,
            },
            Frame::Option { id } => Inbound::Response {
                id,
                response: Response::OptionSet,
            },
            Frame::Alert(alert) => Inbound::Push(Push::Alert(alert)),
            Frame::Remove { id } => Inbound::Push(Push::RemoveAlert { id }),
            Frame::Finished(finished) => Inbound::Push(Push::Finished(finished)),
            Frame::TextInfo(info) => Inbound::Push(Push::TextInfo(info)),
            Frame::Error(error) => Inbound::Error(error),
            Frame::Unknown => Inbound::Unknown,
        })
    }
}
