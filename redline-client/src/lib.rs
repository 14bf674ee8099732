//! Client engine that keeps a local document in sync with a remote,
//! revision-based grammar analysis service.
//!
//! ```text
//!  ┌──────────────────────────── CheckSession ───────────────────────────┐
//!  │  Rope text · RevisionSync (history, rebase) · alert map · listeners │
//!  └───────────────┬─────────────────────────────────────▲──────────────┘
//!                  │ dispatch(start / submit_ot / option)│ events, acks
//!  ┌───────────────▼──────────── TransportSession ───────┴──────────────┐
//!  │  actor task: Outbox (queue, pending, ceiling) · ReconnectPolicy     │
//!  │              KeepAlive · WebSocket (tokio-tungstenite)             │
//!  └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`protocol`]: JSON frames exchanged with the service
//! - [`transport`]: connection state machine, correlation and backpressure
//! - [`check`]: per-document orchestration and alert rebasing
//! - [`context`]: host-supplied credentials and analysis settings

pub mod check;
pub mod config;
pub mod context;
pub mod protocol;
pub mod scope;
pub mod transport;

pub use check::{Alert, CheckError, CheckSession, DocumentSnapshot, Notice, Status};
pub use config::{CheckConfig, TransportConfig};
pub use context::{ContextError, SessionContext, StaticContext};
pub use protocol::{
    AlertId, AlertPayload, DocumentContext, ErrorCode, ErrorKind, FinishedPayload, Inbound,
    ProtocolError, Push, Request, RequestBody, RequestId, Response, Severity, TextInfo,
};
pub use scope::LogScope;
pub use transport::{
    CloseCode, ConnectionState, LinkStatus, ResponseHandle, TransportError, TransportEvent,
    TransportSession,
};

pub use redline_core::{Delta, Edit, Revision};
