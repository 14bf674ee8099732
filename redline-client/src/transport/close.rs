//! Close codes and the reconnect policy they drive.
//!
//! | Code | Meaning         | Reconnect |
//! |------|-----------------|-----------|
//! | 1001 | going away      | no        |
//! | 4000 | bad request     | no        |
//! | 4001 | unauthorized    | no        |
//! | 1006 | abnormal        | yes       |
//! | 1011 | server error    | yes       |
//! | 1012 | server shutdown | yes       |
//! | *    | anything else   | yes       |

use std::fmt;

/// WebSocket close code as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    Normal,
    GoingAway,
    BadRequest,
    Unauthorized,
    Abnormal,
    ServerError,
    ServerShutdown,
    Other(u16),
}

impl CloseCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            4000 => CloseCode::BadRequest,
            4001 => CloseCode::Unauthorized,
            1006 => CloseCode::Abnormal,
            1011 => CloseCode::ServerError,
            1012 => CloseCode::ServerShutdown,
            other => CloseCode::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::BadRequest => 4000,
            CloseCode::Unauthorized => 4001,
            CloseCode::Abnormal => 1006,
            CloseCode::ServerError => 1011,
            CloseCode::ServerShutdown => 1012,
            CloseCode::Other(code) => code,
        }
    }

    /// Whether a later send may silently reopen the connection.
    pub fn is_recoverable(self) -> bool {
        !matches!(
            self,
            CloseCode::GoingAway | CloseCode::BadRequest | CloseCode::Unauthorized
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode::from_u16(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseCode::Normal => "normal",
            CloseCode::GoingAway => "going away",
            CloseCode::BadRequest => "bad request",
            CloseCode::Unauthorized => "unauthorized",
            CloseCode::Abnormal => "abnormal closure",
            CloseCode::ServerError => "server error",
            CloseCode::ServerShutdown => "server shutdown",
            CloseCode::Other(_) => "unrecognized",
        };
        write!(f, "{} ({name})", self.as_u16())
    }
}

/// Last close observed on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: CloseCode,
    pub reason: String,
}

/// Reconnect decision state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    can_reconnect: bool,
    last_close: Option<CloseInfo>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            can_reconnect: true,
            last_close: None,
        }
    }
}

impl ReconnectPolicy {
    /// Record a close and derive the reconnect flag from its code alone.
    pub fn on_close(&mut self, code: CloseCode, reason: impl Into<String>) {
        self.can_reconnect = code.is_recoverable();
        self.last_close = Some(CloseInfo {
            code,
            reason: reason.into(),
        });
    }

    /// Explicit override, used for forced reconnects.
    pub fn allow(&mut self) {
        self.can_reconnect = true;
    }

    pub fn can_reconnect(&self) -> bool {
        self.can_reconnect
    }

    pub fn last_close(&self) -> Option<&CloseInfo> {
        self.last_close.as_ref()
    }
}
