//! Host-supplied collaborators.
//!
//! The engine never stores credentials itself: a token is requested once
//! per connection attempt and forgotten after the socket opens.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::DocumentContext;

/// Failure reported by a [`SessionContext`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("session context: {0}")]
pub struct ContextError(pub String);

/// Credentials and analysis settings provided by the embedding host.
#[async_trait]
pub trait SessionContext: Send + Sync {
    /// Bearer token for the next connection attempt.
    async fn token(&self) -> Result<String, ContextError>;

    /// Analysis configuration sent with each handshake.
    async fn document_context(&self) -> Result<DocumentContext, ContextError>;

    /// Drop cached credentials; the next `token()` must fetch fresh ones.
    fn invalidate(&self);
}

/// Fixed token and document context. Counts invalidations.
#[derive(Debug, Default)]
pub struct StaticContext {
    token: String,
    document: DocumentContext,
    invalidations: Mutex<usize>,
}

impl StaticContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_document(mut self, document: DocumentContext) -> Self {
        self.document = document;
        self
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.lock().map(|count| *count).unwrap_or(0)
    }
}

#[async_trait]
impl SessionContext for StaticContext {
    async fn token(&self) -> Result<String, ContextError> {
        Ok(self.token.clone())
    }

    async fn document_context(&self) -> Result<DocumentContext, ContextError> {
        Ok(self.document.clone())
    }

    fn invalidate(&self) {
        if let Ok(mut count) = self.invalidations.lock() {
            *count += 1;
        }
    }
}
