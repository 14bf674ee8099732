//! Check session: one document kept in sync with the analysis service.
//!
//! ```text
//!   host edits ──► apply_edits ──► Rope + RevisionSync ──► submit_ot ──┐
//!                      │                                              ▼
//!                      └─ rebase stored alerts           TransportSession
//!                                                                     │
//!   listeners ◄── snapshot ◄── process_next ◄── events / acks ◄───────┘
//! ```
//!
//! Alerts arrive anchored to the revision they were computed at and are
//! rebased onto the current text on arrival; every later local edit moves
//! them again, so stored ranges always refer to the live text.

use std::collections::BTreeMap;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ropey::Rope;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use redline_core::{
    build_delta, rebase_range, Delta, DeltaError, Edit, Revision, RevisionSync, TextChange,
};

use crate::config::CheckConfig;
use crate::context::SessionContext;
use crate::protocol::{
    AlertId, AlertPayload, DocumentContext, ErrorCode, ErrorKind, FinishedPayload, Push,
    RequestBody, Response, Severity, TextInfo,
};
use crate::scope::LogScope;
use crate::transport::{CloseCode, ResponseHandle, TransportError, TransportEvent, TransportSession};

/// Consecutive credential refreshes attempted before giving up.
const MAX_AUTH_RETRIES: u32 = 3;

/// Check session errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckError {
    #[error("invalid edit: {0}")]
    Delta(#[from] DeltaError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("check session disposed")]
    Disposed,
}

/// Coarse analysis state of the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Idle,
    Checking,
    Errored,
}

/// Asynchronous side channel for errors the host may want to show.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Error {
        code: Option<ErrorCode>,
        message: String,
    },
    Disconnected {
        code: CloseCode,
        reason: String,
    },
}

/// A suggestion anchored to the live text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: AlertId,
    /// Revision the service computed this alert at
    pub revision: Revision,
    /// Position in the current text
    pub range: Range<usize>,
    pub category: String,
    pub title: String,
    pub explanation: String,
    pub replacements: Vec<String>,
    pub hidden: bool,
    pub severity: Severity,
}

/// Read model handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub alerts: BTreeMap<AlertId, Alert>,
    pub score: Option<u32>,
    pub sub_scores: BTreeMap<String, u32>,
    pub text_info: Option<TextInfo>,
    pub status: Status,
    /// Local revision of the current text
    pub revision: Revision,
}

impl DocumentSnapshot {
    pub fn visible_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.values().filter(|alert| !alert.hidden)
    }
}

type Listener = Box<dyn FnMut(&DocumentSnapshot) + Send>;

#[derive(Debug, Clone)]
enum AckKind {
    Handshake,
    /// Edit submitted as `revision` on socket `epoch`
    Edit { revision: Revision, epoch: u64 },
    Option(String),
}

struct Ack {
    kind: AckKind,
    result: Result<Response, TransportError>,
}

pub struct CheckSession {
    config: CheckConfig,
    scope: LogScope,
    context: Arc<dyn SessionContext>,
    transport: TransportSession,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    acks_tx: mpsc::UnboundedSender<Ack>,
    acks_rx: mpsc::UnboundedReceiver<Ack>,
    session_id: Uuid,
    /// Socket the current revision numbering belongs to
    epoch: u64,

    text: Rope,
    version: u64,
    sync: RevisionSync,
    synced: bool,
    submitted: Option<Revision>,
    auth_retries: u32,

    alerts: BTreeMap<AlertId, Alert>,
    score: Option<u32>,
    sub_scores: BTreeMap<String, u32>,
    text_info: Option<TextInfo>,
    status: Status,

    listeners: Vec<Listener>,
    notice_tx: mpsc::UnboundedSender<Notice>,
    notice_rx: Option<mpsc::UnboundedReceiver<Notice>>,
    disposed: bool,
}

impl CheckSession {
    /// Open a session for `text` and start connecting.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(text: &str, context: Arc<dyn SessionContext>, config: CheckConfig) -> Self {
        let scope = LogScope::new(&config.document_label);
        let transport = TransportSession::spawn(
            config.transport.clone(),
            Arc::clone(&context),
            scope.child("transport"),
        );
        let events = transport.take_event_rx();
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let session = Self {
            sync: RevisionSync::new(config.history_limit)
                .with_scope(scope.child("revisions").label()),
            config,
            scope,
            context,
            transport,
            events,
            acks_tx,
            acks_rx,
            session_id: Uuid::new_v4(),
            epoch: 0,
            text: Rope::from_str(text),
            version: 0,
            synced: false,
            submitted: None,
            auth_retries: 0,
            alerts: BTreeMap::new(),
            score: None,
            sub_scores: BTreeMap::new(),
            text_info: None,
            status: Status::Idle,
            listeners: Vec::new(),
            notice_tx,
            notice_rx: Some(notice_rx),
            disposed: false,
        };

        log::info!(
            "[{}] check session {} opened ({} chars)",
            session.scope,
            session.session_id,
            session.text.len_chars()
        );
        if let Err(e) = session.transport.connect() {
            log::warn!("[{}] initial connect failed: {e}", session.scope);
        }
        session
    }

    // ─── Host input ────────────────────────────────────────────────

    /// Apply host edits to the local text and submit them.
    ///
    /// Edits are positioned against the text before this call and must be
    /// sorted and non-overlapping.
    pub fn apply_edits(&mut self, edits: &[Edit]) -> Result<(), CheckError> {
        if self.disposed {
            return Err(CheckError::Disposed);
        }

        let delta = build_delta(edits)?;
        let doc_len = self.text.len_chars();
        if delta.base_len() > doc_len {
            return Err(DeltaError::OutOfBounds {
                needed: delta.base_len(),
                available: doc_len,
            }
            .into());
        }
        if delta.is_noop() {
            return Ok(());
        }

        let changes = Edit::to_text_changes(edits);
        for change in &changes {
            match change {
                TextChange::Insert { pos, text } => self.text.insert(*pos, text),
                TextChange::Delete { pos, length } => self.text.remove(*pos..*pos + *length),
            }
        }
        self.version += 1;

        for alert in self.alerts.values_mut() {
            alert.range = rebase_range(alert.range.clone(), &changes);
        }
        self.status = Status::Checking;

        if self.synced {
            let rev = self.sync.local_revision(self.version);
            // Bound to the socket that received the full text; a request
            // that outlives it fails instead of reaching the next socket.
            let handle = self.transport.dispatch_on(
                self.epoch,
                RequestBody::SubmitOt {
                    rev,
                    doc_len,
                    deltas: vec![delta],
                },
            );
            self.sync.record_edit(rev, changes);
            self.submitted = Some(rev);
            self.track(
                AckKind::Edit {
                    revision: rev,
                    epoch: self.epoch,
                },
                handle,
            );
            log::debug!("[{}] submitted revision {rev}", self.scope);
        } else if let Err(e) = self.transport.connect() {
            log::warn!("[{}] edit kept locally, cannot connect: {e}", self.scope);
            self.status = Status::Errored;
        }

        self.notify();
        Ok(())
    }

    /// Change a service-side analysis option.
    pub fn set_option(
        &mut self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), CheckError> {
        if self.disposed {
            return Err(CheckError::Disposed);
        }
        let name = name.into();
        let handle = self.transport.dispatch(
            RequestBody::Option {
                name: name.clone(),
                value,
            },
            false,
        );
        self.track(AckKind::Option(name), handle);
        Ok(())
    }

    /// Register a change listener. Panics inside it are contained.
    pub fn on_change(&mut self, listener: impl FnMut(&DocumentSnapshot) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Take the notice receiver. Returns `None` after the first call.
    pub fn take_notice_rx(&mut self) -> Option<mpsc::UnboundedReceiver<Notice>> {
        self.notice_rx.take()
    }

    // ─── Driving ───────────────────────────────────────────────────

    /// Wait for the next transport event or request outcome and apply it.
    ///
    /// Returns `false` once the session is disposed or the transport is gone.
    pub async fn process_next(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        let Some(events) = self.events.as_mut() else {
            return false;
        };

        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    self.on_event(event).await;
                    true
                }
                None => {
                    log::debug!("[{}] transport event stream ended", self.scope);
                    self.events = None;
                    false
                }
            },
            Some(ack) = self.acks_rx.recv() => {
                self.on_ack(ack);
                true
            }
        }
    }

    /// Tear down the transport. Later events and acks are ignored.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.transport.dispose();
        self.events = None;
        self.listeners.clear();
        log::info!("[{}] check session disposed", self.scope);
    }

    // ─── Read model ────────────────────────────────────────────────

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            alerts: self.alerts.clone(),
            score: self.score,
            sub_scores: self.sub_scores.clone(),
            text_info: self.text_info.clone(),
            status: self.status,
            revision: self.revision(),
        }
    }

    pub fn alert(&self, id: AlertId) -> Option<&Alert> {
        self.alerts.get(&id)
    }

    pub fn text(&self) -> String {
        self.text.to_string()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Local revision of the current text.
    pub fn revision(&self) -> Revision {
        self.sync.local_revision(self.version)
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn transport(&self) -> &TransportSession {
        &self.transport
    }

    // ─── Transport events ──────────────────────────────────────────

    async fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { epoch } => self.on_connected(epoch).await,
            TransportEvent::Ready => {
                log::info!("[{}] service ready", self.scope);
                self.auth_retries = 0;
            }
            TransportEvent::Push(push) => self.on_push(push),
            TransportEvent::Closed { code, reason } => self.on_closed(code, reason),
            TransportEvent::Errored(message) => {
                self.synced = false;
                self.status = Status::Errored;
                self.notice(Notice::Error {
                    code: None,
                    message,
                });
                self.notify();
            }
        }
    }

    /// Fresh socket: handshake, then the whole text as revision 0.
    async fn on_connected(&mut self, epoch: u64) {
        self.epoch = epoch;
        let document_context = match self.context.document_context().await {
            Ok(context) => context,
            Err(e) => {
                log::warn!("[{}] using default document context: {e}", self.scope);
                DocumentContext::default()
            }
        };

        let handshake = self.transport.dispatch_on(
            epoch,
            RequestBody::Start {
                client: self.config.client_name.clone(),
                client_version: self.config.client_version.clone(),
                session_id: self.session_id,
                dialect: self.config.dialect.clone(),
                document_context,
            },
        );
        self.track(AckKind::Handshake, handshake);

        let text = self.text.to_string();
        self.sync.reset(self.version);
        self.sync.record_edit(0, Vec::new());
        let full_text = self.transport.dispatch_on(
            epoch,
            RequestBody::SubmitOt {
                rev: 0,
                doc_len: 0,
                deltas: vec![Delta::from_text(&text)],
            },
        );
        self.track(AckKind::Edit { revision: 0, epoch }, full_text);

        self.submitted = Some(0);
        self.synced = true;
        self.alerts.clear();
        self.status = Status::Checking;
        log::info!(
            "[{}] full text submitted on socket {epoch} ({} chars, offset {})",
            self.scope,
            self.text.len_chars(),
            self.version
        );
        self.notify();
    }

    fn on_closed(&mut self, code: CloseCode, reason: String) {
        self.synced = false;
        if code == CloseCode::Unauthorized {
            self.refresh_credentials();
        } else if !code.is_recoverable() {
            log::warn!("[{}] disconnected for good: {code} {reason}", self.scope);
            self.status = Status::Errored;
            self.notice(Notice::Disconnected { code, reason });
        } else {
            log::debug!("[{}] will resync on next edit after close {code}", self.scope);
        }
        self.notify();
    }

    fn on_push(&mut self, push: Push) {
        match push {
            Push::Alert(payload) => self.on_alert(payload),
            Push::RemoveAlert { id } => {
                if self.alerts.remove(&id).is_none() {
                    log::debug!("[{}] remove for unknown alert {id}", self.scope);
                }
            }
            Push::Finished(finished) => self.on_finished(finished),
            Push::TextInfo(info) => self.text_info = Some(info),
            Push::Error(payload) => {
                self.on_service_error(payload.error, payload.message);
            }
        }
        self.notify();
    }

    fn on_alert(&mut self, payload: AlertPayload) {
        let (begin, end) = if payload.begin <= payload.end {
            (payload.begin, payload.end)
        } else {
            (payload.end, payload.begin)
        };
        let rebased = self.sync.rebase(begin..end, payload.rev);
        let len = self.text.len_chars();
        let start = rebased.start.min(len);
        let range = start..rebased.end.clamp(start, len);

        log::trace!(
            "[{}] alert {} {}..{}@{} -> {:?}",
            self.scope,
            payload.id,
            begin,
            end,
            payload.rev,
            range
        );
        self.alerts.insert(
            payload.id,
            Alert {
                id: payload.id,
                revision: payload.rev,
                range,
                category: payload.category,
                title: payload.title,
                explanation: payload.explanation,
                replacements: payload.replacements,
                hidden: payload.hidden,
                severity: payload.severity,
            },
        );
    }

    fn on_finished(&mut self, finished: FinishedPayload) {
        if finished.score.is_some() {
            self.score = finished.score;
        }
        self.sub_scores = finished.sub_scores;
        let caught_up = self.submitted.map_or(true, |last| finished.rev >= last);
        if caught_up && self.status == Status::Checking {
            self.status = Status::Idle;
        }
    }

    // ─── Request outcomes ──────────────────────────────────────────

    fn on_ack(&mut self, ack: Ack) {
        if self.disposed {
            return;
        }
        match (ack.kind, ack.result) {
            (AckKind::Handshake, Ok(Response::Started { sid })) => {
                log::debug!("[{}] handshake accepted (sid {sid:?})", self.scope);
            }
            (AckKind::Edit { revision, epoch }, Ok(Response::Submitted { rev })) => {
                if epoch != self.epoch || rev == revision {
                    log::trace!("[{}] revision {revision} acknowledged", self.scope);
                } else {
                    log::warn!(
                        "[{}] revision {revision} acknowledged as {rev}, resyncing",
                        self.scope
                    );
                    self.resync();
                }
            }
            (AckKind::Option(name), Ok(_)) => {
                log::debug!("[{}] option {name} applied", self.scope);
            }
            (kind, Ok(response)) => {
                log::warn!("[{}] unexpected reply to {kind:?}: {response:?}", self.scope);
            }
            (_, Err(TransportError::Protocol { code, message })) => {
                self.on_service_error(code, message);
                self.notify();
            }
            (AckKind::Edit { revision, epoch }, Err(TransportError::ConnectionClosed))
                if epoch == self.epoch =>
            {
                // The service may not have this edit; the next socket starts
                // over from the full text.
                log::debug!("[{}] revision {revision} lost with socket {epoch}", self.scope);
                self.synced = false;
                if let Err(e) = self.transport.connect() {
                    log::warn!("[{}] cannot reconnect: {e}", self.scope);
                }
            }
            (kind, Err(TransportError::ConnectionClosed | TransportError::Disposed)) => {
                log::debug!("[{}] {kind:?} abandoned", self.scope);
            }
            (kind, Err(e)) => {
                log::warn!("[{}] {kind:?} failed: {e}", self.scope);
                self.notice(Notice::Error {
                    code: None,
                    message: e.to_string(),
                });
            }
        }
    }

    fn on_service_error(&mut self, code: ErrorCode, message: Option<String>) {
        match code.kind() {
            ErrorKind::Unauthorized => self.refresh_credentials(),
            ErrorKind::Retryable => {
                log::warn!("[{}] service error {code}, resyncing", self.scope);
                self.resync();
            }
            ErrorKind::Fatal => {
                log::error!("[{}] service error {code}: {message:?}", self.scope);
                self.status = Status::Errored;
                self.notice(Notice::Error {
                    code: Some(code.clone()),
                    message: message.unwrap_or_else(|| code.to_string()),
                });
            }
        }
    }

    /// Drop the current socket; the next one resubmits the full text.
    fn resync(&mut self) {
        self.synced = false;
        if let Err(e) = self.transport.reconnect(false) {
            log::warn!("[{}] resync failed: {e}", self.scope);
        }
    }

    fn refresh_credentials(&mut self) {
        self.synced = false;
        if self.auth_retries >= MAX_AUTH_RETRIES {
            log::error!("[{}] credentials rejected {} times, giving up", self.scope, self.auth_retries);
            self.status = Status::Errored;
            self.notice(Notice::Error {
                code: Some(ErrorCode::new("not_authorized")),
                message: "credentials rejected".to_string(),
            });
            return;
        }
        self.auth_retries += 1;
        log::info!("[{}] credentials rejected, refreshing", self.scope);
        self.context.invalidate();
        if let Err(e) = self.transport.reconnect(true) {
            log::warn!("[{}] forced reconnect failed: {e}", self.scope);
        }
    }

    // ─── Plumbing ──────────────────────────────────────────────────

    /// Forward a response to the ack channel once it resolves.
    fn track(&self, kind: AckKind, handle: ResponseHandle) {
        let acks = self.acks_tx.clone();
        tokio::spawn(async move {
            let result = handle.await;
            let _ = acks.send(Ack { kind, result });
        });
    }

    fn notice(&self, notice: Notice) {
        let _ = self.notice_tx.send(notice);
    }

    fn notify(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for listener in &mut self.listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&snapshot))).is_err() {
                log::error!("[{}] change listener panicked", self.scope);
            }
        }
    }
}

impl Drop for CheckSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::context::StaticContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn offline_session(text: &str) -> CheckSession {
        let config = CheckConfig {
            document_label: "unit".into(),
            transport: TransportConfig::with_url("ws://127.0.0.1:9/check"),
            ..CheckConfig::default()
        };
        CheckSession::new(text, Arc::new(StaticContext::new("token")), config)
    }

    /// Pretend the full text was accepted as revision 0.
    fn mark_synced(session: &mut CheckSession) {
        session.sync.reset(session.version);
        session.sync.record_edit(0, Vec::new());
        session.submitted = Some(0);
        session.synced = true;
    }

    fn alert_push(id: AlertId, rev: Revision, begin: usize, end: usize) -> Push {
        Push::Alert(AlertPayload {
            id,
            rev,
            begin,
            end,
            category: "Spelling".into(),
            title: "Typo".into(),
            explanation: String::new(),
            replacements: vec!["fix".into()],
            hidden: false,
            severity: Severity::Critical,
        })
    }

    #[tokio::test]
    async fn test_apply_edits_updates_text() {
        let mut session = offline_session("hello");
        session.apply_edits(&[Edit::insert(5, " world")]).unwrap();
        assert_eq!(session.text(), "hello world");
        assert_eq!(session.status(), Status::Checking);
        session
            .apply_edits(&[Edit::delete(0, 1), Edit::replace(6, 5, "there")])
            .unwrap();
        assert_eq!(session.text(), "ello there");
    }

    #[tokio::test]
    async fn test_invalid_edits_leave_text_untouched() {
        let mut session = offline_session("abc");
        assert!(matches!(
            session.apply_edits(&[Edit::delete(2, 5)]),
            Err(CheckError::Delta(DeltaError::OutOfBounds { .. }))
        ));
        assert!(matches!(
            session.apply_edits(&[Edit::insert(2, "x"), Edit::insert(1, "y")]),
            Err(CheckError::Delta(DeltaError::UnorderedEdit { .. }))
        ));
        assert_eq!(session.text(), "abc");
        assert_eq!(session.status(), Status::Idle);
    }

    #[tokio::test]
    async fn test_alert_rebased_on_arrival() {
        let mut session = offline_session("hello");
        mark_synced(&mut session);
        session.apply_edits(&[Edit::insert(5, " world")]).unwrap();
        assert_eq!(session.revision(), 1);

        session.on_push(alert_push(1, 0, 0, 5));
        assert_eq!(session.alert(1).unwrap().range, 0..5);
        assert_eq!(session.alert(1).unwrap().revision, 0);
    }

    #[tokio::test]
    async fn test_alert_follows_later_edits() {
        let mut session = offline_session("hello");
        mark_synced(&mut session);
        session.apply_edits(&[Edit::insert(0, "X")]).unwrap();

        session.on_push(alert_push(7, 0, 3, 5));
        assert_eq!(session.alert(7).unwrap().range, 4..6);

        session.apply_edits(&[Edit::delete(0, 1)]).unwrap();
        assert_eq!(session.alert(7).unwrap().range, 3..5);
        assert_eq!(&session.text()[3..5], "lo");
    }

    #[tokio::test]
    async fn test_remove_and_hidden_alerts() {
        let mut session = offline_session("hello world");
        mark_synced(&mut session);
        session.on_push(alert_push(1, 0, 0, 5));
        session.on_push(Push::Alert(AlertPayload {
            hidden: true,
            ..match alert_push(2, 0, 6, 11) {
                Push::Alert(payload) => payload,
                _ => unreachable!(),
            }
        }));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.alerts.len(), 2);
        assert_eq!(snapshot.visible_alerts().count(), 1);

        session.on_push(Push::RemoveAlert { id: 1 });
        assert!(session.alert(1).is_none());
        assert!(session.alert(2).unwrap().hidden);
    }

    #[tokio::test]
    async fn test_finished_waits_for_latest_revision() {
        let mut session = offline_session("hello");
        mark_synced(&mut session);
        session.apply_edits(&[Edit::insert(5, "!")]).unwrap();
        session.apply_edits(&[Edit::insert(6, "!")]).unwrap();
        assert_eq!(session.submitted, Some(2));

        let finished = |rev, score| {
            Push::Finished(FinishedPayload {
                rev,
                score: Some(score),
                sub_scores: BTreeMap::from([("clarity".to_string(), score)]),
            })
        };
        session.on_push(finished(1, 70));
        assert_eq!(session.status(), Status::Checking);
        assert_eq!(session.snapshot().score, Some(70));

        session.on_push(finished(2, 85));
        assert_eq!(session.status(), Status::Idle);
        assert_eq!(session.snapshot().sub_scores.get("clarity"), Some(&85));
    }

    fn edit_ack(revision: Revision, epoch: u64, result: Result<Response, TransportError>) -> Ack {
        Ack {
            kind: AckKind::Edit { revision, epoch },
            result,
        }
    }

    #[tokio::test]
    async fn test_renumbered_revision_forces_resync() {
        let mut session = offline_session("hello");
        mark_synced(&mut session);

        session.on_ack(edit_ack(1, 0, Ok(Response::Submitted { rev: 1 })));
        assert!(session.is_synced());

        // An answer from an older socket says nothing about this numbering.
        session.on_ack(edit_ack(1, 7, Ok(Response::Submitted { rev: 4 })));
        assert!(session.is_synced());

        session.on_ack(edit_ack(1, 0, Ok(Response::Submitted { rev: 4 })));
        assert!(!session.is_synced());
    }

    #[tokio::test]
    async fn test_edit_lost_with_socket_drops_sync() {
        let mut session = offline_session("hello");
        mark_synced(&mut session);

        session.on_ack(edit_ack(2, 3, Err(TransportError::ConnectionClosed)));
        assert!(session.is_synced());

        session.on_ack(edit_ack(2, 0, Err(TransportError::ConnectionClosed)));
        assert!(!session.is_synced());
        assert_ne!(session.status(), Status::Errored);
    }

    #[tokio::test]
    async fn test_fatal_service_error_surfaces_notice() {
        let mut session = offline_session("hello");
        let mut notices = session.take_notice_rx().unwrap();
        assert!(session.take_notice_rx().is_none());

        session.on_push(Push::Error(crate::protocol::ErrorPayload {
            id: None,
            error: ErrorCode::new("invalid_payload"),
            message: Some("bad delta".into()),
        }));
        assert_eq!(session.status(), Status::Errored);
        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::Error {
                code: Some(ErrorCode::new("invalid_payload")),
                message: "bad delta".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_listener_panic_is_contained() {
        let mut session = offline_session("hello");
        let calls = Arc::new(AtomicUsize::new(0));
        session.on_change(|_| panic!("listener bug"));
        let seen = Arc::clone(&calls);
        session.on_change(move |snapshot| {
            assert_eq!(snapshot.status, Status::Checking);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        session.apply_edits(&[Edit::insert(0, ">")]).unwrap();
        session.apply_edits(&[Edit::insert(0, ">")]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let mut session = offline_session("hello");
        session.dispose();
        session.dispose();
        assert!(session.is_disposed());
        assert!(!session.process_next().await);
        assert_eq!(
            session.apply_edits(&[Edit::insert(0, "x")]),
            Err(CheckError::Disposed)
        );
        assert_eq!(
            session.set_option("dialect", serde_json::json!("british")),
            Err(CheckError::Disposed)
        );
    }
}
