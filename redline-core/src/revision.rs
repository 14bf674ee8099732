//! Revision history and range rebasing.
//!
//! Bridges the two revision spaces of a check session: the *local* space
//! (every submitted edit gets the next number) and the revisions the remote
//! service reports alerts against. Each outgoing edit is recorded here, in
//! send order, before its acknowledgment arrives. When an alert computed
//! at revision R shows up, every change recorded after R is replayed over
//! its range.
//!
//! ```text
//!  history:  rev 0 ── rev 1 ── rev 2 ── rev 3
//!            (full)   Ins(5)   Del(2)   Ins(0)
//!                       │
//!   alert @ rev 1 ──────┘  rebase over [rev 2, rev 3] ──► current range
//! ```
//!
//! The history is bounded: once it grows past `history_limit` the oldest
//! entries are pruned. A response can only reference the handshake
//! revision or a revision recorded after its request was sent, so the
//! retained tail covers every request still in flight.

use std::collections::VecDeque;
use std::ops::Range;

use crate::change::{rebase_range, TextChange};

/// Revision number within one document session.
pub type Revision = u64;

/// Default number of history entries retained.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

/// One recorded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub revision: Revision,
    pub changes: Vec<TextChange>,
}

/// Statistics for a revision history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStats {
    /// Entries currently retained
    pub entries: usize,
    /// Total text changes across retained entries
    pub changes: usize,
    /// Oldest retained revision
    pub oldest: Option<Revision>,
    /// Newest recorded revision
    pub newest: Option<Revision>,
    /// Entries dropped by pruning since the last reset
    pub pruned: u64,
}

/// Tracks local revisions and rebases remote ranges onto current text.
#[derive(Debug, Clone)]
pub struct RevisionSync {
    /// Document version at which revision numbering started
    offset_version: u64,
    /// Append-only, ordered by revision
    history: VecDeque<HistoryEntry>,
    /// Prune threshold
    history_limit: usize,
    /// Entries dropped since the last reset
    pruned: u64,
    /// Prefix for log lines, usually the owning document's label
    scope: String,
}

impl Default for RevisionSync {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl RevisionSync {
    pub fn new(history_limit: usize) -> Self {
        Self {
            offset_version: 0,
            history: VecDeque::with_capacity(history_limit.min(1024)),
            history_limit: history_limit.max(1),
            pruned: 0,
            scope: "revisions".to_string(),
        }
    }

    /// Label this history's log lines with `scope`.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Start a new numbering at `offset_version`, dropping all history.
    ///
    /// Called when the whole document is resubmitted.
    pub fn reset(&mut self, offset_version: u64) {
        self.offset_version = offset_version;
        self.history.clear();
        self.pruned = 0;
    }

    pub fn offset_version(&self) -> u64 {
        self.offset_version
    }

    /// Local revision for a document edit counter value.
    pub fn local_revision(&self, version: u64) -> Revision {
        version.saturating_sub(self.offset_version)
    }

    /// Append the changes sent with `revision`.
    ///
    /// Must be called once per outgoing edit, in send order.
    pub fn record_edit(&mut self, revision: Revision, changes: Vec<TextChange>) {
        if let Some(last) = self.history.back() {
            if revision <= last.revision {
                log::warn!(
                    "[{}] revision {revision} recorded after {}; history out of order",
                    self.scope,
                    last.revision
                );
            }
        }
        self.history.push_back(HistoryEntry { revision, changes });
        if self.history.len() > self.history_limit {
            self.prune_history(self.history_limit);
        }
    }

    /// Flattened changes recorded after `revision` (or from it, when
    /// `inclusive`).
    ///
    /// An unknown revision yields no changes: it is treated as current.
    pub fn changes_since(&self, revision: Revision, inclusive: bool) -> Vec<TextChange> {
        let Some(idx) = self.history.iter().position(|e| e.revision == revision) else {
            return Vec::new();
        };
        let from = if inclusive { idx } else { idx + 1 };
        self.history
            .iter()
            .skip(from)
            .flat_map(|e| e.changes.iter().cloned())
            .collect()
    }

    /// Map a range computed at `revision` onto the current text.
    pub fn rebase(&self, range: Range<usize>, revision: Revision) -> Range<usize> {
        let changes = self.changes_since(revision, false);
        if changes.is_empty() {
            return range;
        }
        rebase_range(range, &changes)
    }

    /// Drop the oldest entries until at most `max_entries` remain.
    pub fn prune_history(&mut self, max_entries: usize) {
        let excess = self.history.len().saturating_sub(max_entries);
        if excess > 0 {
            self.history.drain(..excess);
            self.pruned += excess as u64;
            log::debug!("[{}] pruned {excess} history entries", self.scope);
        }
    }

    /// Newest recorded revision.
    pub fn latest(&self) -> Option<Revision> {
        self.history.back().map(|e| e.revision)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            entries: self.history.len(),
            changes: self.history.iter().map(|e| e.changes.len()).sum(),
            oldest: self.history.front().map(|e| e.revision),
            newest: self.latest(),
            pruned: self.pruned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_session() -> RevisionSync {
        let mut sync = RevisionSync::default();
        sync.record_edit(0, Vec::new());
        sync
    }

    #[test]
    fn test_insert_after_range_keeps_range() {
        let mut sync = hello_session();
        sync.record_edit(1, vec![TextChange::insert(5, " world")]);
        assert_eq!(sync.rebase(0..5, 0), 0..5);
    }

    #[test]
    fn test_insert_before_range_shifts_range() {
        let mut sync = hello_session();
        sync.record_edit(1, vec![TextChange::insert(0, "X")]);
        assert_eq!(sync.rebase(3..5, 0), 4..6);
    }

    #[test]
    fn test_rebase_at_latest_is_identity() {
        let mut sync = hello_session();
        sync.record_edit(1, vec![TextChange::insert(0, "X")]);
        assert_eq!(sync.rebase(3..5, 1), 3..5);
    }

    #[test]
    fn test_rebase_unknown_revision_is_identity() {
        let mut sync = hello_session();
        sync.record_edit(1, vec![TextChange::insert(0, "X")]);
        assert_eq!(sync.rebase(3..5, 42), 3..5);
        assert!(sync.changes_since(42, true).is_empty());
    }

    #[test]
    fn test_changes_since_exclusive_and_inclusive() {
        let mut sync = hello_session();
        sync.record_edit(1, vec![TextChange::insert(0, "a")]);
        sync.record_edit(2, vec![TextChange::delete(1, 1), TextChange::insert(1, "b")]);

        assert_eq!(sync.changes_since(1, false).len(), 2);
        assert_eq!(sync.changes_since(1, true).len(), 3);
        assert_eq!(
            sync.changes_since(0, false),
            vec![
                TextChange::insert(0, "a"),
                TextChange::delete(1, 1),
                TextChange::insert(1, "b"),
            ]
        );
    }

    #[test]
    fn test_rebase_across_multiple_revisions() {
        let mut sync = hello_session();
        sync.record_edit(1, vec![TextChange::insert(0, "X")]);
        sync.record_edit(2, vec![TextChange::delete(1, 2)]);
        assert_eq!(sync.rebase(3..5, 0), 2..4);
        assert_eq!(sync.rebase(3..5, 1), 1..3);
    }

    #[test]
    fn test_local_revision_uses_offset() {
        let mut sync = RevisionSync::default();
        sync.reset(7);
        assert_eq!(sync.offset_version(), 7);
        assert_eq!(sync.local_revision(7), 0);
        assert_eq!(sync.local_revision(10), 3);
        assert_eq!(sync.local_revision(3), 0);
    }

    #[test]
    fn test_auto_prune_keeps_tail() {
        let mut sync = RevisionSync::new(3);
        for rev in 0..6 {
            sync.record_edit(rev, vec![TextChange::insert(0, "x")]);
        }
        assert_eq!(sync.len(), 3);
        let stats = sync.stats();
        assert_eq!(stats.oldest, Some(3));
        assert_eq!(stats.newest, Some(5));
        assert_eq!(stats.pruned, 3);
        // Pruned revisions read as current.
        assert_eq!(sync.rebase(0..1, 1), 0..1);
        assert_eq!(sync.rebase(1..2, 3), 3..4);
    }

    #[test]
    fn test_prune_history_explicit() {
        let mut sync = hello_session();
        for rev in 1..=4 {
            sync.record_edit(rev, Vec::new());
        }
        sync.prune_history(2);
        let revs: Vec<_> = sync.entries().map(|e| e.revision).collect();
        assert_eq!(revs, vec![3, 4]);
        sync.prune_history(10);
        assert_eq!(sync.len(), 2);
    }

    #[test]
    fn test_scope_survives_reset() {
        let mut sync = RevisionSync::new(4).with_scope("essay.txt/revisions");
        assert_eq!(sync.scope(), "essay.txt/revisions");
        sync.record_edit(0, Vec::new());
        sync.reset(3);
        assert_eq!(sync.scope(), "essay.txt/revisions");
        assert_eq!(RevisionSync::default().scope(), "revisions");
    }

    #[test]
    fn test_reset_clears_history() {
        let mut sync = hello_session();
        sync.record_edit(1, vec![TextChange::insert(0, "X")]);
        sync.reset(12);
        assert!(sync.is_empty());
        assert_eq!(sync.latest(), None);
        assert_eq!(sync.stats(), HistoryStats::default());
    }
}
