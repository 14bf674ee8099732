//! Operational-transform deltas for plain-text edits.
//!
//! A [`Delta`] is an ordered list of retain/insert/delete operations that
//! transforms one version of a document into the next. Operations are
//! applied left-to-right against a cursor into the *source* text; anything
//! after the last operation is implicitly retained.
//!
//! ```text
//!  base:   h e l l o ␣ w o r l d
//!          ├───5───┤ ├1┤
//!  delta:  Retain(5) Delete(1) Insert(", ")
//!  result: h e l l o , ␣ w o r l d
//! ```
//!
//! ## Conventions
//!
//! - All lengths and positions count Unicode scalar values (`char`s).
//! - Delete-before-insert: when an edit both removes and adds text at the
//!   same offset, the delete is emitted first. Delete offsets are against
//!   the pre-edit text; the insert lands at the resulting cursor.
//! - Adjacent operations of the same kind are coalesced and zero-length
//!   operations are never emitted.
//!
//! Reference: Ellis & Gibbs: Concurrency Control in Groupware Systems (1989)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or replaying deltas.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    /// Edits must be sorted by position and must not overlap.
    #[error("edit at {position} overlaps or precedes previous edit ending at {previous_end}")]
    UnorderedEdit { position: usize, previous_end: usize },
    /// A retain or delete ran past the end of the source text.
    #[error("operation needs {needed} chars but only {available} remain")]
    OutOfBounds { needed: usize, available: usize },
}

/// A single OT operation.
///
/// Serialized as `{"retain": n}`, `{"insert": "text"}` or `{"delete": n}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Retain(usize),
    Insert(String),
    Delete(usize),
}

impl Operation {
    /// Number of source chars consumed by this operation.
    pub fn base_len(&self) -> usize {
        match self {
            Operation::Retain(n) | Operation::Delete(n) => *n,
            Operation::Insert(_) => 0,
        }
    }
}

/// One host-editor change: `(position, inserted_text, deleted_length)`.
///
/// `position` is measured against the text *before* any edit in the same
/// batch is applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Edit {
    pub position: usize,
    pub inserted: String,
    pub deleted: usize,
}

impl Edit {
    pub fn insert(position: usize, text: impl Into<String>) -> Self {
        Self {
            position,
            inserted: text.into(),
            deleted: 0,
        }
    }

    pub fn delete(position: usize, length: usize) -> Self {
        Self {
            position,
            inserted: String::new(),
            deleted: length,
        }
    }

    pub fn replace(position: usize, length: usize, text: impl Into<String>) -> Self {
        Self {
            position,
            inserted: text.into(),
            deleted: length,
        }
    }

    /// An edit that neither inserts nor deletes anything.
    pub fn is_noop(&self) -> bool {
        self.deleted == 0 && self.inserted.is_empty()
    }

    /// Length change this edit causes, in chars.
    pub fn len_delta(&self) -> isize {
        self.inserted.chars().count() as isize - self.deleted as isize
    }

    /// Sequential text changes for a sorted batch of edits.
    pub fn to_text_changes(edits: &[Edit]) -> Vec<crate::change::TextChange> {
        crate::change::text_changes(edits)
    }
}

/// An OT delta: ordered, coalesced list of [`Operation`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    ops: Vec<Operation>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta that inserts `text` into an empty document.
    ///
    /// Used for the initial full-document submission.
    pub fn from_text(text: &str) -> Self {
        let mut delta = Self::new();
        delta.insert(text);
        delta
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Operation> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True when applying this delta cannot change any text.
    pub fn is_noop(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, Operation::Retain(_)))
    }

    /// Minimum source length this delta can be applied to.
    pub fn base_len(&self) -> usize {
        self.ops.iter().map(Operation::base_len).sum()
    }

    /// Length of the result when applied to a source of `base_len` chars.
    pub fn target_len(&self, base_len: usize) -> usize {
        let mut len = base_len;
        for op in &self.ops {
            match op {
                Operation::Retain(_) => {}
                Operation::Insert(text) => len += text.chars().count(),
                Operation::Delete(n) => len = len.saturating_sub(*n),
            }
        }
        len
    }

    pub fn retain(&mut self, n: usize) -> &mut Self {
        if n > 0 {
            self.push(Operation::Retain(n));
        }
        self
    }

    pub fn insert(&mut self, text: &str) -> &mut Self {
        if !text.is_empty() {
            self.push(Operation::Insert(text.to_string()));
        }
        self
    }

    pub fn delete(&mut self, n: usize) -> &mut Self {
        if n > 0 {
            self.push(Operation::Delete(n));
        }
        self
    }

    /// Append an operation, coalescing with the tail and keeping deletes
    /// ahead of inserts at the same cursor.
    fn push(&mut self, op: Operation) {
        if let Operation::Delete(n) = op {
            let len = self.ops.len();
            if matches!(self.ops.last(), Some(Operation::Insert(_))) {
                // Slide the delete in front of the trailing insert, merging
                // with an earlier delete if there is one.
                if len >= 2 {
                    if let Operation::Delete(prev) = &mut self.ops[len - 2] {
                        *prev += n;
                        return;
                    }
                }
                self.ops.insert(len - 1, Operation::Delete(n));
                return;
            }
        }

        if let Some(last) = self.ops.last_mut() {
            match (last, &op) {
                (Operation::Retain(prev), Operation::Retain(n))
                | (Operation::Delete(prev), Operation::Delete(n)) => {
                    *prev += n;
                    return;
                }
                (Operation::Insert(prev), Operation::Insert(text)) => {
                    prev.push_str(text);
                    return;
                }
                _ => {}
            }
        }
        self.ops.push(op);
    }

    /// Drop a trailing retain, which is implied.
    pub fn chop(&mut self) -> &mut Self {
        if matches!(self.ops.last(), Some(Operation::Retain(_))) {
            self.ops.pop();
        }
        self
    }
}

/// Build a delta from host edits against a fixed base text.
///
/// Edits must be sorted by position and non-overlapping. No-op edits are
/// elided; the result never starts with (or contains) a zero-length retain.
pub fn build_delta(edits: &[Edit]) -> Result<Delta, DeltaError> {
    let mut delta = Delta::new();
    let mut cursor = 0usize;

    for edit in edits {
        if edit.position < cursor {
            return Err(DeltaError::UnorderedEdit {
                position: edit.position,
                previous_end: cursor,
            });
        }
        if edit.is_noop() {
            continue;
        }
        delta.retain(edit.position - cursor);
        delta.delete(edit.deleted);
        delta.insert(&edit.inserted);
        cursor = edit.position + edit.deleted;
    }

    Ok(delta)
}

/// Replay a delta against `text`.
pub fn apply_delta(text: &str, delta: &Delta) -> Result<String, DeltaError> {
    let mut out = String::with_capacity(text.len());
    let mut source = text.chars();
    let mut remaining = text.chars().count();

    for op in delta.ops() {
        match op {
            Operation::Retain(n) => {
                if *n > remaining {
                    return Err(DeltaError::OutOfBounds {
                        needed: *n,
                        available: remaining,
                    });
                }
                out.extend(source.by_ref().take(*n));
                remaining -= n;
            }
            Operation::Delete(n) => {
                if *n > remaining {
                    return Err(DeltaError::OutOfBounds {
                        needed: *n,
                        available: remaining,
                    });
                }
                source.by_ref().take(*n).for_each(drop);
                remaining -= n;
            }
            Operation::Insert(s) => out.push_str(s),
        }
    }

    out.extend(source);
    Ok(out)
}

/// Apply host edits directly (reference implementation for delta replay).
pub fn apply_edits(text: &str, edits: &[Edit]) -> Result<String, DeltaError> {
    let delta = build_delta(edits)?;
    if delta.base_len() > text.chars().count() {
        return Err(DeltaError::OutOfBounds {
            needed: delta.base_len(),
            available: text.chars().count(),
        });
    }
    let changes = Edit::to_text_changes(edits);
    Ok(crate::change::apply_text_changes(text, &changes))
}
