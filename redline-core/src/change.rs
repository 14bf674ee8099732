//! Positional text changes and range rebasing.
//!
//! A [`TextChange`] is the stripped-down twin of a delta: only a position
//! and a length delta, which is all rebasing needs. Changes in a list are
//! *sequential*: each one is positioned against the output of the previous.
//!
//! ```text
//!  range at rev R:          [3, 5)
//!  Insert{0, "X"}  ──►      [4, 6)
//!  Delete{1, 2}    ──►      [2, 4)
//! ```
//!
//! Boundary rules for an insertion at `p`:
//! - an endpoint strictly after `p` moves right;
//! - an endpoint exactly at `p` stays, so typing at the start of a range
//!   grows it, typing at its end does not, and a zero-width point keeps
//!   its place in front of the new text.
//!
//! Both endpoints use the same strict comparison. Moving `start` on an
//! insert at exactly `p` while `end` stays would turn an empty range at `p`
//! into `p + len..p`, so the "start shifts at `p`" reading is not used.
//!
//! For a deletion of `[p, p + len)`, endpoints inside the hole collapse
//! to `p` and endpoints after it move left by `len`.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::delta::Edit;

/// A single positional edit used for rebasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TextChange {
    Insert { pos: usize, text: String },
    Delete { pos: usize, length: usize },
}

impl TextChange {
    pub fn insert(pos: usize, text: impl Into<String>) -> Self {
        TextChange::Insert {
            pos,
            text: text.into(),
        }
    }

    pub fn delete(pos: usize, length: usize) -> Self {
        TextChange::Delete { pos, length }
    }

    pub fn pos(&self) -> usize {
        match self {
            TextChange::Insert { pos, .. } | TextChange::Delete { pos, .. } => *pos,
        }
    }

    /// Number of chars inserted or removed.
    pub fn len(&self) -> usize {
        match self {
            TextChange::Insert { text, .. } => text.chars().count(),
            TextChange::Delete { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a single range across this change.
    pub fn rebase(&self, range: Range<usize>) -> Range<usize> {
        match self {
            TextChange::Insert { pos, .. } => {
                let len = self.len();
                let shift = |x: usize| if x > *pos { x + len } else { x };
                shift(range.start)..shift(range.end)
            }
            TextChange::Delete { pos, length } => {
                let end_of_hole = pos + length;
                let shift = |x: usize| {
                    if x >= end_of_hole {
                        x - length
                    } else if x > *pos {
                        *pos
                    } else {
                        x
                    }
                };
                shift(range.start)..shift(range.end)
            }
        }
    }
}

/// Sequential text changes for a batch of host edits.
///
/// Edit positions are against the pre-batch text; each produced change is
/// shifted by the net length change of the edits before it. Within one edit
/// the delete comes before the insert.
pub fn text_changes(edits: &[Edit]) -> Vec<TextChange> {
    let mut changes = Vec::with_capacity(edits.len() * 2);
    let mut shift: isize = 0;

    for edit in edits.iter().filter(|e| !e.is_noop()) {
        let pos = (edit.position as isize + shift).max(0) as usize;
        if edit.deleted > 0 {
            changes.push(TextChange::delete(pos, edit.deleted));
        }
        if !edit.inserted.is_empty() {
            changes.push(TextChange::insert(pos, edit.inserted.clone()));
        }
        shift += edit.len_delta();
    }

    changes
}

/// Apply sequential changes to `text`. Out-of-range positions are clamped.
pub fn apply_text_changes(text: &str, changes: &[TextChange]) -> String {
    let mut out = text.to_string();
    for change in changes {
        match change {
            TextChange::Insert { pos, text } => {
                let at = byte_offset(&out, *pos);
                out.insert_str(at, text);
            }
            TextChange::Delete { pos, length } => {
                let start = byte_offset(&out, *pos);
                let end = byte_offset(&out, pos + length);
                out.replace_range(start..end, "");
            }
        }
    }
    out
}

/// Rebase `range` across every change in order.
pub fn rebase_range(range: Range<usize>, changes: &[TextChange]) -> Range<usize> {
    changes.iter().fold(range, |acc, change| change.rebase(acc))
}

/// Byte index of the `char_pos`-th char, or `s.len()` past the end.
fn byte_offset(s: &str, char_pos: usize) -> usize {
    s.char_indices()
        .nth(char_pos)
        .map_or(s.len(), |(idx, _)| idx)
}
