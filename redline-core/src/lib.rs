//! # redline-core: edit model for revision-synchronized grammar checking
//!
//! Pure, synchronous building blocks shared by the client engine: how an
//! edit is described on the wire, and how ranges computed against an old
//! revision are carried forward onto the text the user sees now.
//!
//! ## Architecture
//!
//! ```text
//!  host edits (pos, text, deleted)
//!         │
//!         ├──────────────► build_delta() ──► Delta ──► wire (submit_ot)
//!         │
//!         └──────────────► text_changes() ─► Vec<TextChange>
//!                                                 │
//!                                                 ▼
//!                                        RevisionSync::record_edit(rev)
//!                                                 │
//!   alert { range @ rev R } ──► RevisionSync::rebase(range, R) ──► current range
//! ```
//!
//! ## Modules
//!
//! - [`delta`]: OT operations, delta builder and replay
//! - [`change`]: positional changes and range rebasing
//! - [`revision`]: bounded revision history

pub mod change;
pub mod delta;
pub mod revision;

pub use change::{apply_text_changes, rebase_range, text_changes, TextChange};
pub use delta::{apply_delta, apply_edits, build_delta, Delta, DeltaError, Edit, Operation};
pub use revision::{HistoryEntry, HistoryStats, Revision, RevisionSync, DEFAULT_HISTORY_LIMIT};
