//! Error types for the registry core.
//!
//! Mirrors the teacher crate's convention of one `thiserror` enum per failure
//! domain rather than a single catch-all: [`RegistryError`] covers caller
//! misuse of the object graph (kind mismatches, stale handles, corrupted
//! parent chains), while [`CacheError`] is scoped to the binary cache
//! reader/writer.

use crate::id::{EntityKind, Id};
use crate::ingest::IngestError;

/// Errors surfaced to callers of the object manager / handle layer.
///
/// Per `spec.md` §7, these indicate caller misuse (`KindMismatch`,
/// `StaleHandle`) or a corrupted parent chain (`OrphanConsistency`); they are
/// never produced by a normal add/remove cycle. `Ingest` surfaces a
/// malformed ingester value straight back to the bundle-lifecycle
/// collaborator, per §4.D's "Tie-breaks and edge cases".
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("id {id} is kind {found:?}, expected {expected:?}")]
    KindMismatch {
        id: Id,
        expected: EntityKind,
        found: EntityKind,
    },

    #[error("handle to id {id} ({kind:?}) no longer resolves; the object was removed")]
    StaleHandle { id: Id, kind: EntityKind },

    #[error("parent chain for id {id} did not reach an extension within the expected depth")]
    OrphanConsistency { id: Id },

    #[error("namespace rejected by ingest: {0}")]
    Ingest(#[from] IngestError),
}

/// Errors produced by the binary cache reader/writer (Component C).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache format error: {0}")]
    Format(String),

    #[error("cache stamp mismatch: expected {expected}, found {found}")]
    StampMismatch { expected: i64, found: i64 },
}
