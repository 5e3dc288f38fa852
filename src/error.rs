use thiserror::Error;

use crate::persistence::redb_store::StoreError;

/// Crate-wide error taxonomy.
///
/// Anything that could compromise determinism or allow a duplicate side
/// effect is fatal at the boundary where it is detected. None of these are
/// downgraded to warnings and retried; the only retryable operations in the
/// core are idempotent reads.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Non-finite or non-representable value reached the canonical codec.
    #[error("encoding error at '{path}': {reason}")]
    Encoding { path: String, reason: String },

    /// Missing/invalid intent, config, or protective-exit flag.
    #[error("validation error: {0}")]
    Validation(String),

    /// Idempotency key already in flight / completed / failed.
    /// Surfaced by the engine as an `action=duplicate` decision, not as a
    /// hard failure to the caller.
    #[error("duplicate submission for idempotency key '{0}'")]
    Duplicate(String),

    /// Malformed log line, hash mismatch, or broken snapshot.
    /// Reported with location context, never auto-repaired.
    #[error("corruption at {location}: {reason}")]
    Corruption { location: String, reason: String },

    /// Strict replay found recorded and recomputed payloads diverging.
    #[error("replay mismatch: {field_count} field(s) differ")]
    ReplayMismatch { field_count: usize },

    /// Replay prerequisite missing (e.g. risk_mode=computed without
    /// risk_inputs or risk config). Distinct from a mismatch.
    #[error("replay error: {0}")]
    Replay(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Stable machine-readable code for operators and logs.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Encoding { .. } => "ENCODING_ERROR",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::Duplicate(_) => "DUPLICATE_ERROR",
            CoreError::Corruption { .. } => "CORRUPTION_ERROR",
            CoreError::ReplayMismatch { .. } => "REPLAY_MISMATCH",
            CoreError::Replay(_) => "REPLAY_ERROR",
            CoreError::Store(_) => "STORE_ERROR",
            CoreError::Io(_) => "IO_ERROR",
        }
    }

    pub fn corruption(location: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Corruption {
            location: location.into(),
            reason: reason.into(),
        }
    }
}
