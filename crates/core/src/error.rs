//! Error types for the Qalam domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Qalam operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Instruction errors ---
    #[error("Instruction error: {0}")]
    Instruction(#[from] InstructionError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Extraction errors ---
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error means "the thing you asked for is not there".
    ///
    /// The outer API layer maps this to a "session not found" signal.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Session(SessionError::NotFound(_))
                | Error::Instruction(InstructionError::NotFound(_))
        )
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Missing, deleted, or expired (even if not yet swept).
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid session input: {0}")]
    Validation(String),

    #[error("Session capacity exceeded (max_sessions = {max_sessions})")]
    CapacityExceeded { max_sessions: usize },
}

#[derive(Debug, Error)]
pub enum InstructionError {
    #[error("Instruction not found: {0}")]
    NotFound(String),

    #[error("Invalid instruction input: {0}")]
    Validation(String),

    #[error("Instruction snapshot could not be persisted: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Failures of the asynchronous instruction-extraction path.
///
/// Never surfaced past the orchestrator: these are logged and dropped.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("Extraction timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Extractor failed: {0}")]
    Failed(String),

    #[error("Extractor returned an unknown category: {0}")]
    InvalidCategory(String),
}
