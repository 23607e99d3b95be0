//! ============================================================================
//! Shared Types - Error taxonomy for the memory store
//! ============================================================================
//! Every fallible operation in the index, store, and service layers reports
//! one of these kinds. "Not found" is never an error: lookups return `None`
//! and deletes of unknown ids return `false`.
//! ============================================================================

use thiserror::Error;

/// Error types for the memory store
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Vector length disagrees with the store's fixed dimensionality
    #[error("Dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A zero-length vector was offered for insertion
    #[error("Cannot insert a zero-length vector")]
    EmptyVector,

    /// A slot outside `0..len` was addressed
    #[error("Slot {slot} out of range (index holds {len} vectors)")]
    SlotOutOfRange { slot: usize, len: usize },

    /// On-disk vector blob is inconsistent with its header
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// The embedding collaborator failed or is not configured
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The extraction collaborator failed or is not configured
    #[error("Extraction unavailable: {0}")]
    ExtractionUnavailable(String),

    /// Caller tried to set an attribute key the service owns
    #[error("Attribute key '{0}' is reserved")]
    ReservedAttribute(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for memory operations
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
