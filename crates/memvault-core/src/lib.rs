//! ============================================================================
//! MEMVAULT-CORE: File-backed semantic memory
//! ============================================================================
//! This crate holds everything below the caller-facing API surface:
//! - VectorIndex: dense unit vectors, cosine search, slot compaction
//! - MemoryStore: metadata records, two-file persistence, load-time repair
//! - MemoryService: embedding / extraction orchestration and defaults
//! ============================================================================

pub mod config;
pub mod memory;
pub mod types;

// Re-export main types for convenience
pub use config::{MemoryConfig, RecallDefaults};
pub use memory::*;
pub use types::{MemoryError, MemoryResult};
