//! ============================================================================
//! Memory Module - Local semantic memory for assistant applications
//! ============================================================================
//! Stores short text fragments as unit-length embedding vectors plus metadata
//! and answers nearest-neighbour queries by cosine similarity.
//!
//! ## Features
//! - Brute-force cosine search with threshold and category filtering
//! - Delete with shift-left slot compaction
//! - Crash-safe two-file persistence with trim-on-load repair
//! - LLM extraction of memories from conversation transcripts
//!
//! ## Architecture
//! ```text
//! remember(text) → Embedder → VectorIndex.insert + MemoryRecord → persist
//!
//! recall(query)  → Embedder → VectorIndex.search → slot → MemoryRecord
//!                                                      ↓
//!                                        threshold / category filter
//!
//! remember_from_conversation(turns) → Extractor → high/medium candidates
//!                                                      ↓
//!                                                  remember(...)
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use memvault_core::{MemoryConfig, MemoryService};
//!
//! let service = MemoryService::from_config(&MemoryConfig::from_env())?;
//!
//! // Store a memory
//! let id = service.remember("User prefers concise responses", Some("preference"), None, None).await?;
//!
//! // Search memories (configured limit and threshold)
//! let relevant = service.recall("how should I respond", None, None, None).await?;
//! ```
//! ============================================================================

mod embeddings;
mod extractor;
mod index;
mod service;
mod store;
mod types;

// Re-export public types
pub use embeddings::{create_embedding_service, Embedder, EmbeddingService, DEFAULT_EMBEDDING_MODEL};
pub use extractor::{create_extractor, Extractor, LlmExtractor, DEFAULT_EXTRACTION_MODEL};
pub use index::VectorIndex;
pub use service::{ExtractionTask, MemoryService};
pub use store::{MemoryStore, METADATA_FILE, VECTORS_FILE};
pub use types::{
    validate_attributes, Attributes, Confidence, ConversationTurn, MemoryCandidate, MemoryId,
    MemoryRecord, ScoredMemory, StoreStats, ATTR_CONFIDENCE, ATTR_EXTRACTED, CONVERSATION_SOURCE,
    DEFAULT_CATEGORY, DEFAULT_SOURCE, RESERVED_ATTRIBUTES,
};
