//! ============================================================================
//! Configuration - Store location, recall defaults, collaborator keys
//! ============================================================================
//! Defaults can be overridden from the environment (a `.env` file is loaded
//! by the binary before this runs). Default store path: ~/.memvault
//! (override via MEMVAULT_DIR env var).
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Directory name under the home directory holding the default store
const DEFAULT_DIR_NAME: &str = ".memvault";

pub const DEFAULT_RECALL_LIMIT: usize = 5;
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.3;

/// Values applied when a caller omits recall parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecallDefaults {
    pub limit: usize,
    pub min_similarity: f32,
}

impl Default for RecallDefaults {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RECALL_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding vectors.bin and memories.json
    pub data_dir: PathBuf,
    pub default_limit: usize,
    pub default_min_similarity: f32,
    /// Embedding model override; the client default is used when unset
    pub embedding_model: Option<String>,
    /// Extraction model override; the client default is used when unset
    pub extraction_model: Option<String>,
    #[serde(skip_serializing)]
    pub xai_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_limit: DEFAULT_RECALL_LIMIT,
            default_min_similarity: DEFAULT_MIN_SIMILARITY,
            embedding_model: None,
            extraction_model: None,
            xai_api_key: None,
            openai_api_key: None,
        }
    }
}

impl MemoryConfig {
    /// Defaults overridden by process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("MEMVAULT_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(limit) = parse_var(&get, "MEMVAULT_RECALL_LIMIT") {
            config.default_limit = limit;
        }
        if let Some(min) = parse_var::<f32>(&get, "MEMVAULT_MIN_SIMILARITY") {
            if min.is_finite() {
                config.default_min_similarity = min;
            } else {
                warn!("Ignoring non-finite MEMVAULT_MIN_SIMILARITY={}", min);
            }
        }
        config.embedding_model = get("MEMVAULT_EMBEDDING_MODEL");
        config.extraction_model = get("MEMVAULT_EXTRACTION_MODEL");
        config.xai_api_key = get("XAI_API_KEY");
        config.openai_api_key = get("OPENAI_API_KEY");

        config
    }

    /// Use an explicit store directory (wins over env and default)
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn recall_defaults(&self) -> RecallDefaults {
        RecallDefaults {
            limit: self.default_limit,
            min_similarity: self.default_min_similarity,
        }
    }
}

/// ~/.memvault, or ./.memvault if the home directory is unknown
pub fn default_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(DEFAULT_DIR_NAME),
        None => {
            warn!("Cannot determine home directory, using ./{}", DEFAULT_DIR_NAME);
            PathBuf::from(DEFAULT_DIR_NAME)
        }
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable {}={}", key, raw);
            None
        }
    }
}
