//! ============================================================================
//! Memory Extractor - LLM-backed selection of facts worth remembering
//! ============================================================================
//! Sends a conversation transcript to an OpenAI-compatible chat completions
//! endpoint and parses back a list of `{text, category, confidence}`
//! candidates. The service decides which candidates get stored.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::embeddings::{OPENAI_BASE_URL, XAI_BASE_URL};
use super::types::{Confidence, ConversationTurn, MemoryCandidate, DEFAULT_CATEGORY};
use crate::types::{MemoryError, MemoryResult};

/// Default model for extraction
pub const DEFAULT_EXTRACTION_MODEL: &str = "grok-3-mini";

/// Model used when falling back to OpenAI
pub const OPENAI_EXTRACTION_MODEL: &str = "gpt-4o-mini";

/// Proposes memory candidates from a conversation
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fails with `ExtractionUnavailable` on network, API, or format error
    async fn extract(
        &self,
        messages: &[ConversationTurn],
        max_candidates: usize,
    ) -> MemoryResult<Vec<MemoryCandidate>>;
}

/// Extractor backed by a chat completions API
pub struct LlmExtractor {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmExtractor {
    pub fn new_xai(api_key: String) -> Self {
        Self::new_custom(api_key, XAI_BASE_URL.to_string(), DEFAULT_EXTRACTION_MODEL.to_string())
    }

    pub fn new_openai(api_key: String) -> Self {
        Self::new_custom(
            api_key,
            OPENAI_BASE_URL.to_string(),
            OPENAI_EXTRACTION_MODEL.to_string(),
        )
    }

    pub fn new_custom(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call_api(&self, prompt: &str) -> Result<String> {
        debug!("Calling extraction API with {} chars", prompt.len());

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: Some(0.1),
            max_tokens: Some(1024),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to call extraction API: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Extraction API error {}: {}", status, body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse API response: {}", e))?;

        chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("No response from API"))
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        messages: &[ConversationTurn],
        max_candidates: usize,
    ) -> MemoryResult<Vec<MemoryCandidate>> {
        if messages.is_empty() || max_candidates == 0 {
            return Ok(Vec::new());
        }

        let prompt = build_prompt(messages, max_candidates);
        let response = self
            .call_api(&prompt)
            .await
            .map_err(|e| MemoryError::ExtractionUnavailable(e.to_string()))?;

        parse_candidates(&response, max_candidates)
            .map_err(|e| MemoryError::ExtractionUnavailable(e.to_string()))
    }
}

/// Create an extractor, trying x.ai first, then OpenAI. `None` if no key is set.
pub fn create_extractor(
    xai_api_key: Option<String>,
    openai_api_key: Option<String>,
) -> Option<LlmExtractor> {
    if let Some(key) = xai_api_key.filter(|k| !k.is_empty()) {
        debug!("Using x.ai for memory extraction");
        return Some(LlmExtractor::new_xai(key));
    }
    if let Some(key) = openai_api_key.filter(|k| !k.is_empty()) {
        warn!("x.ai API key not available, falling back to OpenAI for extraction");
        return Some(LlmExtractor::new_openai(key));
    }
    None
}

const INSTRUCTION: &str = r#"You extract long-term memories about the user from a conversation.

Return a JSON array. Each element is an object:
{"text": "...", "category": "...", "confidence": "high|medium|low"}

Rules:
- `text` is a short, self-contained statement (e.g. "User likes green tea")
- `category` is one of: preference, fact, goal, event, relationship, general
- `confidence` is "high" if the user stated it explicitly, "medium" if strongly implied, "low" if guessed
- Skip small talk and anything only relevant to this conversation
- If nothing is worth remembering, return []"#;

/// Format a transcript into an extraction prompt
fn build_prompt(messages: &[ConversationTurn], max_candidates: usize) -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str(INSTRUCTION);
    prompt.push_str(&format!(
        "\n- Return at most {} items\n\nConversation:\n\n",
        max_candidates
    ));
    for turn in messages {
        prompt.push_str(&format!("[{}]: {}\n", turn.role, turn.content));
    }
    prompt.push_str("\nRespond with ONLY the JSON array. No markdown, no explanation.\n");
    prompt
}

#[derive(Deserialize)]
struct RawCandidate {
    text: String,
    #[serde(default)]
    category: Option<String>,
    confidence: String,
}

/// Parse the model's reply; malformed entries are skipped, not fatal
fn parse_candidates(response: &str, max_candidates: usize) -> Result<Vec<MemoryCandidate>> {
    let json = strip_code_fence(response);
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| anyhow!("Extractor returned invalid JSON: {}", e))?;

    // Some models wrap the array in an object
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("memories") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Err(anyhow!("Extractor response has no candidate array")),
        },
        _ => return Err(anyhow!("Extractor response is not a JSON array")),
    };

    let mut candidates = Vec::new();
    for item in items {
        let raw: RawCandidate = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping malformed extraction candidate: {}", e);
                continue;
            }
        };
        let text = raw.text.trim();
        if text.is_empty() {
            continue;
        }
        let confidence: Confidence = match raw.confidence.parse() {
            Ok(c) => c,
            Err(e) => {
                warn!("Skipping extraction candidate: {}", e);
                continue;
            }
        };
        let category = raw
            .category
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        candidates.push(MemoryCandidate::new(text, category, confidence));
        if candidates.len() == max_candidates {
            break;
        }
    }
    Ok(candidates)
}

/// Return the contents of a fenced code block, or the trimmed input
fn strip_code_fence(response: &str) -> &str {
    if let Some(start) = response.find("```") {
        let after_start = &response[start + 3..];
        let content_start = after_start.find('\n').map(|i| i + 1).unwrap_or(0);
        let content = &after_start[content_start..];
        if let Some(end) = content.find("```") {
            return content[..end].trim();
        }
    }
    response.trim()
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
