//! ============================================================================
//! Memory Service - Orchestrates embedding, storage, recall and extraction
//! ============================================================================
//! The caller-facing API. Collaborator calls (embed, extract) are awaited
//! before the store's write lock is taken, so a slow or failed network call
//! never blocks readers or leaves a half-applied mutation.
//! ============================================================================

use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::embeddings::{create_embedding_service, Embedder};
use super::extractor::{create_extractor, Extractor};
use super::store::MemoryStore;
use super::types::{
    validate_attributes, Attributes, ConversationTurn, MemoryId, MemoryRecord, ScoredMemory,
    StoreStats, ATTR_CONFIDENCE, ATTR_EXTRACTED, CONVERSATION_SOURCE,
};
use crate::config::{MemoryConfig, RecallDefaults};
use crate::types::{MemoryError, MemoryResult};

/// Memory service combining store, embedder and optional extractor
pub struct MemoryService {
    store: RwLock<MemoryStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Option<Arc<dyn Extractor>>,
    defaults: RecallDefaults,
}

impl MemoryService {
    /// Create a service over an opened store
    pub fn new(
        store: MemoryStore,
        embedder: Arc<dyn Embedder>,
        extractor: Option<Arc<dyn Extractor>>,
    ) -> Self {
        Self {
            store: RwLock::new(store),
            embedder,
            extractor,
            defaults: RecallDefaults::default(),
        }
    }

    /// Replace the defaults applied to omitted recall parameters
    pub fn with_defaults(mut self, defaults: RecallDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Open the configured store and build HTTP collaborators from config
    pub fn from_config(config: &MemoryConfig) -> MemoryResult<Self> {
        let store = MemoryStore::open(&config.data_dir)?;

        let mut embeddings =
            create_embedding_service(config.xai_api_key.clone(), config.openai_api_key.clone())
                .map_err(|e| MemoryError::EmbeddingUnavailable(e.to_string()))?;
        if let Some(model) = &config.embedding_model {
            embeddings = embeddings.with_model(model);
        }

        let extractor: Option<Arc<dyn Extractor>> =
            match create_extractor(config.xai_api_key.clone(), config.openai_api_key.clone()) {
                Some(extractor) => {
                    let extractor = match &config.extraction_model {
                        Some(model) => extractor.with_model(model),
                        None => extractor,
                    };
                    Some(Arc::new(extractor) as Arc<dyn Extractor>)
                }
                None => {
                    warn!("No extraction backend configured - conversation extraction disabled");
                    None
                }
            };

        Ok(Self::new(store, Arc::new(embeddings), extractor).with_defaults(config.recall_defaults()))
    }

    pub fn defaults(&self) -> RecallDefaults {
        self.defaults
    }

    pub fn has_extractor(&self) -> bool {
        self.extractor.is_some()
    }

    /// Embed `text` and store it as a new memory
    pub async fn remember(
        &self,
        text: &str,
        category: Option<&str>,
        source: Option<&str>,
        attributes: Option<Attributes>,
    ) -> MemoryResult<MemoryId> {
        if let Some(attrs) = &attributes {
            validate_attributes(attrs)?;
        }
        self.embed_and_store(text, category, source, attributes).await
    }

    /// Rank stored memories against `query`.
    ///
    /// `None` for `limit` / `min_similarity` means "use the configured
    /// default"; `Some(0.0)` is honoured as an explicit threshold.
    pub async fn recall(
        &self,
        query: &str,
        limit: Option<usize>,
        min_similarity: Option<f32>,
        category: Option<&str>,
    ) -> MemoryResult<Vec<ScoredMemory>> {
        let limit = limit.unwrap_or(self.defaults.limit);
        let min_similarity = min_similarity.unwrap_or(self.defaults.min_similarity);

        if limit == 0 || self.store.read().await.count() == 0 {
            return Ok(Vec::new());
        }

        debug!("Recalling memories for query: {}", query);
        let query_vector = self.embed(query).await?;

        let store = self.store.read().await;
        store.search(&query_vector, limit, min_similarity, category)
    }

    /// Extract candidates from a transcript and store the confident ones.
    ///
    /// Extractor failures and per-candidate embedding failures are logged
    /// and dropped; the returned ids are the memories actually stored.
    pub async fn remember_from_conversation(
        &self,
        messages: &[ConversationTurn],
        max_candidates: usize,
    ) -> Vec<MemoryId> {
        let Some(extractor) = &self.extractor else {
            debug!("No extractor configured, skipping conversation extraction");
            return Vec::new();
        };
        if messages.is_empty() || max_candidates == 0 {
            return Vec::new();
        }

        let candidates = match extractor.extract(messages, max_candidates).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Memory extraction failed: {}", e);
                return Vec::new();
            }
        };

        let mut stored = Vec::new();
        for candidate in candidates.into_iter().take(max_candidates) {
            if !candidate.confidence.is_persistable() {
                debug!(
                    "Dropping {}-confidence candidate: {}",
                    candidate.confidence, candidate.text
                );
                continue;
            }

            let attributes = Attributes::from([
                (ATTR_CONFIDENCE.to_string(), candidate.confidence.to_string()),
                (ATTR_EXTRACTED.to_string(), "true".to_string()),
            ]);
            match self
                .embed_and_store(
                    &candidate.text,
                    Some(candidate.category.as_str()),
                    Some(CONVERSATION_SOURCE),
                    Some(attributes),
                )
                .await
            {
                Ok(id) => stored.push(id),
                Err(e) => warn!("Failed to store extracted memory '{}': {}", candidate.text, e),
            }
        }

        if !stored.is_empty() {
            info!(
                "Extracted and stored {} memories from conversation",
                stored.len()
            );
        }
        stored
    }

    /// Run [`MemoryService::remember_from_conversation`] on a background task
    pub fn spawn_conversation_extraction(
        self: &Arc<Self>,
        messages: Vec<ConversationTurn>,
        max_candidates: usize,
    ) -> ExtractionTask {
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            service
                .remember_from_conversation(&messages, max_candidates)
                .await
        });
        ExtractionTask { handle }
    }

    /// Delete a memory; false if the id is unknown
    pub async fn forget(&self, id: &MemoryId) -> MemoryResult<bool> {
        self.store.write().await.delete(id)
    }

    pub async fn get(&self, id: &MemoryId) -> Option<MemoryRecord> {
        self.store.read().await.get(id).cloned()
    }

    pub async fn list_all(&self, limit: Option<usize>) -> Vec<MemoryRecord> {
        let store = self.store.read().await;
        store.list_all(limit).into_iter().cloned().collect()
    }

    pub async fn list_by_category(&self, category: &str) -> Vec<MemoryRecord> {
        let store = self.store.read().await;
        store.list_by_category(category).into_iter().cloned().collect()
    }

    /// Merge caller attributes into a memory; false if the id is unknown
    pub async fn update_attributes(
        &self,
        id: &MemoryId,
        attributes: Attributes,
    ) -> MemoryResult<bool> {
        validate_attributes(&attributes)?;
        self.store.write().await.update_attributes(id, attributes)
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.read().await.stats()
    }

    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        self.embedder.embed(text).await.map_err(|e| match e {
            MemoryError::EmbeddingUnavailable(_) => e,
            other => MemoryError::EmbeddingUnavailable(other.to_string()),
        })
    }

    async fn embed_and_store(
        &self,
        text: &str,
        category: Option<&str>,
        source: Option<&str>,
        attributes: Option<Attributes>,
    ) -> MemoryResult<MemoryId> {
        let vector = self.embed(text).await?;

        let mut store = self.store.write().await;
        let id = store.insert(&vector, text, category, source, attributes)?;
        info!("Remembered {} ({} total)", id, store.count());
        Ok(id)
    }
}

/// Handle to a background extraction started by
/// [`MemoryService::spawn_conversation_extraction`]
pub struct ExtractionTask {
    handle: JoinHandle<Vec<MemoryId>>,
}

impl ExtractionTask {
    /// Cancel the task; memories already stored stay stored
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task; a cancelled task yields no ids
    pub async fn join(self) -> Vec<MemoryId> {
        match self.handle.await {
            Ok(ids) => ids,
            Err(e) if e.is_cancelled() => {
                debug!("Extraction task was cancelled");
                Vec::new()
            }
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{Confidence, MemoryCandidate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Maps keywords to fixed axes so tests can reason about similarity
    struct KeywordEmbedder {
        calls: AtomicUsize,
    }

    impl KeywordEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = text.to_lowercase();
            let vector = if text.contains("tea") {
                vec![1.0, 0.0, 0.0]
            } else if text.contains("coffee") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            };
            Ok(vector)
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> MemoryResult<Vec<f32>> {
            Err(MemoryError::EmbeddingUnavailable("connection refused".to_string()))
        }
    }

    struct FixedExtractor(Vec<MemoryCandidate>);

    #[async_trait]
    impl Extractor for FixedExtractor {
        async fn extract(
            &self,
            _messages: &[ConversationTurn],
            _max_candidates: usize,
        ) -> MemoryResult<Vec<MemoryCandidate>> {
            Ok(self.0.clone())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl Extractor for FailingExtractor {
        async fn extract(
            &self,
            _messages: &[ConversationTurn],
            _max_candidates: usize,
        ) -> MemoryResult<Vec<MemoryCandidate>> {
            Err(MemoryError::ExtractionUnavailable("rate limited".to_string()))
        }
    }

    fn service(dir: &TempDir, extractor: Option<Arc<dyn Extractor>>) -> MemoryService {
        let store = MemoryStore::open(dir.path()).unwrap();
        MemoryService::new(store, Arc::new(KeywordEmbedder::new()), extractor)
    }

    fn transcript() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("I always drink tea in the morning. I might go vegetarian."),
            ConversationTurn::assistant("Good to know!"),
        ]
    }

    #[tokio::test]
    async fn test_remember_and_recall() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, None);

        let tea = service
            .remember("User likes tea", Some("preference"), Some("manual"), None)
            .await
            .unwrap();
        service.remember("User likes coffee", None, None, None).await.unwrap();

        let hits = service.recall("what tea?", None, None, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, tea);
        assert_eq!(hits[0].record.category, "preference");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_explicit_zero_threshold_differs_from_default() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, None);
        service.remember("tea", None, None, None).await.unwrap();
        service.remember("coffee", None, None, None).await.unwrap();

        let defaulted = service.recall("tea", None, None, None).await.unwrap();
        assert_eq!(defaulted.len(), 1);

        let everything = service.recall("tea", None, Some(0.0), None).await.unwrap();
        assert_eq!(everything.len(), 2);

        let limited = service.recall("tea", Some(1), Some(0.0), None).await.unwrap();
        assert_eq!(limited.len(), 1);

        assert!(service.recall("tea", Some(0), Some(0.0), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configured_defaults_apply() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, None).with_defaults(RecallDefaults {
            limit: 1,
            min_similarity: -1.0,
        });
        service.remember("tea", None, None, None).await.unwrap();
        service.remember("coffee", None, None, None).await.unwrap();

        let hits = service.recall("coffee", None, None, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text, "coffee");
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::open(dir.path()).unwrap();
        let service = MemoryService::new(store, Arc::new(FailingEmbedder), None);

        let err = service.remember("tea", None, None, None).await;
        assert!(matches!(err, Err(MemoryError::EmbeddingUnavailable(_))));
        assert_eq!(service.stats().await.count, 0);
        assert!(!dir.path().join(crate::memory::store::VECTORS_FILE).exists());
    }

    #[tokio::test]
    async fn test_recall_on_empty_store_skips_embedding() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(KeywordEmbedder::new());
        let store = MemoryStore::open(dir.path()).unwrap();
        let service = MemoryService::new(store, embedder.clone(), None);

        assert!(service.recall("tea", None, None, None).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reserved_attributes_rejected() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, None);

        let attrs = Attributes::from([(ATTR_EXTRACTED.to_string(), "true".to_string())]);
        let err = service.remember("tea", None, None, Some(attrs.clone())).await;
        assert!(matches!(err, Err(MemoryError::ReservedAttribute(_))));

        let id = service.remember("tea", None, None, None).await.unwrap();
        assert!(matches!(
            service.update_attributes(&id, attrs).await,
            Err(MemoryError::ReservedAttribute(_))
        ));

        let ok = Attributes::from([("topic".to_string(), "drinks".to_string())]);
        assert!(service.update_attributes(&id, ok).await.unwrap());
        assert_eq!(service.get(&id).await.unwrap().attributes["topic"], "drinks");
    }

    #[tokio::test]
    async fn test_conversation_keeps_confident_candidates() {
        let dir = TempDir::new().unwrap();
        let extractor = FixedExtractor(vec![
            MemoryCandidate::new("likes tea", "preference", Confidence::High),
            MemoryCandidate::new("maybe vegetarian", "preference", Confidence::Low),
        ]);
        let service = service(&dir, Some(Arc::new(extractor)));

        let ids = service.remember_from_conversation(&transcript(), 5).await;
        assert_eq!(ids.len(), 1);

        let all = service.list_all(None).await;
        assert_eq!(all.len(), 1);
        let record = &all[0];
        assert_eq!(record.text, "likes tea");
        assert_eq!(record.source, CONVERSATION_SOURCE);
        assert_eq!(record.attributes[ATTR_CONFIDENCE], "high");
        assert_eq!(record.attributes[ATTR_EXTRACTED], "true");
    }

    #[tokio::test]
    async fn test_conversation_respects_max_candidates() {
        let dir = TempDir::new().unwrap();
        let extractor = FixedExtractor(vec![
            MemoryCandidate::new("likes tea", "preference", Confidence::Medium),
            MemoryCandidate::new("likes coffee", "preference", Confidence::High),
            MemoryCandidate::new("lives near a park", "fact", Confidence::High),
        ]);
        let service = service(&dir, Some(Arc::new(extractor)));

        let ids = service.remember_from_conversation(&transcript(), 2).await;
        assert_eq!(ids.len(), 2);
        assert_eq!(service.list_by_category("preference").await.len(), 2);
        assert!(service.list_by_category("fact").await.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_degrades_without_extractor() {
        let dir = TempDir::new().unwrap();

        let service_none = service(&dir, None);
        assert!(!service_none.has_extractor());
        assert!(service_none
            .remember_from_conversation(&transcript(), 5)
            .await
            .is_empty());

        let failing = service(&dir, Some(Arc::new(FailingExtractor)));
        assert!(failing.remember_from_conversation(&transcript(), 5).await.is_empty());
        assert_eq!(failing.stats().await.count, 0);
    }

    #[tokio::test]
    async fn test_conversation_drops_embedding_failures() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::open(dir.path()).unwrap();
        let extractor = FixedExtractor(vec![MemoryCandidate::new(
            "likes tea",
            "preference",
            Confidence::High,
        )]);
        let service = MemoryService::new(store, Arc::new(FailingEmbedder), Some(Arc::new(extractor)));

        assert!(service.remember_from_conversation(&transcript(), 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_background_extraction_task() {
        let dir = TempDir::new().unwrap();
        let extractor = FixedExtractor(vec![MemoryCandidate::new(
            "likes tea",
            "preference",
            Confidence::High,
        )]);
        let service = Arc::new(service(&dir, Some(Arc::new(extractor))));

        let task = service.spawn_conversation_extraction(transcript(), 5);
        let ids = task.join().await;
        assert_eq!(ids.len(), 1);
        assert!(service.get(&ids[0]).await.is_some());
    }

    #[tokio::test]
    async fn test_forget() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, None);

        let first = service.remember("tea", None, None, None).await.unwrap();
        let second = service.remember("coffee", None, None, None).await.unwrap();
        let third = service.remember("water", None, None, None).await.unwrap();

        assert!(service.forget(&second).await.unwrap());
        assert!(!service.forget(&second).await.unwrap());

        let hits = service.recall("water", None, None, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, third);
        assert_eq!(hits[0].record.slot, 1);
        assert_eq!(service.get(&first).await.unwrap().slot, 0);
    }
}
