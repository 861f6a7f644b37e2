// Vector memory - embedded long-term recall with content-hash dedup
//
// Entries are deduplicated on (agent_name, content_hash): inserting the same
// content for the same agent twice is a no-op at the store level, so
// ingestion pipelines can be replayed safely. The embedding provider checks
// input length BEFORE any network call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::error::{AgentError, Result};

/// Hex-encoded SHA-256 of the entry content, the dedup key component
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// One embedded memory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMemoryEntry {
    /// ULID identity
    pub id: String,
    pub agent_name: String,
    /// Logical partition within an agent's memory
    pub namespace: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    /// Origin descriptor (e.g., "conversation", "document")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Position when the source was chunked
    pub chunk_index: u32,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub dimensions: usize,
    pub vector: Vec<f32>,
    /// Precomputed L2 norm of `vector`
    pub norm: f32,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl VectorMemoryEntry {
    pub fn new(
        agent_name: impl Into<String>,
        content: impl Into<String>,
        provider: &dyn EmbeddingProvider,
        vector: Vec<f32>,
    ) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        let norm = l2_norm(&vector);
        Self {
            id: Ulid::new().to_string(),
            agent_name: agent_name.into(),
            namespace: "default".to_string(),
            content,
            metadata: Value::Null,
            source: None,
            source_id: None,
            chunk_index: 0,
            embedding_provider: provider.name().to_string(),
            embedding_model: provider.model().to_string(),
            dimensions: provider.dimensions(),
            vector,
            norm,
            content_hash: hash,
            token_count: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_source(
        mut self,
        source: impl Into<String>,
        source_id: Option<String>,
        chunk_index: u32,
    ) -> Self {
        self.source = Some(source.into());
        self.source_id = source_id;
        self.chunk_index = chunk_index;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A search hit with its similarity score
#[derive(Debug, Clone)]
pub struct VectorSearchHit {
    pub entry: VectorMemoryEntry,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Cosine similarity using precomputed norms; zero-norm inputs score 0
pub fn cosine_similarity(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

// ============================================================================
// EmbeddingProvider - text -> vector boundary
// ============================================================================

/// Trait for embedding providers.
///
/// `embed` is the engine's entry point: it validates input length against
/// `max_input_length` before delegating to `embed_text`, so oversized input
/// fails fast without an API round trip.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g., "openai")
    fn name(&self) -> &str;

    /// Model identifier (e.g., "text-embedding-3-small")
    fn model(&self) -> &str;

    /// Output vector dimensionality
    fn dimensions(&self) -> usize;

    /// Maximum accepted input length in characters
    fn max_input_length(&self) -> usize;

    /// Estimated cost in USD for embedding the given text
    fn estimate_cost(&self, text: &str) -> f64;

    /// Raw embedding call, invoked only after validation
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Validated embedding entry point
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.len() > self.max_input_length() {
            return Err(AgentError::embedding(format!(
                "input of {} chars exceeds provider limit of {}",
                text.len(),
                self.max_input_length()
            )));
        }
        self.embed_text(text).await
    }

    /// Embed several texts, validating each before any call is made
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            if text.len() > self.max_input_length() {
                return Err(AgentError::embedding(format!(
                    "input of {} chars exceeds provider limit of {}",
                    text.len(),
                    self.max_input_length()
                )));
            }
        }
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_text(text).await?);
        }
        Ok(vectors)
    }
}

// ============================================================================
// VectorMemoryStore - persistence boundary
// ============================================================================

/// Store boundary for embedded entries. Insertion is idempotent on
/// (agent_name, content_hash); `insert_if_absent` reports whether the row
/// was actually written.
#[async_trait]
pub trait VectorMemoryStore: Send + Sync {
    /// Insert unless an entry with the same (agent_name, content_hash)
    /// already exists. Returns true when the entry was inserted.
    async fn insert_if_absent(&self, entry: VectorMemoryEntry) -> Result<bool>;

    /// Top-k cosine-similarity search within an agent's namespace
    async fn search(
        &self,
        agent_name: &str,
        namespace: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorSearchHit>>;
}
