// Database-backed VectorMemoryStore
//
// Dedup relies on the unique index over (agent_name, content_hash):
// ON CONFLICT DO NOTHING gives the atomic insert-if-absent semantics
// ingestion replays depend on. Similarity scoring happens in process over
// the agent's namespace; vectors are stored as JSONB arrays with a
// precomputed norm.

use async_trait::async_trait;
use ensemble_core::{
    cosine_similarity, AgentError, Result, VectorMemoryEntry, VectorMemoryStore, VectorSearchHit,
};
use serde_json::json;

use crate::models::VectorMemoryRow;
use crate::repositories::Database;

#[derive(Clone)]
pub struct DbVectorMemoryStore {
    db: Database,
}

impl DbVectorMemoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn to_row(entry: VectorMemoryEntry) -> VectorMemoryRow {
    let vector = serde_json::to_value(&entry.vector).unwrap_or_else(|_| json!([]));
    VectorMemoryRow {
        id: entry.id,
        agent_name: entry.agent_name,
        namespace: entry.namespace,
        content: entry.content,
        metadata: entry.metadata,
        source: entry.source,
        source_id: entry.source_id,
        chunk_index: entry.chunk_index as i32,
        embedding_provider: entry.embedding_provider,
        embedding_model: entry.embedding_model,
        dimensions: entry.dimensions as i32,
        vector,
        norm: entry.norm,
        content_hash: entry.content_hash,
        token_count: entry.token_count.map(|t| t as i32),
        created_at: entry.created_at,
    }
}

#[async_trait]
impl VectorMemoryStore for DbVectorMemoryStore {
    async fn insert_if_absent(&self, entry: VectorMemoryEntry) -> Result<bool> {
        self.db
            .insert_vector_memory(to_row(entry))
            .await
            .map_err(|e| AgentError::store(e.to_string()))
    }

    async fn search(
        &self,
        agent_name: &str,
        namespace: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorSearchHit>> {
        let query_norm = query.iter().map(|v| v * v).sum::<f32>().sqrt();
        let rows = self
            .db
            .list_vector_memories(agent_name, namespace)
            .await
            .map_err(|e| AgentError::store(e.to_string()))?;

        let mut hits: Vec<VectorSearchHit> = rows
            .into_iter()
            .map(VectorMemoryRow::into_entry)
            .map(|entry| VectorSearchHit {
                score: cosine_similarity(query, query_norm, &entry.vector, entry.norm),
                entry,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}
