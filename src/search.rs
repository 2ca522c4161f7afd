use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{MessageSummary, SearchResult};
use crate::ollama::InferenceService;
use std::sync::Arc;
use tracing::debug;

/// Unnormalized dot product. Vectors from different embedding models
/// cannot be compared, so lengths must agree.
pub fn dot(query: &[f32], stored: &[f32]) -> Result<f32> {
    if query.len() != stored.len() {
        return Err(Error::DimensionMismatch {
            query: query.len(),
            stored: stored.len(),
        });
    }
    Ok(query.iter().zip(stored).map(|(a, b)| a * b).sum())
}

/// Scores every candidate against `query` and keeps the best `limit`,
/// highest first. Equal scores are ordered by id.
pub fn rank(
    query: &[f32],
    candidates: &[(String, Vec<f32>)],
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let mut scored = candidates
        .iter()
        .map(|(id, vector)| {
            Ok(SearchResult {
                id: id.clone(),
                score: dot(query, vector)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(limit);
    Ok(scored)
}

pub struct SearchEngine {
    db: Database,
    ai: Option<Arc<dyn InferenceService>>,
    limit: usize,
}

impl SearchEngine {
    pub fn new(db: Database, ai: Option<Arc<dyn InferenceService>>, limit: usize) -> Self {
        Self { db, ai, limit }
    }

    /// Brute-force semantic search over every stored vector.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let ai = self.ai.as_ref().ok_or(Error::ServiceUnavailable("inference"))?;

        let query_vector = ai.embed(query).await.map_err(Error::Inference)?;
        let candidates = self.db.get_all_vectors().await?;
        debug!(
            "Scoring {} vectors against a {}-dim query",
            candidates.len(),
            query_vector.len()
        );
        rank(&query_vector, &candidates, self.limit)
    }

    /// Same as [`search`](Self::search), resolved to message rows in
    /// ranking order.
    pub async fn search_messages(&self, query: &str) -> Result<Vec<MessageSummary>> {
        let results = self.search(query).await?;
        let ids: Vec<String> = results.into_iter().map(|r| r.id).collect();
        self.db.get_messages_by_ids(&ids).await
    }
}
