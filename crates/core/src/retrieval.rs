//! Retrieval adapter: ordered passage lookup over a vector-search service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::RetrievalError;

/// A retrieved unit of reference text. Produced transiently per call and
/// never persisted by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

/// Uniform access to the semantic retrieval service.
///
/// Results are ordered by descending relevance with ties kept in corpus
/// insertion order. An empty vec means nothing cleared the relevance
/// threshold; callers degrade gracefully instead of treating it as an
/// error. `RetrievalError::Unavailable` is reserved for transport failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn fetch(&self, topic: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    passages: Vec<ScoredPassage>,
}

#[derive(Debug, Deserialize)]
struct ScoredPassage {
    content: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    score: f32,
}

/// Production retriever against the vocabulary vector-search HTTP service.
pub struct HttpRetriever {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    min_score: f32,
}

impl HttpRetriever {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        collection: impl Into<String>,
        min_score: f32,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            min_score,
        }
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn fetch(&self, topic: &str, k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let url = format!("{}/collections/{}/query", self.base_url, self.collection);
        let body = serde_json::json!({ "query": topic, "k": k });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Unavailable(format!(
                "query returned HTTP {status}"
            )));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        let ranked = rank_passages(parsed.passages, self.min_score, k);
        debug!(topic, k, returned = ranked.len(), "retrieval query completed");
        Ok(ranked)
    }
}

/// Orders passages by descending score (stable sort, so ties keep the
/// service's corpus order), drops everything under `min_score`, and
/// truncates to `k`.
fn rank_passages(mut passages: Vec<ScoredPassage>, min_score: f32, k: usize) -> Vec<RetrievedPassage> {
    passages.sort_by(|a, b| b.score.total_cmp(&a.score));
    passages
        .into_iter()
        .filter(|p| p.score >= min_score)
        .take(k)
        .map(|p| RetrievedPassage { content: p.content, metadata: p.metadata })
        .collect()
}
