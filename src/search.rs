//! Search services: fuzzy client lookup and vector document search.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::DossierError;
use crate::models::{ClientSearchResponse, DocumentSearchResult};
use crate::provider::EmbeddingModel;
use crate::{store_chunks, store_clients};

/// Shortest accepted client query, after trimming.
pub const MIN_QUERY_LENGTH: usize = 3;
/// Longest accepted client query.
pub const MAX_QUERY_LENGTH: usize = 500;
/// Queries longer than this are truncated before embedding.
pub const MAX_EMBED_QUERY_CHARS: usize = 1000;
/// Hard relevance floor applied on top of the configured threshold, so a
/// misconfigured low threshold can never surface noise.
pub const MIN_SIMILARITY_FLOOR: f64 = 0.25;

/// Fuzzy client lookup. An empty query is a valid no-op; a non-empty query
/// outside the length bounds is the caller's error.
pub async fn find_client(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
) -> Result<ClientSearchResponse> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Ok(ClientSearchResponse::default());
    }
    if trimmed.chars().count() < MIN_QUERY_LENGTH {
        return Err(DossierError::WrongQuery("query is too short").into());
    }
    if trimmed.chars().count() > MAX_QUERY_LENGTH {
        return Err(DossierError::WrongQuery("query is too long").into());
    }

    store_clients::search(
        pool,
        trimmed,
        Some(config.search.client_limit),
        Some(config.search.client_similarity),
    )
    .await
}

/// Vector search over a client's documents, or over all documents when no
/// client is given. Validation errors surface to the caller; a failure
/// inside the semantic stage degrades to an empty result set so a flaky
/// embedding endpoint cannot take search down.
pub async fn find_documents(
    pool: &SqlitePool,
    config: &Config,
    embedder: &dyn EmbeddingModel,
    client_id: Option<Uuid>,
    query: &str,
) -> Result<Vec<DocumentSearchResult>> {
    if query.trim().is_empty() {
        return Err(DossierError::WrongQuery("query cannot be blank").into());
    }
    if let Some(id) = client_id {
        if store_clients::get(pool, id).await?.is_none() {
            return Err(DossierError::not_found("client", id).into());
        }
    }

    match semantic_search(pool, config, embedder, client_id, query).await {
        Ok(results) => Ok(results),
        Err(e) => {
            error!(error = %e, "semantic search failed, returning no results");
            Ok(Vec::new())
        }
    }
}

async fn semantic_search(
    pool: &SqlitePool,
    config: &Config,
    embedder: &dyn EmbeddingModel,
    client_id: Option<Uuid>,
    query: &str,
) -> Result<Vec<DocumentSearchResult>> {
    let vector = embed_query(embedder, query).await?;
    let results = store_chunks::find_similar(
        pool,
        &vector,
        config.search.document_limit,
        client_id,
        config.search.document_similarity,
    )
    .await?;

    // The floor is a second filter over the ranked rows, so it holds even
    // when the configured threshold is tuned below it.
    Ok(results
        .into_iter()
        .filter(|result| result.score >= MIN_SIMILARITY_FLOOR)
        .collect())
}

/// Normalize and embed a search query: trim, lowercase, cap the length.
/// An empty vector from the provider is an error, never a silent match-all.
pub async fn embed_query(embedder: &dyn EmbeddingModel, input: &str) -> Result<Vec<f32>> {
    let normalized = input.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(DossierError::WrongQuery("query cannot be blank").into());
    }

    let capped = if normalized.len() > MAX_EMBED_QUERY_CHARS {
        warn!(length = normalized.len(), "truncating query before embedding");
        let mut end = MAX_EMBED_QUERY_CHARS;
        while end > 0 && !normalized.is_char_boundary(end) {
            end -= 1;
        }
        &normalized[..end]
    } else {
        normalized.as_str()
    };

    let vector = embedder
        .embed(capped)
        .await
        .map_err(|e| DossierError::Embedding(e.to_string()))?;
    if vector.is_empty() {
        return Err(DossierError::Embedding("provider returned an empty vector".to_string()).into());
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingModel for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            assert_eq!(text, text.trim());
            assert_eq!(text, text.to_lowercase());
            assert!(text.len() <= MAX_EMBED_QUERY_CHARS);
            Ok(self.vector.clone())
        }

        async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_query_normalizes_input() {
        let embedder = FixedEmbedder {
            vector: vec![0.1, 0.2],
        };
        let vector = embed_query(&embedder, "  Retirement PLAN  ").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_embed_query_rejects_blank_input() {
        let embedder = FixedEmbedder { vector: vec![0.1] };
        let err = embed_query(&embedder, "   ").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DossierError>(),
            Some(DossierError::WrongQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_embed_query_caps_long_input() {
        let embedder = FixedEmbedder { vector: vec![0.5] };
        let long = "term ".repeat(400);
        embed_query(&embedder, &long).await.unwrap();
    }

    #[tokio::test]
    async fn test_embed_query_rejects_empty_vector() {
        let embedder = FixedEmbedder { vector: Vec::new() };
        let err = embed_query(&embedder, "growth").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DossierError>(),
            Some(DossierError::Embedding(_))
        ));
    }
}
