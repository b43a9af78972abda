//! Domain errors surfaced to callers of the search and ingestion APIs.
//!
//! Worker internals use `anyhow` and record failures on the owning row;
//! this enum covers the cases a caller must be able to distinguish:
//! missing entities, rejected queries, and query-vectorization failures.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DossierError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("invalid query: {0}")]
    WrongQuery(&'static str),

    #[error("query vectorization failed: {0}")]
    Embedding(String),
}

impl DossierError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        DossierError::NotFound { entity, id }
    }
}
