//! Core data models shared across the pipeline and search engine.
//!
//! These types mirror the persisted rows: clients, documents, document
//! chunks, and the search result shapes returned by the ranking code.

use chrono::Utc;
use uuid::Uuid;

/// Processing lifecycle shared by documents, document summaries, and chunks.
///
/// Legal transitions: `Pending → Processing → Ready`, `Processing → Failed`,
/// `Failed → Pending` (maintenance retry) and `Processing → Pending`
/// (stale recovery). `Pending` and `Ready` are stable states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Ready => "READY",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "PROCESSING" => Ok(TaskStatus::Processing),
            "READY" => Ok(TaskStatus::Ready),
            "FAILED" => Ok(TaskStatus::Failed),
            other => anyhow::bail!("Unknown task status: {}", other),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client record: identity plus free-text profile used by fuzzy search.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub description: Option<String>,
    pub social_links: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A document owned by exactly one client.
///
/// `status` tracks chunk-embedding completion; `summary_status` is the
/// independent lifecycle of the summary sub-task.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub status: TaskStatus,
    pub summary_status: TaskStatus,
    pub summary_attempts: i64,
    pub summary_error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One slice of a document's content, the unit of embedding work.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub attempts: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One fuzzy-search hit with its similarity score.
#[derive(Debug, Clone)]
pub struct ClientSearchResult {
    pub client: Client,
    pub score: f64,
}

/// Fuzzy client search output: near-certain matches and lower-confidence
/// "did you mean" suggestions, already ordered and capped.
#[derive(Debug, Clone, Default)]
pub struct ClientSearchResponse {
    pub matches: Vec<ClientSearchResult>,
    pub suggestions: Vec<ClientSearchResult>,
}

/// One semantic-search hit, deduplicated to a single row per document
/// carrying that document's best chunk/term score.
#[derive(Debug, Clone)]
pub struct DocumentSearchResult {
    pub document_id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub score: f64,
    pub summary: Option<String>,
    pub status: TaskStatus,
    pub created_at: i64,
}

/// Current unix timestamp in seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Ready,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_status_unknown() {
        assert!(TaskStatus::parse("DONE").is_err());
    }
}
