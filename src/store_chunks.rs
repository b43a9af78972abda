//! Chunk persistence: the claim/status state machine for embedding work,
//! embedding-record storage, and the vector similarity query.
//!
//! Claims are single-statement compare-and-swaps: the UPDATE picks the
//! oldest eligible PENDING row and moves it to PROCESSING in one atomic
//! step, so concurrent claimers skip rows another claimer already took
//! instead of double-claiming them.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::row_uuid;
use crate::models::{now_ts, DocumentChunk, DocumentSearchResult, TaskStatus};
use crate::provider::{blob_to_vec, cosine_similarity};

fn chunk_from_row(row: &SqliteRow) -> Result<DocumentChunk> {
    let status: String = row.get("status");

    Ok(DocumentChunk {
        id: row_uuid(row, "id")?,
        document_id: row_uuid(row, "document_id")?,
        content: row.get("content"),
        status: TaskStatus::parse(&status)?,
        error_message: row.get("error_message"),
        attempts: row.get("attempts"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub async fn count_pending(pool: &SqlitePool, document_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM document_chunks WHERE document_id = ? AND status = 'PENDING'",
    )
    .bind(document_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Claim the oldest eligible PENDING chunk of `document_id`: one atomic
/// statement moves it to PROCESSING, bumps `attempts`, and stamps
/// `updated_at`. Returns `None` when nothing is eligible.
pub async fn claim_next_pending(
    pool: &SqlitePool,
    document_id: Uuid,
    max_attempts: i64,
) -> Result<Option<DocumentChunk>> {
    let row = sqlx::query(
        r#"
        UPDATE document_chunks
        SET status = 'PROCESSING',
            attempts = attempts + 1,
            updated_at = ?
        WHERE id = (
            SELECT id FROM document_chunks
            WHERE document_id = ?
              AND status = 'PENDING'
              AND attempts < ?
            ORDER BY created_at ASC, id ASC
            LIMIT 1
        )
        RETURNING *
        "#,
    )
    .bind(now_ts())
    .bind(document_id.to_string())
    .bind(max_attempts)
    .fetch_optional(pool)
    .await?;

    row.map(|r| chunk_from_row(&r)).transpose()
}

pub async fn update_status(pool: &SqlitePool, chunk_id: Uuid, status: TaskStatus) -> Result<()> {
    let result = sqlx::query("UPDATE document_chunks SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now_ts())
        .bind(chunk_id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("chunk not found: {}", chunk_id);
    }
    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, chunk_id: Uuid, error: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE document_chunks SET status = 'FAILED', error_message = ?, updated_at = ? WHERE id = ?",
    )
    .bind(error)
    .bind(now_ts())
    .bind(chunk_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("chunk not found: {}", chunk_id);
    }
    Ok(())
}

/// Completion predicate for a document: true when no chunk remains in a
/// non-READY state. A FAILED chunk therefore holds the document out of
/// READY until maintenance recovers it or an operator steps in.
pub async fn all_chunks_ready(pool: &SqlitePool, document_id: Uuid) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM document_chunks WHERE document_id = ? AND status != 'READY'",
    )
    .bind(document_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count == 0)
}

/// Insert one embedding record for an extracted term. Records are
/// append-only; they are never updated and only removed by cascade.
pub async fn insert_embedding(
    pool: &SqlitePool,
    document_id: Uuid,
    chunk_id: Uuid,
    term: &str,
    vector: &[f32],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO chunk_embeddings (document_id, chunk_id, term, embedding) VALUES (?, ?, ?, ?)",
    )
    .bind(document_id.to_string())
    .bind(chunk_id.to_string())
    .bind(term)
    .bind(crate::provider::vec_to_blob(vector))
    .execute(pool)
    .await?;

    Ok(())
}

/// Vector similarity search over embedding records.
///
/// Scores every record against `query_vector` (cosine similarity),
/// optionally restricted to one client's documents, keeps only each
/// document's best-scoring record, drops rows under `threshold`, and
/// returns at most `limit` rows ordered by descending score (id breaks
/// ties for determinism).
pub async fn find_similar(
    pool: &SqlitePool,
    query_vector: &[f32],
    limit: usize,
    client_id: Option<Uuid>,
    threshold: f64,
) -> Result<Vec<DocumentSearchResult>> {
    let base = r#"
        SELECT e.document_id, e.embedding,
               d.client_id, d.title, d.summary, d.status, d.created_at
        FROM chunk_embeddings e
        JOIN documents d ON d.id = e.document_id
        "#;

    let rows = if let Some(client_id) = client_id {
        sqlx::query(&format!("{} WHERE d.client_id = ?", base))
            .bind(client_id.to_string())
            .fetch_all(pool)
            .await?
    } else {
        sqlx::query(base).fetch_all(pool).await?
    };

    // One row per document, keeping the best chunk/term score.
    let mut best: HashMap<Uuid, DocumentSearchResult> = HashMap::new();

    for row in &rows {
        let document_id = row_uuid(row, "document_id")?;
        let blob: Vec<u8> = row.get("embedding");
        let vector = blob_to_vec(&blob);
        let score = f64::from(cosine_similarity(query_vector, &vector));

        match best.get_mut(&document_id) {
            Some(existing) => {
                if score > existing.score {
                    existing.score = score;
                }
            }
            None => {
                let status: String = row.get("status");
                best.insert(
                    document_id,
                    DocumentSearchResult {
                        document_id,
                        client_id: row_uuid(row, "client_id")?,
                        title: row.get("title"),
                        score,
                        summary: row.get("summary"),
                        status: TaskStatus::parse(&status)?,
                        created_at: row.get("created_at"),
                    },
                );
            }
        }
    }

    let mut results: Vec<DocumentSearchResult> = best
        .into_values()
        .filter(|r| r.score >= threshold)
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.document_id.cmp(&b.document_id))
    });
    results.truncate(limit);

    Ok(results)
}

/// One-statement recovery: retryable FAILED chunks and PROCESSING chunks
/// stuck past the stale threshold go back to PENDING with a bumped attempt
/// count. Returns the parent document id of every reset row (duplicates
/// included; the caller deduplicates before signalling). Chunks that
/// exhausted their attempts stay FAILED.
pub async fn reset_stale_and_failed(
    pool: &SqlitePool,
    max_attempts: i64,
    stale_threshold_minutes: i64,
) -> Result<Vec<Uuid>> {
    let now = now_ts();
    let cutoff = now - stale_threshold_minutes * 60;

    let rows = sqlx::query(
        r#"
        UPDATE document_chunks
        SET status = 'PENDING',
            attempts = attempts + 1,
            updated_at = ?
        WHERE (status = 'FAILED' AND attempts < ?)
           OR (status = 'PROCESSING' AND updated_at < ?)
        RETURNING document_id
        "#,
    )
    .bind(now)
    .bind(max_attempts)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.iter().map(|r| row_uuid(r, "document_id")).collect()
}

/// Documents that still have PENDING chunks; used to re-arm the embedding
/// worker at startup after lost signals.
pub async fn pending_document_ids(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let rows =
        sqlx::query("SELECT DISTINCT document_id FROM document_chunks WHERE status = 'PENDING'")
            .fetch_all(pool)
            .await?;

    rows.iter().map(|r| row_uuid(r, "document_id")).collect()
}

pub async fn chunks_for_document(
    pool: &SqlitePool,
    document_id: Uuid,
) -> Result<Vec<DocumentChunk>> {
    let rows = sqlx::query(
        "SELECT * FROM document_chunks WHERE document_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(document_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(chunk_from_row).collect()
}
