//! Document persistence: lookups, status transitions, and the
//! summary-side claim/recovery primitives.
//!
//! The summary claim is a single-statement compare-and-swap on
//! `summary_status`: SQLite serializes it, so two concurrent claimers can
//! never both move the same row out of PENDING.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::row_uuid;
use crate::models::{now_ts, Document, TaskStatus};

pub(crate) fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let summary_status: String = row.get("summary_status");

    Ok(Document {
        id: row_uuid(row, "id")?,
        client_id: row_uuid(row, "client_id")?,
        title: row.get("title"),
        content: row.get("content"),
        summary: row.get("summary"),
        status: TaskStatus::parse(&status)?,
        summary_status: TaskStatus::parse(&summary_status)?,
        summary_attempts: row.get("summary_attempts"),
        summary_error_message: row.get("summary_error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Document>> {
    let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| document_from_row(&r)).transpose()
}

pub async fn update_status(pool: &SqlitePool, id: Uuid, status: TaskStatus) -> Result<()> {
    let result = sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now_ts())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("document not found: {}", id);
    }
    Ok(())
}

/// Atomically claim `id` for summary work: PENDING with attempts under the
/// cap moves to PROCESSING with a fresh `updated_at`. Returns `None` when
/// the document is not eligible (already claimed, done, or exhausted).
pub async fn claim_for_summary(
    pool: &SqlitePool,
    id: Uuid,
    max_attempts: i64,
) -> Result<Option<Document>> {
    let row = sqlx::query(
        r#"
        UPDATE documents
        SET summary_status = 'PROCESSING',
            summary_attempts = summary_attempts + 1,
            updated_at = ?
        WHERE id = ?
          AND summary_status = 'PENDING'
          AND summary_attempts < ?
        RETURNING *
        "#,
    )
    .bind(now_ts())
    .bind(id.to_string())
    .bind(max_attempts)
    .fetch_optional(pool)
    .await?;

    row.map(|r| document_from_row(&r)).transpose()
}

/// Persist a generated summary and mark the summary sub-task READY,
/// clearing any error from a previous attempt.
pub async fn update_summary(pool: &SqlitePool, id: Uuid, summary: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE documents
        SET summary = ?,
            summary_status = 'READY',
            summary_error_message = NULL,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(summary)
    .bind(now_ts())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("document not found: {}", id);
    }
    Ok(())
}

pub async fn update_summary_status(
    pool: &SqlitePool,
    id: Uuid,
    status: TaskStatus,
    note: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE documents
        SET summary_status = ?,
            summary_error_message = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(note)
    .bind(now_ts())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("document not found: {}", id);
    }
    Ok(())
}

/// One-statement recovery of summary work: retryable FAILED rows and
/// PROCESSING rows stuck past the stale threshold go back to PENDING with
/// a bumped attempt count. Returns the affected document ids. Rows that
/// exhausted their attempts stay FAILED for operator attention.
pub async fn reset_stale_and_failed_summaries(
    pool: &SqlitePool,
    max_attempts: i64,
    stale_threshold_minutes: i64,
) -> Result<Vec<Uuid>> {
    let now = now_ts();
    let cutoff = now - stale_threshold_minutes * 60;

    let rows = sqlx::query(
        r#"
        UPDATE documents
        SET summary_status = 'PENDING',
            summary_attempts = summary_attempts + 1,
            updated_at = ?
        WHERE (summary_status = 'FAILED' AND summary_attempts < ?)
           OR (summary_status = 'PROCESSING' AND updated_at < ?)
        RETURNING id
        "#,
    )
    .bind(now)
    .bind(max_attempts)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.iter().map(|r| row_uuid(r, "id")).collect()
}

/// Documents whose summary work is still pending; used to re-arm the
/// summary worker at startup after lost signals.
pub async fn pending_summary_ids(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let rows = sqlx::query("SELECT id FROM documents WHERE summary_status = 'PENDING'")
        .fetch_all(pool)
        .await?;

    rows.iter().map(|r| row_uuid(r, "id")).collect()
}
