//! Document ingestion: write the document and its chunks atomically,
//! then signal the pipeline.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::DossierError;
use crate::events::SignalBus;
use crate::models::{now_ts, Document, TaskStatus};
use crate::{splitter, store_clients, store_documents};

/// Insert a document and its PENDING chunks in one transaction, then
/// publish the ingestion signal. The signal goes out only after commit,
/// so workers never observe a half-written document.
///
/// Content that splits into zero segments (blank or whitespace) skips
/// the embedding pipeline entirely: the document is stored READY with
/// no chunks and no signal is fired for it.
pub async fn ingest_document(
    pool: &SqlitePool,
    config: &Config,
    bus: &SignalBus,
    client_id: Uuid,
    title: &str,
    content: &str,
) -> Result<Document> {
    if store_clients::get(pool, client_id).await?.is_none() {
        return Err(DossierError::not_found("client", client_id).into());
    }

    let segments = splitter::split(
        content,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    // Blank content has nothing to embed and nothing to summarize; both
    // pipelines are settled at ingest time and no signal is fired.
    let (status, summary_status, summary_note) = if segments.is_empty() {
        (TaskStatus::Ready, TaskStatus::Ready, Some("Empty content"))
    } else {
        (TaskStatus::Processing, TaskStatus::Pending, None)
    };

    let document_id = Uuid::new_v4();
    let ts = now_ts();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO documents \
         (id, client_id, title, content, status, summary_status, summary_attempts, summary_error_message, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(document_id.to_string())
    .bind(client_id.to_string())
    .bind(title)
    .bind(content)
    .bind(status.as_str())
    .bind(summary_status.as_str())
    .bind(summary_note)
    .bind(ts)
    .bind(ts)
    .execute(&mut *tx)
    .await?;

    for segment in &segments {
        sqlx::query(
            "INSERT INTO document_chunks \
             (id, document_id, content, status, attempts, created_at, updated_at) \
             VALUES (?, ?, ?, 'PENDING', 0, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(document_id.to_string())
        .bind(segment)
        .bind(ts)
        .bind(ts)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        %document_id,
        %client_id,
        chunks = segments.len(),
        "document ingested"
    );

    if !segments.is_empty() {
        bus.document_ingested(document_id);
    }

    let document = store_documents::get(pool, document_id)
        .await?
        .ok_or_else(|| DossierError::not_found("document", document_id))?;
    Ok(document)
}
