//! Periodic recovery of stuck and retryable work.
//!
//! Two independent schedules, one for chunks and one for summaries. Each
//! pass resets FAILED rows that still have attempts left and PROCESSING
//! rows whose holder went quiet, then re-signals every document that has
//! PENDING work left, reset or not. That makes the scheduler the safety
//! net for lost signals: a document ingested by another process gets
//! picked up within one tick. A pass that errors is logged and skipped;
//! the next tick tries again.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::events::PipelineContext;
use crate::{store_chunks, store_documents};

pub async fn chunk_maintenance_loop(ctx: Arc<PipelineContext>) {
    let mut ticker = interval(&ctx);
    loop {
        ticker.tick().await;
        if let Err(e) = run_chunk_maintenance(&ctx).await {
            error!(error = %e, "chunk maintenance pass failed");
        }
    }
}

pub async fn summary_maintenance_loop(ctx: Arc<PipelineContext>) {
    let mut ticker = interval(&ctx);
    loop {
        ticker.tick().await;
        if let Err(e) = run_summary_maintenance(&ctx).await {
            error!(error = %e, "summary maintenance pass failed");
        }
    }
}

fn interval(ctx: &PipelineContext) -> tokio::time::Interval {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(ctx.config.worker.maintenance_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// One chunk recovery pass: reset retryable FAILED and stale PROCESSING
/// chunks, then signal every document that has PENDING chunks, whether it
/// was just reset or has been sitting on a lost signal. Exactly one signal
/// goes out per distinct document; duplicates across ticks are harmless
/// because claims are exclusive. Returns the number of documents signaled.
pub async fn run_chunk_maintenance(ctx: &PipelineContext) -> Result<usize> {
    let recovered = store_chunks::reset_stale_and_failed(
        &ctx.pool,
        ctx.config.worker.embed_max_attempts,
        ctx.config.worker.stale_threshold_minutes,
    )
    .await?;
    let pending = store_chunks::pending_document_ids(&ctx.pool).await?;

    let documents: HashSet<_> = recovered.iter().copied().chain(pending).collect();
    if documents.is_empty() {
        return Ok(0);
    }

    info!(
        reset_chunks = recovered.len(),
        documents = documents.len(),
        "signaling documents with pending chunks"
    );
    for document_id in &documents {
        ctx.bus.chunk_retry(*document_id);
    }
    Ok(documents.len())
}

/// One summary recovery pass, same shape as the chunk pass: reset, then
/// signal every document whose summary is PENDING. Returns the number of
/// documents signaled.
pub async fn run_summary_maintenance(ctx: &PipelineContext) -> Result<usize> {
    let recovered = store_documents::reset_stale_and_failed_summaries(
        &ctx.pool,
        ctx.config.worker.summary_max_attempts,
        ctx.config.worker.stale_threshold_minutes,
    )
    .await?;
    let pending = store_documents::pending_summary_ids(&ctx.pool).await?;

    let documents: HashSet<_> = recovered.iter().copied().chain(pending).collect();
    if documents.is_empty() {
        return Ok(0);
    }

    info!(
        reset = recovered.len(),
        documents = documents.len(),
        "signaling documents with pending summaries"
    );
    for document_id in &documents {
        ctx.bus.summary_retry(*document_id);
    }
    Ok(documents.len())
}
