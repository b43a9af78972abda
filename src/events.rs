//! In-process signals and the worker-pool runtime.
//!
//! Ingestion and the maintenance scheduler publish document ids onto
//! fire-and-forget channels; the embedding and summary workers consume
//! them under a shared concurrency bound. A lost signal is not fatal:
//! the maintenance scheduler re-discovers eligible rows on its own, and
//! [`rearm_backlog`] re-signals any PENDING backlog at startup.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::limiter::DualRateLimiter;
use crate::provider::{ChatModel, EmbeddingModel};
use crate::{embed_worker, store_chunks, store_documents, summary_worker};

/// Rate-limit key for the chat capability.
pub const CHAT_LIMIT_KEY: &str = "chat";
/// Rate-limit key for the embedding capability.
pub const EMBEDDING_LIMIT_KEY: &str = "embedding";

/// Sender half of the signal bus. Cheap to clone; every publish is
/// fire-and-forget.
#[derive(Clone)]
pub struct SignalBus {
    embed_tx: mpsc::UnboundedSender<Uuid>,
    summary_tx: mpsc::UnboundedSender<Uuid>,
}

/// Receiver half, consumed once by [`run_pipeline`].
pub struct SignalReceivers {
    pub embed_rx: mpsc::UnboundedReceiver<Uuid>,
    pub summary_rx: mpsc::UnboundedReceiver<Uuid>,
}

pub fn signal_bus() -> (SignalBus, SignalReceivers) {
    let (embed_tx, embed_rx) = mpsc::unbounded_channel();
    let (summary_tx, summary_rx) = mpsc::unbounded_channel();
    (
        SignalBus {
            embed_tx,
            summary_tx,
        },
        SignalReceivers {
            embed_rx,
            summary_rx,
        },
    )
}

impl SignalBus {
    /// Published by ingestion after its transaction commits; wakes both
    /// workers for the document.
    pub fn document_ingested(&self, document_id: Uuid) {
        let _ = self.embed_tx.send(document_id);
        let _ = self.summary_tx.send(document_id);
    }

    /// Published by chunk maintenance, one per recovered document.
    pub fn chunk_retry(&self, document_id: Uuid) {
        let _ = self.embed_tx.send(document_id);
    }

    /// Published by summary maintenance, one per recovered document.
    pub fn summary_retry(&self, document_id: Uuid) {
        let _ = self.summary_tx.send(document_id);
    }
}

/// Everything a worker needs: storage, configuration, model capabilities,
/// per-capability rate limiters, and the bus for follow-up signals.
pub struct PipelineContext {
    pub pool: SqlitePool,
    pub config: Config,
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub chat_limiter: Arc<DualRateLimiter>,
    pub embedding_limiter: Arc<DualRateLimiter>,
    pub bus: SignalBus,
}

impl PipelineContext {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        bus: SignalBus,
    ) -> Self {
        let chat_limiter = Arc::new(DualRateLimiter::new(
            config.limits.chat_rpm,
            config.limits.chat_cost_per_min,
        ));
        let embedding_limiter = Arc::new(DualRateLimiter::new(
            config.limits.embedding_rpm,
            config.limits.embedding_cost_per_min,
        ));

        Self {
            pool,
            config,
            chat,
            embedder,
            chat_limiter,
            embedding_limiter,
            bus,
        }
    }
}

#[derive(Clone, Copy)]
enum WorkerKind {
    Embedding,
    Summary,
}

impl WorkerKind {
    fn name(self) -> &'static str {
        match self {
            WorkerKind::Embedding => "embedding",
            WorkerKind::Summary => "summary",
        }
    }
}

/// Re-signal any backlog the process may have lost while it was down:
/// documents with PENDING chunks and documents with a PENDING summary.
pub async fn rearm_backlog(ctx: &PipelineContext) -> Result<()> {
    let chunk_docs = store_chunks::pending_document_ids(&ctx.pool).await?;
    let summary_docs = store_documents::pending_summary_ids(&ctx.pool).await?;

    if !chunk_docs.is_empty() || !summary_docs.is_empty() {
        info!(
            chunk_documents = chunk_docs.len(),
            summary_documents = summary_docs.len(),
            "re-arming pending backlog"
        );
    }

    for id in chunk_docs {
        ctx.bus.chunk_retry(id);
    }
    for id in summary_docs {
        ctx.bus.summary_retry(id);
    }
    Ok(())
}

/// Run both worker dispatch loops until every bus sender is dropped.
///
/// Each signal claims a semaphore permit before spawning, so at most
/// `worker.concurrency` documents are in flight per worker kind.
pub async fn run_pipeline(ctx: Arc<PipelineContext>, receivers: SignalReceivers) {
    let concurrency = ctx.config.worker.concurrency;

    let embed = tokio::spawn(dispatch(
        ctx.clone(),
        receivers.embed_rx,
        Arc::new(Semaphore::new(concurrency)),
        WorkerKind::Embedding,
    ));
    let summary = tokio::spawn(dispatch(
        ctx.clone(),
        receivers.summary_rx,
        Arc::new(Semaphore::new(concurrency)),
        WorkerKind::Summary,
    ));

    let _ = embed.await;
    let _ = summary.await;
}

async fn dispatch(
    ctx: Arc<PipelineContext>,
    mut rx: mpsc::UnboundedReceiver<Uuid>,
    semaphore: Arc<Semaphore>,
    kind: WorkerKind,
) {
    while let Some(document_id) = rx.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = match kind {
                WorkerKind::Embedding => {
                    embed_worker::generate_for_document(&ctx, document_id).await
                }
                WorkerKind::Summary => summary_worker::generate_summary(&ctx, document_id).await,
            };
            if let Err(e) = result {
                error!(
                    worker = kind.name(),
                    %document_id,
                    error = %e,
                    "worker run failed"
                );
            }
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_fans_ingestion_out_to_both_workers() {
        let (bus, mut receivers) = signal_bus();
        let id = Uuid::new_v4();
        bus.document_ingested(id);

        assert_eq!(receivers.embed_rx.recv().await, Some(id));
        assert_eq!(receivers.summary_rx.recv().await, Some(id));
    }

    #[tokio::test]
    async fn test_retry_signals_target_one_worker() {
        let (bus, mut receivers) = signal_bus();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        bus.chunk_retry(a);
        bus.summary_retry(b);

        assert_eq!(receivers.embed_rx.recv().await, Some(a));
        assert_eq!(receivers.summary_rx.recv().await, Some(b));
        assert!(receivers.embed_rx.try_recv().is_err());
        assert!(receivers.summary_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_without_receiver_is_not_fatal() {
        let (bus, receivers) = signal_bus();
        drop(receivers);
        // Fire-and-forget even when nobody is listening.
        bus.document_ingested(Uuid::new_v4());
    }
}
