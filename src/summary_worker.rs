//! Summary worker: claims a document's summary task and asks the chat
//! model for a short synopsis.

use anyhow::Result;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events::{PipelineContext, CHAT_LIMIT_KEY};
use crate::models::{Document, TaskStatus};
use crate::store_documents;

const SUMMARY_PROMPT: &str = "\
Summarize the following client document in two to three sentences. Focus on \
what the document is about and any decisions or follow-ups it records. Reply \
with the summary only.\n\nDocument:\n";

/// Claim the document's summary task and run it. A failed claim means the
/// task is already taken, already READY, or out of attempts; all of those
/// are a quiet no-op. Errors during generation mark the summary FAILED
/// with the error message, leaving the row to maintenance.
pub async fn generate_summary(ctx: &PipelineContext, document_id: Uuid) -> Result<()> {
    let claimed = store_documents::claim_for_summary(
        &ctx.pool,
        document_id,
        ctx.config.worker.summary_max_attempts,
    )
    .await?;
    let Some(document) = claimed else {
        return Ok(());
    };

    if let Err(e) = summarize(ctx, &document).await {
        error!(%document_id, error = %e, "summary generation failed");
        if let Err(mark_err) = store_documents::update_summary_status(
            &ctx.pool,
            document_id,
            TaskStatus::Failed,
            Some(&e.to_string()),
        )
        .await
        {
            error!(%document_id, error = %mark_err, "failed to record summary failure");
        }
    }
    Ok(())
}

async fn summarize(ctx: &PipelineContext, document: &Document) -> Result<()> {
    let content = document.content.trim();
    if content.is_empty() {
        warn!(document_id = %document.id, "document has no content to summarize");
        store_documents::update_summary_status(
            &ctx.pool,
            document.id,
            TaskStatus::Ready,
            Some("Empty content"),
        )
        .await?;
        return Ok(());
    }

    // Head truncation only; the cut is byte-budgeted, not word-aware.
    let max_chars = ctx.config.summary.max_chars;
    let head = if content.len() > max_chars {
        warn!(
            document_id = %document.id,
            length = content.len(),
            max_chars,
            "truncating document content for summarization"
        );
        &content[..floor_char_boundary(content, max_chars)]
    } else {
        content
    };

    let prompt = format!("{SUMMARY_PROMPT}{head}");
    let summary = ctx
        .chat_limiter
        .execute(CHAT_LIMIT_KEY, 1, || ctx.chat.chat(&prompt))
        .await?;

    store_documents::update_summary(&ctx.pool, document.id, summary.trim()).await?;
    info!(document_id = %document.id, "summary ready");
    Ok(())
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_char_boundary_ascii() {
        assert_eq!(floor_char_boundary("abcdef", 3), 3);
    }

    #[test]
    fn test_floor_char_boundary_backs_off_multibyte() {
        // 'ł' is two bytes; index 2 lands mid-character.
        let s = "złoty";
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert!(s.is_char_boundary(floor_char_boundary(s, 2)));
    }
}
