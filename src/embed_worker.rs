//! Embedding worker: drains a document's PENDING chunks, extracts search
//! terms with the chat model, embeds them, and flips the document READY
//! once every chunk has settled.

use anyhow::Result;
use tracing::{error, info};
use uuid::Uuid;

use crate::events::{PipelineContext, CHAT_LIMIT_KEY, EMBEDDING_LIMIT_KEY};
use crate::models::{DocumentChunk, TaskStatus};
use crate::{store_chunks, store_documents};

const TERM_EXTRACTION_PROMPT: &str = "\
You are a data analyst for a client relationship platform used by financial \
advisors. From the document excerpt below, extract the key terms a colleague \
would search for later: topics, financial products, life events, institutions, \
goals and concerns. Skip personally identifying details such as names, \
addresses, account numbers or phone numbers. Reply with the terms only, \
separated by commas, with no numbering and no commentary. If the excerpt \
contains nothing worth indexing, reply with an empty line.\n\nExcerpt:\n";

/// Process every chunk that was PENDING for this document when the signal
/// arrived. Each chunk is claimed individually, so concurrent runs for the
/// same document never double-process a row; a claim that comes back empty
/// means another worker drained the queue first.
pub async fn generate_for_document(ctx: &PipelineContext, document_id: Uuid) -> Result<()> {
    let total_pending = store_chunks::count_pending(&ctx.pool, document_id).await?;
    if total_pending == 0 {
        return Ok(());
    }
    info!(%document_id, pending = total_pending, "embedding pending chunks");

    for _ in 0..total_pending {
        let claimed = store_chunks::claim_next_pending(
            &ctx.pool,
            document_id,
            ctx.config.worker.embed_max_attempts,
        )
        .await?;
        let Some(chunk) = claimed else {
            break;
        };
        process_chunk(ctx, &chunk).await;
    }
    Ok(())
}

/// One chunk, with failure isolation: an error marks this chunk FAILED
/// and the loop keeps going. Attempts were already counted at claim time.
async fn process_chunk(ctx: &PipelineContext, chunk: &DocumentChunk) {
    if let Err(e) = embed_chunk(ctx, chunk).await {
        error!(chunk_id = %chunk.id, document_id = %chunk.document_id, error = %e, "chunk embedding failed");
        if let Err(mark_err) =
            store_chunks::mark_failed(&ctx.pool, chunk.id, &e.to_string()).await
        {
            error!(chunk_id = %chunk.id, error = %mark_err, "failed to record chunk failure");
        }
    }
}

async fn embed_chunk(ctx: &PipelineContext, chunk: &DocumentChunk) -> Result<()> {
    let terms = ctx
        .chat_limiter
        .execute(CHAT_LIMIT_KEY, 1, || extract_terms(ctx, &chunk.content))
        .await?;

    if terms.is_empty() {
        // Nothing worth indexing in this chunk. It still counts toward
        // document completion.
        store_chunks::update_status(&ctx.pool, chunk.id, TaskStatus::Ready).await?;
        finish_if_complete(ctx, chunk.document_id).await?;
        return Ok(());
    }

    let estimated_tokens = estimate_tokens(&terms);
    let vectors = ctx
        .embedding_limiter
        .execute(EMBEDDING_LIMIT_KEY, estimated_tokens, || {
            ctx.embedder.embed_all(&terms)
        })
        .await?;

    for (term, vector) in terms.iter().zip(vectors.iter()) {
        store_chunks::insert_embedding(&ctx.pool, chunk.document_id, chunk.id, term, vector)
            .await?;
    }

    store_chunks::update_status(&ctx.pool, chunk.id, TaskStatus::Ready).await?;
    finish_if_complete(ctx, chunk.document_id).await
}

async fn extract_terms(ctx: &PipelineContext, content: &str) -> Result<Vec<String>> {
    let prompt = format!("{TERM_EXTRACTION_PROMPT}{content}");
    let reply = ctx.chat.chat(&prompt).await?;
    Ok(parse_terms(&reply))
}

/// The model replies with a comma-separated line; tolerate stray
/// whitespace and empty entries.
fn parse_terms(reply: &str) -> Vec<String> {
    reply
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rough token estimate for the embedding cost window, one token per
/// four characters of input.
fn estimate_tokens(terms: &[String]) -> u32 {
    let chars: usize = terms.iter().map(String::len).sum();
    ((chars / 4).max(1)) as u32
}

async fn finish_if_complete(ctx: &PipelineContext, document_id: Uuid) -> Result<()> {
    if store_chunks::all_chunks_ready(&ctx.pool, document_id).await? {
        info!(%document_id, "all chunks ready, marking document READY");
        store_documents::update_status(&ctx.pool, document_id, TaskStatus::Ready).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_terms_splits_and_trims() {
        let terms = parse_terms(" retirement planning , 401k rollover,estate tax ");
        assert_eq!(
            terms,
            vec!["retirement planning", "401k rollover", "estate tax"]
        );
    }

    #[test]
    fn test_parse_terms_drops_empty_entries() {
        assert_eq!(parse_terms("a,,b, ,"), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_terms_blank_reply_is_empty() {
        assert!(parse_terms("").is_empty());
        assert!(parse_terms("  \n ").is_empty());
    }

    #[test]
    fn test_estimate_tokens_floors_at_one() {
        assert_eq!(estimate_tokens(&["ab".to_string()]), 1);
        let terms = vec!["x".repeat(40), "y".repeat(40)];
        assert_eq!(estimate_tokens(&terms), 20);
    }
}
