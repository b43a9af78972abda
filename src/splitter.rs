//! Deterministic text splitter used at ingestion time.
//!
//! Produces segments of at most `chunk_size` characters with
//! `chunk_overlap` characters carried over between consecutive segments.
//! Splits prefer word boundaries (space or newline) so terms are not cut
//! mid-word unless a single word exceeds the whole budget. No side effects,
//! same input always yields the same segments.

/// Split `content` into ordered segments. Blank content yields no segments.
pub fn split(content: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    // Degenerate sizes are clamped rather than panicking; config
    // validation rules them out for the normal call path.
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size - 1);

    let text = content.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut segments = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let hard_end = prev_char_boundary(text, (start + chunk_size).min(text.len()));

        let end = if hard_end < text.len() {
            // Prefer the last word boundary inside the window.
            match text[start..hard_end].rfind([' ', '\n']) {
                Some(pos) if pos > 0 => start + pos,
                _ => hard_end,
            }
        } else {
            hard_end
        };

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            segments.push(piece.to_string());
        }

        if end >= text.len() {
            break;
        }

        // Step back by the overlap, but always make forward progress.
        let next = end.saturating_sub(chunk_overlap).max(start + 1);
        start = next_char_boundary(text, next);
    }

    segments
}

fn prev_char_boundary(text: &str, mut i: usize) -> usize {
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}
