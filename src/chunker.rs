//! Paragraph-boundary text chunker with boundary overlap.
//!
//! Splits normalized manual text into overlapping segments bounded by size
//! and count. Splitting occurs on blank-line boundaries to preserve
//! semantic coherence; each chunk after the first is seeded with the tail
//! of its predecessor so retrieval keeps local context across splits.
//!
//! Pure and deterministic: the same input and options always produce the
//! same chunks, so re-ingestion is restartable with no hidden state.

#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    /// Target chunk size in characters.
    pub target_chars: usize,
    /// Characters of the previous chunk repeated at the start of the next.
    pub overlap_chars: usize,
    /// Hard cap on emitted chunks.
    pub max_chunks: usize,
}

impl From<&crate::config::ChunkingConfig> for ChunkOptions {
    fn from(c: &crate::config::ChunkingConfig) -> Self {
        Self {
            target_chars: c.target_chars,
            overlap_chars: c.overlap_chars,
            max_chunks: c.max_chunks,
        }
    }
}

/// Split text into overlapping chunks on paragraph boundaries.
///
/// When appending the next paragraph would push the running buffer past
/// `target_chars` (and the buffer is non-empty), the buffer is closed and
/// the next chunk starts with the closed chunk's last `overlap_chars`
/// characters followed by the paragraph that triggered the split. Input
/// with no paragraphs at all is emitted as a single chunk.
pub fn chunk_text(text: &str, opts: ChunkOptions) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if chunks.len() >= opts.max_chunks {
            break;
        }

        let would_be = if buf.is_empty() {
            para.chars().count()
        } else {
            buf.chars().count() + 2 + para.chars().count()
        };

        if would_be > opts.target_chars && !buf.is_empty() {
            let overlap = tail_chars(&buf, opts.overlap_chars).to_string();
            chunks.push(std::mem::take(&mut buf));
            if chunks.len() >= opts.max_chunks {
                return chunks;
            }
            buf = overlap;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() && chunks.len() < opts.max_chunks {
        chunks.push(buf);
    }

    // No paragraphs at all: the whole text is one chunk
    if chunks.is_empty() {
        chunks.push(text.trim().to_string());
    }

    chunks
}

/// Last `n` characters of `s`, on a char boundary.
fn tail_chars(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    if total <= n {
        return s;
    }
    match s.char_indices().nth(total - n) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}
