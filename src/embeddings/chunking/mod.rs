
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for passage chunking.
///
/// Sizes are in characters, not tokens; the embedding backends we target
/// accept raw text and the retrieval contract is character-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Target passage size in characters.
    pub max_characters: usize,
    /// Characters shared between consecutive passages.
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_characters: 1000,
            overlap_characters: 200,
        }
    }
}

/// Split a text blob into overlapping passages ready for embedding.
///
/// Returns an empty vector for empty or whitespace-only input; callers treat
/// zero chunks as "nothing to index", not an error. Each passage is at most
/// `max_characters` long, and consecutive passages share roughly
/// `overlap_characters` so no semantic unit is silently cut at a boundary.
/// Splits prefer paragraph breaks, then sentence ends, then whitespace,
/// before falling back to a hard cut at a UTF-8 character boundary.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let max = config.max_characters.max(1);
    let overlap = config.overlap_characters.min(max.saturating_sub(1));

    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let window_end = floor_char_boundary(text, (start + max).min(text.len()));
        let end = if window_end == text.len() {
            window_end
        } else {
            find_split_point(text, start, window_end)
        };

        let chunk = text[start..end].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end == text.len() {
            break;
        }

        // Step back by the overlap, snapped forward to a word start so the
        // next passage does not open mid-word.
        let mut next = floor_char_boundary(text, end.saturating_sub(overlap));
        if next > start {
            next = align_to_word_start(text, next, end);
        }
        start = if next > start { next } else { end };
    }

    debug!(
        "Chunked {} chars into {} passages (max {}, overlap {})",
        text.len(),
        chunks.len(),
        max,
        overlap
    );

    chunks
}

/// Pick the best split point in `text[start..limit]`, preferring natural
/// boundaries near the end of the window.
fn find_split_point(text: &str, start: usize, limit: usize) -> usize {
    let window = &text[start..limit];
    // Only accept a boundary in the back half of the window so passages do
    // not collapse to fragments when boundaries cluster early.
    let min_len = window.len() / 2;

    if let Some(pos) = window.rfind("\n\n") {
        if pos >= min_len {
            return start + pos;
        }
    }

    let sentence_end = ['.', '!', '?']
        .iter()
        .filter_map(|p| window.rfind(*p))
        .max();
    if let Some(pos) = sentence_end {
        if pos >= min_len {
            // Split after the punctuation mark.
            return start + pos + p_len(window, pos);
        }
    }

    if let Some(pos) = window.rfind(char::is_whitespace) {
        if pos >= min_len {
            return start + pos;
        }
    }

    limit
}

fn p_len(window: &str, pos: usize) -> usize {
    window[pos..].chars().next().map_or(1, char::len_utf8)
}

/// Move `pos` forward to the start of the next word, staying below `end`.
fn align_to_word_start(text: &str, pos: usize, end: usize) -> usize {
    match text[pos..end].find(char::is_whitespace) {
        Some(offset) => {
            let ws = pos + offset;
            let after = ws + p_len(text, ws);
            if after < end { after } else { pos }
        }
        None => pos,
    }
}

/// Largest index `<= index` that lies on a UTF-8 character boundary.
#[inline]
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
