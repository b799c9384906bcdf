//! Overlapping token-window chunker.
//!
//! Splits extracted [`TextSegment`]s into [`TextChunk`]s of roughly
//! `chunk_size` tokens, with consecutive chunks sharing up to `overlap`
//! tokens so context survives the boundary.
//!
//! # Algorithm
//!
//! 1. Each segment is cut into units: a word plus its trailing whitespace.
//!    Words longer than a whole chunk are hard-split on char boundaries.
//! 2. Each unit costs `ceil(chars / 4)` tokens (at least 1).
//! 3. A window is packed greedily until the next unit would exceed
//!    `chunk_size`.
//! 4. The next window starts at the earliest unit such that the units from
//!    there to the end of the previous window cost at most `overlap`. It
//!    always starts strictly after the previous window did.
//! 5. Chunks take the page and section of their first unit's segment.
//!
//! The output depends only on the input text and the two sizes, so
//! re-running over the same document yields identical boundaries.
//!
//! # Example
//!
//! ```rust
//! use rag_ingest::chunk::Chunker;
//! use rag_ingest::extract::TextSegment;
//!
//! let chunker = Chunker::new(512, 100);
//! let chunks = chunker.chunk(&[TextSegment::new("Hello world.")]);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use crate::config::ChunkingConfig;
use crate::extract::TextSegment;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token estimate: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// A chunk of document text, before enrichment and embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
    /// Indices of the first and last contributing segments.
    pub segments: (usize, usize),
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

struct Unit<'a> {
    segment: usize,
    text: &'a str,
    cost: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size_tokens, config.overlap_tokens)
    }

    /// Split segments into chunks with contiguous indices starting at 0.
    ///
    /// An empty document yields no chunks.
    pub fn chunk(&self, segments: &[TextSegment]) -> Vec<TextChunk> {
        let units = self.units(segments);
        let n = units.len();
        let mut chunks = Vec::new();
        if n == 0 {
            return chunks;
        }

        let mut start = 0;
        loop {
            let mut end = start;
            let mut cost = 0;
            while end < n && (end == start || cost + units[end].cost <= self.chunk_size) {
                cost += units[end].cost;
                end += 1;
            }

            chunks.push(self.make_chunk(chunks.len(), &units[start..end], segments));
            if end == n {
                break;
            }

            let mut next = end;
            let mut carried = 0;
            while next > start + 1 && carried + units[next - 1].cost <= self.overlap {
                carried += units[next - 1].cost;
                next -= 1;
            }
            start = next;
        }

        chunks
    }

    fn units<'a>(&self, segments: &'a [TextSegment]) -> Vec<Unit<'a>> {
        let max_chars = self.chunk_size * CHARS_PER_TOKEN;
        let mut units = Vec::new();
        for (segment, seg) in segments.iter().enumerate() {
            for word in split_words(&seg.text) {
                for piece in hard_split(word, max_chars) {
                    units.push(Unit {
                        segment,
                        text: piece,
                        cost: estimate_tokens(piece).max(1),
                    });
                }
            }
        }
        units
    }

    fn make_chunk(&self, index: usize, units: &[Unit<'_>], segments: &[TextSegment]) -> TextChunk {
        let mut text = String::new();
        let mut prev_segment = units[0].segment;
        for unit in units {
            if unit.segment != prev_segment {
                text.truncate(text.trim_end().len());
                text.push_str("\n\n");
                prev_segment = unit.segment;
            }
            text.push_str(unit.text);
        }

        let first = &segments[units[0].segment];
        TextChunk {
            chunk_index: index,
            text: text.trim().to_string(),
            token_count: units.iter().map(|u| u.cost).sum(),
            page_number: first.page_number,
            section_title: first.section_title.clone(),
            segments: (units[0].segment, units[units.len() - 1].segment),
        }
    }
}

/// Words with their trailing whitespace. Leading whitespace sticks to the
/// first word.
fn split_words(text: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = 0;
    let mut prev_ws = false;
    let mut seen_word = false;
    for (i, c) in text.char_indices() {
        let ws = c.is_whitespace();
        if !ws && prev_ws && seen_word {
            words.push(&text[start..i]);
            start = i;
        }
        if !ws {
            seen_word = true;
        }
        prev_ws = ws;
    }
    if start < text.len() && seen_word {
        words.push(&text[start..]);
    }
    words
}

fn hard_split(word: &str, max_chars: usize) -> Vec<&str> {
    if word.chars().count() <= max_chars {
        return vec![word];
    }
    let mut pieces = Vec::new();
    let mut rest = word;
    while !rest.is_empty() {
        let cut = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        pieces.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["abc"; n].join(" ")
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_empty_document_has_no_chunks() {
        let chunker = Chunker::new(512, 100);
        assert!(chunker.chunk(&[]).is_empty());
        assert!(chunker.chunk(&[TextSegment::new("   \n ")]).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = Chunker::new(512, 100).chunk(&[TextSegment::new("Hello, world!")]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].token_count, 4);
    }

    #[test]
    fn test_1536_tokens_make_four_overlapping_chunks() {
        let chunks = Chunker::new(512, 100).chunk(&[TextSegment::new(words(1536))]);
        assert_eq!(chunks.len(), 4);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.token_count).collect();
        assert_eq!(sizes, vec![512, 512, 512, 300]);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn test_consecutive_chunks_share_overlap() {
        let text: String = (0..300)
            .map(|i| format!("w{:03}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = Chunker::new(100, 20).chunk(&[TextSegment::new(text)]);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: Vec<&str> = pair[0].text.split_whitespace().rev().take(10).collect();
            for w in tail {
                assert!(pair[1].text.contains(w), "overlap missing {}", w);
            }
        }
    }

    #[test]
    fn test_remainder_is_kept() {
        let chunks = Chunker::new(10, 0).chunk(&[TextSegment::new(words(23))]);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.token_count).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
    }

    #[test]
    fn test_chunk_inherits_first_segment_metadata() {
        let segments = vec![
            TextSegment {
                page_number: Some(1),
                section_title: Some("Intro".to_string()),
                ..TextSegment::new(words(8))
            },
            TextSegment {
                page_number: Some(2),
                section_title: Some("Body".to_string()),
                ..TextSegment::new(words(8))
            },
        ];
        let chunks = Chunker::new(12, 2).chunk(&segments);
        assert_eq!(chunks[0].page_number, Some(1));
        assert_eq!(chunks[0].segments, (0, 1));
        assert!(chunks[0].text.contains("abc\n\nabc"));
        assert_eq!(chunks[1].page_number, Some(2));
        assert_eq!(chunks[1].section_title.as_deref(), Some("Body"));
    }

    #[test]
    fn test_long_word_is_hard_split() {
        let long = "x".repeat(50);
        let chunks = Chunker::new(5, 0).chunk(&[TextSegment::new(long)]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 20);
        assert_eq!(chunks[2].text.len(), 10);
    }

    #[test]
    fn test_preserves_line_structure() {
        let table = "| a | b |\n|---|---|\n| 1 | 2 |";
        let chunks = Chunker::new(512, 100).chunk(&[TextSegment::new(table)]);
        assert_eq!(chunks[0].text, table);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon.\n\nZeta eta theta iota kappa.";
        let chunker = Chunker::new(5, 2);
        let c1 = chunker.chunk(&[TextSegment::new(text)]);
        let c2 = chunker.chunk(&[TextSegment::new(text)]);
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_overlap_is_clamped_below_chunk_size() {
        let chunks = Chunker::new(3, 10).chunk(&[TextSegment::new(words(9))]);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
        assert_eq!(chunks.last().unwrap().text.split_whitespace().count(), 3);
    }
}
