//! Recursive, separator-aware text chunker.
//!
//! Splits extracted document text into overlapping [`Chunk`]s of at most
//! `chunk_size` characters, preferring the most semantic boundary that
//! works: paragraph, line, sentence, word, and finally character.
//!
//! # Algorithm
//!
//! 1. A span longer than `chunk_size` is cut on the first separator from
//!    [`SEPARATORS`] that occurs in it. Every piece keeps its trailing
//!    separator, so pieces tile the text with no gaps.
//! 2. Pieces still longer than `chunk_size` are split again with the
//!    remaining (less semantic) separators. When none remain, the piece is
//!    cut at character boundaries.
//! 3. Pieces are merged greedily into chunks. When the next piece does not
//!    fit, the current window is emitted and pieces are dropped from its
//!    front until what is left fits in `overlap` and leaves room for the
//!    next piece. The leftover becomes the head of the next chunk.
//!
//! Offsets are tracked with the splitter's own cursor, so a paragraph that
//! repeats verbatim still gets its own position.
//!
//! # Example
//!
//! ```rust
//! use docrag_core::chunk::{split, ChunkingOptions};
//!
//! let opts = ChunkingOptions::new(1000, 200).unwrap();
//! let chunks = split("doc-1", "Hello world.\n\nSecond paragraph.", &opts);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].start_char, 0);
//! ```

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::error::ValidationError;
use crate::models::Chunk;

/// Separators from most to least semantic. Character boundary is the
/// implicit last resort.
pub const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// Validated chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingOptions {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingOptions {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ValidationError> {
        if chunk_size == 0 {
            return Err(ValidationError::new("chunk_size must be > 0"));
        }
        if overlap >= chunk_size {
            return Err(ValidationError::new(format!(
                "chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

/// Half-open byte range of the source text plus its length in characters.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

/// Split `text` into ordered chunks.
///
/// Empty or whitespace-only input yields no chunks. Chunks that would
/// consist only of whitespace are dropped.
pub fn split(document_id: &str, text: &str, opts: &ChunkingOptions) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    split_span(text, 0, text.len(), SEPARATORS, opts.chunk_size, &mut pieces);

    let spans: Vec<(usize, usize)> = merge_pieces(&pieces, opts)
        .into_iter()
        .filter(|&(start, end)| !text[start..end].trim().is_empty())
        .collect();

    let total = spans.len();
    let mut cursor = CharCursor::default();
    spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| {
            let start_char = cursor.advance_to(text, start);
            let slice = &text[start..end];
            let end_char = start_char + slice.chars().count();
            make_chunk(document_id, index, total, start_char, end_char, slice)
        })
        .collect()
}

fn split_span(
    text: &str,
    start: usize,
    end: usize,
    separators: &[&str],
    chunk_size: usize,
    out: &mut Vec<Piece>,
) {
    let span = &text[start..end];
    let chars = span.chars().count();
    if chars <= chunk_size {
        out.push(Piece { start, end, chars });
        return;
    }

    let Some(pos) = separators.iter().position(|sep| span.contains(sep)) else {
        split_chars(span, start, chunk_size, out);
        return;
    };
    let separator = separators[pos];
    let rest = &separators[pos + 1..];

    let mut piece_start = start;
    for (offset, _) in span.match_indices(separator) {
        let piece_end = start + offset + separator.len();
        split_span(text, piece_start, piece_end, rest, chunk_size, out);
        piece_start = piece_end;
    }
    if piece_start < end {
        split_span(text, piece_start, end, rest, chunk_size, out);
    }
}

/// Last resort: cut every `chunk_size` characters.
fn split_chars(span: &str, base: usize, chunk_size: usize, out: &mut Vec<Piece>) {
    let mut piece_start = base;
    let mut count = 0;
    for (offset, _) in span.char_indices() {
        if count == chunk_size {
            out.push(Piece {
                start: piece_start,
                end: base + offset,
                chars: count,
            });
            piece_start = base + offset;
            count = 0;
        }
        count += 1;
    }
    if count > 0 {
        out.push(Piece {
            start: piece_start,
            end: base + span.len(),
            chars: count,
        });
    }
}

fn merge_pieces(pieces: &[Piece], opts: &ChunkingOptions) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut window: VecDeque<Piece> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        if total + piece.chars > opts.chunk_size && !window.is_empty() {
            spans.push(window_span(&window));
            while total > opts.overlap || (total > 0 && total + piece.chars > opts.chunk_size) {
                match window.pop_front() {
                    Some(dropped) => total -= dropped.chars,
                    None => break,
                }
            }
        }
        window.push_back(*piece);
        total += piece.chars;
    }

    if !window.is_empty() {
        spans.push(window_span(&window));
    }
    spans
}

fn window_span(window: &VecDeque<Piece>) -> (usize, usize) {
    match (window.front(), window.back()) {
        (Some(first), Some(last)) => (first.start, last.end),
        _ => (0, 0),
    }
}

/// Converts monotonically increasing byte offsets to character offsets
/// without rescanning the prefix each time.
#[derive(Default)]
struct CharCursor {
    byte: usize,
    chars: usize,
}

impl CharCursor {
    fn advance_to(&mut self, text: &str, byte: usize) -> usize {
        if byte >= self.byte {
            self.chars += text[self.byte..byte].chars().count();
        } else {
            self.chars = text[..byte].chars().count();
        }
        self.byte = byte;
        self.chars
    }
}

fn make_chunk(
    document_id: &str,
    index: usize,
    total: usize,
    start_char: usize,
    end_char: usize,
    text: &str,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{document_id}_{index}"),
        document_id: document_id.to_string(),
        chunk_index: index,
        total_chunks: total,
        start_char,
        end_char,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn opts(size: usize, overlap: usize) -> ChunkingOptions {
        ChunkingOptions::new(size, overlap).unwrap()
    }

    /// Rebuilds the source from the non-overlapping tail of every chunk.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for c in chunks {
            assert!(
                c.start_char <= covered,
                "gap before chunk {}: starts at {}, covered {}",
                c.chunk_index,
                c.start_char,
                covered
            );
            out.extend(c.text.chars().skip(covered - c.start_char));
            covered = covered.max(c.end_char);
        }
        out
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(ChunkingOptions::new(100, 100).is_err());
        assert!(ChunkingOptions::new(100, 150).is_err());
        assert!(ChunkingOptions::new(0, 0).is_err());
        assert!(ChunkingOptions::new(100, 99).is_ok());
    }

    #[test]
    fn empty_and_whitespace_yield_nothing() {
        assert!(split("d", "", &opts(100, 10)).is_empty());
        assert!(split("d", "   \n\n\t  ", &opts(100, 10)).is_empty());
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = split("doc1", "Hello, world!", &opts(1000, 200));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "doc1_0");
        assert_eq!(chunks[0].total_chunks, 1);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, 13);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let para_a = "a".repeat(60);
        let para_b = "b".repeat(60);
        let text = format!("{para_a}\n\n{para_b}");
        let chunks = split("d", &text, &opts(100, 0));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, format!("{para_a}\n\n"));
        assert_eq!(chunks[1].text, para_b);
        assert_eq!(chunks[1].start_char, 62);
    }

    #[test]
    fn falls_back_to_sentences_inside_long_paragraph() {
        let text = "One short sentence here. Another short sentence here. A third one to finish.";
        let chunks = split("d", text, &opts(30, 0));
        assert!(chunks.len() >= 3);
        assert!(chunks[0].text.ends_with(". "));
        for c in &chunks {
            assert!(c.char_len() <= 30);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn single_token_longer_than_size_is_cut_at_characters() {
        // No separator can split this token, so the character fallback
        // applies and the size bound still holds.
        let token = "x".repeat(2500);
        let chunks = split("d", &token, &opts(1000, 200));
        let lens: Vec<usize> = chunks.iter().map(|c| c.char_len()).collect();
        assert_eq!(lens, vec![1000, 1000, 500]);
        assert_eq!(reconstruct(&chunks), token);
    }

    #[test]
    fn consecutive_chunks_overlap_within_budget() {
        let text = (0..40)
            .map(|i| format!("Sentence number {i} is here."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split("d", &text, &opts(200, 60));
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let overlap = pair[0].end_char.saturating_sub(pair[1].start_char);
            assert!(overlap > 0, "expected overlap between chunks");
            assert!(overlap <= 60, "overlap {overlap} exceeds budget");
        }
    }

    #[test]
    fn offsets_are_character_based_and_exact() {
        let text = "Первый абзац текста.\n\nВторой абзац текста.\n\nТретий абзац.";
        let chunks = split("d", text, &opts(25, 0));
        let chars: Vec<char> = text.chars().collect();
        for c in &chunks {
            let expected: String = chars[c.start_char..c.end_char].iter().collect();
            assert_eq!(c.text, expected);
        }
    }

    #[test]
    fn repeated_paragraphs_get_their_own_offsets() {
        let para = "Same words again.";
        let text = format!("{para}\n\n{para}\n\n{para}");
        let chunks = split("d", &text, &opts(20, 0));
        assert_eq!(chunks.len(), 3);
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_char).collect();
        assert_eq!(starts, vec![0, 19, 38]);
    }

    #[test]
    fn indices_contiguous_and_total_set() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {i}."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split("doc1", &text, &opts(60, 10));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.total_chunks, chunks.len());
            assert_eq!(c.id, format!("doc1_{i}"));
        }
    }

    #[test]
    fn deterministic_hashes() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let a = split("doc1", text, &opts(12, 0));
        let b = split("doc1", text, &opts(12, 0));
        assert_eq!(a, b);
        assert_eq!(a[0].hash.len(), 64);
    }

    fn text_strategy() -> impl Strategy<Value = String> {
        let sep = prop::sample::select(vec![" ", "\n", "\n\n", ". ", "! ", "? "]);
        prop::collection::vec(("[a-zA-Zа-я0-9]{1,12}", sep), 1..200).prop_map(|parts| {
            let mut text = String::new();
            let last = parts.len() - 1;
            for (i, (word, sep)) in parts.into_iter().enumerate() {
                text.push_str(&word);
                if i < last {
                    text.push_str(sep);
                }
            }
            text
        })
    }

    proptest! {
        #[test]
        fn coverage_reconstructs_source(text in text_strategy(), size in 20usize..300, pct in 0usize..100) {
            let opts = ChunkingOptions::new(size, size * pct / 100).unwrap();
            let chunks = split("d", &text, &opts);
            prop_assert_eq!(reconstruct(&chunks), text.clone());
            let total: usize = chunks.iter().map(|c| c.char_len()).sum();
            prop_assert!(total >= text.chars().count());
        }

        #[test]
        fn chunks_respect_size_bound(text in text_strategy(), size in 20usize..300, pct in 0usize..100) {
            let opts = ChunkingOptions::new(size, size * pct / 100).unwrap();
            for c in split("d", &text, &opts) {
                prop_assert!(c.char_len() <= size);
                prop_assert_eq!(c.text.chars().count(), c.char_len());
            }
        }
    }
}
