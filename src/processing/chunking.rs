//! Semantic chunking with positional overlap.
//!
//! Every page is split on its own, so a chunk never spans two pages:
//!
//! - Segmentation: `semchunk_rs` splits the page into pieces of at most
//!   `chunk_size - chunk_overlap` characters, preferring paragraph, line, sentence and word
//!   boundaries. Each piece is mapped back to its byte range in the page.
//! - Overlap: each chunk after the first reaches back into the preceding text by at most
//!   `chunk_overlap` characters (word-aligned, leading whitespace dropped) without passing the
//!   previous chunk's start.
//!
//! Chunks are therefore contiguous slices of the page, at most `chunk_size` characters long,
//! and adjacent chunks share at most `chunk_overlap` characters. The output is a pure function
//! of its inputs.

use super::types::{Chunk, ChunkingError};
use crate::documents::Page;
use semchunk_rs::Chunker;
use std::ops::Range;

/// Split pages into ordered chunks, inheriting source metadata.
///
/// Returns an empty vector for empty input.
pub fn split_pages(
    pages: &[Page],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    validate(chunk_size, chunk_overlap)?;

    let chunker = segmenter(chunk_size, chunk_overlap);
    let mut chunks = Vec::new();
    for page in pages {
        for range in split_ranges(&chunker, &page.text, chunk_size, chunk_overlap) {
            chunks.push(Chunk {
                text: page.text[range.clone()].to_string(),
                source_name: page.source_name.clone(),
                page_number: page.page_number,
                chunk_index: chunks.len(),
                start: range.start,
                end: range.end,
            });
        }
    }
    Ok(chunks)
}

/// Split a single text into chunk byte ranges.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Range<usize>>, ChunkingError> {
    validate(chunk_size, chunk_overlap)?;
    let chunker = segmenter(chunk_size, chunk_overlap);
    Ok(split_ranges(&chunker, text, chunk_size, chunk_overlap))
}

fn validate(chunk_size: usize, chunk_overlap: usize) -> Result<(), ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if chunk_overlap >= chunk_size {
        return Err(ChunkingError::OverlapTooLarge {
            overlap: chunk_overlap,
            chunk_size,
        });
    }
    Ok(())
}

/// Segments leave room for the overlap that is added afterwards.
fn segmenter(chunk_size: usize, chunk_overlap: usize) -> Chunker {
    Chunker::new(
        chunk_size - chunk_overlap,
        Box::new(|segment: &str| segment.chars().count()),
    )
}

fn split_ranges(
    chunker: &Chunker,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Range<usize>> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut cursor = 0;
    for piece in chunker.chunk(text) {
        let Some(range) = locate(text, cursor, &piece) else {
            tracing::warn!(piece_chars = char_len(&piece), "Chunk piece not found in page text");
            continue;
        };
        cursor = range.end;
        segments.push(clamp(text, range, chunk_size));
    }
    apply_overlap(text, segments, chunk_size, chunk_overlap)
}

/// Byte range of `piece` in `text`, searching forward from `cursor`.
///
/// Pieces normally appear verbatim. When the splitter rejoined a piece with different
/// whitespace or dropped a separator, the piece's visible characters are matched in order
/// instead.
fn locate(text: &str, cursor: usize, piece: &str) -> Option<Range<usize>> {
    let needle = piece.trim();
    if needle.is_empty() {
        return None;
    }
    if let Some(offset) = text[cursor..].find(needle) {
        let start = cursor + offset;
        return Some(start..start + needle.len());
    }

    let mut wanted = needle.chars().filter(|c| !c.is_whitespace());
    let first = wanted.next()?;
    let start = cursor + text[cursor..].find(first)?;
    let mut end = start + first.len_utf8();
    let mut rest = text[end..].char_indices();
    for expected in wanted {
        let (offset, c) = rest.find(|(_, c)| !c.is_whitespace())?;
        if c != expected {
            return None;
        }
        end = start + first.len_utf8() + offset + c.len_utf8();
    }
    Some(start..end)
}

/// Cut a range down to at most `limit` characters, keeping its start.
fn clamp(text: &str, range: Range<usize>, limit: usize) -> Range<usize> {
    let slice = &text[range.clone()];
    match slice.char_indices().nth(limit) {
        Some((offset, _)) => {
            let kept = slice[..offset].trim_end();
            range.start..range.start + kept.len()
        }
        None => range,
    }
}

fn apply_overlap(
    text: &str,
    segments: Vec<Range<usize>>,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Range<usize>> {
    if chunk_overlap == 0 {
        return segments;
    }

    let mut chunks: Vec<Range<usize>> = Vec::with_capacity(segments.len());
    for segment in segments {
        let start = match chunks.last() {
            Some(previous) => {
                let room = chunk_size
                    .saturating_sub(char_len(&text[segment.clone()]))
                    .min(chunk_overlap);
                overlap_start(text, previous.start, segment.start, room)
            }
            None => segment.start,
        };
        chunks.push(start..segment.end);
    }
    chunks
}

/// Earliest start within `floor..start` that adds at most `room` characters of context.
fn overlap_start(text: &str, floor: usize, start: usize, room: usize) -> usize {
    if room == 0 || floor >= start {
        return start;
    }

    let head = &text[floor..start];
    let mut candidate = start;
    for (taken, (offset, _)) in head.char_indices().rev().enumerate() {
        if taken >= room {
            break;
        }
        candidate = floor + offset;
    }

    // Avoid starting mid-word when the window cut through one.
    let mid_word = candidate > floor
        && text[..candidate]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_whitespace());
    if mid_word {
        if let Some(space) = text[candidate..start].find(char::is_whitespace) {
            candidate += space;
        }
    }

    let extension = &text[candidate..start];
    start - extension.trim_start().len()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
