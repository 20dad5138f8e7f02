//! Separator-priority text chunker with overlap.
//!
//! Splits document body text into chunks that respect a configurable
//! `chunk_size` limit. Splitting prefers the highest-priority separator that
//! keeps a piece within the limit — paragraph break, then line break, then
//! sentence terminator, then whitespace — falling back to a hard character
//! cut when nothing fits. Each chunk after the first begins with the trailing
//! `overlap` characters (snapped to the nearest separator boundary) of its
//! predecessor.
//!
//! Splitting is deterministic: the same input and parameters always produce
//! the identical chunk sequence. Each produced [`Chunk`] receives a UUID and
//! a SHA-256 hash of its text for staleness detection.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::{PipelineError, Result};
use crate::models::Chunk;

/// Separators in priority order. A hard character cut is the final fallback.
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

/// Split text into chunk strings of at most `chunk_size` bytes.
///
/// Adjacent chunks share a trailing/leading overlap window of up to
/// `overlap` bytes, kept on separator boundaries. Returns an empty sequence
/// for empty input. `overlap >= chunk_size` is a configuration error.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    if chunk_size == 0 {
        return Err(PipelineError::config("chunk_size must be > 0"));
    }
    if overlap >= chunk_size {
        return Err(PipelineError::config(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let pieces = split_pieces(text, chunk_size, &SEPARATORS);

    // Merge pieces into chunks, retaining a trailing window of whole pieces
    // (totaling at most `overlap` bytes) as the seed of the next chunk.
    let mut chunks: Vec<String> = Vec::new();
    let mut window: Vec<String> = Vec::new();
    let mut window_len = 0usize;

    for piece in pieces {
        let piece_len = piece.len();

        if !window.is_empty() && window_len + piece_len > chunk_size {
            push_chunk(&mut chunks, &window);

            while window_len > overlap
                || (window_len + piece_len > chunk_size && !window.is_empty())
            {
                let removed = window.remove(0);
                window_len -= removed.len();
            }
        }

        window.push(piece);
        window_len += piece_len;
    }

    push_chunk(&mut chunks, &window);
    Ok(chunks)
}

fn push_chunk(chunks: &mut Vec<String>, window: &[String]) {
    let joined = window.concat();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Recursively split `text` into pieces of at most `chunk_size` bytes using
/// the highest-priority separator present, keeping separators attached to
/// the preceding piece so that concatenating pieces reproduces the input.
fn split_pieces(text: &str, chunk_size: usize, separators: &[&str]) -> Vec<String> {
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let Some((sep, rest)) = separators.split_first() else {
        return hard_cut(text, chunk_size);
    };

    if !text.contains(sep) {
        return split_pieces(text, chunk_size, rest);
    }

    let mut out = Vec::new();
    for part in text.split_inclusive(sep) {
        if part.len() <= chunk_size {
            out.push(part.to_string());
        } else {
            out.extend(split_pieces(part, chunk_size, rest));
        }
    }
    out
}

/// Cut at `chunk_size`-byte intervals, snapped down to char boundaries.
fn hard_cut(text: &str, chunk_size: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= chunk_size {
            out.push(rest.to_string());
            break;
        }
        let mut cut = chunk_size;
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // Single char wider than chunk_size; it becomes its own piece.
            cut = rest.chars().next().map(|c| c.len_utf8()).unwrap_or(rest.len());
        }
        out.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    out
}

/// Split a document body into [`Chunk`]s with contiguous indices from 0.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    chunking: &ChunkingConfig,
) -> Result<Vec<Chunk>> {
    let parts = split(text, chunking.chunk_size, chunking.overlap)?;

    Ok(parts
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(document_id, i as i64, text))
        .collect())
}

fn make_chunk(document_id: &str, index: i64, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text,
        hash,
    }
}
