//! Recursive separator-priority text chunker.
//!
//! Splits extracted document text into overlapping passages of at most
//! `size + overlap` characters. Lengths are counted in Unicode scalar
//! values so a cut never lands inside a UTF-8 sequence.
//!
//! # Algorithm
//!
//! 1. Trim the input; empty input yields no chunks.
//! 2. If the text fits in `size`, it is the only chunk.
//! 3. Otherwise take the first separator (in priority order) that occurs
//!    in the text, split on it, and greedily re-join the pieces with that
//!    separator while the result stays within `size`.
//! 4. Any packed piece still longer than `size` is split again using only
//!    the separators after the one just used.
//! 5. When no separator applies, hard-cut every `size` characters.
//! 6. Overlap pass: chunk `i > 0` is prefixed with the last `overlap`
//!    characters of chunk `i - 1` and a space, then cut to
//!    `size + overlap` characters.
//!
//! # Example
//!
//! ```rust
//! use docchat_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", 800, 150);
//! assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph.".to_string()]);
//! ```

use sha2::{Digest, Sha256};

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

/// Separators tried in order: paragraph break, line break, sentence end,
/// space, then none (hard cut).
pub const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// A chunk ready to be embedded and stored as a passage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub ordinal: i64,
    pub text: String,
    /// Whitespace-delimited word count.
    pub token_estimate: i64,
    /// SHA-256 of `text`, hex-encoded.
    pub hash: String,
}

/// Split `text` into overlapping chunks.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || size == 0 {
        return Vec::new();
    }

    let chunks = split_recursive(text, SEPARATORS, size);
    apply_overlap(chunks, size, overlap)
}

/// Chunk `text` and attach contiguous ordinals, token estimates and hashes.
pub fn chunk_document(text: &str, size: usize, overlap: usize) -> Vec<ChunkDraft> {
    chunk_text(text, size, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, text)| ChunkDraft {
            ordinal: i as i64,
            token_estimate: estimate_tokens(&text),
            hash: hash_text(&text),
            text,
        })
        .collect()
}

/// Split without the overlap pass.
///
/// `separators` is threaded through the recursion; each oversized piece
/// is re-split using only the separators that follow the one that
/// produced it.
pub fn split_recursive(text: &str, separators: &[&str], size: usize) -> Vec<String> {
    if char_len(text) <= size {
        return vec![text.to_string()];
    }

    for (pos, sep) in separators.iter().enumerate() {
        if sep.is_empty() || !text.contains(sep) {
            continue;
        }

        let mut packed: Vec<String> = Vec::new();
        let mut current = String::new();
        for part in text.split(sep) {
            let candidate = if current.is_empty() {
                part.to_string()
            } else {
                format!("{current}{sep}{part}")
            };
            if char_len(&candidate) <= size {
                current = candidate;
            } else {
                if !current.is_empty() {
                    packed.push(std::mem::take(&mut current));
                }
                current = part.to_string();
            }
        }
        if !current.is_empty() {
            packed.push(current);
        }

        let narrower = &separators[pos + 1..];
        let mut out = Vec::with_capacity(packed.len());
        for piece in packed {
            if char_len(&piece) > size {
                out.extend(split_recursive(&piece, narrower, size));
            } else {
                out.push(piece);
            }
        }
        return out;
    }

    hard_split(text, size)
}

fn hard_split(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

fn apply_overlap(chunks: Vec<String>, size: usize, overlap: usize) -> Vec<String> {
    if overlap == 0 || chunks.len() <= 1 {
        return chunks;
    }

    let mut out = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push(chunk.clone());
            continue;
        }
        let prev = &chunks[i - 1];
        let tail = tail_chars(prev, overlap);
        let merged = format!("{tail} {chunk}");
        out.push(merged.chars().take(size + overlap).collect());
    }
    out
}

fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if len <= n {
        return s;
    }
    match s.char_indices().nth(len - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Token estimate used for stored passages: whitespace word count.
pub fn estimate_tokens(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
