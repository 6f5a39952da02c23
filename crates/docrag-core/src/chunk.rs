//! Space-separated text chunker with overlap.
//!
//! Splits extracted document text into bounded, overlapping chunks suitable
//! for embedding. The chunker is a pure function of its input text and its
//! [`ChunkerConfig`]: the same text always produces the same chunks.
//!
//! # Algorithm
//!
//! 1. Trim the input. Empty input produces no chunks.
//! 2. Split on spaces, keeping each space at the front of the piece that
//!    follows it (`"a b c"` → `"a"`, `" b"`, `" c"`).
//! 3. Merge consecutive pieces while the merged length stays within
//!    `chunk_size` characters.
//! 4. When the next piece does not fit, emit the merged text (trimmed) and
//!    drop pieces from the front until at most `chunk_overlap` characters
//!    remain, so the next chunk starts with the tail of the previous one.
//! 5. A single piece of `chunk_size` characters or more is hard-split into
//!    windows of `chunk_size` characters that step by
//!    `chunk_size - chunk_overlap`.
//!
//! Lengths are measured in `char`s, never bytes, so multi-byte text is
//! never split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use docrag_core::chunk::Chunker;
//!
//! let chunker = Chunker::default();
//! assert_eq!(chunker.chunk("  short text  "), vec!["short text".to_string()]);
//! ```

use std::collections::VecDeque;

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 100;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

const SEPARATOR: char = ' ';

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Deterministic text splitter. See the [module docs](self) for the algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Build a chunker. `chunk_size` is raised to at least 1 and
    /// `chunk_overlap` is capped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunk_overlap = chunk_overlap.min(chunk_size - 1);
        Self {
            config: ChunkerConfig {
                chunk_size,
                chunk_overlap,
            },
        }
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Split `text` into ordered chunks.
    ///
    /// Guarantees:
    /// - every chunk is at most `chunk_size` characters
    /// - no chunk has leading or trailing whitespace
    /// - the result is empty only when the trimmed input is empty
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let size = self.config.chunk_size;
        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in split_keep_separator(text, SEPARATOR) {
            if char_len(piece) < size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                self.merge_pieces(&fitting, &mut chunks);
                fitting.clear();
            }
            self.hard_split(piece, &mut chunks);
        }

        if !fitting.is_empty() {
            self.merge_pieces(&fitting, &mut chunks);
        }

        chunks
    }

    fn merge_pieces(&self, pieces: &[&str], out: &mut Vec<String>) {
        let ChunkerConfig {
            chunk_size,
            chunk_overlap,
        } = self.config;

        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > chunk_size && !window.is_empty() {
                push_joined(&window, out);
                while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }

        push_joined(&window, out);
    }

    fn hard_split(&self, piece: &str, out: &mut Vec<String>) {
        let chars: Vec<char> = piece.trim().chars().collect();
        let size = self.config.chunk_size;
        let step = size - self.config.chunk_overlap;

        let mut start = 0;
        while start < chars.len() {
            let end = (start + size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }
}

fn split_keep_separator(text: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == sep && i > start {
            pieces.push(&text[start..i]);
            start = i;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn push_joined(window: &VecDeque<&str>, out: &mut Vec<String>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
