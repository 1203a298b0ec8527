//! Text chunking for the split stage.
//!
//! Splits normalized document text into chunks sized for embedding. The
//! paragraph strategy splits at blank-line boundaries, merges runt
//! paragraphs into their neighbor, and hard-splits oversized paragraphs at
//! UTF-8-safe boundaries. Offsets are byte positions into the original
//! text.

use granary_core::defaults;

/// Configuration for chunking strategies.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum size of a chunk in bytes.
    pub max_chunk_size: usize,
    /// Minimum size of a chunk in bytes (smaller chunks are merged forward).
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: defaults::CHUNK_SIZE,
            min_chunk_size: defaults::CHUNK_MIN_SIZE,
        }
    }
}

/// A text chunk with position information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The text content of the chunk.
    pub text: String,
    /// Starting byte offset in the original document.
    pub start_offset: usize,
    /// Ending byte offset in the original document.
    pub end_offset: usize,
}

/// Common trait for chunking strategies.
pub trait Chunker: Send + Sync {
    /// Chunk the given text.
    fn chunk(&self, text: &str) -> Vec<Chunk>;

    /// The configuration used by this chunker.
    fn config(&self) -> &ChunkerConfig;
}

/// Splits text at paragraph boundaries (blank lines).
pub struct ParagraphChunker {
    config: ChunkerConfig,
}

impl ParagraphChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        let max = self.config.max_chunk_size.max(1);
        let min = self.config.min_chunk_size;
        let mut chunks: Vec<Chunk> = Vec::new();

        for (start, end) in paragraph_spans(text) {
            if end - start > max {
                // Oversized paragraph: emit fixed slices at char boundaries.
                let mut at = start;
                while at < end {
                    let slice_end = floor_char_boundary(text, (at + max).min(end));
                    let slice_end = if slice_end <= at { end } else { slice_end };
                    chunks.push(Chunk {
                        text: text[at..slice_end].to_string(),
                        start_offset: at,
                        end_offset: slice_end,
                    });
                    at = slice_end;
                }
                continue;
            }

            // Merge a runt previous chunk forward when the pair still fits.
            if let Some(last) = chunks.last_mut() {
                if last.text.len() < min && end - last.start_offset <= max {
                    last.text = text[last.start_offset..end].to_string();
                    last.end_offset = end;
                    continue;
                }
            }

            chunks.push(Chunk {
                text: text[start..end].to_string(),
                start_offset: start,
                end_offset: end,
            });
        }

        chunks
    }

    fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}

/// Byte spans of non-blank paragraph runs, trailing whitespace trimmed.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0usize;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                spans.push((s, offset));
            }
        } else if start.is_none() {
            start = Some(offset);
        }
        offset += line.len();
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }

    spans
        .into_iter()
        .map(|(s, e)| {
            let trimmed = text[s..e].trim_end();
            (s, s + trimmed.len())
        })
        .filter(|(s, e)| e > s)
        .collect()
}

/// Largest char boundary at or before `pos`.
fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}
