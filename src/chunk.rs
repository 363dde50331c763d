//! Sliding-window text segmenter.
//!
//! Splits page text into [`Chunk`]s of at most `chunk_size` characters where
//! each chunk repeats the last `chunk_overlap` characters of its predecessor.
//! Cuts prefer whitespace: a window ending mid-text is shortened to just after
//! its last whitespace character, as long as the chunk stays longer than the
//! overlap. Because the next window always starts exactly `chunk_overlap`
//! characters before the previous end, joining
//! `chunks[0] + chunks[1][overlap..] + ...` reproduces the page text.
//!
//! Lengths and offsets are in characters, not bytes.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::error::PipelineError;
use crate::models::{Chunk, PageText};

/// Window parameters, validated so that `0 < overlap < size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splitter {
    size: usize,
    overlap: usize,
}

impl Splitter {
    pub fn new(size: usize, overlap: usize) -> Result<Self, PipelineError> {
        if size == 0 || overlap == 0 || overlap >= size {
            return Err(PipelineError::Segmentation(format!(
                "invalid window: chunk_size={} chunk_overlap={} (need 0 < overlap < size)",
                size, overlap
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, PipelineError> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Segment a whole document. Chunk indices are contiguous across pages.
    ///
    /// Whitespace-only pages produce nothing; any page with visible text
    /// produces at least one chunk.
    pub fn segment(&self, pages: &[PageText]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            if page.text.trim().is_empty() {
                continue;
            }
            for (offset, text) in self.windows(&page.text) {
                chunks.push(make_chunk(chunks.len() as i64, page.number, offset, text));
            }
        }
        chunks
    }

    /// Split one text into `(char_offset, text)` windows.
    pub fn windows(&self, text: &str) -> Vec<(usize, String)> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() <= self.size {
            return vec![(0, text.to_string())];
        }

        let mut out = Vec::new();
        let mut start = 0usize;
        loop {
            let hard_end = (start + self.size).min(chars.len());
            let end = if hard_end < chars.len() {
                self.soft_cut(&chars, start, hard_end)
            } else {
                hard_end
            };
            out.push((start, chars[start..end].iter().collect()));
            if end >= chars.len() {
                break;
            }
            start = end - self.overlap;
        }
        out
    }

    /// Move a cut back to just after the last whitespace in `(start + overlap, hard_end]`.
    fn soft_cut(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let min_end = start + self.overlap + 1;
        (min_end..=hard_end)
            .rev()
            .find(|&end| chars[end - 1].is_whitespace())
            .unwrap_or(hard_end)
    }
}

fn make_chunk(index: i64, page: u32, offset: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Chunk {
        index,
        page,
        offset,
        text,
        hash,
    }
}
