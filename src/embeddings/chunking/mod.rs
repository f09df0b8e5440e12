#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, RetrievalError};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 50;

/// Configuration for fixed-window chunking.
///
/// Both sizes are measured in characters (Unicode scalar values), not bytes
/// or tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum length of a single chunk
    pub chunk_size: usize,
    /// Number of trailing characters of a chunk repeated at the start of the next one
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    /// Reject configurations that would make the window stop advancing
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size <= self.overlap {
            return Err(RetrievalError::InvalidInput(format!(
                "chunk size ({}) must be greater than overlap ({})",
                self.chunk_size, self.overlap
            )));
        }
        Ok(())
    }

    /// Distance between the starts of two consecutive windows
    #[inline]
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Split `text` into overlapping fixed-size windows.
///
/// Window `i` covers `[start, start + chunk_size)` and the next window starts
/// `chunk_size - overlap` characters later. The walk stops at the first
/// window that reaches the end of the text, so the final chunk may be
/// shorter than `chunk_size`.
///
/// Splits ignore sentence and word boundaries and can fall mid-word. This
/// keeps chunking linear and allocation-light at the cost of some retrieval
/// quality on the edges of each window.
#[inline]
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    chunk_with_config(text, &ChunkingConfig { chunk_size, overlap })
}

/// Same as [`chunk`], taking the parameters from a [`ChunkingConfig`]
#[inline]
pub fn chunk_with_config(text: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::with_capacity(chars.len().div_ceil(config.stride()));
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect::<String>());
        if end >= chars.len() {
            break;
        }
        start += config.stride();
    }

    debug!(
        "Chunked {} characters into {} chunks (size {}, overlap {})",
        chars.len(),
        chunks.len(),
        config.chunk_size,
        config.overlap
    );

    Ok(chunks)
}
