
use sha2::{Digest, Sha256};
use tracing::debug;

use super::Embedder;
use crate::{Result, RetrievalError};

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic feature-hashing embedder.
///
/// Each lower-cased alphanumeric word and each character trigram of the
/// word (padded with `^` and `$`) is hashed with SHA-256 into one of
/// `dimension` buckets with a hash-derived sign. The accumulated vector is
/// L2-normalized. Output depends only on the input text and the dimension,
/// so vectors are stable across processes and releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RetrievalError::Config(
                "hashing embedder dimension must be positive".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    /// Embed a single text
    #[inline]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];

        for word in tokenize(text) {
            self.accumulate(&mut vector, word.as_bytes(), WORD_WEIGHT);

            let padded: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.accumulate(&mut vector, trigram.as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut bucket_bytes = [0_u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

/// Lower-cased runs of alphanumeric characters
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

impl Embedder for HashingEmbedder {
    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(
            "Hashing {} texts into {} dimensions",
            texts.len(),
            self.dimension
        );
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }
}
