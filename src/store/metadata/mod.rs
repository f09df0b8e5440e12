
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One stored chunk, kept at the same position as its vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Unique identifier for this chunk
    pub id: Uuid,
    /// The chunk text returned by searches
    pub text: String,
    /// Where the text came from (file path, URL), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Timestamp when the chunk was ingested
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    #[inline]
    pub fn new(text: impl Into<String>, source: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            source,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("line {0} is blank")]
    BlankLine(usize),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Encode records as JSON Lines, one record per line in position order.
///
/// JSON string escaping keeps newlines inside chunk text off the line
/// structure.
#[inline]
pub fn encode_log(records: &[ChunkRecord]) -> Result<Vec<u8>, MetadataError> {
    let mut bytes = Vec::new();
    for record in records {
        serde_json::to_writer(&mut bytes, record)?;
        bytes.push(b'\n');
    }
    Ok(bytes)
}

#[inline]
pub fn decode_log(content: &str) -> Result<Vec<ChunkRecord>, MetadataError> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if line.trim().is_empty() {
                return Err(MetadataError::BlankLine(i + 1));
            }
            serde_json::from_str(line).map_err(|source| MetadataError::Parse {
                line: i + 1,
                source,
            })
        })
        .collect()
}
