
use thiserror::Error;

const MAGIC: &[u8; 4] = b"TRFI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("index dimension must be positive")]
    ZeroDimension,
    #[error("index dimension {0} does not fit the blob header")]
    DimensionTooLarge(usize),
    #[error("expected {expected}-dimensional vector, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("malformed index blob: {0}")]
    Malformed(String),
}

/// Exhaustive nearest-neighbour index over squared Euclidean distance.
///
/// Rows are stored contiguously in insertion order, so a row's position is
/// its insertion ordinal. The dimension is held as the `u32` the blob header
/// carries.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: u32,
    data: Vec<f32>,
}

impl FlatIndex {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        let dimension =
            u32::try_from(dimension).map_err(|_| IndexError::DimensionTooLarge(dimension))?;
        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension as usize
    }

    /// Number of stored vectors
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append vectors at positions `len()..len() + vectors.len()`.
    ///
    /// Either every vector is added or none is.
    #[inline]
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        let dimension = self.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                found: bad.len(),
            });
        }

        self.data.reserve(vectors.len() * dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    #[inline]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.data
            .chunks_exact(self.dimension())
            .nth(position)
    }

    /// Drop every row at or after `len`
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dimension());
    }

    /// The `k` rows closest to `query`, closest first.
    ///
    /// Returns `(position, squared distance)` pairs. Equal distances are
    /// ordered by position. Fewer than `k` pairs come back when the index
    /// holds fewer rows.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                found: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension())
            .enumerate()
            .map(|(position, row)| (position, squared_l2(row, query)))
            .collect();

        let by_distance =
            |a: &(usize, f32), b: &(usize, f32)| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0));

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        Ok(scored)
    }

    /// Serialize as `TRFI | version u32 | dimension u32 | count u64 | f32 rows`, little-endian
    #[inline]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&self.dimension.to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        if bytes.len() < HEADER_LEN {
            return Err(IndexError::Malformed(format!(
                "blob is {} bytes, shorter than the {}-byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);

        if &header[0..4] != MAGIC {
            return Err(IndexError::Malformed("bad magic".to_string()));
        }
        let version = u32::from_le_bytes(le_array(&header[4..8]));
        if version != FORMAT_VERSION {
            return Err(IndexError::Malformed(format!(
                "unsupported format version {}",
                version
            )));
        }
        let dimension = u32::from_le_bytes(le_array(&header[8..12]));
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        let count = u64::from_le_bytes(le_array(&header[12..20]));

        let expected_body = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(dimension as usize))
            .and_then(|values| values.checked_mul(4));
        if expected_body != Some(body.len()) {
            return Err(IndexError::Malformed(format!(
                "header declares {} rows of {} dimensions but body is {} bytes",
                count,
                dimension,
                body.len()
            )));
        }

        let data = body
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes(le_array(bytes)))
            .collect();

        Ok(Self { dimension, data })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0_u8; N];
    array.copy_from_slice(bytes);
    array
}
