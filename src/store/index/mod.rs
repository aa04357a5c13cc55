//! Exact inner-product vector index with a small binary file format.
//!
//! # File layout (little-endian)
//!
//! ```text
//! magic: b"RSVI"        (4 bytes)
//! version: u16          (2 bytes)
//! reserved: u16         (2 bytes)
//! dimension: u32        (4 bytes)
//! record_count: u64     (8 bytes)
//! slab_crc32: u32       (4 bytes)
//! slab: record_count * dimension f32 values
//! ```


use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use crc32fast::Hasher as Crc32;
use tracing::debug;

use super::write_atomic;
use crate::{Result, StoreError};

pub const INDEX_MAGIC: [u8; 4] = *b"RSVI";
pub const INDEX_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 8 + 4;

/// Flat row-major store of unit-normalized vectors searched by brute force.
///
/// Vectors are expected to be normalized by the caller; the index only
/// computes inner products.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Allocate an empty index for vectors of width `dim`
    #[inline]
    pub fn create(dim: usize) -> Result<Self> {
        if dim == 0 || u32::try_from(dim).is_err() {
            return Err(StoreError::IndexFormat(format!(
                "unsupported vector dimension {dim}"
            )));
        }
        Ok(Self {
            dim,
            data: Vec::new(),
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored vectors
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a batch of vectors. Nothing is added unless every vector has
    /// the index's width.
    #[inline]
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dim);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Drop every vector after the first `len`
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dim);
    }

    #[inline]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Top-`k` `(position, score)` pairs by descending inner product.
    ///
    /// Equal scores keep insertion order. `k` is clamped to the population.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(position, row)| (position, dot(row, query)))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank);
            scored.truncate(k);
        }
        scored.sort_by(rank);
        Ok(scored)
    }

    /// Serialize to the binary file format
    #[inline]
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let dim = u32::try_from(self.dim)
            .map_err(|_| StoreError::IndexFormat("dimension must fit in u32".to_string()))?;
        let count = u64::try_from(self.len())
            .map_err(|_| StoreError::IndexFormat("record count must fit in u64".to_string()))?;

        let mut slab = Vec::with_capacity(self.data.len() * 4);
        for value in &self.data {
            slab.extend_from_slice(&value.to_le_bytes());
        }

        let mut out = Vec::with_capacity(HEADER_LEN + slab.len());
        out.extend_from_slice(&INDEX_MAGIC);
        out.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        out.extend_from_slice(&[0_u8; 2]);
        out.extend_from_slice(&dim.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&crc32(&slab).to_le_bytes());
        out.extend_from_slice(&slab);
        Ok(out)
    }

    /// Parse the binary file format, rejecting a declared dimension that
    /// differs from `expected_dim` when one is given
    #[inline]
    pub fn from_bytes(data: &[u8], expected_dim: Option<usize>) -> Result<Self> {
        let mut cursor = 0_usize;

        let magic = read_array::<4>(data, &mut cursor, "magic")?;
        if magic != INDEX_MAGIC {
            return Err(StoreError::IndexFormat(format!(
                "bad magic bytes: expected {INDEX_MAGIC:?}, found {magic:?}"
            )));
        }

        let version = u16::from_le_bytes(read_array::<2>(data, &mut cursor, "version")?);
        if version != INDEX_VERSION {
            return Err(StoreError::IndexFormat(format!(
                "unsupported version {version}, expected {INDEX_VERSION}"
            )));
        }
        read_array::<2>(data, &mut cursor, "reserved")?;

        let dim = usize::try_from(u32::from_le_bytes(read_array::<4>(
            data,
            &mut cursor,
            "dimension",
        )?))
        .map_err(|_| StoreError::IndexFormat("dimension does not fit in usize".to_string()))?;
        if dim == 0 {
            return Err(StoreError::IndexFormat(
                "dimension must be greater than zero".to_string(),
            ));
        }
        match expected_dim {
            Some(expected) if expected != dim => {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: dim,
                });
            }
            _ => {}
        }

        let count = usize::try_from(u64::from_le_bytes(read_array::<8>(
            data,
            &mut cursor,
            "record_count",
        )?))
        .map_err(|_| StoreError::IndexFormat("record count does not fit in usize".to_string()))?;
        let expected_crc = u32::from_le_bytes(read_array::<4>(data, &mut cursor, "slab_crc32")?);

        let slab_len = count
            .checked_mul(dim)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| StoreError::IndexFormat("vector slab size overflows".to_string()))?;
        let slab = data.get(cursor..).unwrap_or_default();
        if slab.len() != slab_len {
            return Err(StoreError::IndexFormat(format!(
                "vector slab is {} bytes, header declares {}",
                slab.len(),
                slab_len
            )));
        }

        let actual_crc = crc32(slab);
        if actual_crc != expected_crc {
            return Err(StoreError::IndexFormat(format!(
                "slab CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
            )));
        }

        let values = slab
            .chunks_exact(4)
            .map(|bytes| {
                let mut buf = [0_u8; 4];
                buf.copy_from_slice(bytes);
                f32::from_le_bytes(buf)
            })
            .collect();

        Ok(Self { dim, data: values })
    }

    /// Atomically replace the file at `path`
    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        write_atomic(path, &bytes)?;
        debug!(
            "Wrote vector index {} ({} vectors, dim {})",
            path.display(),
            self.len(),
            self.dim
        );
        Ok(())
    }

    #[inline]
    pub fn load(path: &Path, expected_dim: Option<usize>) -> Result<Self> {
        let bytes = fs::read(path)?;
        let index = Self::from_bytes(&bytes, expected_dim)?;
        debug!(
            "Loaded vector index {} ({} vectors, dim {})",
            path.display(),
            index.len(),
            index.dim
        );
        Ok(index)
    }
}

fn rank(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn read_array<const N: usize>(data: &[u8], cursor: &mut usize, field: &str) -> Result<[u8; N]> {
    let bytes = data
        .get(*cursor..*cursor + N)
        .ok_or_else(|| StoreError::IndexFormat(format!("file truncated while reading {field}")))?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    *cursor += N;
    Ok(out)
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    hasher.finalize()
}
