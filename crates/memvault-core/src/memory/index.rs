//! ============================================================================
//! Vector Index - Dense array of unit vectors with brute-force cosine search
//! ============================================================================
//! Rows are addressed by slot. Slots are always `0..count()`: deleting a row
//! shifts every later row down by one and reports the remapping so the owner
//! can update its slot references in the same operation.
//!
//! Search is a linear O(N·D) dot-product scan. An approximate index would
//! replace `search` internals behind the same signature.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::types::{MemoryError, MemoryResult};

/// Magic bytes at the start of every vector blob
const BLOB_MAGIC: [u8; 4] = *b"MVEC";

/// Current vector blob format version
const BLOB_VERSION: u32 = 1;

/// Encoded header size: magic + version + dimension
const HEADER_LEN: usize = 12;

/// Fixed-width header preceding the row-major f32 body
#[derive(Debug, Serialize, Deserialize)]
struct BlobHeader {
    magic: [u8; 4],
    version: u32,
    dimension: u32,
}

/// Dense vector array with slot-addressed rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    /// Fixed by the first insertion
    dimension: Option<usize>,
    /// Row-major `count × dimension` values, every non-zero row unit length
    data: Vec<f32>,
}

impl VectorIndex {
    /// Create an empty index whose dimensionality is set by the first insert
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index with a pre-fixed dimensionality
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: (dimension > 0).then_some(dimension),
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of live vectors
    pub fn count(&self) -> usize {
        match self.dimension {
            Some(dim) => self.data.len() / dim,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Stored (normalized) vector at `slot`
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let dim = self.dimension?;
        if slot >= self.count() {
            return None;
        }
        Some(&self.data[slot * dim..(slot + 1) * dim])
    }

    /// Normalize and append a vector, returning its slot
    pub fn insert(&mut self, vector: &[f32]) -> MemoryResult<usize> {
        if vector.is_empty() {
            return Err(MemoryError::EmptyVector);
        }

        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(MemoryError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => {
                debug!("Fixing index dimensionality at {}", vector.len());
                self.dimension = Some(vector.len());
            }
        }

        let slot = self.count();
        self.data.extend(normalize(vector));
        Ok(slot)
    }

    /// Rank stored vectors by cosine similarity to `query`.
    ///
    /// Entries below `min_similarity` are dropped; equal scores are ordered
    /// by ascending slot. Returns `(slot, similarity)` pairs, at most `limit`.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> MemoryResult<Vec<(usize, f32)>> {
        let Some(dim) = self.dimension else {
            return Ok(Vec::new());
        };
        if self.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if query.len() != dim {
            return Err(MemoryError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let norm = l2_norm(query);
        if norm == 0.0 {
            return Ok(Vec::new());
        }
        let query: Vec<f32> = query.iter().map(|x| x / norm).collect();

        let mut hits: Vec<(usize, f32)> = self
            .data
            .chunks_exact(dim)
            .enumerate()
            .map(|(slot, row)| (slot, dot(&query, row)))
            .filter(|(_, similarity)| *similarity >= min_similarity)
            .collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Remove the row at `slot`, shifting later rows down by one.
    ///
    /// Returns `old_slot -> new_slot` for every row that moved.
    pub fn delete(&mut self, slot: usize) -> MemoryResult<BTreeMap<usize, usize>> {
        let len = self.count();
        let dim = match self.dimension {
            Some(dim) if slot < len => dim,
            _ => return Err(MemoryError::SlotOutOfRange { slot, len }),
        };

        self.data.drain(slot * dim..(slot + 1) * dim);

        Ok(((slot + 1)..len).map(|old| (old, old - 1)).collect())
    }

    /// Keep only the first `len` rows
    pub fn truncate(&mut self, len: usize) {
        if let Some(dim) = self.dimension {
            self.data.truncate(len * dim);
        }
    }

    /// Encode the index as a header plus row-major little-endian f32 body
    pub fn to_bytes(&self) -> MemoryResult<Vec<u8>> {
        let header = BlobHeader {
            magic: BLOB_MAGIC,
            version: BLOB_VERSION,
            dimension: self.dimension.unwrap_or(0) as u32,
        };
        let mut bytes = bincode::serialize(&header)
            .map_err(|e| MemoryError::CorruptIndex(format!("Failed to encode header: {}", e)))?;
        debug_assert_eq!(bytes.len(), HEADER_LEN);

        bytes.reserve(self.data.len() * 4);
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Ok(bytes)
    }

    /// Decode a blob produced by [`VectorIndex::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> MemoryResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(MemoryError::CorruptIndex(format!(
                "Blob is {} bytes, shorter than the {}-byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let header: BlobHeader = bincode::deserialize(&bytes[..HEADER_LEN])
            .map_err(|e| MemoryError::CorruptIndex(format!("Unreadable header: {}", e)))?;
        if header.magic != BLOB_MAGIC {
            return Err(MemoryError::CorruptIndex("Bad magic bytes".to_string()));
        }
        if header.version != BLOB_VERSION {
            return Err(MemoryError::CorruptIndex(format!(
                "Unsupported blob version {}",
                header.version
            )));
        }

        let body = &bytes[HEADER_LEN..];
        let dim = header.dimension as usize;
        if dim == 0 {
            if !body.is_empty() {
                return Err(MemoryError::CorruptIndex(format!(
                    "{} body bytes with no recorded dimensionality",
                    body.len()
                )));
            }
            return Ok(Self::new());
        }

        let row_bytes = dim * 4;
        if body.len() % row_bytes != 0 {
            return Err(MemoryError::CorruptIndex(format!(
                "Body length {} is not a multiple of {} ({} dims)",
                body.len(),
                row_bytes,
                dim
            )));
        }

        let data = body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self {
            dimension: Some(dim),
            data,
        })
    }

    /// Write the index to `path` atomically
    pub fn save(&self, path: &Path) -> MemoryResult<()> {
        write_atomic(path, &self.to_bytes()?)?;
        debug!(
            "Saved {} vectors ({:?} dims) to {}",
            self.count(),
            self.dimension,
            path.display()
        );
        Ok(())
    }

    /// Read an index previously written by [`VectorIndex::save`]
    pub fn load(path: &Path) -> MemoryResult<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

/// Scale `vector` to unit L2 norm; a zero vector is returned unchanged
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = l2_norm(vector);
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Write to a sibling temp file, flush, then rename over `path`
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EPS: f32 = 1e-6;

    fn index_with(rows: &[&[f32]]) -> VectorIndex {
        let mut index = VectorIndex::new();
        for row in rows {
            index.insert(row).unwrap();
        }
        index
    }

    #[test]
    fn test_insert_normalizes() {
        let mut index = VectorIndex::new();
        let slot = index.insert(&[3.0, 4.0]).unwrap();
        assert_eq!(slot, 0);

        let stored = index.vector(0).unwrap();
        assert!((stored[0] - 0.6).abs() < EPS);
        assert!((stored[1] - 0.8).abs() < EPS);
        assert!((l2_norm(stored) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_normalization_many_vectors() {
        let mut index = VectorIndex::new();
        for i in 1..20 {
            let v = [i as f32, -(i as f32) * 0.5, 7.0, 0.25 * i as f32];
            index.insert(&v).unwrap();
        }
        for slot in 0..index.count() {
            assert!((l2_norm(index.vector(slot).unwrap()) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_vector_stored_as_is() {
        let mut index = VectorIndex::new();
        index.insert(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(index.vector(0).unwrap(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_insert_rejects_empty_and_mismatched() {
        let mut index = VectorIndex::new();
        assert!(matches!(index.insert(&[]), Err(MemoryError::EmptyVector)));
        assert_eq!(index.dimension(), None);

        index.insert(&[1.0, 0.0]).unwrap();
        assert!(matches!(
            index.insert(&[1.0, 0.0, 0.0]),
            Err(MemoryError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn test_search_scenario() {
        let index = index_with(&[&[1.0, 0.0], &[0.0, 1.0], &[0.9, 0.1]]);

        let hits = index.search(&[1.0, 0.0], 2, 0.5).unwrap();
        let slots: Vec<usize> = hits.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![0, 2]);
        assert!((hits[0].1 - 1.0).abs() < EPS);
        assert!(hits[1].1 < hits[0].1);
    }

    #[test]
    fn test_similarity_equals_dot_product() {
        let a = normalize(&[0.3, -0.2, 0.9]);
        let b = normalize(&[0.5, 0.5, 0.1]);
        let expected = dot(&a, &b);

        let forward = index_with(&[&[1.0, 1.0, 1.0], &b, &[-1.0, 0.0, 0.0]]);
        let reverse = index_with(&[&[-1.0, 0.0, 0.0], &[1.0, 1.0, 1.0], &b]);

        for (index, slot) in [(&forward, 1), (&reverse, 2)] {
            let hits = index.search(&a, 3, -1.0).unwrap();
            let (_, score) = hits.iter().find(|(s, _)| *s == slot).unwrap();
            assert!((score - expected).abs() < EPS);
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let index = index_with(&[&[1.0, 0.0], &[0.0, 1.0], &[-1.0, 0.0]]);

        let hits = index.search(&[1.0, 0.0], 10, 1.0).unwrap();
        assert_eq!(hits, vec![(0, 1.0)]);

        let hits = index.search(&[1.0, 0.0], 10, 0.0).unwrap();
        assert_eq!(hits, vec![(0, 1.0), (1, 0.0)]);
    }

    #[test]
    fn test_ties_ordered_by_slot() {
        let index = index_with(&[&[0.0, 1.0], &[1.0, 0.0], &[2.0, 0.0], &[5.0, 0.0]]);
        let hits = index.search(&[1.0, 0.0], 10, 0.5).unwrap();
        let slots: Vec<usize> = hits.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![1, 2, 3]);
    }

    #[test]
    fn test_search_edge_cases() {
        let empty = VectorIndex::new();
        assert!(empty.search(&[1.0, 0.0], 5, 0.0).unwrap().is_empty());

        let index = index_with(&[&[1.0, 0.0]]);
        assert!(index.search(&[0.0, 0.0], 5, -1.0).unwrap().is_empty());
        assert!(index.search(&[1.0, 0.0], 0, 0.0).unwrap().is_empty());
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 5, 0.0),
            Err(MemoryError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_delete_compacts() {
        for n in 1..6 {
            for victim in 0..n {
                let rows: Vec<Vec<f32>> = (0..n)
                    .map(|i| vec![i as f32 + 1.0, 1.0, -(i as f32)])
                    .collect();
                let mut index = VectorIndex::new();
                for row in &rows {
                    index.insert(row).unwrap();
                }
                let before: Vec<Vec<f32>> =
                    (0..n).map(|s| index.vector(s).unwrap().to_vec()).collect();

                let remap = index.delete(victim).unwrap();
                assert_eq!(index.count(), n - 1);
                assert_eq!(remap.len(), n - victim - 1);

                for old in 0..n {
                    if old == victim {
                        continue;
                    }
                    let new = if old > victim {
                        assert_eq!(remap[&old], old - 1);
                        old - 1
                    } else {
                        assert!(!remap.contains_key(&old));
                        old
                    };
                    assert_eq!(index.vector(new).unwrap(), before[old].as_slice());
                }
            }
        }
    }

    #[test]
    fn test_delete_out_of_range() {
        let mut index = index_with(&[&[1.0, 0.0]]);
        assert!(matches!(
            index.delete(1),
            Err(MemoryError::SlotOutOfRange { slot: 1, len: 1 })
        ));
        assert!(matches!(
            VectorIndex::new().delete(0),
            Err(MemoryError::SlotOutOfRange { slot: 0, len: 0 })
        ));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vectors.bin");

        let mut index = index_with(&[&[1.0, 2.0, 3.0], &[0.0, 1.0, 0.0], &[4.0, -1.0, 0.5]]);
        index.delete(1).unwrap();
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(
            loaded.search(&[1.0, 1.0, 1.0], 5, -1.0).unwrap(),
            index.search(&[1.0, 1.0, 1.0], 5, -1.0).unwrap()
        );
        assert!(!dir.path().join("vectors.tmp").exists());
    }

    #[test]
    fn test_round_trip_without_dimension() {
        let bytes = VectorIndex::new().to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        let loaded = VectorIndex::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.dimension(), None);
        assert_eq!(loaded.count(), 0);
    }

    #[test]
    fn test_load_rejects_corrupt_blobs() {
        let index = index_with(&[&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]]);
        let bytes = index.to_bytes().unwrap();

        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            VectorIndex::from_bytes(truncated),
            Err(MemoryError::CorruptIndex(_))
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            VectorIndex::from_bytes(&bad_magic),
            Err(MemoryError::CorruptIndex(_))
        ));

        assert!(matches!(
            VectorIndex::from_bytes(&bytes[..5]),
            Err(MemoryError::CorruptIndex(_))
        ));
    }
}
