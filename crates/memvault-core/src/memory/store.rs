//! ============================================================================
//! Memory Store - Metadata records bound to vector index slots
//! ============================================================================
//! Owns the MemoryId ↔ slot ↔ vector relationship and its on-disk form.
//! Two files live side by side in the store directory and are always
//! rewritten together:
//! - `vectors.bin`   - the raw vector blob, row index = slot
//! - `memories.json` - every MemoryRecord, readable without the blob
//!
//! On open, a count mismatch between the two files (a crash between the two
//! writes) is repaired by trimming both sides to the shorter one. The blob is
//! written first, so an interrupted insert only leaves a spare trailing row.
//! An interrupted delete is worse: the blob has already been compacted, and
//! trimming the metadata drops its last record while every record past the
//! deleted slot ends up paired with its neighbour's vector.
//!
//! A mutation whose save fails is undone in memory and the previous state is
//! written back, so an `Err` from insert, delete or update_attributes means
//! the change did not happen.
//! ============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::index::{write_atomic, VectorIndex};
use super::types::{
    Attributes, MemoryId, MemoryRecord, ScoredMemory, StoreStats, DEFAULT_CATEGORY,
    DEFAULT_SOURCE,
};
use crate::types::{MemoryError, MemoryResult};

/// File name of the vector blob inside the store directory
pub const VECTORS_FILE: &str = "vectors.bin";

/// File name of the metadata document inside the store directory
pub const METADATA_FILE: &str = "memories.json";

/// Current metadata document format version
const METADATA_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    records: Vec<MemoryRecord>,
}

#[derive(Serialize)]
struct MetadataDocumentRef<'a> {
    version: u32,
    dimension: Option<usize>,
    records: Vec<&'a MemoryRecord>,
}

/// File-backed memory store
pub struct MemoryStore {
    dir: PathBuf,
    index: VectorIndex,
    records: HashMap<MemoryId, MemoryRecord>,
    /// Reverse map: `slots[slot]` is the id whose vector lives at `slot`
    slots: Vec<MemoryId>,
}

impl MemoryStore {
    /// Open (or create) the store in `dir`, repairing a count mismatch if found
    pub fn open(dir: impl AsRef<Path>) -> MemoryResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        info!("Opening memory store at: {}", dir.display());

        let metadata = load_metadata(&dir.join(METADATA_FILE))?;
        let mut index = load_vectors(&dir.join(VECTORS_FILE))?;

        match (index.dimension(), metadata.dimension) {
            (None, Some(dim)) => index = VectorIndex::with_dimension(dim),
            (Some(blob_dim), Some(meta_dim)) if blob_dim != meta_dim => {
                warn!(
                    "Discarding vector blob: {} dims recorded in blob, {} in metadata",
                    blob_dim, meta_dim
                );
                index = VectorIndex::with_dimension(meta_dim);
            }
            _ => {}
        }

        let mut records = metadata.records;
        records.sort_by_key(|r| r.slot);

        let mut seen = HashSet::new();
        records.retain(|r| {
            let fresh = seen.insert(r.id.clone());
            if !fresh {
                warn!("Dropping duplicate metadata record for {}", r.id);
            }
            fresh
        });

        let mut repaired = false;

        let (vector_count, record_count) = (index.count(), records.len());
        if vector_count < record_count {
            warn!(
                "Vector blob is missing rows; if a delete was interrupted, records \
                 after the deleted slot are now paired with the wrong vectors"
            );
        }
        if vector_count != record_count {
            let keep = vector_count.min(record_count);
            warn!(
                "Memory store inconsistent: {} vectors vs {} records; trimming both to {}",
                vector_count, record_count, keep
            );
            index.truncate(keep);
            records.truncate(keep);
            repaired = true;
        }

        for (slot, record) in records.iter_mut().enumerate() {
            if record.slot != slot {
                warn!(
                    "Record {} claimed slot {}, re-slotting to {}",
                    record.id, record.slot, slot
                );
                record.slot = slot;
                repaired = true;
            }
        }

        let slots = records.iter().map(|r| r.id.clone()).collect();
        let records = records.into_iter().map(|r| (r.id.clone(), r)).collect();

        let store = Self {
            dir,
            index,
            records,
            slots,
        };
        store.check_invariant();

        if repaired {
            store.persist()?;
            info!("Persisted repaired memory store ({} records)", store.count());
        }

        info!("Memory store ready ({} records)", store.count());
        Ok(store)
    }

    /// Directory holding the store files
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.index.dimension()
    }

    /// Insert a vector with its metadata and persist before returning
    pub fn insert(
        &mut self,
        vector: &[f32],
        text: &str,
        category: Option<&str>,
        source: Option<&str>,
        attributes: Option<Attributes>,
    ) -> MemoryResult<MemoryId> {
        let id = self.fresh_id();
        let dimension_was_unset = self.index.dimension().is_none();
        let slot = self.index.insert(vector)?;

        let record = MemoryRecord {
            id: id.clone(),
            text: text.to_string(),
            category: category.unwrap_or(DEFAULT_CATEGORY).to_string(),
            source: source.unwrap_or(DEFAULT_SOURCE).to_string(),
            created_at: Utc::now(),
            attributes: attributes.unwrap_or_default(),
            slot,
        };

        self.slots.push(id.clone());
        self.records.insert(id.clone(), record);
        self.check_invariant();

        if let Err(e) = self.persist() {
            // Newest row is last, so removing it moves no other slot
            self.index.truncate(slot);
            if dimension_was_unset {
                self.index = VectorIndex::new();
            }
            self.slots.pop();
            self.records.remove(&id);
            self.check_invariant();
            self.restore_on_disk();
            return Err(e);
        }

        debug!("Stored memory {} at slot {}", id, slot);
        Ok(id)
    }

    /// Delete a memory; returns false if the id is unknown.
    ///
    /// On `Err` the memory is still present and the previous files are
    /// written back.
    pub fn delete(&mut self, id: &MemoryId) -> MemoryResult<bool> {
        let Some(slot) = self.records.get(id).map(|r| r.slot) else {
            return Ok(false);
        };

        let previous_index = self.index.clone();
        let remap = self.index.delete(slot)?;
        let removed_id = self.slots.remove(slot);
        assert_eq!(&removed_id, id, "slot {} resolved to {} not {}", slot, removed_id, id);
        let Some(removed) = self.records.remove(id) else {
            panic!("slot {} references missing record {}", slot, id);
        };

        self.apply_remap(&remap);
        self.check_invariant();

        if let Err(e) = self.persist() {
            self.index = previous_index;
            self.slots.insert(slot, removed_id);
            self.records.insert(id.clone(), removed);
            let restore: BTreeMap<usize, usize> =
                remap.into_iter().map(|(old, new)| (new, old)).collect();
            self.apply_remap(&restore);
            self.check_invariant();
            self.restore_on_disk();
            return Err(e);
        }

        info!("Deleted memory {} (slot {})", id, slot);
        Ok(true)
    }

    /// Point every moved record at its new slot; `slots` must already be updated
    fn apply_remap(&mut self, remap: &BTreeMap<usize, usize>) {
        for (&old, &new) in remap {
            let moved = &self.slots[new];
            let record = self
                .records
                .get_mut(moved)
                .unwrap_or_else(|| panic!("slot {} references missing record {}", new, moved));
            assert_eq!(record.slot, old, "record {} out of step with index", record.id);
            record.slot = new;
        }
    }

    pub fn get(&self, id: &MemoryId) -> Option<&MemoryRecord> {
        self.records.get(id)
    }

    /// Stored (normalized) vector of a memory
    pub fn vector(&self, id: &MemoryId) -> Option<&[f32]> {
        self.records
            .get(id)
            .and_then(|record| self.index.vector(record.slot))
    }

    /// Records in `category`, newest first
    pub fn list_by_category(&self, category: &str) -> Vec<&MemoryRecord> {
        let mut records: Vec<&MemoryRecord> = self
            .records
            .values()
            .filter(|r| r.category == category)
            .collect();
        sort_newest_first(&mut records);
        records
    }

    /// All records, newest first, optionally capped at `limit`
    pub fn list_all(&self, limit: Option<usize>) -> Vec<&MemoryRecord> {
        let mut records: Vec<&MemoryRecord> = self.records.values().collect();
        sort_newest_first(&mut records);
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        records
    }

    /// Similarity search; the category filter is applied to the ranked top `limit`
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
        category: Option<&str>,
    ) -> MemoryResult<Vec<ScoredMemory>> {
        let hits = self.index.search(query, limit, min_similarity)?;

        let results: Vec<ScoredMemory> = hits
            .into_iter()
            .map(|(slot, similarity)| {
                let id = &self.slots[slot];
                let record = &self.records[id];
                ScoredMemory {
                    record: record.clone(),
                    similarity,
                }
            })
            .filter(|hit| category.map_or(true, |c| hit.record.category == c))
            .collect();

        debug!("Search returned {} memories", results.len());
        Ok(results)
    }

    /// Merge `attributes` into an existing record; returns false if the id is unknown
    pub fn update_attributes(
        &mut self,
        id: &MemoryId,
        attributes: Attributes,
    ) -> MemoryResult<bool> {
        let Some(record) = self.records.get_mut(id) else {
            return Ok(false);
        };
        let previous = record.attributes.clone();
        record.attributes.extend(attributes);

        if let Err(e) = self.persist() {
            if let Some(record) = self.records.get_mut(id) {
                record.attributes = previous;
            }
            self.restore_on_disk();
            return Err(e);
        }

        debug!("Updated attributes of memory {}", id);
        Ok(true)
    }

    pub fn stats(&self) -> StoreStats {
        let mut categories = BTreeMap::new();
        for record in self.records.values() {
            *categories.entry(record.category.clone()).or_insert(0usize) += 1;
        }
        StoreStats {
            count: self.count(),
            dimension: self.dimension(),
            categories,
        }
    }

    /// Write both files: vector blob first, then metadata
    fn persist(&self) -> MemoryResult<()> {
        self.index.save(&self.dir.join(VECTORS_FILE))?;

        let document = MetadataDocumentRef {
            version: METADATA_VERSION,
            dimension: self.index.dimension(),
            records: self.slots.iter().map(|id| &self.records[id]).collect(),
        };
        let json = serde_json::to_vec_pretty(&document)?;
        write_atomic(&self.dir.join(METADATA_FILE), &json)?;
        Ok(())
    }

    /// Rewrite the in-memory state after a failed save may have replaced one file
    fn restore_on_disk(&self) {
        if let Err(e) = self.persist() {
            warn!(
                "Could not restore memory store files in {}: {}",
                self.dir.display(),
                e
            );
        }
    }

    fn fresh_id(&self) -> MemoryId {
        loop {
            let id = MemoryId::generate();
            if !self.records.contains_key(&id) {
                return id;
            }
        }
    }

    /// Slots are exactly `0..N` and every record points at its own row
    fn check_invariant(&self) {
        assert_eq!(
            self.index.count(),
            self.slots.len(),
            "vector count out of step with slot map"
        );
        assert_eq!(
            self.records.len(),
            self.slots.len(),
            "record count out of step with slot map"
        );
        for (slot, id) in self.slots.iter().enumerate() {
            let record = self
                .records
                .get(id)
                .unwrap_or_else(|| panic!("slot {} references missing record {}", slot, id));
            assert_eq!(record.slot, slot, "record {} has stale slot", id);
        }
    }
}

fn sort_newest_first(records: &mut [&MemoryRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.slot.cmp(&a.slot))
    });
}

fn load_metadata(path: &Path) -> MemoryResult<MetadataDocument> {
    if !path.exists() {
        return Ok(MetadataDocument {
            version: METADATA_VERSION,
            dimension: None,
            records: Vec::new(),
        });
    }
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn load_vectors(path: &Path) -> MemoryResult<VectorIndex> {
    if !path.exists() {
        return Ok(VectorIndex::new());
    }
    match VectorIndex::load(path) {
        Ok(index) => Ok(index),
        Err(MemoryError::CorruptIndex(reason)) => {
            warn!(
                "Discarding corrupt vector blob {}: {}",
                path.display(),
                reason
            );
            Ok(VectorIndex::new())
        }
        Err(e) => Err(e),
    }
}
