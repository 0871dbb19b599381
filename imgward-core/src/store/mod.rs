//! Known-record store for labeled fingerprints.
//!
//! The store keeps at most one [`KnownRecord`] per content hash: observing the
//! same bytes again merges into the existing record. Records whose perceptual
//! hash collides with another record (distance 0) are kept distinct; the
//! collision is only reported.
//!
//! Writers take a single global write lock held for one upsert; lookups take
//! the read lock and scan linearly.

pub mod snapshot;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, WardenError};
use crate::fingerprint::{ContentHash, Fingerprint, FingerprintSet, TileSignature};

/// Operator verdict attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Phish,
    Benign,
    #[default]
    Unlabeled,
}

impl std::str::FromStr for Label {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "phish" => Ok(Self::Phish),
            "benign" => Ok(Self::Benign),
            "unlabeled" => Ok(Self::Unlabeled),
            other => Err(WardenError::InvalidConfig(format!("unknown label {other:?}"))),
        }
    }
}

/// A persisted, labeled fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownRecord {
    pub id: Uuid,
    pub content_hash: ContentHash,
    /// Canonical (first computed) perceptual hash
    pub perceptual_hash: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient_hash: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_signature: Option<TileSignature>,
    pub label: Label,
    /// Where the record was learned, e.g. a source message or thread id
    pub provenance: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub seen_count: u64,
}

impl KnownRecord {
    /// Build a fresh record from extracted fingerprints.
    ///
    /// Returns `None` when the set has no perceptual hash.
    pub fn from_fingerprints(
        set: &FingerprintSet,
        label: Label,
        provenance: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        Some(Self {
            id: Uuid::new_v4(),
            content_hash: set.content_hash(),
            perceptual_hash: set.canonical_perceptual()?.clone(),
            gradient_hash: set.canonical_gradient().cloned(),
            tile_signature: set.canonical_tiles().cloned(),
            label,
            provenance: provenance.into(),
            first_seen_at: now,
            last_seen_at: now,
            seen_count: 1,
        })
    }

    pub fn is_phish(&self) -> bool {
        self.label == Label::Phish
    }

    /// Fold a later observation of the same content into this record.
    fn merge_observation(&mut self, other: &KnownRecord) {
        self.seen_count += 1;
        self.last_seen_at = self.last_seen_at.max(other.last_seen_at);
        if self.label == Label::Unlabeled {
            self.label = other.label;
        }
        if self.gradient_hash.is_none() {
            self.gradient_hash = other.gradient_hash.clone();
        }
        if self.tile_signature.is_none() {
            self.tile_signature = other.tile_signature.clone();
        }
    }

    /// Fold a duplicate record (same content hash) into this one.
    fn absorb(&mut self, other: KnownRecord) {
        self.seen_count += other.seen_count;
        self.first_seen_at = self.first_seen_at.min(other.first_seen_at);
        self.last_seen_at = self.last_seen_at.max(other.last_seen_at);
        self.label = match (self.label, other.label) {
            (Label::Phish, _) | (_, Label::Phish) => Label::Phish,
            (Label::Unlabeled, l) => l,
            (l, _) => l,
        };
        if self.gradient_hash.is_none() {
            self.gradient_hash = other.gradient_hash;
        }
        if self.tile_signature.is_none() {
            self.tile_signature = other.tile_signature;
        }
    }
}

/// On-disk shape of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub version: u32,
    pub records: Vec<KnownRecord>,
}

/// Record counts by label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub records: usize,
    pub phish: usize,
    pub benign: usize,
    pub unlabeled: usize,
    pub total_seen: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<KnownRecord>,
    /// content hash → index of the first record with it
    by_content: HashMap<ContentHash, usize>,
}

impl StoreState {
    fn from_records(records: Vec<KnownRecord>) -> Self {
        let mut by_content = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            by_content.entry(record.content_hash).or_insert(i);
        }
        Self {
            records,
            by_content,
        }
    }
}

/// Thread-safe labeled fingerprint store.
pub struct FingerprintStore {
    state: RwLock<StoreState>,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for FingerprintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintStore")
            .field("records", &self.len())
            .field("path", &self.path)
            .finish()
    }
}

impl Default for FingerprintStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl FingerprintStore {
    /// Empty, unbacked store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            clock,
            path: None,
        }
    }

    /// Store backed by `path`, loaded now. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Self {
            state: RwLock::new(StoreState::default()),
            clock,
            path: Some(path.into()),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn backing_path(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| WardenError::InvalidConfig("store has no backing file".into()))
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace in-memory state with the backing snapshot.
    ///
    /// On failure the in-memory state is left untouched.
    pub fn load(&self) -> Result<usize> {
        let path = self.backing_path()?;
        let records = match snapshot::read::<StoreSnapshot>(path)? {
            Some(snapshot) if snapshot.version != snapshot::SNAPSHOT_VERSION => {
                return Err(WardenError::store_io(
                    path,
                    format!(
                        "unsupported snapshot version {} (expected {})",
                        snapshot.version,
                        snapshot::SNAPSHOT_VERSION
                    ),
                ));
            }
            Some(snapshot) => snapshot.records,
            None => {
                debug!(path = %path.display(), "No store snapshot yet, starting empty");
                Vec::new()
            }
        };

        let state = StoreState::from_records(records);
        let duplicates = state.records.len() - state.by_content.len();
        if duplicates > 0 {
            warn!(
                path = %path.display(),
                duplicates,
                "Snapshot holds records sharing a content hash; run compaction"
            );
        }

        let count = state.records.len();
        *self.write() = state;
        info!(path = %path.display(), records = count, "Loaded fingerprint store");
        Ok(count)
    }

    /// Persist to the backing file.
    pub fn save(&self) -> Result<()> {
        let path = self.backing_path()?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let snapshot = StoreSnapshot {
            version: snapshot::SNAPSHOT_VERSION,
            records: self.records(),
        };
        snapshot::write(path, &snapshot)?;
        info!(path = %path.display(), records = snapshot.records.len(), "Saved fingerprint store");
        Ok(())
    }

    /// Insert `record`, or merge it into the record with the same content hash.
    ///
    /// Returns the stored record and whether it was newly inserted.
    pub fn upsert(&self, record: KnownRecord) -> (KnownRecord, bool) {
        let mut state = self.write();

        if let Some(&idx) = state.by_content.get(&record.content_hash) {
            let existing = &mut state.records[idx];
            existing.merge_observation(&record);
            debug!(
                content_hash = %existing.content_hash.short(),
                seen_count = existing.seen_count,
                "Merged repeat observation"
            );
            return (existing.clone(), false);
        }

        if let Some(twin) = state
            .records
            .iter()
            .find(|r| r.perceptual_hash.distance(&record.perceptual_hash) == Some(0))
        {
            debug!(
                content_hash = %record.content_hash.short(),
                twin = %twin.id,
                "Perceptual near-duplicate kept as a distinct record"
            );
        }

        let idx = state.records.len();
        state.by_content.insert(record.content_hash, idx);
        state.records.push(record.clone());
        info!(
            id = %record.id,
            content_hash = %record.content_hash.short(),
            label = ?record.label,
            "Inserted known record"
        );
        (record, true)
    }

    /// Build a record from `set` using the store clock and upsert it.
    ///
    /// `None` when the set carries no perceptual hash.
    pub fn ingest(
        &self,
        set: &FingerprintSet,
        label: Label,
        provenance: impl Into<String>,
    ) -> Option<(KnownRecord, bool)> {
        let record = KnownRecord::from_fingerprints(set, label, provenance, self.clock.now())?;
        Some(self.upsert(record))
    }

    /// Records within `max_distance` of any query perceptual hash, closest first.
    pub fn find_duplicates(
        &self,
        set: &FingerprintSet,
        max_distance: u32,
    ) -> Vec<(u32, KnownRecord)> {
        let state = self.read();
        let mut matches: Vec<(u32, KnownRecord)> = state
            .records
            .iter()
            .filter_map(|record| {
                let distance = set.min_perceptual_distance(&record.perceptual_hash)?;
                (distance <= max_distance).then(|| (distance, record.clone()))
            })
            .collect();
        matches.sort_by_key(|(distance, _)| *distance);
        matches
    }

    /// Records whose tile signature shares at least `min_cells` cells within
    /// `max_cell_distance` of some query tile signature, best first.
    pub fn find_tile_matches(
        &self,
        set: &FingerprintSet,
        max_cell_distance: u32,
        min_cells: usize,
    ) -> Vec<(usize, KnownRecord)> {
        let state = self.read();
        let mut matches: Vec<(usize, KnownRecord)> = state
            .records
            .iter()
            .filter_map(|record| {
                let stored = record.tile_signature.as_ref()?;
                let cells = set
                    .tile_signatures()
                    .iter()
                    .filter_map(|query| query.matching_cells(stored, max_cell_distance))
                    .max()?;
                (cells >= min_cells.max(1)).then(|| (cells, record.clone()))
            })
            .collect();
        matches.sort_by(|a, b| b.0.cmp(&a.0));
        matches
    }

    pub fn get(&self, content_hash: &ContentHash) -> Option<KnownRecord> {
        let state = self.read();
        state
            .by_content
            .get(content_hash)
            .map(|&idx| state.records[idx].clone())
    }

    pub fn contains_content(&self, content_hash: &ContentHash) -> bool {
        self.read().by_content.contains_key(content_hash)
    }

    /// Operator relabel of every record with `content_hash`.
    pub fn set_label(&self, content_hash: &ContentHash, label: Label) -> Option<KnownRecord> {
        let mut state = self.write();
        let mut updated = None;
        for record in state
            .records
            .iter_mut()
            .filter(|r| r.content_hash == *content_hash)
        {
            record.label = label;
            updated.get_or_insert_with(|| record.clone());
        }
        if let Some(record) = &updated {
            info!(id = %record.id, label = ?label, "Relabeled record");
        }
        updated
    }

    /// Merge records that share a content hash. Returns how many were folded.
    pub fn compact(&self) -> usize {
        let mut state = self.write();
        let records = std::mem::take(&mut state.records);
        let before = records.len();

        let mut merged: Vec<KnownRecord> = Vec::with_capacity(before);
        let mut index: HashMap<ContentHash, usize> = HashMap::with_capacity(before);
        for record in records {
            match index.get(&record.content_hash) {
                Some(&idx) => merged[idx].absorb(record),
                None => {
                    index.insert(record.content_hash, merged.len());
                    merged.push(record);
                }
            }
        }

        let folded = before - merged.len();
        *state = StoreState {
            records: merged,
            by_content: index,
        };
        if folded > 0 {
            info!(folded, "Compacted fingerprint store");
        }
        folded
    }

    /// Groups of distinct records with identical perceptual hashes.
    pub fn near_duplicate_groups(&self) -> Vec<Vec<KnownRecord>> {
        let state = self.read();
        let mut groups: HashMap<&Fingerprint, Vec<KnownRecord>> = HashMap::new();
        for record in &state.records {
            groups
                .entry(&record.perceptual_hash)
                .or_default()
                .push(record.clone());
        }
        let mut groups: Vec<Vec<KnownRecord>> =
            groups.into_values().filter(|g| g.len() > 1).collect();
        groups.sort_by(|a, b| a[0].first_seen_at.cmp(&b[0].first_seen_at));
        groups
    }

    /// Perceptual hashes of every `phish` record.
    pub fn phish_fingerprints(&self) -> Vec<Fingerprint> {
        self.read()
            .records
            .iter()
            .filter(|r| r.is_phish())
            .map(|r| r.perceptual_hash.clone())
            .collect()
    }

    /// Snapshot of all records in insertion order.
    pub fn records(&self) -> Vec<KnownRecord> {
        self.read().records.clone()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.read();
        state
            .records
            .iter()
            .fold(StoreStats::default(), |mut stats, record| {
                stats.records += 1;
                stats.total_seen += record.seen_count;
                match record.label {
                    Label::Phish => stats.phish += 1,
                    Label::Benign => stats.benign += 1,
                    Label::Unlabeled => stats.unlabeled += 1,
                }
                stats
            })
    }
}
