use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use super::Fingerprint;
use crate::error::{Result, WardenError};

/// SHA3-256 digest of the raw attachment bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash the full content.
    pub fn of(data: &[u8]) -> Self {
        Self::of_prefix(data, None)
    }

    /// Hash at most `limit` leading bytes of the content.
    pub fn of_prefix(data: &[u8], limit: Option<usize>) -> Self {
        let end = limit.map_or(data.len(), |l| l.min(data.len()));
        let mut hasher = Sha3_256::new();
        hasher.update(&data[..end]);
        let result = hasher.finalize();

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&result);
        Self(digest)
    }

    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| WardenError::InvalidHash(format!("{hex_str:?}: {e}")))?;
        let digest: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            WardenError::InvalidHash(format!("content hash must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(digest))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = WardenError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

/// Per-cell fingerprints over a `grid × grid` overlay, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSignature {
    pub grid: u32,
    pub cells: Vec<Fingerprint>,
}

impl TileSignature {
    /// Number of cell pairs within `max_cell_distance` of each other.
    ///
    /// `None` when the two signatures use different grids.
    pub fn matching_cells(&self, other: &Self, max_cell_distance: u32) -> Option<usize> {
        if self.grid != other.grid || self.cells.len() != other.cells.len() {
            return None;
        }
        Some(
            self.cells
                .iter()
                .zip(&other.cells)
                .filter(|(a, b)| a.distance(b).is_some_and(|d| d <= max_cell_distance))
                .count(),
        )
    }
}

/// Everything extracted from one attachment.
///
/// Each collection behaves as a set (duplicates collapse) but keeps
/// first-computed order, so the first entry is the canonical value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintSet {
    content_hash: ContentHash,
    perceptual_hashes: Vec<Fingerprint>,
    gradient_hashes: Vec<Fingerprint>,
    tile_signatures: Vec<TileSignature>,
    frames_sampled: usize,
}

impl FingerprintSet {
    pub fn new(content_hash: ContentHash) -> Self {
        Self {
            content_hash,
            perceptual_hashes: Vec::new(),
            gradient_hashes: Vec::new(),
            tile_signatures: Vec::new(),
            frames_sampled: 0,
        }
    }

    /// Builder used by tests and by callers holding precomputed hashes.
    pub fn with_perceptual(mut self, hash: Fingerprint) -> Self {
        self.insert_perceptual(hash);
        self
    }

    pub fn with_gradient(mut self, hash: Fingerprint) -> Self {
        self.insert_gradient(hash);
        self
    }

    pub fn with_tiles(mut self, tiles: TileSignature) -> Self {
        self.insert_tiles(tiles);
        self
    }

    pub fn insert_perceptual(&mut self, hash: Fingerprint) -> bool {
        insert_unique(&mut self.perceptual_hashes, hash)
    }

    pub fn insert_gradient(&mut self, hash: Fingerprint) -> bool {
        insert_unique(&mut self.gradient_hashes, hash)
    }

    pub fn insert_tiles(&mut self, tiles: TileSignature) -> bool {
        insert_unique(&mut self.tile_signatures, tiles)
    }

    pub(crate) fn set_frames_sampled(&mut self, frames: usize) {
        self.frames_sampled = frames;
    }

    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    pub fn perceptual_hashes(&self) -> &[Fingerprint] {
        &self.perceptual_hashes
    }

    pub fn gradient_hashes(&self) -> &[Fingerprint] {
        &self.gradient_hashes
    }

    pub fn tile_signatures(&self) -> &[TileSignature] {
        &self.tile_signatures
    }

    pub fn frames_sampled(&self) -> usize {
        self.frames_sampled
    }

    pub fn canonical_perceptual(&self) -> Option<&Fingerprint> {
        self.perceptual_hashes.first()
    }

    pub fn canonical_gradient(&self) -> Option<&Fingerprint> {
        self.gradient_hashes.first()
    }

    pub fn canonical_tiles(&self) -> Option<&TileSignature> {
        self.tile_signatures.first()
    }

    /// Smallest distance between any of our perceptual hashes and `target`.
    pub fn min_perceptual_distance(&self, target: &Fingerprint) -> Option<u32> {
        self.perceptual_hashes
            .iter()
            .filter_map(|h| h.distance(target))
            .min()
    }
}

fn insert_unique<T: PartialEq>(items: &mut Vec<T>, item: T) -> bool {
    if items.contains(&item) {
        return false;
    }
    items.push(item);
    true
}
