//! Perceptual hashing for images.
//!
//! This module provides the fixed-length fingerprints used for near-duplicate
//! detection, and the hashers that compute them.
//!
//! # Algorithms
//!
//! - **PHash**: DCT-preprocessed mean hash. Frequency-domain, robust against
//!   JPEG compression and resizing.
//! - **Gradient**: difference hash over horizontally adjacent pixels. Cheap and
//!   sensitive to structural edits the DCT hash tends to smooth over.
//!
//! Both produce `hash_size * hash_size` bits (64 bits with the default size).
//!
//! # Usage
//!
//! ```
//! use imgward_core::fingerprint::Fingerprint;
//!
//! let stored = Fingerprint::from_hex("c3a5f00f0ff05ac3")?;
//! let upload = Fingerprint::from_hex("c3a5f00f0ff05ac2")?;
//! assert_eq!(stored.distance(&upload), Some(1));
//!
//! // Hashes of different sizes are never comparable.
//! let wide = Fingerprint::from_hex("c3a5f00f0ff05ac3c3a5f00f0ff05ac3")?;
//! assert_eq!(stored.distance(&wide), None);
//! # Ok::<(), imgward_core::WardenError>(())
//! ```

use std::fmt;

use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};

/// Default hash edge; the hash carries `DEFAULT_HASH_SIZE²` bits.
pub const DEFAULT_HASH_SIZE: u32 = 8;

/// Perceptual hash algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// DCT + mean, the classic pHash.
    #[default]
    PHash,
    /// Horizontal gradient (dHash).
    Gradient,
}

/// A fixed-length binary fingerprint.
///
/// Serialized as a lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// 64-bit fingerprint from an integer, most significant byte first.
    pub fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes().to_vec())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| WardenError::InvalidHash(format!("{hex_str:?}: {e}")))?;
        if bytes.is_empty() {
            return Err(WardenError::InvalidHash("empty fingerprint".into()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn bit_len(&self) -> u32 {
        (self.0.len() * 8) as u32
    }

    /// Hamming distance to `other`, `None` when the lengths differ.
    pub fn distance(&self, other: &Self) -> Option<u32> {
        hamming_distance(&self.0, &other.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = WardenError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

/// Perceptual hasher configuration and computation.
#[derive(Debug, Clone, Copy)]
pub struct PerceptualHasher {
    algorithm: HashAlgorithm,
    hash_size: u32,
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

impl PerceptualHasher {
    /// Create a new perceptual hasher with the specified algorithm.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            hash_size: DEFAULT_HASH_SIZE,
        }
    }

    pub fn with_hash_size(mut self, hash_size: u32) -> Self {
        self.hash_size = hash_size;
        self
    }

    /// Build the underlying hasher. Hashing many images should reuse one.
    pub fn build(&self) -> Hasher {
        let config = HasherConfig::new().hash_size(self.hash_size, self.hash_size);
        match self.algorithm {
            HashAlgorithm::PHash => config.hash_alg(HashAlg::Mean).preproc_dct(),
            HashAlgorithm::Gradient => config.hash_alg(HashAlg::Gradient),
        }
        .to_hasher()
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }
}

pub(crate) fn hash_with(hasher: &Hasher, image: &DynamicImage) -> Fingerprint {
    Fingerprint(hasher.hash_image(image).as_bytes().to_vec())
}

/// Compute Hamming distance between two hash byte arrays.
///
/// The distance is the population count of the XOR of both values. Hashes of
/// different lengths (or empty hashes) are not comparable and yield `None`.
pub fn hamming_distance(hash1: &[u8], hash2: &[u8]) -> Option<u32> {
    if hash1.is_empty() || hash1.len() != hash2.len() {
        return None;
    }

    Some(
        hash1
            .iter()
            .zip(hash2.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum(),
    )
}
