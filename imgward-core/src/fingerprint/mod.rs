//! Image fingerprints.
//!
//! This module turns attachment bytes into values that can be compared
//! against the known-record store.
//!
//! # Components
//!
//! - **Content hash**: SHA3-256 over the raw bytes, for exact re-uploads.
//! - **Perceptual and gradient hashes**: fixed-length fingerprints that stay
//!   close (small Hamming distance) for visually similar images.
//! - **Tile signatures**: per-cell fingerprints over a grid, for partial crops.
//! - **Extractor**: frame sampling and augmentation producing a
//!   [`FingerprintSet`].

pub mod extractor;
pub mod perceptual;
mod set;

pub use extractor::FingerprintExtractor;
pub use perceptual::*;
pub use set::{ContentHash, FingerprintSet, TileSignature};
