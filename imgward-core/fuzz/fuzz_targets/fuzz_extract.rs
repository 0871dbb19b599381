#![no_main]

//! Fuzz target for FingerprintExtractor::extract()
//!
//! Attachments are attacker-controlled. Extraction must return a decode
//! error for garbage, never panic, and always report the content hash.
//!
//! Run with: cargo +nightly fuzz run fuzz_extract

use imgward_core::{ExtractorConfig, FingerprintExtractor, WardenError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let extractor = FingerprintExtractor::new(ExtractorConfig {
        max_frames: 2,
        ..ExtractorConfig::default()
    });
    let expected = extractor.content_hash(data);

    match extractor.extract(data) {
        Ok(set) => assert_eq!(set.content_hash(), expected),
        Err(WardenError::Decode { content_hash, .. }) => assert_eq!(content_hash, expected),
        Err(_) => {}
    }
});
