//! Robustness tests for fingerprint extraction.
//!
//! A known-bad image is ingested once; re-encoded, resized, mirrored and
//! animated copies must still land within matching distance of it.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::gif::GifEncoder;
use image::{DynamicImage, Frame, GenericImageView, ImageBuffer, ImageFormat, Rgb, RgbImage};
use imgward_core::{
    decide, ContentHash, EnforcementPolicy, ExtractorConfig, FingerprintExtractor,
    FingerprintStore, Label, SystemClock, Tier, WardenError,
};

/// Create a test image with recognizable patterns.
/// Uses gradients and shapes to ensure consistent perceptual features.
fn create_test_image(width: u32, height: u32) -> RgbImage {
    let mut img = ImageBuffer::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let r = ((x as f32 / width as f32) * 255.0) as u8;
        let g = ((y as f32 / height as f32) * 255.0) as u8;
        let b = (((x + y) as f32 / (width + height) as f32) * 200.0) as u8;

        let pattern = if (x / 20 + y / 20) % 2 == 0 { 30 } else { 0 };
        *pixel = Rgb([r.saturating_add(pattern), g, b]);
    }

    img
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, format).expect("encoding failed");
    buffer.into_inner()
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .expect("JPEG encoding failed");
    buffer.into_inner()
}

fn encode_gif(frames: Vec<DynamicImage>) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buffer);
        encoder
            .encode_frames(frames.into_iter().map(|f| Frame::new(f.to_rgba8())))
            .expect("GIF encoding failed");
    }
    buffer
}

/// Fastest quantizer, for animations with hundreds of frames.
fn encode_gif_fast(frames: Vec<&DynamicImage>) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut buffer, 30);
        encoder
            .encode_frames(frames.into_iter().map(|f| Frame::new(f.to_rgba8())))
            .expect("GIF encoding failed");
    }
    buffer
}

fn original() -> DynamicImage {
    DynamicImage::ImageRgb8(create_test_image(256, 256))
}

/// Store with the original image ingested as `phish`.
fn store_with_original(extractor: &FingerprintExtractor) -> FingerprintStore {
    let store = FingerprintStore::new(Arc::new(SystemClock));
    let set = extractor
        .extract(&encode(&original(), ImageFormat::Png))
        .expect("Failed to extract original");
    store
        .ingest(&set, Label::Phish, "test:original")
        .expect("original has a perceptual hash");
    store
}

fn tier_for(extractor: &FingerprintExtractor, store: &FingerprintStore, bytes: &[u8]) -> Tier {
    let set = extractor.extract(bytes).expect("Failed to extract query");
    let verdict = decide(&set, store, &set.content_hash(), &EnforcementPolicy::default());
    println!(
        "best distance: {:?}, tier: {}",
        verdict.best_distance, verdict.tier
    );
    verdict.tier
}

// ============================================================================
// Re-encoding and resizing
// ============================================================================

#[test]
fn test_jpeg_reencode_still_matches() {
    let extractor = FingerprintExtractor::default();
    let store = store_with_original(&extractor);

    let tier = tier_for(&extractor, &store, &encode_jpeg(&original(), 85));
    assert_ne!(tier, Tier::None, "JPEG re-encode should still match");
}

#[test]
fn test_resize_still_matches() {
    let extractor = FingerprintExtractor::default();
    let store = store_with_original(&extractor);

    let (w, h) = original().dimensions();
    let resized = original().resize_exact(w / 2, h / 2, image::imageops::FilterType::Lanczos3);
    let tier = tier_for(&extractor, &store, &encode(&resized, ImageFormat::Png));
    assert_ne!(tier, Tier::None, "50% resize should still match");
}

#[test]
fn test_identical_bytes_are_strong() {
    let extractor = FingerprintExtractor::default();
    let store = store_with_original(&extractor);

    let tier = tier_for(&extractor, &store, &encode(&original(), ImageFormat::Png));
    assert_eq!(tier, Tier::Strong);
}

// ============================================================================
// Augmentation
// ============================================================================

#[test]
fn test_mirrored_upload_matches_through_augmentation() {
    let extractor = FingerprintExtractor::default();
    let store = store_with_original(&extractor);

    let mirrored = encode(&original().fliph(), ImageFormat::Png);
    let set = extractor.extract(&mirrored).unwrap();
    let verdict = decide(&set, &store, &set.content_hash(), &EnforcementPolicy::default());

    // The query's own mirror variant is the original image.
    assert_eq!(verdict.best_distance, Some(0));
    assert_eq!(verdict.tier, Tier::Strong);
}

#[test]
fn test_augmentation_off_hashes_frame_only() {
    let config = ExtractorConfig {
        augment: false,
        ..ExtractorConfig::default()
    };
    let set = FingerprintExtractor::new(config)
        .extract(&encode(&original(), ImageFormat::Png))
        .unwrap();
    assert_eq!(set.frames_sampled(), 1);
    assert_eq!(set.perceptual_hashes().len(), 1);
    assert_eq!(set.gradient_hashes().len(), 1);
    assert_eq!(set.tile_signatures().len(), 1);
}

// ============================================================================
// Animated input
// ============================================================================

#[test]
fn test_animated_gif_frames_are_sampled() {
    let frames: Vec<DynamicImage> = (0..10)
        .map(|i| DynamicImage::ImageRgb8(create_test_image(64, 64)).huerotate(i * 30))
        .collect();
    let gif = encode_gif(frames);

    let config = ExtractorConfig {
        max_frames: 4,
        augment: false,
        ..ExtractorConfig::default()
    };
    let set = FingerprintExtractor::new(config).extract(&gif).unwrap();
    assert_eq!(set.frames_sampled(), 4);
    assert!(!set.perceptual_hashes().is_empty());
}

#[test]
fn test_long_gif_is_sampled_across_its_whole_length() {
    // Benign opening followed by a different image from frame 256 on.
    let opening = DynamicImage::ImageRgb8(create_test_image(64, 64));
    let mut payload = opening.clone();
    payload.invert();

    let animation: Vec<&DynamicImage> = (0..600)
        .map(|i| if i < 256 { &opening } else { &payload })
        .collect();
    let gif = encode_gif_fast(animation);

    let config = ExtractorConfig {
        max_frames: 6,
        augment: false,
        tiles: false,
        ..ExtractorConfig::default()
    };
    let extractor = FingerprintExtractor::new(config);
    let set = extractor.extract(&gif).unwrap();
    assert_eq!(set.frames_sampled(), 6);

    let hash_of = |image: &DynamicImage| {
        extractor
            .extract(&encode_gif_fast(vec![image]))
            .unwrap()
            .canonical_perceptual()
            .cloned()
            .unwrap()
    };
    let opening_hash = hash_of(&opening);
    let payload_hash = hash_of(&payload);
    assert!(opening_hash.distance(&payload_hash).unwrap() > 8);

    let distance = set.min_perceptual_distance(&payload_hash).unwrap();
    assert!(distance <= 4, "late frames were not sampled, distance {distance}");
}

#[test]
fn test_short_gif_uses_every_frame() {
    let gif = encode_gif(vec![original(), original().fliph()]);
    let config = ExtractorConfig {
        augment: false,
        ..ExtractorConfig::default()
    };
    let set = FingerprintExtractor::new(config).extract(&gif).unwrap();
    assert_eq!(set.frames_sampled(), 2);
}

// ============================================================================
// Failure modes
// ============================================================================

#[test]
fn test_garbage_is_decode_error_with_content_hash() {
    let bytes = b"definitely not an image";
    let err = FingerprintExtractor::default().extract(bytes).unwrap_err();
    match err {
        WardenError::Decode { content_hash, .. } => {
            assert_eq!(content_hash, ContentHash::of(bytes));
        }
        other => panic!("expected decode error, got {other:?}"),
    }
}

#[test]
fn test_small_image_below_min_edge_is_rejected() {
    let config = ExtractorConfig {
        min_edge: 128,
        ..ExtractorConfig::default()
    };
    let small = DynamicImage::ImageRgb8(create_test_image(64, 64));
    let err = FingerprintExtractor::new(config)
        .extract(&encode(&small, ImageFormat::Png))
        .unwrap_err();
    assert!(err.is_attachment_local());
}
