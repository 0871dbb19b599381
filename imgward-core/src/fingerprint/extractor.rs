//! Fingerprint extraction from raw attachment bytes.
//!
//! Animated input (GIF, animated WebP) is decoded frame by frame and sampled
//! evenly down to `max_frames` across its whole length. Every sampled frame, and up to
//! `augment_per_frame` deterministic variants of it, contributes a perceptual
//! hash, a gradient hash and a tile signature. The variants only raise recall
//! against trivial edits (mirroring, slight rotation, tight cropping).

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, DynamicImage, Frames, ImageFormat, Rgba, RgbaImage};
use image_hasher::Hasher;
use tracing::{debug, instrument};

use super::perceptual::hash_with;
use super::{ContentHash, FingerprintSet, HashAlgorithm, PerceptualHasher, TileSignature};
use crate::config::ExtractorConfig;
use crate::error::{Result, WardenError};

/// Upper bound on frames walked while counting an animation.
const MAX_ANIMATION_FRAMES: usize = 10_000;

/// Cells smaller than this (in pixels) make tile signatures meaningless.
const MIN_TILE_EDGE: u32 = 8;

/// Augmented views of a frame, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Augmentation {
    Mirror,
    RotateCcw,
    RotateCw,
    CenterCrop,
}

const AUGMENTATIONS: [Augmentation; 4] = [
    Augmentation::Mirror,
    Augmentation::RotateCcw,
    Augmentation::RotateCw,
    Augmentation::CenterCrop,
];

/// Turns image bytes into a [`FingerprintSet`].
#[derive(Debug, Clone)]
pub struct FingerprintExtractor {
    config: ExtractorConfig,
    phash: PerceptualHasher,
    dhash: PerceptualHasher,
}

impl Default for FingerprintExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl FingerprintExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let phash = PerceptualHasher::new(HashAlgorithm::PHash).with_hash_size(config.hash_size);
        let dhash =
            PerceptualHasher::new(HashAlgorithm::Gradient).with_hash_size(config.hash_size);
        Self {
            config,
            phash,
            dhash,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Content hash only, without decoding.
    pub fn content_hash(&self, bytes: &[u8]) -> ContentHash {
        ContentHash::of_prefix(bytes, self.config.content_hash_prefix_bytes)
    }

    /// Extract all fingerprints from `bytes`.
    ///
    /// Fails with [`WardenError::Decode`] when the bytes are not a usable
    /// raster image; the error still carries the content hash.
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    pub fn extract(&self, bytes: &[u8]) -> Result<FingerprintSet> {
        let content_hash = self.content_hash(bytes);
        let decode_err = |reason: String| WardenError::Decode {
            content_hash,
            reason,
        };

        let frames = decode_frames(bytes, self.config.max_frames).map_err(decode_err)?;

        if let Some(first) = frames.first() {
            let edge = first.width().min(first.height());
            if edge < self.config.min_edge {
                return Err(decode_err(format!(
                    "shorter edge {edge}px is below the {}px minimum",
                    self.config.min_edge
                )));
            }
        }

        let phash = self.phash.build();
        let dhash = self.dhash.build();
        let mut set = FingerprintSet::new(content_hash);
        set.set_frames_sampled(frames.len());

        for frame in &frames {
            self.hash_into(&mut set, frame, &phash, &dhash);

            if self.config.augment {
                for variant in self.variants(frame) {
                    self.hash_into(&mut set, &variant, &phash, &dhash);
                }
            }
        }

        debug!(
            content_hash = %content_hash.short(),
            frames = frames.len(),
            perceptual = set.perceptual_hashes().len(),
            gradient = set.gradient_hashes().len(),
            tiles = set.tile_signatures().len(),
            "Extracted fingerprints"
        );

        Ok(set)
    }

    fn hash_into(
        &self,
        set: &mut FingerprintSet,
        image: &DynamicImage,
        phash: &Hasher,
        dhash: &Hasher,
    ) {
        set.insert_perceptual(hash_with(phash, image));
        set.insert_gradient(hash_with(dhash, image));
        if self.config.tiles {
            if let Some(tiles) = tile_signature(image, self.config.tile_grid, phash) {
                set.insert_tiles(tiles);
            }
        }
    }

    fn variants(&self, frame: &DynamicImage) -> Vec<DynamicImage> {
        AUGMENTATIONS
            .iter()
            .filter_map(|aug| self.augment(frame, *aug))
            .take(self.config.augment_per_frame)
            .collect()
    }

    fn augment(&self, frame: &DynamicImage, aug: Augmentation) -> Option<DynamicImage> {
        let degrees = self.config.rotation_degrees;
        match aug {
            Augmentation::Mirror => Some(frame.fliph()),
            Augmentation::RotateCcw if degrees > 0.0 => Some(rotate_expanded(frame, degrees)),
            Augmentation::RotateCw if degrees > 0.0 => Some(rotate_expanded(frame, -degrees)),
            Augmentation::RotateCcw | Augmentation::RotateCw => None,
            Augmentation::CenterCrop => center_crop(frame, self.config.crop_area_fraction),
        }
    }
}

/// Decode up to `max_frames` evenly spaced frames.
fn decode_frames(bytes: &[u8], max_frames: usize) -> std::result::Result<Vec<DynamicImage>, String> {
    let format = image::guess_format(bytes).map_err(|e| e.to_string())?;

    match format {
        ImageFormat::Gif => sample_animation(
            || {
                GifDecoder::new(Cursor::new(bytes))
                    .map(|decoder| decoder.into_frames())
                    .map_err(|e| e.to_string())
            },
            max_frames,
        ),
        ImageFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
            if !decoder.has_animation() {
                return decode_still(bytes, format);
            }
            sample_animation(
                || {
                    WebPDecoder::new(Cursor::new(bytes))
                        .map(|decoder| decoder.into_frames())
                        .map_err(|e| e.to_string())
                },
                max_frames,
            )
        }
        _ => decode_still(bytes, format),
    }
}

fn decode_still(bytes: &[u8], format: ImageFormat) -> std::result::Result<Vec<DynamicImage>, String> {
    image::load_from_memory_with_format(bytes, format)
        .map(|image| vec![image])
        .map_err(|e| e.to_string())
}

/// Sample an animation in two passes so only the picked frames are held.
///
/// The first pass counts decodable frames and drops each buffer as it goes;
/// the second re-opens the stream and keeps the frames at the sampled
/// indices, stopping after the last one.
fn sample_animation<'a, F>(
    open: F,
    max_frames: usize,
) -> std::result::Result<Vec<DynamicImage>, String>
where
    F: Fn() -> std::result::Result<Frames<'a>, String>,
{
    let mut total = 0usize;
    for frame in open()?.take(MAX_ANIMATION_FRAMES) {
        match frame {
            Ok(_) => total += 1,
            // Keep what decoded before a truncated tail.
            Err(e) if total > 0 => {
                debug!(error = %e, decoded = total, "Animation truncated");
                break;
            }
            Err(e) => return Err(e.to_string()),
        }
    }

    if total == 0 {
        return Err("animation contains no frames".into());
    }

    let picks = sample_indices(total, max_frames);
    let Some(&last) = picks.last() else {
        return Ok(Vec::new());
    };

    let mut sampled = Vec::with_capacity(picks.len());
    for (index, frame) in open()?.take(last + 1).enumerate() {
        if picks.binary_search(&index).is_ok() {
            let frame = frame.map_err(|e| e.to_string())?;
            sampled.push(DynamicImage::ImageRgba8(frame.into_buffer()));
        }
    }
    debug!(total, sampled = sampled.len(), "Sampled animation");
    Ok(sampled)
}

/// `count` indices spread evenly over `0..total`, starting at 0.
pub(crate) fn sample_indices(total: usize, count: usize) -> Vec<usize> {
    if total <= count {
        return (0..total).collect();
    }
    (0..count).map(|i| i * total / count).collect()
}

fn tile_signature(image: &DynamicImage, grid: u32, hasher: &Hasher) -> Option<TileSignature> {
    if grid == 0 {
        return None;
    }
    let cell_w = image.width() / grid;
    let cell_h = image.height() / grid;
    if cell_w < MIN_TILE_EDGE || cell_h < MIN_TILE_EDGE {
        return None;
    }

    let mut cells = Vec::with_capacity((grid * grid) as usize);
    for row in 0..grid {
        for col in 0..grid {
            let cell = image.crop_imm(col * cell_w, row * cell_h, cell_w, cell_h);
            cells.push(hash_with(hasher, &cell));
        }
    }
    Some(TileSignature { grid, cells })
}

/// Center crop keeping `area_fraction` of the area, same aspect ratio.
fn center_crop(image: &DynamicImage, area_fraction: f32) -> Option<DynamicImage> {
    let side = area_fraction.clamp(0.0, 1.0).sqrt();
    let (w, h) = (image.width(), image.height());
    let new_w = (w as f32 * side).round() as u32;
    let new_h = (h as f32 * side).round() as u32;
    if new_w <= MIN_TILE_EDGE || new_h <= MIN_TILE_EDGE || (new_w == w && new_h == h) {
        return None;
    }
    Some(image.crop_imm((w - new_w) / 2, (h - new_h) / 2, new_w, new_h))
}

/// Rotate counter-clockwise by `degrees`, growing the canvas to fit and
/// filling uncovered pixels with opaque black.
fn rotate_expanded(image: &DynamicImage, degrees: f32) -> DynamicImage {
    let src = image.to_rgba8();
    let (w, h) = src.dimensions();
    let (sin, cos) = degrees.to_radians().sin_cos();

    let new_w = ((w as f32 * cos.abs()) + (h as f32 * sin.abs())).ceil().max(1.0) as u32;
    let new_h = ((w as f32 * sin.abs()) + (h as f32 * cos.abs())).ceil().max(1.0) as u32;
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let (ncx, ncy) = (new_w as f32 / 2.0, new_h as f32 / 2.0);

    let out = RgbaImage::from_fn(new_w, new_h, |x, y| {
        let dx = x as f32 + 0.5 - ncx;
        let dy = y as f32 + 0.5 - ncy;
        // Inverse mapping back into the source image.
        let sx = cos * dx - sin * dy + cx;
        let sy = sin * dx + cos * dy + cy;
        if sx >= 0.0 && sy >= 0.0 && (sx as u32) < w && (sy as u32) < h {
            *src.get_pixel(sx as u32, sy as u32)
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    DynamicImage::ImageRgba8(out)
}
