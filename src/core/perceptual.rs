use crate::core::hash;
use crate::core::image::{CropView, PixelBuffer};
use crate::core::models::{ComputedFingerprint, Crop, HashKind, PerceptualHash};
use image::GrayImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Could not decode thumbnail: {0}")]
    DecodeFailed(String),

    #[error("Image processing failed (code {code})")]
    Processing { code: i32 },
}

impl FingerprintError {
    /// The decoded image could not be rendered into the pixel buffer.
    pub const RENDER_FAILED: i32 = 1;
    /// Downscaling a crop view did not yield the requested grid.
    pub const SCALE_FAILED: i32 = 2;
}

/// Derives the checksum and the perceptual hashes of one thumbnail.
///
/// Stateless; callers may share one instance across worker threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprinter;

impl Fingerprinter {
    pub fn new() -> Self {
        Self
    }

    /// Fingerprint raw thumbnail bytes.
    ///
    /// The checksum covers the bytes as given and does not depend on the
    /// image decoding successfully.
    pub fn compute(&self, bytes: &[u8]) -> Result<ComputedFingerprint, FingerprintError> {
        let checksum = hash::checksum(bytes);

        let img = image::load_from_memory(bytes)
            .map_err(|e| FingerprintError::DecodeFailed(e.to_string()))?;
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(FingerprintError::DecodeFailed(format!(
                "image has zero size ({}x{})",
                width, height
            )));
        }
        let aspect_ratio = width as f64 / height as f64;

        let buffer = PixelBuffer::render(&img).ok_or(FingerprintError::Processing {
            code: FingerprintError::RENDER_FAILED,
        })?;
        drop(img);

        let mut dhashes = Vec::with_capacity(Crop::ALL.len());
        let mut ahashes = Vec::with_capacity(Crop::ALL.len());
        for crop in Crop::ALL {
            let view = buffer.crop_view(crop);
            dhashes.push(PerceptualHash {
                kind: HashKind::DHash,
                crop,
                value: dhash(&view)?,
            });
            ahashes.push(PerceptualHash {
                kind: HashKind::AHash,
                crop,
                value: ahash(&view)?,
            });
        }

        let mut hashes = dhashes;
        hashes.append(&mut ahashes);

        Ok(ComputedFingerprint {
            aspect_ratio,
            checksum,
            hashes,
        })
    }
}

/// Difference hash: 9x8 grid, one bit per horizontally adjacent pair,
/// set when the left pixel is brighter. MSB first, row-major.
pub fn dhash(view: &CropView<'_>) -> Result<u64, FingerprintError> {
    let gray = downscale(view, 9, 8)?;
    Ok(dhash_bits(&gray))
}

/// Average hash: 8x8 grid, bit set where the pixel is brighter than the
/// integer mean. MSB first, row-major.
pub fn ahash(view: &CropView<'_>) -> Result<u64, FingerprintError> {
    let gray = downscale(view, 8, 8)?;
    Ok(ahash_bits(&gray))
}

fn downscale(
    view: &CropView<'_>,
    width: u32,
    height: u32,
) -> Result<GrayImage, FingerprintError> {
    view.downscale_gray(width, height).ok_or(FingerprintError::Processing {
        code: FingerprintError::SCALE_FAILED,
    })
}

fn dhash_bits(gray: &GrayImage) -> u64 {
    let mut bits = 0u64;
    for y in 0..8 {
        for x in 0..8 {
            let left = gray.get_pixel(x, y)[0];
            let right = gray.get_pixel(x + 1, y)[0];
            bits = (bits << 1) | (left > right) as u64;
        }
    }
    bits
}

fn ahash_bits(gray: &GrayImage) -> u64 {
    let sum: u32 = gray.pixels().map(|p| p[0] as u32).sum();
    let mean = (sum / 64) as u8;

    gray.pixels()
        .fold(0u64, |bits, p| (bits << 1) | (p[0] > mean) as u64)
}
