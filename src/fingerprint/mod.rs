//! Content fingerprints for exact-match detection and perceptual hashes for
//! near-duplicate image retrieval.


use std::fmt;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Side length of the low-frequency DCT block that becomes the hash
const HASH_SIZE: usize = 8;
/// The image is reduced to `HASH_SIZE * HIGHFREQ_FACTOR` pixels per side before the DCT
const HIGHFREQ_FACTOR: usize = 4;
const SAMPLE_SIZE: usize = HASH_SIZE * HIGHFREQ_FACTOR;

/// Number of hex characters in the textual form of a perceptual hash
pub const PHASH_HEX_LEN: usize = 16;

/// Hamming distance can never exceed the hash width
pub const MAX_DISTANCE: u32 = 64;

/// SHA-256 over a page's extracted text, as 64 lowercase hex characters
#[inline]
pub fn content_fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashParseError {
    #[error("perceptual hash must be {PHASH_HEX_LEN} hex characters, got {0}")]
    InvalidLength(usize),
    #[error("perceptual hash contains non-hex characters: {0}")]
    InvalidDigit(String),
}

/// 64-bit DCT perceptual hash.
///
/// Bit 63 holds the top-left coefficient of the low-frequency block, so the
/// hex form reads row by row from the most significant nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PerceptualHash(u64);

impl PerceptualHash {
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Number of differing bits between two hashes
    #[inline]
    pub const fn distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Hash the full-resolution image.
    ///
    /// The image is reduced to BT.601 luma, resampled to 32x32 with a Lanczos
    /// filter, transformed with a 2D DCT-II, and the top-left 8x8 coefficients
    /// are compared against their median.
    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let gray: GrayImage = ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
            let [r, g, b] = rgb.get_pixel(x, y).0;
            Luma([bt601_luma(r, g, b)])
        });

        let side = SAMPLE_SIZE as u32;
        let sample = imageops::resize(&gray, side, side, FilterType::Lanczos3);

        let mut pixels = [[0.0_f64; SAMPLE_SIZE]; SAMPLE_SIZE];
        for (x, y, pixel) in sample.enumerate_pixels() {
            pixels[y as usize][x as usize] = f64::from(pixel.0[0]);
        }

        let coefficients = low_frequency_dct(&pixels);
        let median = median(&coefficients);

        let bits = coefficients
            .iter()
            .fold(0_u64, |acc, &value| (acc << 1) | u64::from(value > median));
        Self(bits)
    }
}

impl fmt::Display for PerceptualHash {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for PerceptualHash {
    type Err = HashParseError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != PHASH_HEX_LEN {
            return Err(HashParseError::InvalidLength(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashParseError::InvalidDigit(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| HashParseError::InvalidDigit(s.to_string()))
    }
}

impl TryFrom<String> for PerceptualHash {
    type Error = HashParseError;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PerceptualHash> for String {
    #[inline]
    fn from(hash: PerceptualHash) -> Self {
        hash.to_string()
    }
}

/// Integer BT.601 luma, the same rounding a PIL "L" conversion uses
#[expect(
    clippy::cast_possible_truncation,
    reason = "weights sum to 65536 so the shifted value is at most 255"
)]
fn bt601_luma(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471 + 0x8000) >> 16) as u8
}

/// Unnormalised 2D DCT-II, keeping only the `HASH_SIZE` lowest frequencies per
/// axis, flattened row-major.
fn low_frequency_dct(pixels: &[[f64; SAMPLE_SIZE]; SAMPLE_SIZE]) -> [f64; HASH_SIZE * HASH_SIZE] {
    let mut basis = [[0.0_f64; SAMPLE_SIZE]; HASH_SIZE];
    for (k, row) in basis.iter_mut().enumerate() {
        for (n, value) in row.iter_mut().enumerate() {
            *value = (std::f64::consts::PI * k as f64 * (2 * n + 1) as f64
                / (2 * SAMPLE_SIZE) as f64)
                .cos();
        }
    }

    // Columns first (frequency along y), then rows (frequency along x).
    let mut partial = [[0.0_f64; SAMPLE_SIZE]; HASH_SIZE];
    for (u, out_row) in partial.iter_mut().enumerate() {
        for (x, out) in out_row.iter_mut().enumerate() {
            *out = (0..SAMPLE_SIZE).map(|y| basis[u][y] * pixels[y][x]).sum();
        }
    }

    let mut coefficients = [0.0_f64; HASH_SIZE * HASH_SIZE];
    for u in 0..HASH_SIZE {
        for v in 0..HASH_SIZE {
            coefficients[u * HASH_SIZE + v] =
                (0..SAMPLE_SIZE).map(|x| basis[v][x] * partial[u][x]).sum();
        }
    }
    coefficients
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
