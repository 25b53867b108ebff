//! Gradient perceptual hash used to spot repeated captures.
//!
//! The image is reduced to a `(size + 1) x size` grayscale thumbnail and every
//! bit records whether a pixel is brighter than its right-hand neighbour. The
//! thumbnail's mean luminance is kept alongside the bits: flat pages of
//! different tone have identical gradients and must not collapse.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HASH_SIZE: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerceptualHash {
    size: u32,
    bits: Vec<u64>,
    mean_luma: u8,
}

impl PerceptualHash {
    pub fn of(image: &DynamicImage, size: u32) -> Self {
        let size = size.clamp(4, 64);
        let gray = image.to_luma8();
        let small = image::imageops::resize(&gray, size + 1, size, FilterType::Triangle);

        let total_bits = (size * size) as usize;
        let mut bits = vec![0u64; total_bits.div_ceil(64)];
        let mut luma_sum: u64 = 0;

        for y in 0..size {
            for x in 0..size {
                let left = small.get_pixel(x, y)[0];
                let right = small.get_pixel(x + 1, y)[0];
                luma_sum += u64::from(left);
                if left > right {
                    let idx = (y * size + x) as usize;
                    bits[idx / 64] |= 1 << (idx % 64);
                }
            }
            luma_sum += u64::from(small.get_pixel(size, y)[0]);
        }

        let samples = u64::from(size * (size + 1));
        Self {
            size,
            bits,
            mean_luma: (luma_sum / samples) as u8,
        }
    }

    /// Hamming distance between gradient bits; `u32::MAX` when sizes differ.
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        if self.size != other.size {
            return u32::MAX;
        }
        self.bits
            .iter()
            .zip(&other.bits)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    pub fn is_similar(&self, other: &PerceptualHash, max_distance: u32, max_luma_delta: u8) -> bool {
        self.distance(other) <= max_distance
            && self.mean_luma.abs_diff(other.mean_luma) <= max_luma_delta
    }
}
