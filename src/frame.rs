use ndarray::prelude::*;

use crate::image::GrayImage;

/// Decoded camera frame, `(height, width, channels)` with 1, 3 (RGB) or
/// 4 (RGBA) channels.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Array3<u8>,
    pub timestamp_ms: u64,
}

impl Frame {
    #[inline]
    pub fn new(pixels: Array3<u8>, timestamp_ms: u64) -> Self {
        Self {
            pixels,
            timestamp_ms,
        }
    }

    /// Single-channel frame; any memory layout of `gray` is kept as is.
    pub fn from_gray(gray: GrayImage, timestamp_ms: u64) -> Self {
        Self::new(gray.insert_axis(Axis(2)), timestamp_ms)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        (self.width() as u32, self.height() as u32)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.pixels.shape()[2]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0 || self.channels() == 0
    }

    /// Grayscale conversion with BT.601 weights; alpha is ignored.
    pub fn luma(&self) -> GrayImage {
        if self.channels() < 3 {
            return self.pixels.index_axis(Axis(2), 0).to_owned();
        }

        Array2::from_shape_fn((self.height(), self.width()), |(y, x)| {
            let r = self.pixels[[y, x, 0]] as u32;
            let g = self.pixels[[y, x, 1]] as u32;
            let b = self.pixels[[y, x, 2]] as u32;

            ((r * 299 + g * 587 + b * 114 + 500) / 1000) as u8
        })
    }

    /// Mean brightness over a sparse grid (about 20 samples per short side),
    /// averaging the colour channels of each sample.
    pub fn mean_luma(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }

        let (w, h) = (self.width(), self.height());
        let step = (w.min(h) / 20).max(1);
        let channels = self.channels().min(3);

        let mut sum = 0u64;
        let mut count = 0u64;

        for y in (0..h).step_by(step) {
            for x in (0..w).step_by(step) {
                let px: u64 = (0..channels).map(|c| self.pixels[[y, x, c]] as u64).sum();
                sum += px / channels as u64;
                count += 1;
            }
        }

        sum as f32 / count.max(1) as f32
    }
}
