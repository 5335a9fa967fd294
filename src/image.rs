//! Small grayscale buffers used by the optical-flow path.

use ndarray::prelude::*;

pub type GrayImage = Array2<u8>;

/// Bilinear resize of a grayscale buffer to `width` x `height`.
pub fn resize_bilinear(src: ArrayView2<'_, u8>, width: usize, height: usize) -> GrayImage {
    let (sh, sw) = src.dim();
    if sh == 0 || sw == 0 || width == 0 || height == 0 {
        return Array2::zeros((height, width));
    }

    let sx = sw as f32 / width as f32;
    let sy = sh as f32 / height as f32;

    Array2::from_shape_fn((height, width), |(y, x)| {
        // pixel-centre alignment
        let fx = ((x as f32 + 0.5) * sx - 0.5).max(0.0);
        let fy = ((y as f32 + 0.5) * sy - 0.5).max(0.0);

        let x0 = (fx as usize).min(sw - 1);
        let y0 = (fy as usize).min(sh - 1);
        let x1 = (x0 + 1).min(sw - 1);
        let y1 = (y0 + 1).min(sh - 1);
        let ax = fx - x0 as f32;
        let ay = fy - y0 as f32;

        let top = src[[y0, x0]] as f32 * (1.0 - ax) + src[[y0, x1]] as f32 * ax;
        let bottom = src[[y1, x0]] as f32 * (1.0 - ax) + src[[y1, x1]] as f32 * ax;

        (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8
    })
}

#[inline]
pub fn to_f32(src: ArrayView2<'_, u8>) -> Array2<f32> {
    src.mapv(|v| v as f32)
}

/// Bilinear lookup with coordinates clamped to the image border.
#[inline]
pub fn sample(img: &Array2<f32>, x: f32, y: f32) -> f32 {
    let (h, w) = img.dim();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let ax = x - x0 as f32;
    let ay = y - y0 as f32;

    let top = img[[y0, x0]] * (1.0 - ax) + img[[y0, x1]] * ax;
    let bottom = img[[y1, x0]] * (1.0 - ax) + img[[y1, x1]] * ax;

    top * (1.0 - ay) + bottom * ay
}

/// Half-resolution level with a 2x2 box filter.
pub fn half(img: &Array2<f32>) -> Array2<f32> {
    let (h, w) = img.dim();
    let (nh, nw) = ((h / 2).max(1), (w / 2).max(1));

    Array2::from_shape_fn((nh, nw), |(y, x)| {
        let (x0, y0) = ((2 * x).min(w - 1), (2 * y).min(h - 1));
        let (x1, y1) = ((2 * x + 1).min(w - 1), (2 * y + 1).min(h - 1));

        (img[[y0, x0]] + img[[y0, x1]] + img[[y1, x0]] + img[[y1, x1]]) * 0.25
    })
}

/// Coarse-to-fine pyramid, level 0 is full resolution.
pub fn pyramid(src: ArrayView2<'_, u8>, levels: usize) -> Vec<Array2<f32>> {
    let mut out = Vec::with_capacity(levels.max(1));
    out.push(to_f32(src));

    for _ in 1..levels {
        let prev = &out[out.len() - 1];
        let (h, w) = prev.dim();
        if h < 16 || w < 16 {
            break;
        }
        let next = half(prev);
        out.push(next);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_constant_image_stays_constant() {
        let src = Array2::from_elem((480, 640), 77u8);
        let dst = resize_bilinear(src.view(), 320, 240);
        assert_eq!(dst.dim(), (240, 320));
        assert!(dst.iter().all(|&v| v == 77));
    }

    #[test]
    fn sample_interpolates_between_pixels() {
        let img = ndarray::array![[0.0f32, 10.0], [20.0, 30.0]];
        assert!((sample(&img, 0.5, 0.5) - 15.0).abs() < 1e-5);
        assert_eq!(sample(&img, -3.0, -3.0), 0.0);
    }

    #[test]
    fn pyramid_halves_each_level() {
        let src = Array2::from_elem((240, 320), 1u8);
        let pyr = pyramid(src.view(), 3);
        assert_eq!(pyr.len(), 3);
        assert_eq!(pyr[1].dim(), (120, 160));
        assert_eq!(pyr[2].dim(), (60, 80));
    }
}
