//! Pure-Rust flow backend: Shi-Tomasi corners and forward-additive
//! pyramidal Lucas-Kanade.

use nalgebra as na;
use ndarray::prelude::*;

use super::FlowBackend;
use crate::config::FlowConfig;
use crate::error::Error;
use crate::image::{pyramid, sample, to_f32, GrayImage};

/// Structure-tensor neighbourhood radius (3x3 block).
const BLOCK_RADIUS: usize = 1;

enum LkResult {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
}

#[derive(Debug, Clone)]
pub struct LucasKanade {
    pub max_corners: usize,
    pub quality_level: f32,
    pub min_distance: f32,
    pub window_radius: usize,
    pub levels: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
}

impl LucasKanade {
    pub fn new(config: &FlowConfig) -> Self {
        Self {
            max_corners: config.max_corners,
            quality_level: config.quality_level,
            min_distance: config.min_distance_px,
            window_radius: config.window_radius,
            levels: config.pyramid_levels.max(1),
            max_iterations: config.max_iterations,
            epsilon: config.epsilon,
        }
    }

    /// Minimum eigenvalue of the gradient structure tensor per pixel.
    fn min_eigen(img: &Array2<f32>) -> Array2<f32> {
        let (h, w) = img.dim();
        let mut gxx = Array2::<f32>::zeros((h, w));
        let mut gxy = Array2::<f32>::zeros((h, w));
        let mut gyy = Array2::<f32>::zeros((h, w));

        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let gx = 0.5 * (img[[y, x + 1]] - img[[y, x - 1]]);
                let gy = 0.5 * (img[[y + 1, x]] - img[[y - 1, x]]);
                gxx[[y, x]] = gx * gx;
                gxy[[y, x]] = gx * gy;
                gyy[[y, x]] = gy * gy;
            }
        }

        let r = BLOCK_RADIUS;
        let mut out = Array2::<f32>::zeros((h, w));
        if h < 2 * r + 3 || w < 2 * r + 3 {
            return out;
        }

        for y in r + 1..h - r - 1 {
            for x in r + 1..w - r - 1 {
                let a = gxx.slice(ndarray::s![y - r..=y + r, x - r..=x + r]).sum();
                let b = gxy.slice(ndarray::s![y - r..=y + r, x - r..=x + r]).sum();
                let c = gyy.slice(ndarray::s![y - r..=y + r, x - r..=x + r]).sum();

                let half_trace = 0.5 * (a + c);
                let disc = (0.25 * (a - c) * (a - c) + b * b).sqrt();
                out[[y, x]] = half_trace - disc;
            }
        }

        out
    }

    fn lk_level(
        &self,
        prev: &Array2<f32>,
        next: &Array2<f32>,
        fx: f32,
        fy: f32,
        mut dx: f32,
        mut dy: f32,
    ) -> LkResult {
        let r = self.window_radius as isize;

        for _ in 0..self.max_iterations {
            let (mut h00, mut h01, mut h11) = (0.0f32, 0.0f32, 0.0f32);
            let (mut b0, mut b1) = (0.0f32, 0.0f32);

            for py in -r..=r {
                for px in -r..=r {
                    let (ox, oy) = (px as f32, py as f32);
                    let wx = fx + dx + ox;
                    let wy = fy + dy + oy;

                    let e = sample(prev, fx + ox, fy + oy) - sample(next, wx, wy);
                    let gx = 0.5 * (sample(next, wx + 1.0, wy) - sample(next, wx - 1.0, wy));
                    let gy = 0.5 * (sample(next, wx, wy + 1.0) - sample(next, wx, wy - 1.0));

                    h00 += gx * gx;
                    h01 += gx * gy;
                    h11 += gy * gy;
                    b0 += gx * e;
                    b1 += gy * e;
                }
            }

            let det = h00 * h11 - h01 * h01;
            if det.abs() < 1e-6 {
                return LkResult::Singular;
            }

            let inv = 1.0 / det;
            let ddx = inv * (h11 * b0 - h01 * b1);
            let ddy = inv * (h00 * b1 - h01 * b0);
            dx += ddx;
            dy += ddy;

            if ddx * ddx + ddy * ddy < self.epsilon * self.epsilon {
                return LkResult::Converged(dx, dy);
            }
        }

        LkResult::MaxIter(dx, dy)
    }

    fn track_point(
        &self,
        prev: &[Array2<f32>],
        next: &[Array2<f32>],
        pt: &na::Point2<f32>,
    ) -> Option<na::Point2<f32>> {
        let levels = prev.len().min(next.len());
        let (mut dx, mut dy) = (0.0f32, 0.0f32);

        for level in (0..levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;

            match self.lk_level(&prev[level], &next[level], pt.x * scale, pt.y * scale, dx, dy) {
                LkResult::Converged(ndx, ndy) | LkResult::MaxIter(ndx, ndy) => {
                    dx = ndx;
                    dy = ndy;
                }
                LkResult::Singular => return None,
            }

            if level > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }

        let (h, w) = prev[0].dim();
        let out = na::Point2::new(pt.x + dx, pt.y + dy);

        if out.x.is_finite() && out.y.is_finite() && out.x >= 0.0 && out.x < w as f32 && out.y >= 0.0 && out.y < h as f32 {
            Some(out)
        } else {
            None
        }
    }
}

impl FlowBackend for LucasKanade {
    fn detect_features(&mut self, gray: &GrayImage, mask: &GrayImage) -> Result<Vec<na::Point2<f32>>, Error> {
        if gray.dim() != mask.dim() {
            return Err(Error::Flow(format!(
                "mask {:?} does not match frame {:?}",
                mask.dim(),
                gray.dim()
            )));
        }

        let response = Self::min_eigen(&to_f32(gray.view()));
        let best = response.iter().cloned().fold(0.0f32, f32::max);
        if best <= 0.0 {
            return Ok(Vec::new());
        }

        let floor = best * self.quality_level;
        let (h, w) = response.dim();

        // local maxima above the quality floor
        let mut candidates = Vec::new();
        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let v = response[[y, x]];
                if v < floor || mask[[y, x]] == 0 {
                    continue;
                }

                let is_max = response
                    .slice(ndarray::s![y - 1..=y + 1, x - 1..=x + 1])
                    .iter()
                    .all(|&n| n <= v);

                if is_max {
                    candidates.push((v, x, y));
                }
            }
        }

        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let min_d2 = self.min_distance * self.min_distance;
        let mut picked: Vec<na::Point2<f32>> = Vec::with_capacity(self.max_corners);
        for (_, x, y) in candidates {
            if picked.len() >= self.max_corners {
                break;
            }

            let p = na::Point2::new(x as f32, y as f32);
            if picked.iter().all(|q| na::distance_squared(q, &p) >= min_d2) {
                picked.push(p);
            }
        }

        Ok(picked)
    }

    fn track(
        &mut self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[na::Point2<f32>],
    ) -> Result<Vec<Option<na::Point2<f32>>>, Error> {
        if prev.dim() != next.dim() {
            return Err(Error::Flow(format!(
                "frame size changed from {:?} to {:?}",
                prev.dim(),
                next.dim()
            )));
        }

        if prev.is_empty() {
            return Ok(vec![None; points.len()]);
        }

        let prev_pyr = pyramid(prev.view(), self.levels);
        let next_pyr = pyramid(next.view(), self.levels);

        Ok(points
            .iter()
            .map(|pt| self.track_point(&prev_pyr, &next_pyr, pt))
            .collect())
    }
}
