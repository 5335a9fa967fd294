//! Background-motion estimate used while a hand covers the target.
//!
//! Corners are detected outside the hand and target regions of a
//! downsampled frame and tracked frame to frame with sparse optical flow.
//! The robust median of the surviving flow vectors, scaled back to source
//! resolution, is the displacement applied to the locked box.

pub mod lk;

#[cfg(feature = "opencv")]
pub mod cv;

use nalgebra as na;
use tracing::{debug, warn};

use crate::bbox::{BBox, Ltrb};
use crate::config::FlowConfig;
use crate::error::Error;
use crate::frame::Frame;
use crate::image::{resize_bilinear, GrayImage};
use crate::math::{filter_iqr_pairs, median};

pub use lk::LucasKanade;

/// Sparse feature detection and tracking primitives.
pub trait FlowBackend {
    /// At most `max_corners` corners of `gray` where `mask` is non-zero,
    /// strongest first.
    fn detect_features(&mut self, gray: &GrayImage, mask: &GrayImage) -> Result<Vec<na::Point2<f32>>, Error>;

    /// Position of each of `points` in `next`, `None` where tracking failed.
    fn track(
        &mut self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[na::Point2<f32>],
    ) -> Result<Vec<Option<na::Point2<f32>>>, Error>;
}

/// Tracked points plus the grayscale frame they were found in.
#[derive(Debug, Clone)]
pub struct FlowFeatureSet {
    pub points: Vec<na::Point2<f32>>,
    pub gray: GrayImage,
}

impl FlowFeatureSet {
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// `width` x `height` mask, 255 everywhere except the given rectangles,
/// which are given in source pixels and scaled by `1/scale`.
pub fn exclusion_mask(
    width: usize,
    height: usize,
    scale: (f32, f32),
    excluded: &[Option<BBox<Ltrb>>],
) -> GrayImage {
    let mut mask = GrayImage::from_elem((height, width), 255);
    if width == 0 || height == 0 {
        return mask;
    }

    for rect in excluded.iter().flatten() {
        let r = rect.scale(1.0 / scale.0, 1.0 / scale.1);

        let left = (r.left() as i64).clamp(0, width as i64 - 1) as usize;
        let top = (r.top() as i64).clamp(0, height as i64 - 1) as usize;
        let right = (r.right() as i64).clamp(0, width as i64) as usize;
        let bottom = (r.bottom() as i64).clamp(0, height as i64) as usize;

        if left < right && top < bottom {
            mask.slice_mut(ndarray::s![top..bottom, left..right]).fill(0);
        }
    }

    mask
}

pub struct OcclusionFlowTracker<B: FlowBackend = LucasKanade> {
    config: FlowConfig,
    backend: B,
    features: Option<FlowFeatureSet>,
}

impl OcclusionFlowTracker<LucasKanade> {
    pub fn new(config: FlowConfig) -> Self {
        let backend = LucasKanade::new(&config);

        Self::with_backend(config, backend)
    }
}

impl<B: FlowBackend> OcclusionFlowTracker<B> {
    pub fn with_backend(config: FlowConfig, backend: B) -> Self {
        Self {
            config,
            backend,
            features: None,
        }
    }

    /// Drops the feature set; the next frame rebuilds it.
    pub fn reset(&mut self) {
        self.features = None;
    }

    #[inline]
    pub fn features(&self) -> Option<&FlowFeatureSet> {
        self.features.as_ref()
    }

    /// Displacement of the scene since the previous frame, in source
    /// pixels, or `None` when there is no trustworthy motion.
    pub fn update(
        &mut self,
        frame: &Frame,
        hand: Option<BBox<Ltrb>>,
        target: Option<BBox<Ltrb>>,
    ) -> Option<na::Vector2<f32>> {
        if frame.is_empty() {
            return None;
        }

        match self.step(frame, hand, target) {
            Ok(disp) => disp,
            Err(err) => {
                warn!("optical flow failed, dropping features: {}", err);
                self.reset();
                None
            }
        }
    }

    fn step(
        &mut self,
        frame: &Frame,
        hand: Option<BBox<Ltrb>>,
        target: Option<BBox<Ltrb>>,
    ) -> Result<Option<na::Vector2<f32>>, Error> {
        let (pw, ph) = (self.config.process_width, self.config.process_height);
        let scale = (
            frame.width() as f32 / pw as f32,
            frame.height() as f32 / ph as f32,
        );

        let gray = resize_bilinear(frame.luma().view(), pw, ph);

        let set = match self.features.take() {
            Some(set) if !set.is_empty() => set,
            _ => {
                let mask = exclusion_mask(pw, ph, scale, &[hand, target]);
                let points = self.backend.detect_features(&gray, &mask)?;

                if !points.is_empty() {
                    debug!("flow feature set rebuilt with {} points", points.len());
                    self.features = Some(FlowFeatureSet { points, gray });
                }

                return Ok(None);
            }
        };

        let tracked = self.backend.track(&set.gray, &gray, &set.points)?;

        let mut flows = Vec::with_capacity(set.len());
        let mut survivors = Vec::with_capacity(set.len());
        for (prev, next) in set.points.iter().zip(tracked) {
            if let Some(next) = next {
                flows.push((next.x - prev.x, next.y - prev.y));
                survivors.push(next);
            }
        }

        if (flows.len() as f32) < set.len() as f32 * self.config.min_valid_ratio {
            debug!(
                "flow lost {} of {} points, rebuilding",
                set.len() - flows.len(),
                set.len()
            );
            return Ok(None);
        }

        self.features = Some(FlowFeatureSet {
            points: survivors,
            gray,
        });

        let inliers = filter_iqr_pairs(&flows, self.config.iqr_k);
        if (inliers.len() as f32) < flows.len() as f32 * self.config.min_inlier_ratio {
            return Ok(None);
        }

        let xs: Vec<f32> = inliers.iter().map(|p| p.0).collect();
        let ys: Vec<f32> = inliers.iter().map(|p| p.1).collect();
        let (mx, my) = match (median(&xs), median(&ys)) {
            (Some(mx), Some(my)) => (mx, my),
            _ => return Ok(None),
        };

        let disp = na::Vector2::new(mx * scale.0, my * scale.1);
        let floor = self.config.noise_floor_px;
        if disp.x.abs() < floor && disp.y.abs() < floor {
            return Ok(None);
        }

        Ok(Some(disp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn texture(width: usize, height: usize, shift_x: f32) -> GrayImage {
        Array2::from_shape_fn((height, width), |(y, x)| {
            let x = x as f32 - shift_x;
            let y = y as f32;
            (128.0 + 50.0 * (0.15 * x).sin() + 50.0 * (0.12 * y).cos()) as u8
        })
    }

    struct Failing;

    impl FlowBackend for Failing {
        fn detect_features(&mut self, _: &GrayImage, _: &GrayImage) -> Result<Vec<na::Point2<f32>>, Error> {
            Ok(vec![na::Point2::new(10.0, 10.0)])
        }

        fn track(
            &mut self,
            _: &GrayImage,
            _: &GrayImage,
            _: &[na::Point2<f32>],
        ) -> Result<Vec<Option<na::Point2<f32>>>, Error> {
            Err(Error::Flow("boom".into()))
        }
    }

    struct Scripted(Vec<Option<na::Point2<f32>>>);

    impl FlowBackend for Scripted {
        fn detect_features(&mut self, _: &GrayImage, _: &GrayImage) -> Result<Vec<na::Point2<f32>>, Error> {
            Ok((0..self.0.len()).map(|i| na::Point2::new(i as f32, 0.0)).collect())
        }

        fn track(
            &mut self,
            _: &GrayImage,
            _: &GrayImage,
            points: &[na::Point2<f32>],
        ) -> Result<Vec<Option<na::Point2<f32>>>, Error> {
            Ok(points
                .iter()
                .zip(&self.0)
                .map(|(p, d)| d.map(|d| na::Point2::new(p.x + d.x, p.y + d.y)))
                .collect())
        }
    }

    #[test]
    fn mask_excludes_scaled_rects() {
        let hand = BBox::ltrb(0.0, 0.0, 64.0, 48.0);
        let mask = exclusion_mask(320, 240, (2.0, 2.0), &[Some(hand), None]);

        assert_eq!(mask[[0, 0]], 0);
        assert_eq!(mask[[23, 31]], 0);
        assert_eq!(mask[[24, 32]], 255);
        assert_eq!(mask[[100, 100]], 255);
    }

    #[test]
    fn identical_frames_mean_no_motion() {
        let frame = Frame::from_gray(texture(320, 240, 0.0), 0);
        let mut flow = OcclusionFlowTracker::new(FlowConfig::default());

        assert_eq!(flow.update(&frame, None, None), None);
        assert!(flow.features().is_some());
        assert_eq!(flow.update(&frame, None, None), None);
        assert!(flow.features().is_some());
    }

    #[test]
    fn follows_background_shift() {
        let mut flow = OcclusionFlowTracker::new(FlowConfig::default());
        let hand = Some(BBox::ltrb(120.0, 80.0, 200.0, 160.0));

        assert_eq!(flow.update(&Frame::from_gray(texture(320, 240, 0.0), 0), hand, None), None);
        let d = flow
            .update(&Frame::from_gray(texture(320, 240, 6.0), 33), hand, None)
            .unwrap();

        assert!((d.x - 6.0).abs() < 1.0, "dx = {}", d.x);
        assert!(d.y.abs() < 1.0, "dy = {}", d.y);
    }

    #[test]
    fn backend_error_invalidates_features() {
        let frame = Frame::from_gray(texture(320, 240, 0.0), 0);
        let mut flow = OcclusionFlowTracker::with_backend(FlowConfig::default(), Failing);

        assert_eq!(flow.update(&frame, None, None), None);
        assert!(flow.features().is_some());
        assert_eq!(flow.update(&frame, None, None), None);
        assert!(flow.features().is_none());
    }

    #[test]
    fn too_few_survivors_force_rebuild() {
        let lost = [None, None, None, None, None, None, None, None];
        let mut tracks = vec![Some(na::Point2::new(10.0, 0.0)); 2];
        tracks.extend(lost);

        let frame = Frame::from_gray(texture(320, 240, 0.0), 0);
        let mut flow = OcclusionFlowTracker::with_backend(FlowConfig::default(), Scripted(tracks));

        flow.update(&frame, None, None);
        assert_eq!(flow.update(&frame, None, None), None);
        assert!(flow.features().is_none());
    }

    #[test]
    fn outliers_do_not_move_the_median() {
        let mut tracks = vec![Some(na::Point2::new(5.0, -5.0)); 9];
        tracks.push(Some(na::Point2::new(80.0, 60.0)));

        // 640x480 source, flow measured at 320x240
        let frame = Frame::from_gray(texture(640, 480, 0.0), 0);
        let mut flow = OcclusionFlowTracker::with_backend(FlowConfig::default(), Scripted(tracks));

        flow.update(&frame, None, None);
        let d = flow.update(&frame, None, None).unwrap();
        assert!((d.x - 10.0).abs() < 1e-4);
        assert!((d.y + 10.0).abs() < 1e-4);
    }
}
