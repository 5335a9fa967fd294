use nalgebra as na;
use tracing::debug;

use crate::advisory::RateLimiter;
use crate::bbox::{BBox, Ltrb};
use crate::config::TouchConfig;

pub const THUMB_TIP: usize = 4;
pub const INDEX_TIP: usize = 8;

/// A hand spanning this share of the frame is covering the lens, not
/// grabbing anything.
const LENS_COVER_RATIO: f32 = 0.6;

/// Landmarks of one detected hand, normalized to `[0, 1]` image coordinates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandPose {
    pub landmarks: Vec<na::Point2<f32>>,
}

impl HandPose {
    pub fn new(landmarks: Vec<na::Point2<f32>>) -> Self {
        Self { landmarks }
    }

    /// Landmark `index` in image pixels.
    pub fn point(&self, index: usize, width: u32, height: u32) -> Option<na::Point2<f32>> {
        let lm = self.landmarks.get(index)?;

        Some(na::Point2::new(
            lm.x.clamp(0.0, 1.0) * width as f32,
            lm.y.clamp(0.0, 1.0) * height as f32,
        ))
    }

    /// Bounding rectangle of all landmarks in image pixels.
    pub fn rect(&self, width: u32, height: u32) -> Option<BBox<Ltrb>> {
        let mut pts = (0..self.landmarks.len()).filter_map(|i| self.point(i, width, height));
        let first = pts.next()?;

        let (mut l, mut t, mut r, mut b) = (first.x, first.y, first.x, first.y);
        for p in pts {
            l = l.min(p.x);
            t = t.min(p.y);
            r = r.max(p.x);
            b = b.max(p.y);
        }

        Some(BBox::ltrb(l, t, r, b))
    }

    /// Midpoint between thumb and index tips.
    pub fn pinch_point(&self, width: u32, height: u32) -> Option<na::Point2<f32>> {
        let thumb = self.point(THUMB_TIP, width, height)?;
        let index = self.point(INDEX_TIP, width, height)?;

        Some(na::center(&thumb, &index))
    }
}

/// Union of every hand's rectangle.
pub fn merged_rect(hands: &[HandPose], width: u32, height: u32) -> Option<BBox<Ltrb>> {
    hands
        .iter()
        .filter_map(|h| h.rect(width, height))
        .reduce(|acc, r| acc.union(&r))
}

/// Whether any hand covers `bbox` by more than `iou_threshold`.
pub fn occludes(hands: &[HandPose], bbox: &BBox<Ltrb>, width: u32, height: u32, iou_threshold: f32) -> bool {
    if width == 0 || height == 0 {
        return false;
    }

    hands
        .iter()
        .filter_map(|h| h.rect(width, height))
        .any(|r| r.iou(bbox) > iou_threshold)
}

/// Debounced "hand is grabbing the target" state.
pub struct TouchDetector {
    config: TouchConfig,
    touch_frames: u32,
    release_frames: u32,
    active: bool,
    announced: bool,
    announce: RateLimiter,
}

impl TouchDetector {
    pub fn new(config: TouchConfig) -> Self {
        let announce = RateLimiter::new(config.announce_cooldown_ms);

        Self {
            config,
            touch_frames: 0,
            release_frames: 0,
            active: false,
            announced: false,
            announce,
        }
    }

    pub fn reset(&mut self) {
        self.touch_frames = 0;
        self.release_frames = 0;
        self.active = false;
        self.announced = false;
    }

    #[inline]
    pub fn is_touching(&self) -> bool {
        self.active
    }

    /// Raw single-frame test on the first hand.
    pub fn touches(&self, hands: &[HandPose], bbox: &BBox<Ltrb>, width: u32, height: u32) -> bool {
        let hand = match hands.first() {
            Some(hand) if hand.landmarks.len() > INDEX_TIP => hand,
            _ => return false,
        };

        if let Some(r) = hand.rect(width, height) {
            if r.width() >= width as f32 * LENS_COVER_RATIO || r.height() >= height as f32 * LENS_COVER_RATIO {
                return false;
            }
        }

        match hand.pinch_point(width, height) {
            Some(p) => bbox.expand(self.config.expand_ratio).contains(p),
            None => false,
        }
    }

    /// Feeds one frame; returns a touching event when the announced state
    /// changes.
    pub fn update(
        &mut self,
        hands: &[HandPose],
        bbox: &BBox<Ltrb>,
        width: u32,
        height: u32,
        now_ms: u64,
    ) -> Option<bool> {
        if self.touches(hands, bbox, width, height) {
            self.touch_frames += 1;
            self.release_frames = 0;

            if !self.active && self.touch_frames >= self.config.confirm_frames {
                self.active = true;
                debug!("touch confirmed after {} frames", self.touch_frames);

                // state flips even when the announcement is rate limited
                if self.announce.try_fire(now_ms) {
                    self.announced = true;
                    return Some(true);
                }
            }
        } else {
            self.touch_frames = 0;
            self.release_frames += 1;

            if self.active && self.release_frames >= self.config.release_frames {
                self.active = false;

                if self.announced {
                    self.announced = false;
                    return Some(false);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 21-landmark hand with thumb/index tips at `tips` (normalized).
    fn hand_at(tips: (f32, f32), spread: f32) -> HandPose {
        let mut lm: Vec<_> = (0..21)
            .map(|i| {
                let a = i as f32 * 0.3;
                na::Point2::new(tips.0 + spread * a.cos(), tips.1 + spread * a.sin())
            })
            .collect();
        lm[THUMB_TIP] = na::Point2::new(tips.0 - 0.01, tips.1);
        lm[INDEX_TIP] = na::Point2::new(tips.0 + 0.01, tips.1);

        HandPose::new(lm)
    }

    #[test]
    fn hand_rect_and_union() {
        let a = HandPose::new(vec![na::Point2::new(0.125, 0.125), na::Point2::new(0.25, 0.375)]);
        let b = HandPose::new(vec![na::Point2::new(0.5, 0.5), na::Point2::new(1.4, 0.75)]);

        let r = a.rect(80, 80).unwrap();
        assert_eq!(r, BBox::ltrb(10.0, 10.0, 20.0, 30.0));

        let m = merged_rect(&[a, b], 80, 80).unwrap();
        assert_eq!(m, BBox::ltrb(10.0, 10.0, 80.0, 60.0));

        assert_eq!(merged_rect(&[], 80, 80), None);
        assert_eq!(HandPose::default().rect(80, 80), None);
    }

    #[test]
    fn occlusion_needs_real_overlap() {
        let bbox = BBox::ltrb(40.0, 40.0, 60.0, 60.0);
        let covering = HandPose::new(vec![na::Point2::new(0.35, 0.35), na::Point2::new(0.6, 0.6)]);
        let grazing = HandPose::new(vec![na::Point2::new(0.0, 0.0), na::Point2::new(0.41, 0.41)]);

        assert!(occludes(&[covering], &bbox, 100, 100, 0.1));
        assert!(!occludes(&[grazing], &bbox, 100, 100, 0.1));
    }

    #[test]
    fn small_hand_inside_large_box_occludes() {
        let bbox = BBox::ltrb(100.0, 100.0, 300.0, 300.0);
        // 60 x 60 px at 640 x 480, IoU 0.09
        let inside = HandPose::new(vec![
            na::Point2::new(170.0 / 640.0, 170.0 / 480.0),
            na::Point2::new(230.0 / 640.0, 230.0 / 480.0),
        ]);
        let r = inside.rect(640, 480).unwrap();
        assert!((r.iou(&bbox) - 0.09).abs() < 1e-3);

        let iou = TouchConfig::default().occlusion_iou;
        assert!(occludes(&[inside.clone()], &bbox, 640, 480, iou));
        assert!(!occludes(&[inside], &bbox, 640, 480, 0.1));
    }

    #[test]
    fn touch_is_debounced_both_ways() {
        let mut det = TouchDetector::new(TouchConfig::default());
        let bbox = BBox::ltrb(300.0, 200.0, 340.0, 260.0);
        let on = [hand_at((0.5, 0.5), 0.05)];
        let off = [hand_at((0.1, 0.1), 0.05)];

        for i in 0..3 {
            assert_eq!(det.update(&on, &bbox, 640, 480, i * 33), None);
        }
        assert_eq!(det.update(&on, &bbox, 640, 480, 100), Some(true));
        assert!(det.is_touching());

        for i in 0..9 {
            assert_eq!(det.update(&off, &bbox, 640, 480, 200 + i * 33), None);
        }
        assert!(det.is_touching());
        assert_eq!(det.update(&off, &bbox, 640, 480, 600), Some(false));
        assert!(!det.is_touching());
    }

    #[test]
    fn midpoint_uses_expanded_box() {
        let det = TouchDetector::new(TouchConfig::default());
        // 100 px box expanded by 22 px per side
        let bbox = BBox::ltrb(100.0, 100.0, 200.0, 200.0);
        let near = [hand_at((215.0 / 640.0, 150.0 / 480.0), 0.02)];
        let far = [hand_at((230.0 / 640.0, 150.0 / 480.0), 0.02)];

        assert!(det.touches(&near, &bbox, 640, 480));
        assert!(!det.touches(&far, &bbox, 640, 480));
    }

    #[test]
    fn gated_announcement_suppresses_release_event() {
        let mut det = TouchDetector::new(TouchConfig::default());
        let bbox = BBox::ltrb(300.0, 200.0, 340.0, 260.0);
        let on = [hand_at((0.5, 0.5), 0.05)];
        let off = [hand_at((0.1, 0.1), 0.05)];
        let mut t = 0;
        let mut feed = |det: &mut TouchDetector, hands: &[HandPose], n: usize| {
            let mut events = Vec::new();
            for _ in 0..n {
                t += 33;
                events.extend(det.update(hands, &bbox, 640, 480, t));
            }
            events
        };

        assert_eq!(feed(&mut det, &on, 4), vec![true]);
        assert_eq!(feed(&mut det, &off, 10), vec![false]);
        // second grab within the cooldown flips state silently
        assert!(feed(&mut det, &on, 4).is_empty());
        assert!(det.is_touching());
        assert!(feed(&mut det, &off, 10).is_empty());
    }

    #[test]
    fn lens_covering_hand_is_not_a_touch() {
        let det = TouchDetector::new(TouchConfig::default());
        let bbox = BBox::ltrb(300.0, 200.0, 340.0, 260.0);
        let huge = [hand_at((0.5, 0.5), 0.45)];

        assert!(!det.touches(&huge, &bbox, 640, 480));
    }
}
