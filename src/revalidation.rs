//! Periodic reconciliation of the predicted box with fresh detections.

use tracing::{debug, info};

use crate::bbox::{BBox, Ltrb};
use crate::config::RevalidationConfig;
use crate::detection::DetectionBox;
use crate::state::TrackState;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValidationPlan {
    Skip,
    /// Run the detector. `reacquire` is set when the last success is stale.
    Validate { reacquire: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// Detection found; carries the blended box now displayed.
    Matched(BBox<Ltrb>),
    Missed { failures: u32 },
    /// A miss that is not held against the lock.
    Excused,
    Lost,
}

pub struct RevalidationController {
    config: RevalidationConfig,
    frames: u64,
}

impl RevalidationController {
    pub fn new(config: RevalidationConfig) -> Self {
        Self { config, frames: 0 }
    }

    /// Restarts the frame cadence, e.g. on a new lock.
    pub fn reset(&mut self) {
        self.frames = 0;
    }

    #[inline]
    pub fn config(&self) -> &RevalidationConfig {
        &self.config
    }

    /// Confidence a target detection needs to confirm the lock.
    #[inline]
    pub fn min_confidence(&self, reacquire: bool) -> f32 {
        if reacquire {
            self.config.reacquire_min_confidence
        } else {
            self.config.validate_min_confidence
        }
    }

    /// Decides whether this locked frame consults the detector.
    pub fn plan(&mut self, now_ms: u64, last_validated_ms: u64, occluded: bool) -> ValidationPlan {
        self.frames += 1;

        let reacquire = now_ms.saturating_sub(last_validated_ms) > self.config.reacquire_after_ms;
        let periodic = self.frames % self.config.interval_frames.max(1) as u64 == 0;

        if reacquire || (!occluded && periodic) {
            ValidationPlan::Validate { reacquire }
        } else {
            ValidationPlan::Skip
        }
    }

    /// Picks the candidate that continues the lock: nearest the predicted
    /// position if there is one, else best overlap with the last box, else
    /// most confident.
    pub fn select(
        &self,
        candidates: &[DetectionBox],
        target: &str,
        reacquire: bool,
        predicted: Option<&BBox<Ltrb>>,
        last: &BBox<Ltrb>,
    ) -> Option<DetectionBox> {
        let min_confidence = self.min_confidence(reacquire);

        let matching: Vec<DetectionBox> = candidates
            .iter()
            .filter_map(|c| c.as_target(target, min_confidence))
            .collect();

        if let Some(p) = predicted {
            let pc = p.center();
            return min_by_key_f32(matching, |c| center_distance2(&c.bbox, pc));
        }

        let best_overlap = matching
            .iter()
            .map(|c| c.bbox.iou(last))
            .fold(0.0f32, f32::max);

        if best_overlap > 0.0 {
            min_by_key_f32(matching, |c| -c.bbox.iou(last))
        } else {
            min_by_key_f32(matching, |c| -c.confidence)
        }
    }

    /// Applies a validation result to a locked state.
    pub fn apply(
        &self,
        state: &mut TrackState,
        matched: Option<DetectionBox>,
        now_ms: u64,
        excused: bool,
    ) -> ValidationOutcome {
        let (bbox, last_validated_ms, failures) = match state {
            TrackState::Locked {
                bbox,
                last_validated_ms,
                failures,
                ..
            } => (bbox, last_validated_ms, failures),
            _ => return ValidationOutcome::Excused,
        };

        match matched {
            Some(det) => {
                let blended = bbox.bbox.blend(&det.bbox, self.config.blend_current);
                debug!(
                    "validated {} at {:.2}, blended to {:?}",
                    det.label,
                    det.confidence,
                    blended.as_slice()
                );

                *bbox = DetectionBox {
                    bbox: blended,
                    ..det
                };
                *last_validated_ms = now_ms;
                *failures = 0;

                ValidationOutcome::Matched(blended)
            }
            None if excused => ValidationOutcome::Excused,
            None => {
                *failures += 1;
                let failures = *failures;

                if failures >= self.config.failure_limit {
                    info!("target not confirmed {} times in a row, lost", failures);
                    *state = TrackState::Searching;
                    ValidationOutcome::Lost
                } else {
                    debug!("validation miss {}/{}", failures, self.config.failure_limit);
                    ValidationOutcome::Missed { failures }
                }
            }
        }
    }
}

#[inline]
fn center_distance2(b: &BBox<Ltrb>, p: nalgebra::Point2<f32>) -> f32 {
    nalgebra::distance_squared(&b.center(), &p)
}

fn min_by_key_f32<F: Fn(&DetectionBox) -> f32>(items: Vec<DetectionBox>, key: F) -> Option<DetectionBox> {
    items.into_iter().fold(None, |best, c| match best {
        Some(b) if key(&b) <= key(&c) => Some(b),
        _ => Some(c),
    })
}
