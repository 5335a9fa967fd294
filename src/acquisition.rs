use tracing::debug;

use crate::config::AcquisitionConfig;
use crate::detection::DetectionBox;
use crate::state::TrackState;

/// Promotes target detections to a lock once they repeat on consecutive
/// frames at overlapping positions.
pub struct LockAcquisitionMachine {
    config: AcquisitionConfig,
}

impl LockAcquisitionMachine {
    pub fn new(config: AcquisitionConfig) -> Self {
        Self { config }
    }

    /// Highest-confidence candidate matching `target`, relabelled to it.
    pub fn best_candidate(&self, candidates: &[DetectionBox], target: &str) -> Option<DetectionBox> {
        candidates
            .iter()
            .filter_map(|c| c.as_target(target, self.config.min_confidence))
            .fold(None, |best: Option<DetectionBox>, c| match best {
                Some(b) if b.confidence >= c.confidence => Some(b),
                _ => Some(c),
            })
    }

    /// Next state after one frame's candidates. Only `Searching` and
    /// `PendingLock` advance; other states are returned unchanged.
    pub fn advance(
        &self,
        state: &TrackState,
        candidates: &[DetectionBox],
        target: &str,
        now_ms: u64,
    ) -> TrackState {
        if !state.is_acquiring() {
            return state.clone();
        }

        let best = match self.best_candidate(candidates, target) {
            Some(best) => best,
            None => return TrackState::Searching,
        };

        let frames = match state {
            TrackState::PendingLock { candidate, frames }
                if candidate.label == best.label && candidate.iou(&best) > 0.0 =>
            {
                frames + 1
            }
            _ => 1,
        };

        if frames >= self.config.confirm_frames {
            return TrackState::Locked {
                target: best.label.clone(),
                bbox: best,
                last_validated_ms: now_ms,
                failures: 0,
            };
        }

        debug!(
            "pending lock on {} ({:.2}), {}/{} frames",
            best.label, best.confidence, frames, self.config.confirm_frames
        );

        TrackState::PendingLock {
            candidate: best,
            frames,
        }
    }
}
