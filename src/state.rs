use serde_derive::{Deserialize, Serialize};

use crate::detection::DetectionBox;

/// Tracking lifecycle. Exactly one value is live, owned by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackState {
    Idle,
    Searching,
    PendingLock {
        candidate: DetectionBox,
        frames: u32,
    },
    Locked {
        /// Currently displayed box.
        bbox: DetectionBox,
        target: String,
        last_validated_ms: u64,
        failures: u32,
    },
}

/// Data-free view of [`TrackState`] for snapshots and logs.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackPhase {
    Idle,
    Searching,
    PendingLock,
    Locked,
}

impl Default for TrackState {
    fn default() -> Self {
        TrackState::Idle
    }
}

impl TrackState {
    pub fn phase(&self) -> TrackPhase {
        match self {
            TrackState::Idle => TrackPhase::Idle,
            TrackState::Searching => TrackPhase::Searching,
            TrackState::PendingLock { .. } => TrackPhase::PendingLock,
            TrackState::Locked { .. } => TrackPhase::Locked,
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        matches!(self, TrackState::Locked { .. })
    }

    /// Searching or confirming a candidate.
    #[inline]
    pub fn is_acquiring(&self) -> bool {
        matches!(self, TrackState::Searching | TrackState::PendingLock { .. })
    }

    pub fn locked_box(&self) -> Option<&DetectionBox> {
        match self {
            TrackState::Locked { bbox, .. } => Some(bbox),
            _ => None,
        }
    }

    pub fn locked_box_mut(&mut self) -> Option<&mut DetectionBox> {
        match self {
            TrackState::Locked { bbox, .. } => Some(bbox),
            _ => None,
        }
    }
}
