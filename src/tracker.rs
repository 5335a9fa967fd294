//! The tracking core: owns one [`TrackState`] and every component that
//! moves it, and turns frames and sensor samples into displayed boxes and
//! events.

use serde_derive::Serialize;
use tracing::{debug, info, warn};

use crate::acquisition::LockAcquisitionMachine;
use crate::bbox::{BBox, Ltrb};
use crate::config::TrackerConfig;
use crate::decoder::DetectionDecoder;
use crate::detection::{ClassLabels, DetectionBox};
use crate::detector::Detector;
use crate::flow::{FlowBackend, LucasKanade, OcclusionFlowTracker};
use crate::frame::Frame;
use crate::guidance::Direction;
use crate::hand::{self, HandPose, TouchDetector};
use crate::motion::{MotionEstimator, OrientationSample};
use crate::revalidation::{RevalidationController, ValidationOutcome, ValidationPlan};
use crate::state::{TrackPhase, TrackState};

/// Discrete notifications for the dialogue collaborator.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub enum TrackEvent {
    Locked {
        bbox: DetectionBox,
        image_width: u32,
        image_height: u32,
    },
    Lost,
    Touching(bool),
    /// Rate-limited "moving too fast" advisory.
    FastRotation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    Orientation(OrientationSample),
    /// Linear acceleration in m/s^2, screen aligned.
    Acceleration { x: f32, y: f32, timestamp_ns: u64 },
}

/// The box shown to the user.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrackedBox {
    pub bbox: BBox<Ltrb>,
    pub label: String,
    pub confidence: f32,
    /// Counter-rotation against the camera's roll, in degrees.
    pub rotation_deg: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutput {
    pub phase: TrackPhase,
    pub tracked: Option<TrackedBox>,
    pub events: Vec<TrackEvent>,
    /// Candidates decoded this frame, empty when the detector was skipped.
    pub candidates: Vec<DetectionBox>,
    pub direction: Option<Direction>,
}

/// Consistent copy of the tracker's public state.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    pub phase: TrackPhase,
    pub target: Option<String>,
    pub tracked: Option<TrackedBox>,
    pub image_width: u32,
    pub image_height: u32,
    pub touching: bool,
    pub occluded: bool,
    pub timestamp_ms: u64,
}

impl Default for TrackSnapshot {
    fn default() -> Self {
        Self {
            phase: TrackPhase::Idle,
            target: None,
            tracked: None,
            image_width: 0,
            image_height: 0,
            touching: false,
            occluded: false,
            timestamp_ms: 0,
        }
    }
}

pub struct TargetTracker<B: FlowBackend = LucasKanade> {
    config: TrackerConfig,
    state: TrackState,
    target: Option<String>,
    decoder: DetectionDecoder,
    acquisition: LockAcquisitionMachine,
    motion: MotionEstimator,
    flow: OcclusionFlowTracker<B>,
    revalidation: RevalidationController,
    touch: TouchDetector,
    occluded: bool,
    flow_moved: bool,
    dims: (u32, u32),
    last_ts: u64,
}

impl TargetTracker<LucasKanade> {
    pub fn new(config: TrackerConfig, labels: ClassLabels) -> Self {
        let backend = LucasKanade::new(&config.flow);

        Self::with_flow_backend(config, labels, backend)
    }
}

impl<B: FlowBackend> TargetTracker<B> {
    pub fn with_flow_backend(config: TrackerConfig, labels: ClassLabels, backend: B) -> Self {
        Self {
            state: TrackState::Idle,
            target: None,
            decoder: DetectionDecoder::new(config.decoder.clone(), labels),
            acquisition: LockAcquisitionMachine::new(config.acquisition.clone()),
            motion: MotionEstimator::new(config.motion.clone()),
            flow: OcclusionFlowTracker::with_backend(config.flow.clone(), backend),
            revalidation: RevalidationController::new(config.revalidation.clone()),
            touch: TouchDetector::new(config.touch.clone()),
            occluded: false,
            flow_moved: false,
            dims: (0, 0),
            last_ts: 0,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> &TrackState {
        &self.state
    }

    #[inline]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Starts searching for `target`, or goes idle with `None`. Any lock in
    /// progress is dropped along with every accumulator.
    pub fn set_target(&mut self, target: Option<&str>) {
        let target = target.map(str::trim).filter(|t| !t.is_empty());

        if target == self.target.as_deref() && !matches!(self.state, TrackState::Idle) {
            return;
        }

        self.reset_lock();
        self.target = target.map(str::to_string);
        self.state = match &self.target {
            Some(t) => {
                info!("searching for {}", t);
                TrackState::Searching
            }
            None => {
                info!("tracking stopped");
                TrackState::Idle
            }
        };
    }

    #[inline]
    pub fn stop(&mut self) {
        self.set_target(None);
    }

    /// Routes one inertial sample. Never runs the detector.
    pub fn on_sensor(&mut self, event: SensorEvent) -> Vec<TrackEvent> {
        let mut events = Vec::new();

        match event {
            SensorEvent::Acceleration { x, y, timestamp_ns } => {
                self.motion.on_acceleration(x, y, timestamp_ns);
            }
            SensorEvent::Orientation(sample) => {
                let update = self.motion.on_orientation(sample);

                if update.fast_rotation {
                    events.push(TrackEvent::FastRotation);
                }

                if let Some(moved) = update.moved {
                    if let Some(det) = self.state.locked_box_mut() {
                        det.bbox = moved;
                    }
                }

                if update.lost && self.state.is_locked() {
                    self.lose(&mut events);
                }
            }
        }

        events
    }

    /// Runs one camera frame through the core. `hands` is the newest hand
    /// pose result available, possibly from an older frame.
    pub fn process_frame<D: Detector + ?Sized>(
        &mut self,
        frame: &Frame,
        detector: &mut D,
        hands: &[HandPose],
    ) -> FrameOutput {
        let mut events = Vec::new();
        let mut candidates = Vec::new();

        if !frame.is_empty() {
            self.dims = frame.dims();
            self.last_ts = frame.timestamp_ms;

            match self.state.phase() {
                TrackPhase::Idle => (),
                TrackPhase::Searching | TrackPhase::PendingLock => {
                    candidates = self.detect(frame, detector, None);
                    self.acquire(&candidates, frame.timestamp_ms, &mut events);
                }
                TrackPhase::Locked => {
                    candidates = self.follow(frame, detector, hands, &mut events);
                }
            }
        }

        let tracked = self.tracked_box();
        let direction = tracked
            .as_ref()
            .and_then(|t| Direction::of(&t.bbox, self.dims.0, self.dims.1));

        FrameOutput {
            phase: self.state.phase(),
            tracked,
            events,
            candidates,
            direction,
        }
    }

    pub fn tracked_box(&self) -> Option<TrackedBox> {
        let det = self.state.locked_box()?;

        Some(TrackedBox {
            bbox: det.bbox,
            label: det.label.clone(),
            confidence: det.confidence,
            rotation_deg: self.motion.display_rotation_deg(),
        })
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            phase: self.state.phase(),
            target: self.target.clone(),
            tracked: self.tracked_box(),
            image_width: self.dims.0,
            image_height: self.dims.1,
            touching: self.touch.is_touching(),
            occluded: self.occluded,
            timestamp_ms: self.last_ts,
        }
    }

    fn detect<D: Detector + ?Sized>(
        &mut self,
        frame: &Frame,
        detector: &mut D,
        target: Option<(&str, f32)>,
    ) -> Vec<DetectionBox> {
        match detector.infer(frame) {
            Ok(inference) => self.decoder.decode_inference(frame, &inference, target),
            Err(err) => {
                warn!("detector failed, skipping frame: {}", err);
                Vec::new()
            }
        }
    }

    fn acquire(&mut self, candidates: &[DetectionBox], now_ms: u64, events: &mut Vec<TrackEvent>) {
        let target = match &self.target {
            Some(target) => target.clone(),
            None => return,
        };

        self.state = self.acquisition.advance(&self.state, candidates, &target, now_ms);

        if let TrackState::Locked { bbox, .. } = &self.state {
            let bbox = bbox.clone();
            let (w, h) = self.dims;

            info!(
                "locked on {} ({:.2}) at {:?} in {}x{}",
                bbox.label,
                bbox.confidence,
                bbox.bbox.as_slice(),
                w,
                h
            );

            self.reset_lock();
            self.motion.start(bbox.bbox, w, h);

            events.push(TrackEvent::Locked {
                bbox,
                image_width: w,
                image_height: h,
            });
        }
    }

    fn follow<D: Detector + ?Sized>(
        &mut self,
        frame: &Frame,
        detector: &mut D,
        hands: &[HandPose],
        events: &mut Vec<TrackEvent>,
    ) -> Vec<DetectionBox> {
        let (w, h) = self.dims;
        let now_ms = frame.timestamp_ms;

        let (displayed, last_validated_ms, target) = match &self.state {
            TrackState::Locked {
                bbox,
                last_validated_ms,
                target,
                ..
            } => (bbox.bbox, *last_validated_ms, target.clone()),
            _ => return Vec::new(),
        };

        let occluded = hand::occludes(hands, &displayed, w, h, self.config.touch.occlusion_iou);
        if occluded != self.occluded {
            self.set_occluded(occluded, displayed);
        }

        if occluded {
            let hand_rect = hand::merged_rect(hands, w, h);

            if let Some(d) = self.flow.update(frame, hand_rect, Some(displayed)) {
                let moved = displayed.translate(d.x, d.y);
                debug!("flow moved box by ({:.1}, {:.1})", d.x, d.y);

                self.motion.correct(moved);
                self.flow_moved = true;

                if let Some(det) = self.state.locked_box_mut() {
                    det.bbox = moved;
                }
            }
        }

        let mut candidates = Vec::new();

        if let ValidationPlan::Validate { reacquire } = self.revalidation.plan(now_ms, last_validated_ms, occluded) {
            let floor = self.revalidation.min_confidence(reacquire);
            candidates = self.detect(frame, detector, Some((target.as_str(), floor)));

            let current = self.state.locked_box().map(|d| d.bbox).unwrap_or(displayed);
            let predicted = self
                .motion
                .predicted_box()
                .or_else(|| if self.flow_moved { Some(current) } else { None });

            let matched = self
                .revalidation
                .select(&candidates, &target, reacquire, predicted.as_ref(), &current);

            // a hand over the target explains a miss during the safety-net check
            let excused = occluded && reacquire;

            match self.revalidation.apply(&mut self.state, matched, now_ms, excused) {
                ValidationOutcome::Matched(bbox) => {
                    self.motion.correct(bbox);
                }
                ValidationOutcome::Lost => {
                    self.lose(events);
                    return candidates;
                }
                ValidationOutcome::Missed { .. } | ValidationOutcome::Excused => (),
            }
        }

        if let Some(det) = self.state.locked_box() {
            let bbox = det.bbox;

            if let Some(touching) = self.touch.update(hands, &bbox, w, h, now_ms) {
                events.push(TrackEvent::Touching(touching));
            }
        }

        candidates
    }

    fn set_occluded(&mut self, occluded: bool, displayed: BBox<Ltrb>) {
        self.occluded = occluded;
        self.motion.set_suspended(occluded);
        self.flow.reset();

        if occluded {
            debug!("hand over target, switching to optical flow");
        } else {
            // inertial state went stale while the flow was driving the box
            self.motion.correct(displayed);
            debug!("occlusion ended, motion re-anchored at {:?}", displayed.as_slice());
        }
    }

    fn lose(&mut self, events: &mut Vec<TrackEvent>) {
        info!(
            "lost {}",
            self.target.as_deref().unwrap_or("target")
        );

        self.reset_lock();
        self.state = if self.target.is_some() {
            TrackState::Searching
        } else {
            TrackState::Idle
        };

        events.push(TrackEvent::Lost);
    }

    fn reset_lock(&mut self) {
        self.motion.stop();
        self.flow.reset();
        self.touch.reset();
        self.revalidation.reset();
        self.occluded = false;
        self.flow_moved = false;
    }
}
