#![allow(dead_code)]

use locktrack::detector::{Detector, Inference};
use locktrack::{ClassLabels, Error, Frame, HandPose, OrientationSample, SensorEvent, TargetTracker, TrackerConfig};
use nalgebra as na;
use ndarray::prelude::*;

pub const WIDTH: usize = 640;
pub const HEIGHT: usize = 480;
pub const MS: u64 = 1_000_000;

/// Replays scripted detections, one list of `(left, top, right, bottom,
/// confidence)` boxes of class 0 per call. The last list repeats.
pub struct ScriptedDetector {
    script: Vec<Vec<[f32; 5]>>,
    pub calls: usize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<[f32; 5]>>) -> Self {
        Self { script, calls: 0 }
    }
}

impl Detector for ScriptedDetector {
    fn infer(&mut self, _frame: &Frame) -> Result<Inference, Error> {
        let boxes = self
            .script
            .get(self.calls)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_default();
        self.calls += 1;

        // YOLOX-style head, pixel centre geometry, unit letterbox
        let mut out = Array3::<f32>::zeros((1, 200, 85));
        for (i, [l, t, r, b, conf]) in boxes.into_iter().enumerate() {
            out[[0, i, 0]] = (l + r) / 2.0;
            out[[0, i, 1]] = (t + b) / 2.0;
            out[[0, i, 2]] = r - l;
            out[[0, i, 3]] = b - t;
            out[[0, i, 4]] = 1.0;
            out[[0, i, 5]] = conf;
        }

        Ok(Inference {
            output: out.into_dyn(),
            input_size: 640,
            letterbox: Some(1.0),
        })
    }
}

pub fn labels() -> ClassLabels {
    ClassLabels::new(vec!["cola".into(), "milk".into()])
}

pub fn tracker(config: TrackerConfig) -> TargetTracker {
    TargetTracker::new(config, labels())
}

pub fn frame(ts_ms: u64) -> Frame {
    Frame::from_gray(Array2::from_elem((HEIGHT, WIDTH), 128u8), ts_ms)
}

/// Orientation sample whose azimuth reads back as `yaw`.
pub fn yaw(yaw: f32, ts_ms: u64) -> SensorEvent {
    let m = na::Matrix3::new(
        yaw.cos(), yaw.sin(), 0.0,
        -yaw.sin(), yaw.cos(), 0.0,
        0.0, 0.0, 1.0,
    );

    SensorEvent::Orientation(OrientationSample::new(m, ts_ms * MS))
}

/// Orientation sample tilted about the device y axis by `roll`.
pub fn roll(roll: f32, ts_ms: u64) -> SensorEvent {
    let m = na::Matrix3::new(
        roll.cos(), 0.0, roll.sin(),
        0.0, 1.0, 0.0,
        -roll.sin(), 0.0, roll.cos(),
    );

    SensorEvent::Orientation(OrientationSample::new(m, ts_ms * MS))
}

/// 21-landmark hand spanning `(l, t)`-`(r, b)` (normalized) with the
/// thumb and index tips pinching at `pinch`.
pub fn hand(l: f32, t: f32, r: f32, b: f32, pinch: (f32, f32)) -> HandPose {
    let mut lm: Vec<_> = (0..21)
        .map(|i| {
            let f = i as f32 / 20.0;
            na::Point2::new(l + (r - l) * f, t + (b - t) * (1.0 - f))
        })
        .collect();
    lm[4] = na::Point2::new(pinch.0 - 0.005, pinch.1);
    lm[8] = na::Point2::new(pinch.0 + 0.005, pinch.1);
    lm[0] = na::Point2::new(l, t);
    lm[20] = na::Point2::new(r, b);

    HandPose::new(lm)
}
