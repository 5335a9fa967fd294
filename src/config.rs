//! Tunables of the tracking core.
//!
//! The thresholds and smoothing factors are empirical and device/lighting
//! dependent, so all of them are plain config fields. Defaults match the
//! values the core was tuned with on handheld phones.

use serde_derive::{Deserialize, Serialize};
use std::io::Read;

use crate::error::Error;
use crate::motion::DisplayRotation;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    /// Confidence floor when the head carries a separate objectness score.
    pub objectness_threshold: f32,
    /// Confidence floor when class scores alone must carry location and class.
    pub class_only_threshold: f32,
    /// Confidence floor for few-row heads that were already reduced in-graph.
    pub compact_threshold: f32,
    pub compact_max_rows: usize,
    pub normalized_bound: f32,
    pub nms_iou_threshold: f32,
    pub top_k: usize,
    /// Frames with a mean luma under this are treated as empty.
    pub darkness_threshold: f32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            objectness_threshold: 0.45,
            class_only_threshold: 0.78,
            compact_threshold: 0.35,
            compact_max_rows: 100,
            normalized_bound: 1.5,
            nms_iou_threshold: 0.6,
            top_k: 3,
            darkness_threshold: 28.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub min_confidence: f32,
    pub confirm_frames: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            confirm_frames: 2,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MotionConfig {
    pub horizontal_fov_deg: f32,
    pub vertical_fov_deg: f32,
    pub rotation_threshold_rad: f32,
    pub sensitivity: f32,
    pub position_alpha: f32,
    pub roll_alpha: f32,
    pub accel_deadzone: f32,
    pub velocity_damping: f32,
    pub assumed_distance_m: f32,
    pub translation_weight: f32,
    pub warmup_ms: u64,
    pub out_of_bounds_margin_px: f32,
    pub out_of_bounds_samples: u32,
    pub fast_rotation_rad: f32,
    pub fast_rotation_cooldown_ms: u64,
    pub display_rotation: DisplayRotation,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            horizontal_fov_deg: 79.0,
            vertical_fov_deg: 60.0,
            rotation_threshold_rad: 0.02,
            sensitivity: 0.8,
            position_alpha: 0.25,
            roll_alpha: 0.25,
            accel_deadzone: 0.1,
            velocity_damping: 0.8,
            assumed_distance_m: 0.5,
            translation_weight: 0.4,
            warmup_ms: 500,
            out_of_bounds_margin_px: 150.0,
            out_of_bounds_samples: 15,
            fast_rotation_rad: 0.25,
            fast_rotation_cooldown_ms: 5000,
            display_rotation: DisplayRotation::Rot0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FlowConfig {
    pub process_width: usize,
    pub process_height: usize,
    pub max_corners: usize,
    pub quality_level: f32,
    pub min_distance_px: f32,
    pub min_valid_ratio: f32,
    pub min_inlier_ratio: f32,
    pub iqr_k: f32,
    pub noise_floor_px: f32,
    pub window_radius: usize,
    pub pyramid_levels: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            process_width: 320,
            process_height: 240,
            max_corners: 80,
            quality_level: 0.1,
            min_distance_px: 15.0,
            min_valid_ratio: 0.3,
            min_inlier_ratio: 0.5,
            iqr_k: 1.5,
            noise_floor_px: 4.0,
            window_radius: 10,
            pyramid_levels: 3,
            max_iterations: 30,
            epsilon: 0.01,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RevalidationConfig {
    pub interval_frames: u32,
    pub failure_limit: u32,
    pub reacquire_after_ms: u64,
    pub validate_min_confidence: f32,
    pub reacquire_min_confidence: f32,
    /// Weight of the currently displayed box when blending in a detection.
    pub blend_current: f32,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            interval_frames: 3,
            failure_limit: 3,
            reacquire_after_ms: 2000,
            validate_min_confidence: 0.22,
            reacquire_min_confidence: 0.18,
            blend_current: 0.7,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TouchConfig {
    pub expand_ratio: f32,
    pub confirm_frames: u32,
    pub release_frames: u32,
    pub announce_cooldown_ms: u64,
    pub occlusion_iou: f32,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            expand_ratio: 0.22,
            confirm_frames: 4,
            release_frames: 10,
            announce_cooldown_ms: 1800,
            occlusion_iou: 0.03,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TrackerConfig {
    pub decoder: DecoderConfig,
    pub acquisition: AcquisitionConfig,
    pub motion: MotionConfig,
    pub flow: FlowConfig,
    pub revalidation: RevalidationConfig,
    pub touch: TouchConfig,
}

fn check(ok: bool, what: &str) -> Result<(), Error> {
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidConfig(what.to_string()))
    }
}

fn unit(v: f32) -> bool {
    (0.0..=1.0).contains(&v)
}

impl TrackerConfig {
    pub fn from_json_str(src: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(src)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, Error> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let d = &self.decoder;
        check(unit(d.objectness_threshold), "decoder.objectness_threshold must be in [0, 1]")?;
        check(unit(d.class_only_threshold), "decoder.class_only_threshold must be in [0, 1]")?;
        check(unit(d.compact_threshold), "decoder.compact_threshold must be in [0, 1]")?;
        check(unit(d.nms_iou_threshold), "decoder.nms_iou_threshold must be in [0, 1]")?;
        check(d.top_k >= 1, "decoder.top_k must be at least 1")?;

        let a = &self.acquisition;
        check(unit(a.min_confidence), "acquisition.min_confidence must be in [0, 1]")?;
        check(a.confirm_frames >= 1, "acquisition.confirm_frames must be at least 1")?;

        let m = &self.motion;
        check(
            m.horizontal_fov_deg > 0.0 && m.vertical_fov_deg > 0.0,
            "motion field of view must be positive",
        )?;
        check(unit(m.position_alpha) && unit(m.roll_alpha), "motion smoothing factors must be in [0, 1]")?;
        check(unit(m.velocity_damping), "motion.velocity_damping must be in [0, 1]")?;
        check(m.assumed_distance_m > 0.0, "motion.assumed_distance_m must be positive")?;
        check(m.out_of_bounds_samples >= 1, "motion.out_of_bounds_samples must be at least 1")?;

        let f = &self.flow;
        check(
            f.process_width >= 16 && f.process_height >= 16,
            "flow processing resolution must be at least 16x16",
        )?;
        check(f.max_corners >= 1, "flow.max_corners must be at least 1")?;
        check(unit(f.min_valid_ratio) && unit(f.min_inlier_ratio), "flow ratios must be in [0, 1]")?;
        check(f.pyramid_levels >= 1, "flow.pyramid_levels must be at least 1")?;

        let r = &self.revalidation;
        check(r.interval_frames >= 1, "revalidation.interval_frames must be at least 1")?;
        check(r.failure_limit >= 1, "revalidation.failure_limit must be at least 1")?;
        check(unit(r.blend_current), "revalidation.blend_current must be in [0, 1]")?;

        let t = &self.touch;
        check(t.expand_ratio >= 0.0, "touch.expand_ratio must not be negative")?;
        check(t.confirm_frames >= 1 && t.release_frames >= 1, "touch frame counts must be at least 1")?;

        Ok(())
    }
}
