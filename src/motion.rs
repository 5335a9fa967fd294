//! Inertial prediction of the locked box between vision corrections.
//!
//! Orientation deltas against a reference sample are turned into pixel
//! shifts through a pixels-per-radian factor derived from the camera field
//! of view. Linear acceleration is double-integrated with damping and
//! contributes a down-weighted translational shift. The displayed box is
//! low-pass filtered toward the resulting target position.

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::advisory::RateLimiter;
use crate::bbox::{BBox, Ltrb};
use crate::config::MotionConfig;
use crate::math::{dead_zone, lerp, wrap_angle};

const NANOS_PER_MS: u64 = 1_000_000;
const NANOS_TO_SECS: f32 = 1.0e-9;

/// Display orientation relative to the sensor's natural orientation.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DisplayRotation {
    Rot0,
    Rot90,
    Rot180,
    Rot270,
}

impl Default for DisplayRotation {
    fn default() -> Self {
        DisplayRotation::Rot0
    }
}

impl DisplayRotation {
    /// Remaps the sensor axes so that yaw and pitch follow the screen.
    pub fn remap(&self, m: &na::Matrix3<f32>) -> na::Matrix3<f32> {
        let c0 = m.column(0).into_owned();
        let c1 = m.column(1).into_owned();
        let mut out = *m;

        match self {
            DisplayRotation::Rot90 => {
                out.set_column(0, &(-c1));
                out.set_column(1, &c0);
            }
            DisplayRotation::Rot270 => {
                out.set_column(0, &c1);
                out.set_column(1, &(-c0));
            }
            DisplayRotation::Rot0 | DisplayRotation::Rot180 => (),
        }

        out
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Angles {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// Device orientation at one sensor timestamp.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OrientationSample {
    pub matrix: na::Matrix3<f32>,
    pub timestamp_ns: u64,
}

impl OrientationSample {
    #[inline]
    pub fn new(matrix: na::Matrix3<f32>, timestamp_ns: u64) -> Self {
        Self {
            matrix,
            timestamp_ns,
        }
    }

    /// Builds the rotation from a rotation-vector reading `[x, y, z, (w)]`.
    /// A missing scalar part is recovered from the unit-norm constraint.
    pub fn from_rotation_vector(values: &[f32], timestamp_ns: u64) -> Option<Self> {
        if values.len() < 3 {
            return None;
        }

        let (x, y, z) = (values[0], values[1], values[2]);
        let w = match values.get(3) {
            Some(w) => *w,
            None => (1.0 - x * x - y * y - z * z).max(0.0).sqrt(),
        };

        let q = na::Quaternion::new(w, x, y, z);
        if !q.norm().is_finite() || q.norm() < 1e-6 {
            return None;
        }

        let rot = na::UnitQuaternion::from_quaternion(q).to_rotation_matrix();

        Some(Self::new(rot.into_inner(), timestamp_ns))
    }

    pub fn remapped(&self, rotation: DisplayRotation) -> Self {
        Self::new(rotation.remap(&self.matrix), self.timestamp_ns)
    }

    /// Azimuth, pitch and roll in the platform's orientation convention.
    pub fn angles(&self) -> Angles {
        let m = &self.matrix;

        Angles {
            yaw: m[(0, 1)].atan2(m[(1, 1)]),
            pitch: (-m[(2, 1)]).clamp(-1.0, 1.0).asin(),
            roll: (-m[(2, 0)]).atan2(m[(2, 2)]),
        }
    }

    /// Wrapped angle deltas of `self` relative to `reference`.
    pub fn delta(&self, reference: &OrientationSample) -> Angles {
        let a = self.angles();
        let b = reference.angles();

        Angles {
            yaw: wrap_angle(a.yaw - b.yaw),
            pitch: wrap_angle(a.pitch - b.pitch),
            roll: wrap_angle(a.roll - b.roll),
        }
    }
}

/// Damped double integration of screen-aligned linear acceleration.
#[derive(Debug, Clone)]
pub struct InertialIntegrator {
    deadzone: f32,
    damping: f32,
    velocity: na::Vector2<f32>,
    distance: na::Vector2<f32>,
    last_ns: Option<u64>,
}

impl InertialIntegrator {
    pub fn new(deadzone: f32, damping: f32) -> Self {
        Self {
            deadzone,
            damping,
            velocity: na::Vector2::zeros(),
            distance: na::Vector2::zeros(),
            last_ns: None,
        }
    }

    pub fn reset(&mut self) {
        self.velocity = na::Vector2::zeros();
        self.distance = na::Vector2::zeros();
        self.last_ns = None;
    }

    /// Integrates one sample in m/s^2. The first sample only anchors the
    /// clock; gaps over a second are skipped.
    pub fn push(&mut self, ax: f32, ay: f32, timestamp_ns: u64) {
        let accel = na::Vector2::new(dead_zone(ax, self.deadzone), dead_zone(ay, self.deadzone));

        let last = match self.last_ns.replace(timestamp_ns) {
            Some(last) => last,
            None => return,
        };

        if timestamp_ns <= last {
            return;
        }

        let dt = (timestamp_ns - last) as f32 * NANOS_TO_SECS;
        if dt > 1.0 {
            return;
        }

        self.velocity += accel * dt;
        self.velocity *= self.damping;
        self.distance += self.velocity * dt;
    }

    /// Accumulated displacement in meters since the last reset.
    #[inline]
    pub fn displacement(&self) -> na::Vector2<f32> {
        self.distance
    }

    #[inline]
    pub fn velocity(&self) -> na::Vector2<f32> {
        self.velocity
    }
}

/// Outcome of feeding one orientation sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionUpdate {
    /// New displayed box, when it moved.
    pub moved: Option<BBox<Ltrb>>,
    /// The box stayed off-screen long enough to give up.
    pub lost: bool,
    /// Rate-limited "moving too fast" advisory.
    pub fast_rotation: bool,
}

pub struct MotionEstimator {
    config: MotionConfig,
    locked: bool,
    suspended: bool,
    frame: (f32, f32),
    pixels_per_radian: na::Vector2<f32>,
    initial: BBox<Ltrb>,
    displayed: BBox<Ltrb>,
    reference: Option<OrientationSample>,
    current: Option<OrientationSample>,
    warmup_started_ns: Option<u64>,
    warmed_up: bool,
    inertial: InertialIntegrator,
    roll: f32,
    out_of_bounds: u32,
    has_samples: bool,
    fast_rotation: RateLimiter,
}

impl MotionEstimator {
    pub fn new(config: MotionConfig) -> Self {
        let inertial = InertialIntegrator::new(config.accel_deadzone, config.velocity_damping);
        let fast_rotation = RateLimiter::new(config.fast_rotation_cooldown_ms);

        Self {
            config,
            locked: false,
            suspended: false,
            frame: (0.0, 0.0),
            pixels_per_radian: na::Vector2::zeros(),
            initial: BBox::ltrb(0.0, 0.0, 0.0, 0.0),
            displayed: BBox::ltrb(0.0, 0.0, 0.0, 0.0),
            reference: None,
            current: None,
            warmup_started_ns: None,
            warmed_up: false,
            inertial,
            roll: 0.0,
            out_of_bounds: 0,
            has_samples: false,
            fast_rotation,
        }
    }

    /// Begins predicting from `bbox` in a `width` x `height` frame.
    pub fn start(&mut self, bbox: BBox<Ltrb>, width: u32, height: u32) {
        self.frame = (width as f32, height as f32);
        self.pixels_per_radian = na::Vector2::new(
            self.frame.0 / self.config.horizontal_fov_deg.to_radians(),
            self.frame.1 / self.config.vertical_fov_deg.to_radians(),
        );

        self.initial = bbox;
        self.displayed = bbox;
        self.reference = None;
        self.current = None;
        self.warmup_started_ns = None;
        self.warmed_up = false;
        self.inertial.reset();
        self.roll = 0.0;
        self.out_of_bounds = 0;
        self.has_samples = false;
        self.suspended = false;
        self.locked = true;

        debug!(
            "motion estimator started at {:?} ({}x{}, {:.1} px/rad)",
            bbox.as_slice(),
            width,
            height,
            self.pixels_per_radian.x
        );
    }

    pub fn stop(&mut self) {
        self.locked = false;
        self.suspended = false;
        self.reference = None;
        self.current = None;
        self.inertial.reset();
        self.has_samples = false;
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Re-anchors prediction on an authoritative box: the current
    /// orientation becomes the reference and the integrator restarts.
    pub fn correct(&mut self, bbox: BBox<Ltrb>) {
        if !self.locked {
            return;
        }

        self.initial = bbox;
        self.displayed = bbox;
        self.reference = self.current;
        self.inertial.reset();
        self.roll = 0.0;
        self.out_of_bounds = 0;
    }

    /// While suspended, samples keep the current orientation fresh but the
    /// box is not moved.
    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Sensor-predicted box, once at least one sample has arrived.
    pub fn predicted_box(&self) -> Option<BBox<Ltrb>> {
        if self.locked && self.has_samples {
            Some(self.displayed)
        } else {
            None
        }
    }

    pub fn displayed_box(&self) -> Option<BBox<Ltrb>> {
        if self.locked {
            Some(self.displayed)
        } else {
            None
        }
    }

    /// Counter-rotation for the displayed box, in degrees.
    #[inline]
    pub fn display_rotation_deg(&self) -> f32 {
        -self.roll.to_degrees()
    }

    #[inline]
    pub fn pixels_per_radian(&self) -> na::Vector2<f32> {
        self.pixels_per_radian
    }

    /// Screen shift for yaw/pitch deltas: panning right moves the object left.
    #[inline]
    pub fn rotational_shift(&self, yaw: f32, pitch: f32) -> na::Vector2<f32> {
        na::Vector2::new(
            -yaw * self.pixels_per_radian.x * self.config.sensitivity,
            -pitch * self.pixels_per_radian.y * self.config.sensitivity,
        )
    }

    fn translational_shift(&self) -> na::Vector2<f32> {
        let d = self.inertial.displacement();
        let ppm = self.pixels_per_radian / self.config.assumed_distance_m;

        d.component_mul(&ppm) * self.config.translation_weight
    }

    pub fn on_acceleration(&mut self, ax: f32, ay: f32, timestamp_ns: u64) {
        if !self.locked || self.suspended {
            return;
        }

        self.has_samples = true;
        self.inertial.push(ax, ay, timestamp_ns);
    }

    pub fn on_orientation(&mut self, sample: OrientationSample) -> MotionUpdate {
        let mut update = MotionUpdate::default();
        if !self.locked {
            return update;
        }

        let sample = sample.remapped(self.config.display_rotation);
        self.has_samples = true;
        self.current = Some(sample);

        let reference = match self.reference {
            Some(reference) => reference,
            None => {
                self.reference = Some(sample);
                if self.warmup_started_ns.is_none() {
                    self.warmup_started_ns = Some(sample.timestamp_ns);
                }
                return update;
            }
        };

        if self.suspended {
            return update;
        }

        if !self.warmed_up {
            let started = *self.warmup_started_ns.get_or_insert(sample.timestamp_ns);
            let elapsed_ms = sample.timestamp_ns.saturating_sub(started) / NANOS_PER_MS;
            if elapsed_ms < self.config.warmup_ms {
                return update;
            }

            // drop whatever rotation accumulated while the sensor settled
            self.reference = Some(sample);
            self.warmed_up = true;
            debug!("motion warm-up finished after {} ms", elapsed_ms);

            return update;
        }

        let delta = sample.delta(&reference);

        if delta.yaw.abs() > self.config.fast_rotation_rad
            && self.fast_rotation.try_fire(sample.timestamp_ns / NANOS_PER_MS)
        {
            update.fast_rotation = true;
        }

        let threshold = self.config.rotation_threshold_rad;
        let yaw = dead_zone(delta.yaw, threshold);
        let pitch = dead_zone(delta.pitch, threshold);
        let roll = dead_zone(delta.roll, threshold);

        let target = na::Vector2::new(self.initial.left(), self.initial.top())
            + self.rotational_shift(yaw, pitch)
            - self.translational_shift();

        let alpha = self.config.position_alpha;
        let left = lerp(self.displayed.left(), target.x, alpha);
        let top = lerp(self.displayed.top(), target.y, alpha);

        self.displayed = self.initial.moved_to(left, top);
        self.roll = lerp(self.roll, roll, self.config.roll_alpha);

        let (w, h) = self.frame;
        if self.displayed.is_outside(w, h, self.config.out_of_bounds_margin_px) {
            self.out_of_bounds += 1;

            if self.out_of_bounds >= self.config.out_of_bounds_samples {
                info!(
                    "box off-screen for {} samples, giving up",
                    self.out_of_bounds
                );
                update.lost = true;
                self.stop();

                return update;
            }
        } else {
            self.out_of_bounds = 0;
        }

        update.moved = Some(self.displayed);
        update
    }
}
