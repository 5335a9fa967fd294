use std::f32::consts::PI;

use crate::bbox::{BBox, Ltrb};

/// Degrees spanned by half of the frame in the spoken guidance.
const HALF_FRAME_DEG: f32 = 30.0;

/// Where the box sits relative to the frame centre, as a clock hour and
/// horizontal/vertical angles (right and up positive).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Direction {
    pub hour: u8,
    pub horizontal_deg: f32,
    pub vertical_deg: f32,
}

#[inline]
fn round2(v: f32) -> f32 {
    (v * 100.0).trunc() / 100.0
}

impl Direction {
    /// From a normalized box centre, `(0.5, 0.5)` being the frame centre.
    pub fn from_normalized(cx: f32, cy: f32) -> Self {
        let dx = cx - 0.5;
        let dy = 0.5 - cy;

        // clockwise from straight up
        let mut hour = dx.atan2(dy) * 6.0 / PI;
        if hour <= 0.0 {
            hour += 12.0;
        }
        if hour > 12.0 {
            hour -= 12.0;
        }

        Self {
            hour: (hour as u8).clamp(1, 12),
            horizontal_deg: round2(dx * 2.0 * HALF_FRAME_DEG),
            vertical_deg: round2(dy * 2.0 * HALF_FRAME_DEG),
        }
    }

    pub fn of(bbox: &BBox<Ltrb>, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 || !bbox.is_valid() {
            return None;
        }

        let c = bbox.center();

        Some(Self::from_normalized(c.x / width as f32, c.y / height as f32))
    }
}
