use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug + Copy + PartialEq {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// X-y-width-height format, contains coordinates of the center of bbox and width-height
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Xywh;
impl BBoxFormat for Xywh {}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct BBox<F: BBoxFormat>([f32; 4], #[serde(skip)] PhantomData<F>);

impl<F: BBoxFormat> From<BBox<F>> for [f32; 4] {
    fn from(bbox: BBox<F>) -> Self {
        bbox.0
    }
}

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.0
    }

    // Use carefully when you REALLY sure that slice have needed format
    #[inline(always)]
    pub fn assigned(slice: &[f32; 4]) -> Self {
        BBox(*slice, PhantomData)
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        BBox([left, top, right, bottom], PhantomData)
    }

    #[inline]
    pub fn as_xywh(&self) -> BBox<Xywh> {
        self.into()
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2] - self.0[0]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3] - self.0[1]
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(
            (self.0[0] + self.0[2]) * 0.5,
            (self.0[1] + self.0[3]) * 0.5,
        )
    }

    /// Right strictly past left and bottom strictly below top.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|v| v.is_finite()) && self.right() > self.left() && self.bottom() > self.top()
    }

    pub fn intersection(&self, other: &BBox<Ltrb>) -> f32 {
        let w = (self.right().min(other.right()) - self.left().max(other.left())).max(0.0);
        let h = (self.bottom().min(other.bottom()) - self.top().max(other.top())).max(0.0);

        w * h
    }

    pub fn iou(&self, other: &BBox<Ltrb>) -> f32 {
        let inter = self.intersection(other);

        inter / (self.area() + other.area() - inter + 1e-6)
    }

    #[inline]
    pub fn contains(&self, pt: na::Point2<f32>) -> bool {
        pt.x >= self.left() && pt.x < self.right() && pt.y >= self.top() && pt.y < self.bottom()
    }

    #[inline]
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::ltrb(self.0[0] + dx, self.0[1] + dy, self.0[2] + dx, self.0[3] + dy)
    }

    /// Same size, top-left corner moved to `(left, top)`.
    #[inline]
    pub fn moved_to(&self, left: f32, top: f32) -> Self {
        Self::ltrb(left, top, left + self.width(), top + self.height())
    }

    /// Grows every side by `ratio` of the box's own width/height.
    pub fn expand(&self, ratio: f32) -> Self {
        let dw = self.width().max(1.0) * ratio;
        let dh = self.height().max(1.0) * ratio;

        Self::ltrb(self.0[0] - dw, self.0[1] - dh, self.0[2] + dw, self.0[3] + dh)
    }

    pub fn union(&self, other: &BBox<Ltrb>) -> Self {
        Self::ltrb(
            self.left().min(other.left()),
            self.top().min(other.top()),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Per-edge blend: `self * keep + other * (1 - keep)`.
    pub fn blend(&self, other: &BBox<Ltrb>, keep: f32) -> Self {
        let mut out = [0.0; 4];
        for (o, (a, b)) in out.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *o = a * keep + b * (1.0 - keep);
        }

        Self::assigned(&out)
    }

    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self::ltrb(
            self.0[0].clamp(0.0, width),
            self.0[1].clamp(0.0, height),
            self.0[2].clamp(0.0, width),
            self.0[3].clamp(0.0, height),
        )
    }

    /// Axis-aligned scaling, e.g. from image to a downsampled buffer.
    #[inline]
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::ltrb(self.0[0] * sx, self.0[1] * sy, self.0[2] * sx, self.0[3] * sy)
    }

    /// True when the box lies more than `margin` px outside a `width` x `height` frame.
    pub fn is_outside(&self, width: f32, height: f32, margin: f32) -> bool {
        self.right() < -margin
            || self.left() > width + margin
            || self.bottom() < -margin
            || self.top() > height + margin
    }
}

impl BBox<Xywh> {
    #[inline]
    pub fn xywh(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        BBox([cx, cy, width, height], PhantomData)
    }

    #[inline(always)]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    #[inline(always)]
    pub fn cx(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn cy(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }
}

impl<'a> From<&'a BBox<Xywh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Xywh>) -> Self {
        let (w2, h2) = (v.0[2] / 2.0, v.0[3] / 2.0);

        Self([v.0[0] - w2, v.0[1] - h2, v.0[0] + w2, v.0[1] + h2], PhantomData)
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Xywh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        Self(
            [
                v.0[0] + (v.0[2] - v.0[0]) / 2.0,
                v.0[1] + (v.0[3] - v.0[1]) / 2.0,
                v.0[2] - v.0[0],
                v.0[3] - v.0[1],
            ],
            PhantomData,
        )
    }
}
