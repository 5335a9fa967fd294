//! OpenCV flow backend (`goodFeaturesToTrack` + `calcOpticalFlowPyrLK`).

use nalgebra as na;
use opencv::{
    core::{self, Mat, Point2f, Size, TermCriteria, Vector},
    imgproc,
    prelude::*,
    video,
};

use super::FlowBackend;
use crate::config::FlowConfig;
use crate::error::Error;
use crate::image::GrayImage;

pub struct OpenCvFlow {
    max_corners: i32,
    quality_level: f64,
    min_distance: f64,
    win_size: i32,
    max_level: i32,
    criteria: TermCriteria,
}

impl OpenCvFlow {
    pub fn new(config: &FlowConfig) -> Result<Self, Error> {
        let criteria = TermCriteria::new(
            core::TermCriteria_Type::COUNT as i32 | core::TermCriteria_Type::EPS as i32,
            config.max_iterations as i32,
            config.epsilon as f64,
        )?;

        Ok(Self {
            max_corners: config.max_corners as i32,
            quality_level: config.quality_level as f64,
            min_distance: config.min_distance_px as f64,
            win_size: (2 * config.window_radius + 1) as i32,
            max_level: config.pyramid_levels.saturating_sub(1) as i32,
            criteria,
        })
    }
}

fn to_mat(img: &GrayImage) -> Result<Mat, Error> {
    let (h, w) = img.dim();
    let mut mat = Mat::new_rows_cols_with_default(h as i32, w as i32, core::CV_8UC1, core::Scalar::all(0.0))?;

    let dst = mat.data_bytes_mut()?;
    for (d, s) in dst.iter_mut().zip(img.iter()) {
        *d = *s;
    }

    Ok(mat)
}

impl FlowBackend for OpenCvFlow {
    fn detect_features(&mut self, gray: &GrayImage, mask: &GrayImage) -> Result<Vec<na::Point2<f32>>, Error> {
        let gray = to_mat(gray)?;
        let mask = to_mat(mask)?;
        let mut corners: Vector<Point2f> = Vector::new();

        imgproc::good_features_to_track(
            &gray,
            &mut corners,
            self.max_corners,
            self.quality_level,
            self.min_distance,
            &mask,
            3,
            false,
            0.04,
        )?;

        Ok(corners.iter().map(|p| na::Point2::new(p.x, p.y)).collect())
    }

    fn track(
        &mut self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[na::Point2<f32>],
    ) -> Result<Vec<Option<na::Point2<f32>>>, Error> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let prev = to_mat(prev)?;
        let next = to_mat(next)?;
        let prev_pts: Vector<Point2f> = points.iter().map(|p| Point2f::new(p.x, p.y)).collect();
        let mut next_pts: Vector<Point2f> = Vector::new();
        let mut status: Vector<u8> = Vector::new();
        let mut err: Vector<f32> = Vector::new();

        video::calc_optical_flow_pyr_lk(
            &prev,
            &next,
            &prev_pts,
            &mut next_pts,
            &mut status,
            &mut err,
            Size::new(self.win_size, self.win_size),
            self.max_level,
            self.criteria,
            0,
            1e-4,
        )?;

        Ok(next_pts
            .iter()
            .zip(status.iter())
            .map(|(p, s)| if s == 1 { Some(na::Point2::new(p.x, p.y)) } else { None })
            .collect())
    }
}
