use ndarray::prelude::*;
use tracing::{debug, warn};

use crate::bbox::{BBox, Ltrb};
use crate::config::DecoderConfig;
use crate::detection::{percent, same_label, ClassLabels, DetectionBox};
use crate::detector::Inference;
use crate::frame::Frame;
use crate::math::sigmoid;

/// Field counts (4 box + 1 objectness + N classes) of heads known to carry
/// an objectness score.
const OBJECTNESS_FIELD_COUNTS: [usize; 4] = [85, 58, 55, 54];

/// Rows sampled when sniffing coordinate normalization.
const GEOMETRY_SAMPLE_ROWS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// `N boxes x K fields`
    RowMajor,
    /// `K fields x N boxes`
    Transposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    /// `(x1, y1, x2, y2)` in `[0, 1]`
    NormalizedCorners,
    /// `(cx, cy, w, h)` in `[0, 1]`
    NormalizedCenter,
    /// `(cx, cy, w, h)` in model input pixels
    Pixels,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scoring {
    /// objectness x class score
    Objectness,
    /// class scores alone
    ClassOnly,
}

/// Output tensor convention of a detector model, resolved once per model.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorLayout {
    pub shape: Vec<usize>,
    pub orientation: Orientation,
    pub geometry: Geometry,
    pub scoring: Scoring,
    pub num_boxes: usize,
    pub num_fields: usize,
    /// Few-row output already reduced inside the model graph.
    pub compact: bool,
}

/// Image-side parameters for mapping boxes back to source pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeContext {
    pub image_width: u32,
    pub image_height: u32,
    pub input_size: u32,
    pub letterbox: Option<f32>,
    /// Tracked label and its own confidence floor, applied to rows naming
    /// the label as best or alternate class.
    pub target: Option<(String, f32)>,
}

impl DecodeContext {
    pub fn new(image_width: u32, image_height: u32, input_size: u32) -> Self {
        Self {
            image_width,
            image_height,
            input_size,
            letterbox: None,
            target: None,
        }
    }

    pub fn with_letterbox(mut self, scale: f32) -> Self {
        self.letterbox = Some(scale);
        self
    }

    pub fn with_target(mut self, label: &str, floor: f32) -> Self {
        self.target = Some((label.to_string(), floor));
        self
    }

    pub fn from_inference(frame: &Frame, inference: &Inference) -> Self {
        let (w, h) = frame.dims();

        Self {
            image_width: w,
            image_height: h,
            input_size: inference.input_size,
            letterbox: inference.letterbox,
            target: None,
        }
    }
}

/// Batch-1 output as a 2D view, or `None` for shapes we cannot read.
fn as_matrix<'a>(output: &ArrayViewD<'a, f32>) -> Option<ArrayView2<'a, f32>> {
    let shape = output.shape();
    match shape.len() {
        2 => output.clone().into_dimensionality::<Ix2>().ok(),
        3 if shape[0] >= 1 => output
            .clone()
            .index_axis_move(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .ok(),
        _ => None,
    }
}

impl TensorLayout {
    /// Sniffs the convention from one output tensor.
    ///
    /// Returns `None` for empty or unreadable tensors.
    pub fn resolve(output: ArrayViewD<'_, f32>, config: &DecoderConfig) -> Option<Self> {
        let mat = as_matrix(&output)?;
        let (dim1, dim2) = mat.dim();

        let (orientation, num_boxes, num_fields) = if dim1 >= dim2 {
            (Orientation::RowMajor, dim1, dim2)
        } else {
            (Orientation::Transposed, dim2, dim1)
        };

        // at least the box plus one score
        if num_boxes == 0 || num_fields < 5 {
            return None;
        }

        let field = |row: usize, f: usize| match orientation {
            Orientation::RowMajor => mat[[row, f]],
            Orientation::Transposed => mat[[f, row]],
        };

        let sample = num_boxes.min(GEOMETRY_SAMPLE_ROWS);
        let normalized = (0..sample)
            .flat_map(|row| (0..4).map(move |f| (row, f)))
            .all(|(row, f)| field(row, f) <= config.normalized_bound);

        let geometry = if !normalized {
            Geometry::Pixels
        } else if (0..sample).all(|row| field(row, 2) > field(row, 0) && field(row, 3) > field(row, 1)) {
            Geometry::NormalizedCorners
        } else {
            Geometry::NormalizedCenter
        };

        let scoring = if OBJECTNESS_FIELD_COUNTS.contains(&num_fields) {
            Scoring::Objectness
        } else {
            Scoring::ClassOnly
        };

        Some(Self {
            shape: output.shape().to_vec(),
            orientation,
            geometry,
            scoring,
            num_boxes,
            num_fields,
            compact: num_boxes <= config.compact_max_rows,
        })
    }

    /// Confidence floor for this convention.
    pub fn threshold(&self, config: &DecoderConfig) -> f32 {
        if self.compact {
            config.compact_threshold
        } else {
            match self.scoring {
                Scoring::Objectness => config.objectness_threshold,
                Scoring::ClassOnly => config.class_only_threshold,
            }
        }
    }

    #[inline]
    fn score_start(&self) -> usize {
        match self.scoring {
            Scoring::Objectness => 5,
            Scoring::ClassOnly => 4,
        }
    }

    #[inline]
    fn class_count(&self) -> usize {
        self.num_fields.saturating_sub(self.score_start()).max(1)
    }
}

/// Turns raw detector output into confidence-sorted, suppressed candidates.
pub struct DetectionDecoder {
    config: DecoderConfig,
    labels: ClassLabels,
    layout: Option<TensorLayout>,
}

impl DetectionDecoder {
    pub fn new(config: DecoderConfig, labels: ClassLabels) -> Self {
        Self {
            config,
            labels,
            layout: None,
        }
    }

    /// Pins the tensor convention instead of sniffing it.
    pub fn with_layout(mut self, layout: TensorLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    #[inline]
    pub fn layout(&self) -> Option<&TensorLayout> {
        self.layout.as_ref()
    }

    /// Forgets the resolved convention, e.g. after loading another model.
    pub fn reset_layout(&mut self) {
        self.layout = None;
    }

    #[inline]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    fn ensure_layout(&mut self, output: &ArrayViewD<'_, f32>) -> Option<TensorLayout> {
        if let Some(layout) = &self.layout {
            if layout.shape.as_slice() == output.shape() {
                return Some(layout.clone());
            }
        }

        let layout = TensorLayout::resolve(output.view(), &self.config)?;

        // an all-zero geometry sample says nothing about normalization
        let informative = output.iter().take(4 * layout.num_fields).any(|v| *v > 0.0);
        if informative {
            debug!(
                "resolved detector output {:?}: {:?} {:?} {:?} compact={}",
                layout.shape, layout.orientation, layout.geometry, layout.scoring, layout.compact
            );
            self.layout = Some(layout.clone());
        }

        Some(layout)
    }

    /// Decodes one frame's inference, rejecting frames too dark to trust.
    ///
    /// `target` names the tracked label and the floor its rows must reach.
    pub fn decode_inference(
        &mut self,
        frame: &Frame,
        inference: &Inference,
        target: Option<(&str, f32)>,
    ) -> Vec<DetectionBox> {
        if frame.is_empty() {
            return Vec::new();
        }

        let luma = frame.mean_luma();
        if luma < self.config.darkness_threshold {
            debug!("frame too dark for detection (mean luma {:.1})", luma);
            return Vec::new();
        }

        let mut ctx = DecodeContext::from_inference(frame, inference);
        if let Some((label, floor)) = target {
            ctx = ctx.with_target(label, floor);
        }
        self.decode(inference.output.view(), &ctx)
    }

    pub fn decode(&mut self, output: ArrayViewD<'_, f32>, ctx: &DecodeContext) -> Vec<DetectionBox> {
        if ctx.image_width == 0 || ctx.image_height == 0 {
            return Vec::new();
        }

        let layout = match self.ensure_layout(&output) {
            Some(layout) => layout,
            None => {
                warn!("unreadable detector output shape {:?}", output.shape());
                return Vec::new();
            }
        };

        let mat = match as_matrix(&output) {
            Some(mat) => mat,
            None => return Vec::new(),
        };

        let threshold = layout.threshold(&self.config);
        let mut candidates = Vec::new();

        for row in 0..layout.num_boxes {
            if let Some(det) = self.decode_row(&mat, &layout, row, threshold, ctx) {
                candidates.push(det);
            }
        }

        non_maximum_suppression(candidates, self.config.nms_iou_threshold)
    }

    fn decode_row(
        &self,
        mat: &ArrayView2<'_, f32>,
        layout: &TensorLayout,
        row: usize,
        threshold: f32,
        ctx: &DecodeContext,
    ) -> Option<DetectionBox> {
        let field = |f: usize| -> Option<f32> {
            let v = match layout.orientation {
                Orientation::RowMajor => mat.get([row, f]),
                Orientation::Transposed => mat.get([f, row]),
            };
            v.copied().filter(|v| v.is_finite())
        };

        let objectness = match layout.scoring {
            Scoring::Objectness => field(4)?.clamp(0.0, 1.0),
            Scoring::ClassOnly => 1.0,
        };

        let start = layout.score_start();
        let mut scores: Vec<(usize, f32)> = (0..layout.class_count())
            .filter_map(|c| {
                let mut s = field(start + c)?;
                if !(0.0..=1.0).contains(&s) {
                    s = sigmoid(s);
                }
                Some((c, (objectness * s).clamp(0.0, 1.0)))
            })
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(self.config.top_k);

        let &(best_class, confidence) = scores.first()?;
        // the tracked label may pass below the generic floor
        let threshold = match &ctx.target {
            Some((label, floor)) if scores.iter().any(|&(c, _)| same_label(&self.labels.get(c), label)) => {
                threshold.min(*floor)
            }
            _ => threshold,
        };
        if confidence < threshold {
            return None;
        }

        let geometry = [field(0)?, field(1)?, field(2)?, field(3)?];
        let bbox = decode_geometry(layout.geometry, geometry, ctx);
        if !bbox.is_valid() || bbox.area() <= 0.0 {
            return None;
        }

        Some(DetectionBox {
            bbox,
            label: self.labels.get(best_class),
            confidence,
            alternates: scores
                .iter()
                .map(|&(c, conf)| (self.labels.get(c), percent(conf)))
                .collect(),
        })
    }
}

fn decode_geometry(geometry: Geometry, v: [f32; 4], ctx: &DecodeContext) -> BBox<Ltrb> {
    let (iw, ih) = (ctx.image_width as f32, ctx.image_height as f32);

    let (cx, cy, w, h) = match geometry {
        Geometry::NormalizedCorners => {
            return BBox::ltrb(v[0] * iw, v[1] * ih, v[2] * iw, v[3] * ih).clamp(iw, ih);
        }
        Geometry::NormalizedCenter => (
            v[0].clamp(0.0, 1.0) * iw,
            v[1].clamp(0.0, 1.0) * ih,
            v[2].clamp(0.0, 1.0) * iw,
            v[3].clamp(0.0, 1.0) * ih,
        ),
        Geometry::Pixels => match ctx.letterbox {
            Some(r) if r > 0.0 => ((v[0] / r).clamp(0.0, iw), (v[1] / r).clamp(0.0, ih), v[2] / r, v[3] / r),
            _ => {
                let input = ctx.input_size.max(1) as f32;
                (v[0] / input * iw, v[1] / input * ih, v[2] / input * iw, v[3] / input * ih)
            }
        },
    };

    BBox::xywh(cx, cy, w, h).as_ltrb().clamp(iw, ih)
}

/// Class-agnostic greedy suppression, highest confidence first.
pub fn non_maximum_suppression(mut dets: Vec<DetectionBox>, iou_threshold: f32) -> Vec<DetectionBox> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; dets.len()];
    for idx in 0..dets.len() {
        if suppressed[idx] {
            continue;
        }
        for other in idx + 1..dets.len() {
            if !suppressed[other] && dets[idx].iou(&dets[other]) > iou_threshold {
                suppressed[other] = true;
            }
        }
    }

    dets.into_iter()
        .zip(suppressed)
        .filter_map(|(det, s)| if s { None } else { Some(det) })
        .collect()
}
