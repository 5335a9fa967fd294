use ndarray::prelude::*;

use crate::error::Error;
use crate::frame::Frame;

/// Padding value YOLOX-style models are trained with.
const LETTERBOX_FILL: f32 = 114.0;

/// Raw output of one detector run.
#[derive(Debug, Clone)]
pub struct Inference {
    pub output: ArrayD<f32>,
    /// Square model input resolution.
    pub input_size: u32,
    /// Set when the image was letterboxed into the model input.
    pub letterbox: Option<f32>,
}

/// Object detector collaborator. Model loading and the inference engine live
/// outside of this crate; the tracking core only sees raw output tensors.
pub trait Detector {
    fn infer(&mut self, frame: &Frame) -> Result<Inference, Error>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    #[inline]
    fn infer(&mut self, frame: &Frame) -> Result<Inference, Error> {
        (**self).infer(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    Nchw,
    Nhwc,
}

/// Resize factor that fits a `width` x `height` image into a square input.
#[inline]
pub fn letterbox_scale(width: u32, height: u32, input_size: u32) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }

    (input_size as f32 / width as f32).min(input_size as f32 / height as f32)
}

/// Letterboxes `frame` into a `[1, 3, S, S]` (or `[1, S, S, 3]`) BGR tensor
/// with raw 0..255 values, image anchored at the top-left corner.
///
/// Returns the tensor and the letterbox scale to hand back to the decoder.
pub fn letterbox_input(frame: &Frame, input_size: u32, layout: InputLayout) -> (Array4<f32>, f32) {
    let size = input_size as usize;
    let (fw, fh) = frame.dims();
    let r = letterbox_scale(fw, fh, input_size);

    let shape = match layout {
        InputLayout::Nchw => (1, 3, size, size),
        InputLayout::Nhwc => (1, size, size, 3),
    };
    let mut tensor = Array4::from_elem(shape, LETTERBOX_FILL);

    if frame.is_empty() {
        return (tensor, r);
    }

    let nw = ((fw as f32 * r) as usize).clamp(1, size);
    let nh = ((fh as f32 * r) as usize).clamp(1, size);
    let channels = frame.channels();

    for y in 0..nh {
        let sy = ((y as f32 / r) as usize).min(fh as usize - 1);
        for x in 0..nw {
            let sx = ((x as f32 / r) as usize).min(fw as usize - 1);

            for c in 0..3 {
                // BGR order from RGB(A) or replicated gray
                let src_c = if channels >= 3 { 2 - c } else { 0 };
                let v = frame.pixels[[sy, sx, src_c]] as f32;

                match layout {
                    InputLayout::Nchw => tensor[[0, c, y, x]] = v,
                    InputLayout::Nhwc => tensor[[0, y, x, c]] = v,
                }
            }
        }
    }

    (tensor, r)
}
