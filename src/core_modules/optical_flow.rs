// THEORY:
// The `optical_flow` module measures how far every pixel of the region moved between two
// consecutive frames. The estimate is OpenCV's Farneback dense flow: each neighborhood is
// approximated by a quadratic polynomial, the displacement is read from how the polynomial
// coefficients change between frames, and a coarse-to-fine pyramid keeps large motions.
//
// Only the magnitude of the resulting field is used downstream: the segmenter thresholds it
// into a motion mask. The estimator is stateless; carrying the previous frame is the
// segmenter's job.

use crate::config::FlowParams;
use crate::core_modules::cv_bridge;
use image::{GrayImage, ImageBuffer, Luma};
use opencv::{
    core::{Mat, Vec2f},
    prelude::*,
    video,
};

/// Per-pixel motion magnitude, in pixels per frame.
pub type MagnitudeField = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A dense displacement field: one `[dx, dy]` vector per pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    pub width: usize,
    pub height: usize,
    pub vectors: Vec<[f32; 2]>,
}

impl FlowField {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            vectors: vec![[0.0, 0.0]; width * height],
        }
    }

    pub fn at(&self, x: usize, y: usize) -> [f32; 2] {
        self.vectors[y * self.width + x]
    }

    /// Euclidean length of every displacement vector.
    pub fn magnitude(&self) -> MagnitudeField {
        let data = self
            .vectors
            .iter()
            .map(|[dx, dy]| (dx * dx + dy * dy).sqrt())
            .collect();
        MagnitudeField::from_raw(self.width as u32, self.height as u32, data)
            .unwrap_or_else(|| MagnitudeField::new(self.width as u32, self.height as u32))
    }

    /// Reads the two-channel float `Mat` written by `calc_optical_flow_farneback`.
    fn from_mat(flow: &Mat) -> opencv::Result<Self> {
        let vectors = flow.data_typed::<Vec2f>()?.iter().map(|v| [v[0], v[1]]).collect();
        Ok(Self {
            width: flow.cols() as usize,
            height: flow.rows() as usize,
            vectors,
        })
    }
}

/// Computes the dense flow from `prev` to `next`. A size mismatch (or an empty image)
/// yields an all-zero field of `next`'s size without calling into OpenCV.
pub fn farneback(prev: &GrayImage, next: &GrayImage, params: &FlowParams) -> opencv::Result<FlowField> {
    let width = next.width() as usize;
    let height = next.height() as usize;
    if prev.dimensions() != next.dimensions() || width == 0 || height == 0 {
        return Ok(FlowField::zeros(width, height));
    }

    let prev_mat = cv_bridge::gray_to_mat(prev)?;
    let next_mat = cv_bridge::gray_to_mat(next)?;
    let mut flow = Mat::default();
    video::calc_optical_flow_farneback(
        &prev_mat,
        &next_mat,
        &mut flow,
        params.pyr_scale,
        params.levels as i32,
        params.winsize as i32,
        params.iterations as i32,
        params.poly_n as i32,
        params.poly_sigma,
        0, // flags
    )?;

    FlowField::from_mat(&flow)
}
