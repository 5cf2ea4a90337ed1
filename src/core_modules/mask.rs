// THEORY:
// The `mask` module turns continuous per-pixel measurements into binary decisions. A pixel
// belongs to the flowing stream only if it is BOTH moving and espresso-colored:
// - Motion mask: optical-flow magnitude above the cutoff, then dilated with a tall 3x5
//   rectangle so small vertical gaps in a thin falling stream are bridged.
// - Color mask: HSV inside the configured amber/brown gate.
// - Foreground mask: the AND of the two.
//
// Masks use the 0/255 byte convention so they can be written out or overlaid directly.

use crate::config::Thresholds;
use crate::core_modules::cv_bridge;
use crate::core_modules::optical_flow::MagnitudeField;
use crate::core_modules::pixel::Hsv;
use crate::core_modules::region::RegionFrame;
use image::{GrayImage, Luma};
use opencv::{
    core::{self, Mat},
    imgproc,
};

pub const MASK_ON: u8 = 255;
pub const MASK_OFF: u8 = 0;

/// Structuring element of the motion dilation, centered.
const DILATE_WIDTH: i32 = 3;
const DILATE_HEIGHT: i32 = 5;

/// Pixels whose motion magnitude strictly exceeds `cutoff`.
pub fn motion_mask(magnitude: &MagnitudeField, cutoff: f32) -> GrayImage {
    GrayImage::from_fn(magnitude.width(), magnitude.height(), |x, y| {
        if magnitude.get_pixel(x, y).0[0] > cutoff {
            Luma([MASK_ON])
        } else {
            Luma([MASK_OFF])
        }
    })
}

/// Binary dilation with the 3x5 rectangle. Out-of-image neighbors are ignored.
pub fn dilate(mask: &GrayImage) -> opencv::Result<GrayImage> {
    if mask.width() == 0 || mask.height() == 0 {
        return Ok(mask.clone());
    }
    let kernel = imgproc::get_structuring_element(
        imgproc::MORPH_RECT,
        core::Size::new(DILATE_WIDTH, DILATE_HEIGHT),
        core::Point::new(-1, -1),
    )?;
    let mut dilated = Mat::default();
    imgproc::dilate(
        &cv_bridge::gray_to_mat(mask)?,
        &mut dilated,
        &kernel,
        core::Point::new(-1, -1),
        1,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    cv_bridge::mat_to_gray(&dilated)
}

/// Pixels whose HSV lies inside the liquid color gate.
pub fn color_mask(region: &RegionFrame, thresholds: &Thresholds) -> GrayImage {
    let lower = Hsv {
        hue: thresholds.h_lo,
        saturation: thresholds.s_lo,
        value: thresholds.v_lo,
    };
    let upper = Hsv {
        hue: thresholds.h_hi,
        saturation: u8::MAX,
        value: thresholds.v_hi,
    };
    GrayImage::from_fn(region.width(), region.height(), |x, y| {
        if region.hsv_at(x, y).in_range(lower, upper) {
            Luma([MASK_ON])
        } else {
            Luma([MASK_OFF])
        }
    })
}

/// Pixel-wise AND of two equally sized masks.
pub fn intersect(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        if a.get_pixel(x, y).0[0] != MASK_OFF && b.get_pixel(x, y).0[0] != MASK_OFF {
            Luma([MASK_ON])
        } else {
            Luma([MASK_OFF])
        }
    })
}

pub fn count_on(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p.0[0] != MASK_OFF).count()
}
