// THEORY:
// The `region` module performs the first step of every frame: slicing the fixed region of
// interest out of the full image. It is the bridge between a raw decoded frame and the
// region-local planes the segmenter works on.
//
// Key principles:
// 1.  **Recomputed per frame**: the pixel rectangle is derived from the current frame's
//     size every call. Frames of one sequence share a size, but nothing is cached across
//     resolutions.
// 2.  **Two planes, one pass**: the crop produces a grayscale plane (motion, kymograph)
//     and an HSV plane (color gate, color statistics) in a single walk over the pixels.
// 3.  **Region-local coordinates**: everything downstream (masks, contours, centroids)
//     is expressed relative to the rectangle's top-left corner.

use crate::config::RegionConfig;
use crate::core_modules::pixel::{Hsv, Pixel};
use image::{GrayImage, Luma, RgbImage};
use serde::Serialize;

/// Pixel bounds of the region inside a full frame. `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl RegionRect {
    /// Scales the fractional bounds by the frame size, truncating like an integer cast.
    pub fn from_frame(frame_width: u32, frame_height: u32, config: &RegionConfig) -> Self {
        let scale = |extent: u32, fraction: f64| -> u32 {
            ((extent as f64 * fraction).floor() as u32).min(extent)
        };
        let left = scale(frame_width, config.x0);
        let top = scale(frame_height, config.y0);
        let right = scale(frame_width, config.x1).max(left);
        let bottom = scale(frame_height, config.y1).max(top);
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// The cropped region of one frame, in the two representations the segmenter consumes.
#[derive(Debug, Clone)]
pub struct RegionFrame {
    pub rect: RegionRect,
    pub gray: GrayImage,
    /// Row-major HSV plane, `rect.width() * rect.height()` entries.
    pub hsv: Vec<Hsv>,
}

impl RegionFrame {
    /// Crops `frame` to the configured region and converts it.
    pub fn extract(frame: &RgbImage, config: &RegionConfig) -> Self {
        let rect = RegionRect::from_frame(frame.width(), frame.height(), config);
        let width = rect.width();
        let height = rect.height();

        let mut gray = GrayImage::new(width, height);
        let mut hsv = Vec::with_capacity((width * height) as usize);

        for y in 0..height {
            for x in 0..width {
                let pixel = Pixel::from(*frame.get_pixel(rect.left + x, rect.top + y));
                gray.put_pixel(x, y, Luma([pixel.luma()]));
                hsv.push(pixel.hsv());
            }
        }

        Self { rect, gray, hsv }
    }

    pub fn width(&self) -> u32 {
        self.rect.width()
    }

    pub fn height(&self) -> u32 {
        self.rect.height()
    }

    pub fn hsv_at(&self, x: u32, y: u32) -> Hsv {
        self.hsv[(y * self.width() + x) as usize]
    }

    /// Darkness per column: the sum of `255 - gray` down each column of the region.
    /// A dark stream against a bright background shows up as a ridge.
    pub fn column_intensities(&self) -> Vec<f64> {
        let mut columns = vec![0.0_f64; self.width() as usize];
        for (x, _, pixel) in self.gray.enumerate_pixels() {
            columns[x as usize] += (255 - pixel.0[0]) as f64;
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn rect_scales_default_fractions() {
        let rect = RegionRect::from_frame(1000, 1000, &RegionConfig::default());
        assert_eq!(rect, RegionRect { left: 320, top: 150, right: 680, bottom: 800 });
        assert_eq!(rect.width(), 360);
        assert_eq!(rect.height(), 650);
    }

    #[test]
    fn rect_truncates_fractional_pixels() {
        let rect = RegionRect::from_frame(101, 99, &RegionConfig::default());
        // 101 * 0.32 = 32.32, 99 * 0.15 = 14.85, 101 * 0.68 = 68.68, 99 * 0.80 = 79.2
        assert_eq!(rect, RegionRect { left: 32, top: 14, right: 68, bottom: 79 });
    }

    #[test]
    fn extract_produces_region_local_planes() {
        let config = RegionConfig { x0: 0.5, y0: 0.5, x1: 1.0, y1: 1.0 };
        let mut frame = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));
        frame.put_pixel(4, 4, Rgb([0, 0, 0]));

        let region = RegionFrame::extract(&frame, &config);
        assert_eq!((region.width(), region.height()), (4, 4));
        assert_eq!(region.gray.get_pixel(0, 0).0[0], 0);
        assert_eq!(region.hsv_at(1, 1).value, 255);

        let columns = region.column_intensities();
        assert_eq!(columns, vec![255.0, 0.0, 0.0, 0.0]);
    }
}
