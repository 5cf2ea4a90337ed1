// THEORY:
// The `StreamSegmenter` is the per-frame workhorse. It is the only stateful component of
// the core: it remembers the grayscale region of the previous frame so that motion can be
// measured against the current one.
//
// Key principles:
// 1.  **Order is part of the contract**: `segment` MUST be called in frame order on one
//     instance. Feeding frames out of order silently corrupts the motion field; nothing
//     detects it. There is no reset; build a new segmenter for a new sequence.
// 2.  **Motion AND color**: a pixel belongs to the stream only if it moves and has the
//     color of espresso. Either cue alone picks up hands, steam, cup rims, and shadows.
// 3.  **Not found is not an error**: a decodable frame always yields a `FrameStats`. No
//     visible stream is an ordinary result with zeroed geometry, a (-1, -1) centroid and
//     undefined color medians.
// 4.  **Frozen thresholds**: the segmenter copies its configuration at construction so
//     every frame of a sequence is judged by the same rules.

use crate::config::{AnalyzerConfig, FlowParams, RegionConfig, Thresholds};
use crate::core_modules::blob_detector;
use crate::core_modules::mask::{self, MASK_OFF};
use crate::core_modules::optical_flow;
use crate::core_modules::region::{RegionFrame, RegionRect};
use crate::core_modules::stream_blob::StreamBlob;
use image::{GrayImage, RgbImage};
use serde::Serialize;
use tracing::{trace, warn};

/// Per-frame statistics of the chosen stream candidate, in region-local coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameStats {
    pub stream_found: bool,
    /// Contour area, truncated to whole pixels.
    pub area: u32,
    pub width: u32,
    pub height: u32,
    /// Bounding-box center; -1 when nothing was found.
    pub cx: f64,
    pub cy: f64,
    /// Median hue of the foreground pixels inside the winning box.
    pub hue_med: Option<f64>,
    /// Median value (brightness) of the same pixels.
    pub val_med: Option<f64>,
}

impl FrameStats {
    pub fn not_found() -> Self {
        Self {
            stream_found: false,
            area: 0,
            width: 0,
            height: 0,
            cx: -1.0,
            cy: -1.0,
            hue_med: None,
            val_med: None,
        }
    }
}

/// Everything `segment` produces for one frame.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub stats: FrameStats,
    /// Motion AND color mask over the region.
    pub foreground: GrayImage,
    pub rect: RegionRect,
    /// The cropped region, kept for column intensities and overlays.
    pub region: RegionFrame,
}

pub struct StreamSegmenter {
    region: RegionConfig,
    thresholds: Thresholds,
    flow: FlowParams,
    previous_gray: Option<GrayImage>,
}

impl StreamSegmenter {
    pub fn new(region: RegionConfig, thresholds: Thresholds, flow: FlowParams) -> Self {
        Self {
            region,
            thresholds,
            flow,
            previous_gray: None,
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self::new(config.region, config.thresholds, config.flow)
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Segments one frame. Must be called in frame order.
    pub fn segment(&mut self, frame: &RgbImage) -> Segmentation {
        // Stage 1: Region crop
        let region = RegionFrame::extract(frame, &self.region);

        // Stage 2: Motion against the previous region
        let motion = match self.motion_mask(&region.gray) {
            Ok(motion) => motion,
            Err(err) => {
                warn!(error = %err, "motion estimation failed, treating frame as still");
                GrayImage::new(region.width(), region.height())
            }
        };
        self.previous_gray = Some(region.gray.clone());

        // Stage 3: Foreground masks
        let color = mask::color_mask(&region, &self.thresholds);
        let foreground = mask::intersect(&motion, &color);

        // Stage 4: Candidate selection
        let blobs = blob_detector::find_blobs(&foreground);
        let best = blob_detector::best_candidate(&blobs, region.width(), &self.thresholds);
        trace!(candidates = blobs.len(), found = best.is_some(), "segmented frame");

        let stats = match best {
            Some(blob) => stats_for(&blob, &foreground, &region),
            None => FrameStats::not_found(),
        };

        Segmentation {
            stats,
            foreground,
            rect: region.rect,
            region,
        }
    }

    /// Dilated motion mask. All-off on the first call or after a change of region size.
    fn motion_mask(&self, current: &GrayImage) -> opencv::Result<GrayImage> {
        let magnitude = match &self.previous_gray {
            Some(previous) if previous.dimensions() == current.dimensions() => {
                optical_flow::farneback(previous, current, &self.flow)?.magnitude()
            }
            _ => return Ok(GrayImage::new(current.width(), current.height())),
        };
        mask::dilate(&mask::motion_mask(&magnitude, self.thresholds.flow_mag_thresh))
    }
}

fn stats_for(blob: &StreamBlob, foreground: &GrayImage, region: &RegionFrame) -> FrameStats {
    let mut hues = Vec::new();
    let mut values = Vec::new();
    for y in blob.y..blob.y + blob.height {
        for x in blob.x..blob.x + blob.width {
            if foreground.get_pixel(x, y).0[0] != MASK_OFF {
                let hsv = region.hsv_at(x, y);
                hues.push(hsv.hue as f64);
                values.push(hsv.value as f64);
            }
        }
    }

    FrameStats {
        stream_found: true,
        area: blob.area.trunc() as u32,
        width: blob.width,
        height: blob.height,
        cx: blob.center_x(),
        cy: blob.center_y(),
        hue_med: median(&mut hues),
        val_med: median(&mut values),
    }
}

/// Median with the two middle samples averaged for even counts.
pub(crate) fn median(samples: &mut [f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        Some((samples[mid - 1] + samples[mid]) / 2.0)
    } else {
        Some(samples[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::mask::count_on;
    use image::Rgb;

    const BACKGROUND: Rgb<u8> = Rgb([235, 235, 235]);
    const ESPRESSO: Rgb<u8> = Rgb([150, 90, 40]);

    fn whole_frame() -> RegionConfig {
        RegionConfig { x0: 0.0, y0: 0.0, x1: 1.0, y1: 1.0 }
    }

    /// A textured stream (so optical flow has structure to lock onto) shifted down by `offset`.
    fn stream_frame(offset: u32) -> RgbImage {
        RgbImage::from_fn(80, 80, |x, y| {
            if (36..44).contains(&x) && (8..72).contains(&y) {
                let stripe = ((y + 80 - offset) / 3) % 2 == 0;
                if stripe { ESPRESSO } else { Rgb([110, 65, 30]) }
            } else {
                BACKGROUND
            }
        })
    }

    #[test]
    fn first_call_has_no_motion() {
        let mut segmenter = StreamSegmenter::new(whole_frame(), Thresholds::default(), FlowParams::default());
        let result = segmenter.segment(&stream_frame(0));
        assert!(!result.stats.stream_found);
        assert_eq!(count_on(&result.foreground), 0);
        assert_eq!(result.stats, FrameStats::not_found());
    }

    #[test]
    fn identical_frames_never_find_a_stream() {
        let mut segmenter = StreamSegmenter::new(whole_frame(), Thresholds::default(), FlowParams::default());
        let frame = stream_frame(0);
        for _ in 0..4 {
            let result = segmenter.segment(&frame);
            assert!(!result.stats.stream_found);
            assert_eq!(result.stats.cx, -1.0);
            assert!(result.stats.hue_med.is_none());
        }
    }

    #[test]
    fn falling_stream_is_found_near_the_midline() {
        let mut segmenter = StreamSegmenter::new(whole_frame(), Thresholds::default(), FlowParams::default());
        assert!(!segmenter.segment(&stream_frame(0)).stats.stream_found);

        for step in 1..5 {
            let stats = segmenter.segment(&stream_frame(step * 2)).stats;
            assert!(stats.stream_found, "frame {step}: {stats:?}");
            assert!((36.0..=44.0).contains(&stats.cx), "frame {step}: cx {}", stats.cx);
            assert!((2..=14).contains(&stats.width), "frame {step}: width {}", stats.width);
            assert!(stats.height >= Thresholds::default().min_height);
            assert!(stats.area >= Thresholds::default().min_area);
            assert!(stats.hue_med.is_some() && stats.val_med.is_some());
        }
    }

    #[test]
    fn region_rect_follows_frame_size() {
        let mut segmenter = StreamSegmenter::from_config(&AnalyzerConfig::default());
        let small = segmenter.segment(&RgbImage::from_pixel(100, 100, BACKGROUND));
        assert_eq!(small.rect.width(), 36);
        let large = segmenter.segment(&RgbImage::from_pixel(200, 200, BACKGROUND));
        assert_eq!(large.rect.width(), 72);
        assert!(!large.stats.stream_found);
    }

    #[test]
    fn stats_measure_only_masked_pixels_in_the_box() {
        let mut frame = RgbImage::from_pixel(10, 10, BACKGROUND);
        let mut foreground = GrayImage::new(10, 10);
        for (x, y, value) in [(2, 2, 100u8), (3, 2, 120), (2, 3, 140), (3, 3, 160)] {
            frame.put_pixel(x, y, Rgb([value, value / 2, value / 5]));
            foreground.put_pixel(x, y, image::Luma([mask::MASK_ON]));
        }
        let region = RegionFrame::extract(&frame, &whole_frame());
        let blob = StreamBlob { id: 0, x: 2, y: 2, width: 2, height: 2, area: 1.0, pixel_count: 4 };

        let stats = stats_for(&blob, &foreground, &region);
        assert!(stats.stream_found);
        assert_eq!((stats.cx, stats.cy), (3.0, 3.0));
        assert_eq!(stats.val_med, Some(130.0));
    }

    #[test]
    fn median_handles_odd_even_and_empty() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }
}
