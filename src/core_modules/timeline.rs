// THEORY:
// The `timeline` module runs one `StreamSegmenter` over an ordered frame sequence and
// collects what it sees into five index-aligned series: width, area, horizontal center,
// hue and brightness. Optionally it also keeps one column-intensity vector per frame for
// the kymograph.
//
// Key principles:
// 1.  **Skip, don't pad**: a frame that fails to decode is logged and dropped. Every series
//     has exactly one entry per frame that was actually segmented.
// 2.  **Capped input**: at most `fps * max_seconds` frames are segmented. Frames that fail
//     to decode do not count against the cap, and nothing past the cap is pulled (or
//     decoded) from the source.
// 3.  **Nothing usable is fatal**: with zero (or too few) processed frames no feature
//     vector can be produced, and the caller gets `NoUsableFrames` instead of a vector of
//     undefined values.

use crate::config::AnalyzerConfig;
use crate::core_modules::segmenter::{FrameStats, StreamSegmenter};
use crate::error::{FlowError, FlowResult};
use image::RgbImage;
use tracing::{debug, warn};

/// Five aligned per-frame series plus the optional kymograph columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    pub width: Vec<f64>,
    pub area: Vec<f64>,
    pub center_x: Vec<f64>,
    pub hue: Vec<Option<f64>>,
    pub value: Vec<Option<f64>>,
    pub columns: Vec<Vec<f64>>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.area.len()
    }

    pub fn is_empty(&self) -> bool {
        self.area.is_empty()
    }

    pub fn push(&mut self, stats: &FrameStats) {
        self.width.push(stats.width as f64);
        self.area.push(stats.area as f64);
        self.center_x.push(stats.cx);
        self.hue.push(stats.hue_med);
        self.value.push(stats.val_med);
    }
}

/// Drives a segmenter across a frame sequence.
pub struct TimelineAccumulator {
    segmenter: StreamSegmenter,
    max_frames: usize,
    min_frames: usize,
    collect_columns: bool,
}

impl TimelineAccumulator {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            segmenter: StreamSegmenter::from_config(config),
            max_frames: config.max_frames(),
            min_frames: config.min_frames.max(1),
            collect_columns: config.collect_columns,
        }
    }

    /// Consumes the frames in order. Decode failures are skipped.
    pub fn accumulate<I>(mut self, frames: I) -> FlowResult<Timeline>
    where
        I: IntoIterator<Item = FlowResult<RgbImage>>,
    {
        let mut timeline = Timeline::default();
        let mut skipped = 0usize;

        let mut frames = frames.into_iter().enumerate();
        while timeline.len() < self.max_frames {
            let Some((index, frame)) = frames.next() else {
                break;
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(frame = index, error = %err, "skipping undecodable frame");
                    skipped += 1;
                    continue;
                }
            };

            let segmentation = self.segmenter.segment(&frame);
            debug!(
                frame = index,
                found = segmentation.stats.stream_found,
                area = segmentation.stats.area,
                width = segmentation.stats.width,
                "frame stats"
            );
            timeline.push(&segmentation.stats);
            if self.collect_columns {
                timeline.columns.push(segmentation.region.column_intensities());
            }
        }

        if timeline.len() < self.min_frames {
            return Err(FlowError::NoUsableFrames {
                decoded: timeline.len(),
                required: self.min_frames,
            });
        }

        debug!(frames = timeline.len(), skipped, "timeline complete");
        Ok(timeline)
    }
}
