// THEORY:
// The `features` module reduces a `Timeline` to a small, fixed set of named descriptors of
// stream behavior. It is the boundary between "what the camera saw" and "what a classifier
// consumes."
//
// Key principles:
// 1.  **Onset anchors everything**: flow starts at the first frame whose area reaches the
//     flow-present threshold. Every other statistic is computed on the frames from onset
//     on (or on the whole sequence when flow never starts), so the dry lead-in before the
//     first drip does not pollute width or color statistics.
// 2.  **Undefined is not zero**: statistics that need more data than is available are
//     `None`, never 0. Onset without any crossing and color drift with fewer than 9 samples
//     are the undefined cases. Statistics over an empty series fall back to neutral zeros.
// 3.  **One threshold**: "flow present" means `area >= onset_area_px` for onset,
//     continuity and flicker alike.

use crate::core_modules::timeline::Timeline;
use serde::{Deserialize, Serialize};

/// Fewest post-onset samples for a start/end color drift.
const MIN_DRIFT_SAMPLES: usize = 9;
/// Flicker is only counted on series longer than this.
const MIN_FLICKER_SAMPLES: usize = 3;
/// Keeps the coefficient of variation finite for a zero-mean width.
const CV_EPSILON: f64 = 1e-6;

/// Names of every feature, in the order a trained model expects them by default.
pub const FEATURE_NAMES: [&str; 11] = [
    "onset_time_s",
    "continuity",
    "mean_width",
    "cv_width",
    "amp_width",
    "slope_width",
    "jitter_cx",
    "delta_val",
    "delta_hue",
    "flicker",
    "pull_duration_s",
];

/// The engineered description of one shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Seconds until flow first reaches the presence threshold.
    pub onset_time_s: Option<f64>,
    /// Fraction of post-onset frames with flow present, in [0, 1].
    pub continuity: f64,
    pub mean_width: f64,
    /// Standard deviation over mean of the post-onset width.
    pub cv_width: f64,
    /// Max minus min of the post-onset width.
    pub amp_width: f64,
    /// Least-squares slope of width per frame.
    pub slope_width: f64,
    /// Standard deviation of the horizontal center.
    pub jitter_cx: f64,
    /// Brightness drift: median of the last third minus median of the first third.
    pub delta_val: Option<f64>,
    /// Hue drift, computed like `delta_val`.
    pub delta_hue: Option<f64>,
    /// Number of present/absent transitions after onset.
    pub flicker: f64,
    /// Length of the pull as reported by the frame source or metadata.
    pub pull_duration_s: Option<f64>,
}

impl FeatureVector {
    /// Looks a feature up by name; unknown names and undefined values are `None`.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "onset_time_s" => self.onset_time_s,
            "continuity" => Some(self.continuity),
            "mean_width" => Some(self.mean_width),
            "cv_width" => Some(self.cv_width),
            "amp_width" => Some(self.amp_width),
            "slope_width" => Some(self.slope_width),
            "jitter_cx" => Some(self.jitter_cx),
            "delta_val" => self.delta_val,
            "delta_hue" => self.delta_hue,
            "flicker" => Some(self.flicker),
            "pull_duration_s" => self.pull_duration_s,
            _ => None,
        }
    }

    /// Values ordered by `names`, for a model with its own feature list.
    pub fn ordered(&self, names: &[String]) -> Vec<Option<f64>> {
        names.iter().map(|name| self.get(name)).collect()
    }

    pub fn with_pull_duration(mut self, seconds: Option<f64>) -> Self {
        self.pull_duration_s = seconds;
        self
    }
}

/// Reduces timelines to feature vectors.
#[derive(Debug, Clone, Copy)]
pub struct FeatureReducer {
    fps: u32,
    onset_area_px: u32,
}

impl FeatureReducer {
    pub fn new(fps: u32, onset_area_px: u32) -> Self {
        Self { fps, onset_area_px }
    }

    pub fn reduce(&self, timeline: &Timeline) -> FeatureVector {
        let threshold = self.onset_area_px as f64;
        let onset = onset_index(&timeline.area, threshold);
        let start = onset.unwrap_or(0);

        let width = &timeline.width[start..];
        let area = &timeline.area[start..];
        let center_x = &timeline.center_x[start..];
        let present: Vec<bool> = area.iter().map(|&a| a >= threshold).collect();

        let continuity = if present.is_empty() {
            0.0
        } else {
            present.iter().filter(|&&p| p).count() as f64 / present.len() as f64
        };

        let mean_width = mean(width);
        let cv_width = if width.is_empty() {
            0.0
        } else {
            std_dev(width) / (mean_width + CV_EPSILON)
        };
        let amp_width = match (
            width.iter().copied().reduce(f64::max),
            width.iter().copied().reduce(f64::min),
        ) {
            (Some(max), Some(min)) => max - min,
            _ => 0.0,
        };

        FeatureVector {
            onset_time_s: onset.map(|index| index as f64 / self.fps.max(1) as f64),
            continuity,
            mean_width,
            cv_width,
            amp_width,
            slope_width: slope(width),
            jitter_cx: std_dev(center_x),
            delta_val: thirds_delta(&timeline.value[start..]),
            delta_hue: thirds_delta(&timeline.hue[start..]),
            flicker: flicker(&present) as f64,
            pull_duration_s: None,
        }
    }
}

/// Index of the first frame whose area reaches `threshold`.
pub fn onset_index(area: &[f64], threshold: f64) -> Option<usize> {
    area.iter().position(|&a| a >= threshold)
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation; 0 for an empty series.
fn std_dev(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mu = mean(samples);
    let variance = samples.iter().map(|s| (s - mu).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

/// Ordinary least-squares slope against the sample index; 0 below two samples.
fn slope(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let x_mean = (samples.len() - 1) as f64 / 2.0;
    let y_mean = mean(samples);
    let (covariance, variance) = samples
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(cov, var), (i, &y)| {
            let dx = i as f64 - x_mean;
            (cov + dx * (y - y_mean), var + dx * dx)
        });
    covariance / variance
}

/// Median of the last third minus median of the first third, ignoring undefined samples.
/// The first third is `n / 3` samples, the last third rounds up.
fn thirds_delta(samples: &[Option<f64>]) -> Option<f64> {
    let n = samples.len();
    if n < MIN_DRIFT_SAMPLES {
        return None;
    }
    let head = defined_median(&samples[..n / 3])?;
    let tail = defined_median(&samples[n - n.div_ceil(3)..])?;
    Some(tail - head)
}

fn defined_median(samples: &[Option<f64>]) -> Option<f64> {
    let mut defined: Vec<f64> = samples.iter().flatten().copied().collect();
    crate::core_modules::segmenter::median(&mut defined)
}

fn flicker(present: &[bool]) -> usize {
    if present.len() <= MIN_FLICKER_SAMPLES {
        return 0;
    }
    present.windows(2).filter(|pair| pair[0] != pair[1]).count()
}
