// THEORY:
// The `config` module is the static knowledge the engine is tuned with: where in the
// frame the stream is expected, what counts as motion, what counts as espresso-colored,
// what shape a stream has, and when flow is considered "present." None of it is learned
// at runtime. A segmenter copies its thresholds at construction so that every frame of a
// sequence is judged by exactly the same rules.

use crate::error::{FlowError, FlowResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Fractional rectangle (relative to frame width/height) where the stream should appear.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            x0: 0.32,
            y0: 0.15,
            x1: 0.68,
            y1: 0.80,
        }
    }
}

/// Detection thresholds. Color bounds use the 8-bit HSV convention
/// (hue 0..180, saturation and value 0..255).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Optical-flow magnitude (pixels/frame) above which a pixel is "moving".
    pub flow_mag_thresh: f32,
    /// Minimum contour area, in region pixels.
    pub min_area: u32,
    /// Minimum bounding-box height.
    pub min_height: u32,
    /// Minimum height/width ratio. Streams are tall and thin.
    pub min_aspect: f64,
    /// Lower "brown/amber" hue bound.
    pub h_lo: u8,
    /// Upper "brown/amber" hue bound.
    pub h_hi: u8,
    pub s_lo: u8,
    pub v_lo: u8,
    pub v_hi: u8,
    /// Area at which flow is considered present (onset, continuity, flicker).
    pub onset_area_px: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            flow_mag_thresh: 1.2,
            min_area: 150,
            min_height: 25,
            min_aspect: 1.6,
            h_lo: 5,
            h_hi: 30,
            s_lo: 40,
            v_lo: 20,
            v_hi: 230,
            onset_area_px: 300,
        }
    }
}

/// Dense optical flow parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowParams {
    pub pyr_scale: f64,
    pub levels: u32,
    pub winsize: usize,
    pub iterations: u32,
    pub poly_n: usize,
    pub poly_sigma: f64,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            pyr_scale: 0.5,
            levels: 3,
            winsize: 15,
            iterations: 3,
            poly_n: 5,
            poly_sigma: 1.2,
        }
    }
}

/// How a folder of numbered frames is turned into a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Leading seconds dropped before the first kept frame.
    pub skip_seconds: f64,
    /// Repeat the last decoded frame until the sequence reaches `fps * max_seconds`.
    pub pad_to_target: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            skip_seconds: 0.0,
            pad_to_target: false,
        }
    }
}

/// Top-level configuration for analyzing one or many shots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub region: RegionConfig,
    pub thresholds: Thresholds,
    pub flow: FlowParams,
    pub source: SourceConfig,
    /// Nominal sampling rate of the frame sequence.
    pub fps: u32,
    /// Duration cap; frames beyond `fps * max_seconds` are ignored.
    pub max_seconds: f64,
    /// Fewer successfully decoded frames than this is a hard failure.
    pub min_frames: usize,
    /// Collect per-frame column intensities for the kymograph.
    pub collect_columns: bool,
    /// Decision threshold for a trained model that does not carry its own.
    pub decision_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            region: RegionConfig::default(),
            thresholds: Thresholds::default(),
            flow: FlowParams::default(),
            source: SourceConfig::default(),
            fps: 60,
            max_seconds: 7.0,
            min_frames: 1,
            collect_columns: true,
            decision_threshold: 0.5,
        }
    }
}

impl AnalyzerConfig {
    /// Loads a YAML config file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> FlowResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AnalyzerConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Frames dropped from the start of a folder.
    pub fn skip_frames(&self) -> usize {
        (self.fps as f64 * self.source.skip_seconds).floor() as usize
    }

    /// Number of frames kept from the start of a sequence.
    pub fn max_frames(&self) -> usize {
        (self.fps as f64 * self.max_seconds).floor().max(0.0) as usize
    }

    pub fn validate(&self) -> FlowResult<()> {
        let r = &self.region;
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(r.x0) && in_unit(r.x1) && in_unit(r.y0) && in_unit(r.y1)) {
            return Err(FlowError::invalid_config("region fractions must lie in [0, 1]"));
        }
        if r.x0 >= r.x1 || r.y0 >= r.y1 {
            return Err(FlowError::invalid_config("region must have x0 < x1 and y0 < y1"));
        }
        let t = &self.thresholds;
        if t.h_lo > t.h_hi || t.v_lo > t.v_hi {
            return Err(FlowError::invalid_config("color gate lower bounds exceed upper bounds"));
        }
        if self.fps == 0 {
            return Err(FlowError::invalid_config("fps must be positive"));
        }
        if self.max_seconds <= 0.0 {
            return Err(FlowError::invalid_config("max_seconds must be positive"));
        }
        if self.source.skip_seconds < 0.0 {
            return Err(FlowError::invalid_config("source.skip_seconds must not be negative"));
        }
        let f = &self.flow;
        if !(f.pyr_scale > 0.0 && f.pyr_scale < 1.0) {
            return Err(FlowError::invalid_config("flow.pyr_scale must lie in (0, 1)"));
        }
        if f.winsize == 0 || f.poly_n == 0 {
            return Err(FlowError::invalid_config("flow.winsize and flow.poly_n must be positive"));
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(FlowError::invalid_config("decision_threshold must lie in [0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AnalyzerConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.max_frames(), 420);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fps: 30\nthresholds:\n  onset_area_px: 250\n").unwrap();

        let config = AnalyzerConfig::load(file.path()).expect("load config");
        assert_eq!(config.fps, 30);
        assert_eq!(config.thresholds.onset_area_px, 250);
        assert_eq!(config.thresholds.min_area, 150);
        assert_eq!(config.region, RegionConfig::default());
        assert_eq!(config.max_frames(), 210);
    }

    #[test]
    fn rejects_inverted_region() {
        let mut config = AnalyzerConfig::default();
        config.region.x0 = 0.9;
        assert!(matches!(config.validate(), Err(FlowError::InvalidConfig(_))));
    }
}
