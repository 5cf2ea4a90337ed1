// THEORY:
// The `pipeline` module is the top-level API for analyzing one espresso shot. It wires the
// full stack into a single call: frames in, a `ShotReport` out.
//
// Stages:
// 1.  Timeline: a fresh `StreamSegmenter` walks the frames in order (one segmenter per shot,
//     never shared).
// 2.  Reduction: the timeline becomes a `FeatureVector`.
// 3.  Verdict: the rule cascade always runs; the trained model runs when one is loaded.
// 4.  Visualization: the kymograph is available when enough frames were seen.

use crate::config::AnalyzerConfig;
use crate::core_modules::classifier::{classify_rules, ShotClassifier};
use crate::core_modules::features::FeatureReducer;
use crate::core_modules::kymograph;
use crate::core_modules::timeline::{Timeline, TimelineAccumulator};
use crate::error::FlowResult;
use crate::frame_source::FolderFrameSource;
use image::{GrayImage, RgbImage};
use serde::Serialize;
use std::path::Path;
use tracing::{info, instrument};

// Re-export key data structures for the public API.
pub use crate::core_modules::classifier::{RuleLabel, ShotLabel};
pub use crate::core_modules::features::FeatureVector;

/// A kymograph is only worth drawing with more column vectors than this.
const MIN_KYMOGRAPH_ROWS: usize = 5;

/// The outcome of analyzing one shot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShotReport {
    /// Folder or caller-supplied name of the shot.
    pub source: String,
    pub frames_analyzed: usize,
    pub features: FeatureVector,
    pub label: ShotLabel,
    pub confidence: f64,
    /// What the rule cascade says, whether or not it decided `label`.
    pub rule_label: RuleLabel,
    pub under_probability: Option<f64>,
}

/// A report plus the timeline it was reduced from.
#[derive(Debug, Clone)]
pub struct ShotAnalysis {
    pub report: ShotReport,
    pub timeline: Timeline,
}

impl ShotAnalysis {
    /// The time-by-position picture of the shot, when enough frames were collected.
    pub fn kymograph(&self) -> Option<GrayImage> {
        (self.timeline.columns.len() > MIN_KYMOGRAPH_ROWS).then(|| kymograph::build(&self.timeline.columns))
    }

    /// Writes the kymograph PNG. Returns `false` when there was too little to draw.
    pub fn save_kymograph(&self, path: impl AsRef<Path>) -> FlowResult<bool> {
        match self.kymograph() {
            Some(image) => {
                kymograph::save_png(&image, path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Analyzes single shots with a fixed configuration and classifier.
#[derive(Clone)]
pub struct ShotAnalyzer {
    config: AnalyzerConfig,
    classifier: ShotClassifier,
}

impl ShotAnalyzer {
    pub fn new(config: AnalyzerConfig, classifier: ShotClassifier) -> FlowResult<Self> {
        config.validate()?;
        Ok(Self { config, classifier })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Runs the full stack over an ordered frame sequence.
    pub fn analyze_frames<I>(&self, source: &str, frames: I, pull_duration_s: Option<f64>) -> FlowResult<ShotAnalysis>
    where
        I: IntoIterator<Item = FlowResult<RgbImage>>,
    {
        // Stage 1: Timeline
        let timeline = TimelineAccumulator::new(&self.config).accumulate(frames)?;

        // Stage 2: Reduction
        let features = FeatureReducer::new(self.config.fps, self.config.thresholds.onset_area_px)
            .reduce(&timeline)
            .with_pull_duration(pull_duration_s);

        // Stage 3: Verdict
        let rule_label = classify_rules(&features);
        let classification = self.classifier.classify(&features);

        info!(
            source,
            frames = timeline.len(),
            label = %classification.label,
            confidence = classification.confidence,
            rule_label = rule_label.as_str(),
            "shot analyzed"
        );

        Ok(ShotAnalysis {
            report: ShotReport {
                source: source.to_string(),
                frames_analyzed: timeline.len(),
                features,
                label: classification.label,
                confidence: classification.confidence,
                rule_label,
                under_probability: classification.under_probability,
            },
            timeline,
        })
    }

    /// Analyzes a folder of numbered frames. Without an explicit pull duration the folder's
    /// own duration is used.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn analyze_folder(&self, dir: impl AsRef<Path>, pull_duration_s: Option<f64>) -> FlowResult<ShotAnalysis> {
        let source = FolderFrameSource::open(dir.as_ref(), &self.config)?;
        let pull_duration_s = pull_duration_s.or(Some(source.source_duration_s()));
        let name = dir.as_ref().display().to_string();
        self.analyze_frames(&name, source.frames(), pull_duration_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::classifier::NO_MODEL_CONFIDENCE;
    use crate::error::FlowError;
    use image::Rgb;

    fn still_frames(count: usize) -> Vec<FlowResult<RgbImage>> {
        (0..count)
            .map(|_| Ok(RgbImage::from_pixel(60, 40, Rgb([225, 225, 225]))))
            .collect()
    }

    /// A striped espresso stream falling 2 px per frame down the middle of a light scene.
    fn falling_stream_frames(count: u32) -> Vec<FlowResult<RgbImage>> {
        (0..count)
            .map(|step| {
                Ok(RgbImage::from_fn(120, 120, |x, y| {
                    if (54..66).contains(&x) && (10..110).contains(&y) {
                        if ((y + 120 - step * 2) / 3) % 2 == 0 {
                            Rgb([150, 90, 40])
                        } else {
                            Rgb([110, 65, 30])
                        }
                    } else {
                        Rgb([235, 235, 235])
                    }
                }))
            })
            .collect()
    }

    fn analyzer() -> ShotAnalyzer {
        ShotAnalyzer::new(AnalyzerConfig::default(), ShotClassifier::rules_only()).unwrap()
    }

    #[test]
    fn still_scene_never_starts_flowing() {
        let analysis = analyzer().analyze_frames("still", still_frames(12), Some(25.0)).unwrap();
        let report = &analysis.report;
        assert_eq!(report.frames_analyzed, 12);
        assert_eq!(report.features.onset_time_s, None);
        assert_eq!(report.features.continuity, 0.0);
        assert_eq!(report.features.pull_duration_s, Some(25.0));
        // Thin and discontinuous: first rule fires.
        assert_eq!(report.rule_label, RuleLabel::Underextracted);
        assert_eq!(report.label, ShotLabel::Rule(RuleLabel::Underextracted));
        assert_eq!(report.confidence, NO_MODEL_CONFIDENCE);
    }

    #[test]
    fn falling_stream_starts_flowing_early_and_stays() {
        let analysis = analyzer().analyze_frames("falling", falling_stream_frames(12), None).unwrap();
        let features = &analysis.report.features;

        let onset = features.onset_time_s.expect("stream should start flowing");
        assert!(onset > 0.0 && onset <= 3.0 / 60.0, "onset {onset}");
        assert!(features.continuity > 0.5, "continuity {}", features.continuity);
        assert!(features.mean_width > 0.0);
        let found: Vec<f64> = analysis.timeline.center_x.iter().copied().filter(|&cx| cx >= 0.0).collect();
        assert!(!found.is_empty());
        assert!(found.iter().all(|&cx| (18.0..=26.0).contains(&cx)), "centers {found:?}");
    }

    #[test]
    fn empty_input_fails_hard() {
        let result = analyzer().analyze_frames("empty", Vec::new(), None);
        assert!(matches!(result, Err(FlowError::NoUsableFrames { .. })));
    }

    #[test]
    fn kymograph_needs_more_than_five_rows() {
        let short = analyzer().analyze_frames("short", still_frames(5), None).unwrap();
        assert!(short.kymograph().is_none());

        let long = analyzer().analyze_frames("long", still_frames(6), None).unwrap();
        let image = long.kymograph().unwrap();
        assert_eq!(image.height(), 6);
        assert_eq!(image.width(), long.timeline.columns[0].len() as u32);
    }

    #[test]
    fn folder_duration_fills_in_pull_duration() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            RgbImage::from_pixel(60, 40, Rgb([225, 225, 225]))
                .save(dir.path().join(format!("frame_{i:03}.png")))
                .unwrap();
        }
        let analysis = analyzer().analyze_folder(dir.path(), None).unwrap();
        assert_eq!(analysis.report.features.pull_duration_s, Some(0.1));

        let out = dir.path().join("kymo.png");
        assert!(analysis.save_kymograph(&out).unwrap());
        assert!(out.exists());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = AnalyzerConfig { fps: 0, ..AnalyzerConfig::default() };
        assert!(ShotAnalyzer::new(config, ShotClassifier::rules_only()).is_err());
    }

    #[test]
    fn report_serializes_undefined_as_null() {
        let analysis = analyzer().analyze_frames("still", still_frames(3), None).unwrap();
        let json = serde_json::to_value(&analysis.report).unwrap();
        assert!(json["features"]["onset_time_s"].is_null());
        assert_eq!(json["label"], "underextracted");
    }
}
