// THEORY:
// The `classifier` module turns a `FeatureVector` into a verdict. There are two paths:
//
// 1.  **Trained model (primary)**: any `ProbabilisticModel` that maps the features, in its
//     own named order, to the probability that the shot is under-extracted. A decision
//     threshold collapses that probability to `under` or `good`; the confidence is the
//     probability of the chosen class.
// 2.  **Rule cascade (fallback)**: a fixed, ordered list of threshold rules, first match
//     wins. It is a simple heuristic and always available. Its label is reported with a
//     flat confidence: 0.5 when no model is loaded, 0.1 when the model failed.
//
// Model failures never surface to the caller. They are logged and the cascade answers.

use crate::core_modules::features::{FeatureVector, FEATURE_NAMES};
use crate::error::{FlowError, FlowResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Confidence reported for the rule label when no model is loaded.
pub const NO_MODEL_CONFIDENCE: f64 = 0.5;
/// Confidence reported for the rule label when the model raised.
pub const MODEL_ERROR_CONFIDENCE: f64 = 0.1;

// --- Rule cascade ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleLabel {
    Underextracted,
    Overextracted,
    PerfectOrMid,
    Mid,
}

impl RuleLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleLabel::Underextracted => "underextracted",
            RuleLabel::Overextracted => "overextracted",
            RuleLabel::PerfectOrMid => "perfect_or_mid",
            RuleLabel::Mid => "mid",
        }
    }
}

/// One step of the cascade.
pub struct Rule {
    pub label: RuleLabel,
    pub matches: fn(&FeatureVector) -> bool,
}

/// The cascade, in evaluation order. The last rule matches everything.
pub const RULES: [Rule; 4] = [
    Rule {
        label: RuleLabel::Underextracted,
        matches: |f| (f.continuity < 0.55 && f.mean_width < 6.0) || f.delta_val.is_some_and(|d| d > -5.0),
    },
    Rule {
        label: RuleLabel::Overextracted,
        matches: |f| f.delta_val.is_some_and(|d| d < -25.0) && f.slope_width < -0.02,
    },
    Rule {
        label: RuleLabel::PerfectOrMid,
        matches: |f| f.continuity >= 0.7 && f.cv_width < 0.35 && f.mean_width >= 6.0,
    },
    Rule {
        label: RuleLabel::Mid,
        matches: |_| true,
    },
];

/// First matching rule of the cascade.
pub fn classify_rules(features: &FeatureVector) -> RuleLabel {
    RULES
        .iter()
        .find(|rule| (rule.matches)(features))
        .map_or(RuleLabel::Mid, |rule| rule.label)
}

// --- Trained model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLabel {
    Under,
    Good,
}

/// A verdict from either path. Serializes as the bare label string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShotLabel {
    Model(ModelLabel),
    Rule(RuleLabel),
}

impl ShotLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShotLabel::Model(ModelLabel::Under) => "under",
            ShotLabel::Model(ModelLabel::Good) => "good",
            ShotLabel::Rule(rule) => rule.as_str(),
        }
    }
}

impl fmt::Display for ShotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trained binary classifier over named features.
pub trait ProbabilisticModel: Send + Sync {
    /// Feature order the model was trained with.
    fn feature_names(&self) -> &[String];

    /// Probability of `under` given values in `feature_names` order. Undefined values are
    /// `None`; the model applies its own imputation.
    fn predict_under_probability(&self, values: &[Option<f64>]) -> FlowResult<f64>;

    /// Threshold chosen at training time, if the artifact carries one.
    fn decision_threshold(&self) -> Option<f64>;
}

/// A logistic-regression artifact with median imputation, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub model_type: String,
    pub feature_names: Vec<String>,
    /// Training medians, used for undefined inputs. `null` when a feature had no data.
    pub medians: Vec<Option<f64>>,
    pub weights: Vec<f64>,
    pub bias: f64,
    #[serde(default)]
    pub optimal_threshold: Option<f64>,
}

impl LogisticModel {
    pub const MODEL_TYPE: &'static str = "logistic_regression";

    pub fn load(path: impl AsRef<Path>) -> FlowResult<Self> {
        let contents = fs::read_to_string(path)?;
        let model: LogisticModel = serde_json::from_str(&contents)?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.model_type != Self::MODEL_TYPE {
            return Err(FlowError::model(format!("unsupported model type `{}`", self.model_type)));
        }
        let n = self.feature_names.len();
        if self.weights.len() != n || self.medians.len() != n {
            return Err(FlowError::model(format!(
                "{} features but {} weights and {} medians",
                n,
                self.weights.len(),
                self.medians.len()
            )));
        }
        if let Some(t) = self.optimal_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(FlowError::model(format!("threshold {t} outside [0, 1]")));
            }
        }
        Ok(())
    }
}

impl ProbabilisticModel for LogisticModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_under_probability(&self, values: &[Option<f64>]) -> FlowResult<f64> {
        // Hand-built models never went through `load`.
        self.validate()?;
        if values.len() != self.weights.len() {
            return Err(FlowError::model(format!(
                "expected {} features, got {}",
                self.weights.len(),
                values.len()
            )));
        }

        let mut logit = self.bias;
        let inputs = values.iter().zip(&self.medians).zip(&self.feature_names).zip(&self.weights);
        for (((value, median), name), weight) in inputs {
            let x = value
                .filter(|v| v.is_finite())
                .or(*median)
                .ok_or_else(|| FlowError::model(format!("no value or median for `{name}`")))?;
            logit += weight * x;
        }

        let probability = 1.0 / (1.0 + (-logit).exp());
        if !probability.is_finite() {
            return Err(FlowError::model("non-finite probability"));
        }
        Ok(probability)
    }

    fn decision_threshold(&self) -> Option<f64> {
        self.optimal_threshold
    }
}

// --- Policy ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: ShotLabel,
    pub confidence: f64,
    /// Model output, when the model answered.
    pub under_probability: Option<f64>,
}

/// Applies a trained model when available and falls back to the rule cascade otherwise.
#[derive(Clone)]
pub struct ShotClassifier {
    model: Option<Arc<dyn ProbabilisticModel>>,
    fallback_threshold: f64,
}

impl ShotClassifier {
    pub fn rules_only() -> Self {
        Self {
            model: None,
            fallback_threshold: 0.5,
        }
    }

    pub fn with_model(model: Arc<dyn ProbabilisticModel>, fallback_threshold: f64) -> Self {
        Self {
            model: Some(model),
            fallback_threshold,
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn classify(&self, features: &FeatureVector) -> Classification {
        let Some(model) = &self.model else {
            warn!("no trained model loaded, using rule-based classification");
            return Classification {
                label: ShotLabel::Rule(classify_rules(features)),
                confidence: NO_MODEL_CONFIDENCE,
                under_probability: None,
            };
        };

        match self.predict(model.as_ref(), features) {
            Ok(classification) => classification,
            Err(err) => {
                warn!(error = %err, "model prediction failed, using rule-based classification");
                Classification {
                    label: ShotLabel::Rule(classify_rules(features)),
                    confidence: MODEL_ERROR_CONFIDENCE,
                    under_probability: None,
                }
            }
        }
    }

    fn predict(&self, model: &dyn ProbabilisticModel, features: &FeatureVector) -> FlowResult<Classification> {
        for name in model.feature_names() {
            if !FEATURE_NAMES.contains(&name.as_str()) {
                warn!(feature = %name, "model expects a feature this engine does not produce");
            }
        }
        let values = features.ordered(model.feature_names());
        let p = model.predict_under_probability(&values)?;
        let threshold = model.decision_threshold().unwrap_or(self.fallback_threshold);

        let (label, confidence) = if p >= threshold {
            (ModelLabel::Under, p)
        } else {
            (ModelLabel::Good, 1.0 - p)
        };
        debug!(label = ?label, probability = p, threshold, "model prediction");

        Ok(Classification {
            label: ShotLabel::Model(label),
            confidence,
            under_probability: Some(p),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn features() -> FeatureVector {
        FeatureVector {
            onset_time_s: Some(1.0),
            continuity: 0.9,
            mean_width: 20.0,
            cv_width: 0.1,
            amp_width: 4.0,
            slope_width: -0.05,
            jitter_cx: 1.0,
            delta_val: Some(-30.0),
            delta_hue: Some(-2.0),
            flicker: 0.0,
            pull_duration_s: None,
        }
    }

    #[test]
    fn overextracted_fires_before_perfect() {
        assert_eq!(classify_rules(&features()), RuleLabel::Overextracted);
    }

    #[test]
    fn each_rule_can_fire() {
        let thin = FeatureVector { continuity: 0.3, mean_width: 3.0, delta_val: None, ..features() };
        assert_eq!(classify_rules(&thin), RuleLabel::Underextracted);

        let no_darkening = FeatureVector { delta_val: Some(-2.0), ..features() };
        assert_eq!(classify_rules(&no_darkening), RuleLabel::Underextracted);

        let steady = FeatureVector { delta_val: Some(-15.0), ..features() };
        assert_eq!(classify_rules(&steady), RuleLabel::PerfectOrMid);

        let wobbly = FeatureVector { delta_val: None, cv_width: 0.6, ..features() };
        assert_eq!(classify_rules(&wobbly), RuleLabel::Mid);
    }

    #[test]
    fn cascade_is_exhaustive_and_ordered() {
        assert_eq!(RULES.len(), 4);
        assert!((RULES[3].matches)(&features()));
        let labels: Vec<_> = RULES.iter().map(|r| r.label).collect();
        assert_eq!(
            labels,
            vec![RuleLabel::Underextracted, RuleLabel::Overextracted, RuleLabel::PerfectOrMid, RuleLabel::Mid]
        );
    }

    fn model(threshold: Option<f64>) -> LogisticModel {
        LogisticModel {
            model_type: LogisticModel::MODEL_TYPE.to_string(),
            feature_names: vec!["continuity".into(), "delta_val".into()],
            medians: vec![Some(0.8), Some(-10.0)],
            weights: vec![-4.0, 0.1],
            bias: 4.0,
            optimal_threshold: threshold,
        }
    }

    #[test]
    fn logistic_imputes_missing_values_with_medians() {
        let m = model(None);
        let p_imputed = m.predict_under_probability(&[Some(0.8), None]).unwrap();
        let p_explicit = m.predict_under_probability(&[Some(0.8), Some(-10.0)]).unwrap();
        assert_eq!(p_imputed, p_explicit);
        // logit = 4 - 3.2 - 1 = -0.2
        assert!((p_explicit - 1.0 / (1.0 + 0.2_f64.exp())).abs() < 1e-12);
    }

    #[test]
    fn model_threshold_decides_label_and_confidence() {
        let classifier = ShotClassifier::with_model(Arc::new(model(Some(0.3))), 0.5);
        let result = classifier.classify(&features());
        // logit = 4 - 3.6 - 3 = -2.6, p ~= 0.069
        assert_eq!(result.label, ShotLabel::Model(ModelLabel::Good));
        let p = result.under_probability.unwrap();
        assert!((result.confidence - (1.0 - p)).abs() < 1e-12);

        let thin = FeatureVector { continuity: 0.1, delta_val: Some(0.0), ..features() };
        let result = classifier.classify(&thin);
        assert_eq!(result.label, ShotLabel::Model(ModelLabel::Under));
        assert_eq!(Some(result.confidence), result.under_probability);
    }

    #[test]
    fn no_model_falls_back_with_half_confidence() {
        let result = ShotClassifier::rules_only().classify(&features());
        assert_eq!(result.label, ShotLabel::Rule(RuleLabel::Overextracted));
        assert_eq!(result.confidence, NO_MODEL_CONFIDENCE);
    }

    #[test]
    fn failing_model_falls_back_with_low_confidence() {
        let mut broken = model(None);
        broken.medians[1] = None;
        let classifier = ShotClassifier::with_model(Arc::new(broken), 0.5);
        let features = FeatureVector { delta_val: None, ..features() };

        let result = classifier.classify(&features);
        assert_eq!(result.label, ShotLabel::Rule(classify_rules(&features)));
        assert_eq!(result.confidence, MODEL_ERROR_CONFIDENCE);
        assert!(result.under_probability.is_none());
    }

    #[test]
    fn unvalidated_model_with_short_medians_errors_instead_of_panicking() {
        let short = LogisticModel { medians: vec![Some(0.8)], ..model(None) };
        let result = short.predict_under_probability(&[Some(0.8), Some(-10.0)]);
        assert!(matches!(result, Err(FlowError::Model { .. })));

        let classifier = ShotClassifier::with_model(Arc::new(short), 0.5);
        assert_eq!(classifier.classify(&features()).confidence, MODEL_ERROR_CONFIDENCE);
    }

    #[test]
    fn artifact_loads_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&model(Some(0.42))).unwrap()).unwrap();
        let loaded = LogisticModel::load(file.path()).expect("load model");
        assert_eq!(loaded.decision_threshold(), Some(0.42));

        let mut bad = model(None);
        bad.weights.pop();
        assert!(matches!(bad.validate(), Err(FlowError::Model { .. })));

        let forest = LogisticModel { model_type: "random_forest".into(), ..model(None) };
        assert!(forest.validate().is_err());
    }

    #[test]
    fn labels_serialize_as_plain_strings() {
        assert_eq!(serde_json::to_string(&ShotLabel::Model(ModelLabel::Under)).unwrap(), "\"under\"");
        assert_eq!(serde_json::to_string(&ShotLabel::Rule(RuleLabel::PerfectOrMid)).unwrap(), "\"perfect_or_mid\"");
        let parsed: ShotLabel = serde_json::from_str("\"mid\"").unwrap();
        assert_eq!(parsed, ShotLabel::Rule(RuleLabel::Mid));
        assert_eq!(ShotLabel::Model(ModelLabel::Good).to_string(), "good");
    }
}
