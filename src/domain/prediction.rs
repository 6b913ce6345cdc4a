//! Prediction result types.
//!
//! Represents the output of the CKD prediction pipeline as handed back to the
//! caller, plus the internal audit record that keeps both stage opinions.

use serde::{Deserialize, Serialize};

use super::stage::CkdStage;

/// Risk level surfaced with a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Normal or mildly reduced function
    Low,
    /// Moderate loss of function, specialist follow-up
    Moderate,
    /// Severe loss of function, intensive management
    High,
    /// Kidney failure or equivalent urgency
    Critical,
}

impl RiskLevel {
    /// Get a human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Low => "Low risk - routine monitoring",
            Self::Moderate => "Moderate risk - nephrology follow-up recommended",
            Self::High => "High risk - intensive management required",
            Self::Critical => "Critical risk - immediate medical attention",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Signed contribution of one feature, in raw model-output units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAttribution {
    pub feature: String,
    pub importance: f64,
}

/// Which model decided the surfaced `ckd_stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageSource {
    /// Independent multiclass classifier over the classification features
    ClassifierDerived,
    /// KDIGO threshold lookup of the regressor's eGFR
    ThresholdDerived,
}

/// Result handed back to the caller of `predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predicted eGFR in mL/min/1.73m², clamped to [0, 200]
    pub egfr_predicted: f64,

    /// Confidence proxy for the eGFR value (0.0 to 1.0)
    pub egfr_confidence: f64,

    /// Surfaced CKD stage
    pub ckd_stage: CkdStage,

    /// Confidence in the surfaced stage (0.0 to 1.0)
    pub stage_confidence: f64,

    pub risk_level: RiskLevel,

    /// Top contributors by |importance|, sign preserved
    pub feature_attributions: Vec<FeatureAttribution>,

    /// Baseline the attributions are relative to
    pub attribution_base_value: f64,

    pub recommendations: Vec<String>,

    pub clinical_guidance: String,

    /// Months until the next kidney function test (0 = continuous)
    pub follow_up_months: u8,

    pub urgency: RiskLevel,

    /// Raw eGFR fell outside the plausibility range and was clamped
    pub out_of_range: bool,
}

/// Pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Received,
    Preprocessed,
    Regressed,
    Classified,
    Explained,
    Guided,
    ResponseReady,
}

/// Internal record of how a prediction was produced.
///
/// Keeps both stage opinions so disagreements between the classifier and the
/// threshold lookup can be audited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionAudit {
    pub stage_source: StageSource,
    pub threshold_stage: CkdStage,
    pub classifier_stage: CkdStage,
    pub classifier_probabilities: [f64; 5],
    pub stages_agree: bool,
    /// Regressor output before clamping
    pub raw_egfr: f64,
    /// CKD-EPI 2021 reference eGFR, when age is known
    pub reference_egfr: Option<f64>,
    /// Optional fields that were imputed
    pub imputed_fields: Vec<String>,
    /// Full attribution vector in feature order
    pub all_attributions: Vec<FeatureAttribution>,
    pub trace: Vec<PipelineState>,
}
