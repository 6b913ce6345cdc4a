//! Model bundle: every trained artifact the pipeline needs, loaded once.
//!
//! A `ModelBundle` is immutable after [`ModelBundle::load`] and shared
//! read-only (behind an `Arc`) by every request. Loading validates shapes and
//! parameters up front so the prediction path never meets a malformed model.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::adapters::{SoftmaxModel, SoftmaxStageClassifier, SupportVectorRegressor, SvrModel};
use crate::domain::{LabObservation, Sex, StageThresholds, FEATURE_NAMES, N_FEATURES};
use crate::ports::{ArtifactError, ArtifactSource};
use crate::PipelineError;

use super::classifier::StageClassifier;
use super::explain::ShapleyExplainer;
use super::preprocess::{FeaturePreprocessor, StandardScaler};
use super::regressor::{ConfidenceSettings, EgfrRegressor};

pub const SCALERS_ARTIFACT: &str = "scalers.json";
pub const REGRESSOR_ARTIFACT: &str = "svr_regressor.json";
pub const CLASSIFIER_ARTIFACT: &str = "stage_classifier.json";
pub const THRESHOLDS_ARTIFACT: &str = "stage_thresholds.json";

/// Every artifact a bundle is built from.
pub const ARTIFACT_NAMES: [&str; 4] = [
    SCALERS_ARTIFACT,
    REGRESSOR_ARTIFACT,
    CLASSIFIER_ARTIFACT,
    THRESHOLDS_ARTIFACT,
];

/// `scalers.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub feature_names: Vec<String>,
    /// Training-time medians for the optional fields
    pub imputation: BTreeMap<String, f64>,
    pub regression: StandardScaler,
    pub classification: StandardScaler,
}

/// `svr_regressor.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressorArtifact {
    pub model: SvrModel,
    pub confidence: ConfidenceSettings,
    /// Reference rows for attribution, in the regression feature space
    pub background: Vec<Vec<f64>>,
}

/// Creatinine grid (mg/dL) for the load-time monotonicity probe.
const PROBE_CREATININE: [f64; 8] = [0.3, 0.5, 0.8, 1.2, 2.0, 3.5, 6.0, 12.0];

#[derive(Debug)]
pub struct ModelBundle {
    source: String,
    preprocessor: FeaturePreprocessor,
    regressor: EgfrRegressor,
    classifier: StageClassifier,
    explainer: ShapleyExplainer,
}

fn parse<T: DeserializeOwned>(source: &dyn ArtifactSource, name: &str) -> Result<T, PipelineError> {
    let bytes = source.read(name)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        PipelineError::from(ArtifactError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    })
}

fn malformed(name: &str, reason: impl Into<String>) -> PipelineError {
    PipelineError::from(ArtifactError::Malformed {
        name: name.to_string(),
        reason: reason.into(),
    })
}

impl ModelBundle {
    /// Load and validate all artifacts from `source`.
    ///
    /// # Errors
    /// `ModelUnavailable` if any artifact is missing, fails integrity checks,
    /// or is inconsistent with the others.
    pub fn load(source: &dyn ArtifactSource) -> Result<Self, PipelineError> {
        tracing::info!("Loading model bundle from {}", source.describe());

        let scalers: ScalerArtifact = parse(source, SCALERS_ARTIFACT)?;
        let regressor: RegressorArtifact = parse(source, REGRESSOR_ARTIFACT)?;
        let classifier: SoftmaxModel = parse(source, CLASSIFIER_ARTIFACT)?;
        let thresholds: StageThresholds = parse(source, THRESHOLDS_ARTIFACT)?;

        if scalers.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES) {
            return Err(malformed(
                SCALERS_ARTIFACT,
                format!("feature order {:?} does not match {FEATURE_NAMES:?}", scalers.feature_names),
            ));
        }
        let preprocessor =
            FeaturePreprocessor::new(&scalers.imputation, scalers.regression, scalers.classification)
                .map_err(|e| malformed(SCALERS_ARTIFACT, e))?;

        let svr = SupportVectorRegressor::new(regressor.model, N_FEATURES)
            .map_err(|e| malformed(REGRESSOR_ARTIFACT, e))?;
        let regression = EgfrRegressor::new(Box::new(svr), &regressor.confidence)
            .map_err(|e| malformed(REGRESSOR_ARTIFACT, e))?;
        let explainer = ShapleyExplainer::new(regressor.background, N_FEATURES)
            .map_err(|e| malformed(REGRESSOR_ARTIFACT, e))?;

        let softmax = SoftmaxStageClassifier::new(classifier, N_FEATURES)
            .map_err(|e| malformed(CLASSIFIER_ARTIFACT, e))?;
        thresholds
            .check()
            .map_err(|e| malformed(THRESHOLDS_ARTIFACT, e))?;

        let bundle = Self {
            source: source.describe(),
            preprocessor,
            regressor: regression,
            classifier: StageClassifier::new(Box::new(softmax), thresholds),
            explainer,
        };
        bundle.probe_monotonicity()?;

        tracing::info!("Model bundle loaded ({} features)", N_FEATURES);
        Ok(bundle)
    }

    /// Raw eGFR must not rise with serum creatinine, other inputs at their
    /// medians. A model that fails this is clinically unusable.
    fn probe_monotonicity(&self) -> Result<(), PipelineError> {
        let date = chrono::NaiveDate::MIN;
        for sex in [Sex::Male, Sex::Female] {
            let mut last = f64::INFINITY;
            for scr in PROBE_CREATININE {
                let prepared = self
                    .preprocessor
                    .prepare(&LabObservation::new(date, scr, sex))
                    .map_err(|e| malformed(SCALERS_ARTIFACT, format!("probe failed: {e}")))?;
                let egfr = self.regressor.raw(&prepared.regression);
                if !egfr.is_finite() || egfr > last + 1e-9 {
                    return Err(malformed(
                        REGRESSOR_ARTIFACT,
                        "eGFR is not monotonically decreasing in serum creatinine",
                    ));
                }
                last = egfr;
            }
        }
        Ok(())
    }

    /// Where the artifacts were loaded from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn preprocessor(&self) -> &FeaturePreprocessor {
        &self.preprocessor
    }

    #[must_use]
    pub fn regressor(&self) -> &EgfrRegressor {
        &self.regressor
    }

    #[must_use]
    pub fn classifier(&self) -> &StageClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn explainer(&self) -> &ShapleyExplainer {
        &self.explainer
    }
}

/// Lazily loaded bundle, shared across requests.
///
/// The first caller loads; concurrent callers wait for that load. The
/// outcome, including failure, is cached: a broken artifact set is reported
/// on every call until the process is redeployed.
pub struct LazyModelBundle {
    source: Box<dyn ArtifactSource>,
    cell: OnceLock<Result<Arc<ModelBundle>, PipelineError>>,
}

impl LazyModelBundle {
    #[must_use]
    pub fn new(source: Box<dyn ArtifactSource>) -> Self {
        Self {
            source,
            cell: OnceLock::new(),
        }
    }

    /// The bundle, loading it on first use.
    ///
    /// # Errors
    /// The cached `ModelUnavailable` error if loading failed.
    pub fn get(&self) -> Result<Arc<ModelBundle>, PipelineError> {
        self.cell
            .get_or_init(|| {
                ModelBundle::load(self.source.as_ref()).map(Arc::new).inspect_err(|e| {
                    tracing::error!("Model bundle unavailable: {e}");
                })
            })
            .clone()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loads_fixture() {
        let bundle = bundle();
        assert_eq!(bundle.source(), "memory:fixture");
    }

    #[test]
    fn test_missing_artifact_is_model_unavailable() {
        let mut source = source();
        source.remove(THRESHOLDS_ARTIFACT);
        let err = ModelBundle::load(&source).expect_err("must fail");
        assert!(matches!(err, PipelineError::ModelUnavailable(_)));
    }

    #[test]
    fn test_rejects_missing_imputation_median() {
        let mut artifacts = artifact_json();
        if let Some(scalers) = artifacts.get_mut(SCALERS_ARTIFACT) {
            scalers["imputation"]
                .as_object_mut()
                .expect("object")
                .remove("cystatin_c");
        }
        let err = ModelBundle::load(&source_from(&artifacts)).expect_err("must fail");
        assert!(err.to_string().contains("cystatin_c"));
    }

    #[test]
    fn test_rejects_descending_violation() {
        let mut artifacts = artifact_json();
        artifacts.insert(THRESHOLDS_ARTIFACT, json!({"lower_bounds": [60.0, 90.0, 30.0, 15.0]}));
        assert!(ModelBundle::load(&source_from(&artifacts)).is_err());
    }

    #[test]
    fn test_rejects_model_rising_with_creatinine() {
        let mut artifacts = artifact_json();
        if let Some(reg) = artifacts.get_mut(REGRESSOR_ARTIFACT) {
            reg["model"]["dual_coef"] = json!([0.4, -0.1]);
        }
        let err = ModelBundle::load(&source_from(&artifacts)).expect_err("must fail");
        assert!(err.to_string().contains("monotonically"));
    }

    #[test]
    fn test_rejects_wrong_feature_order() {
        let mut artifacts = artifact_json();
        if let Some(scalers) = artifacts.get_mut(SCALERS_ARTIFACT) {
            scalers["feature_names"] = json!(["sex", "age", "serum_creatinine", "cystatin_c",
                "blood_pressure_systolic", "blood_pressure_diastolic"]);
        }
        assert!(ModelBundle::load(&source_from(&artifacts)).is_err());
    }

    #[test]
    fn test_lazy_bundle_caches_failure() {
        let mut source = source();
        source.remove(SCALERS_ARTIFACT);
        let lazy = LazyModelBundle::new(Box::new(source));
        let first = lazy.get().expect_err("must fail");
        let second = lazy.get().expect_err("still failing");
        assert_eq!(first, second);
        assert!(!lazy.is_loaded());
    }

    #[test]
    fn test_lazy_bundle_shares_one_instance() {
        let lazy = LazyModelBundle::new(Box::new(source()));
        let a = lazy.get().expect("loads");
        let b = lazy.get().expect("cached");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(lazy.is_loaded());
    }
}
