//! CKD staging.
//!
//! Two opinions are formed for every request:
//! - the KDIGO threshold lookup of the regressor's eGFR (surfaced)
//! - an independent softmax classifier over the classification features
//!   (audited, never averaged with the first)

use crate::domain::{CkdStage, Classification, FeatureVector, StageSource, StageThresholds};
use crate::ports::StageModel;
use crate::PipelineError;

/// Both stage opinions for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDecision {
    pub stage: CkdStage,
    pub source: StageSource,
    /// Classifier probability of `stage`
    pub stage_confidence: f64,
    pub threshold_stage: CkdStage,
    pub classifier_stage: CkdStage,
    pub probabilities: [f64; 5],
}

impl StageDecision {
    #[must_use]
    pub fn stages_agree(&self) -> bool {
        self.threshold_stage == self.classifier_stage
    }
}

pub struct StageClassifier {
    model: Box<dyn StageModel>,
    thresholds: StageThresholds,
}

impl std::fmt::Debug for StageClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageClassifier")
            .field("n_features", &self.model.n_features())
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

impl StageClassifier {
    #[must_use]
    pub fn new(model: Box<dyn StageModel>, thresholds: StageThresholds) -> Self {
        Self { model, thresholds }
    }

    #[must_use]
    pub fn thresholds(&self) -> &StageThresholds {
        &self.thresholds
    }

    /// Stage from the eGFR alone.
    #[must_use]
    pub fn threshold_stage(&self, egfr: f64) -> CkdStage {
        self.thresholds.stage_for(egfr)
    }

    /// Stage probabilities from the classifier, validated.
    ///
    /// # Errors
    /// `InternalInvariant` if the probabilities are not a distribution.
    pub fn probabilities(
        &self,
        features: &FeatureVector<Classification>,
    ) -> Result<[f64; 5], PipelineError> {
        let probs = self.model.predict_proba(features.as_slice());
        let total: f64 = probs.iter().sum();
        let valid = probs.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p))
            && (total - 1.0).abs() < 1e-6;
        debug_assert!(valid, "stage probabilities must form a distribution");
        if !valid {
            return Err(PipelineError::InternalInvariant(
                "stage classifier returned an invalid distribution".into(),
            ));
        }
        Ok(probs)
    }

    /// Stage a request: the threshold lookup decides, the classifier audits.
    ///
    /// # Errors
    /// `InternalInvariant` if the classifier output is unusable.
    pub fn classify(
        &self,
        egfr: f64,
        features: &FeatureVector<Classification>,
    ) -> Result<StageDecision, PipelineError> {
        let threshold_stage = self.threshold_stage(egfr);
        let probabilities = self.probabilities(features)?;

        // First maximum wins, so ties resolve to the milder stage.
        let mut best = 0;
        for (i, p) in probabilities.iter().enumerate() {
            if *p > probabilities[best] {
                best = i;
            }
        }
        let classifier_stage = CkdStage::ALL[best];

        if threshold_stage != classifier_stage {
            tracing::debug!(
                "Stage opinions differ: threshold={} classifier={}",
                threshold_stage,
                classifier_stage
            );
        }

        Ok(StageDecision {
            stage: threshold_stage,
            source: StageSource::ThresholdDerived,
            stage_confidence: probabilities[threshold_stage.index()],
            threshold_stage,
            classifier_stage,
            probabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed([f64; 5]);

    impl StageModel for Fixed {
        fn n_features(&self) -> usize {
            1
        }
        fn predict_proba(&self, _x: &[f64]) -> [f64; 5] {
            self.0
        }
    }

    fn features() -> FeatureVector<Classification> {
        FeatureVector::from_scaled(vec![0.0])
    }

    #[test]
    fn test_threshold_stage_is_surfaced() {
        let c = StageClassifier::new(
            Box::new(Fixed([0.05, 0.6, 0.3, 0.04, 0.01])),
            StageThresholds::default(),
        );
        let d = c.classify(45.0, &features()).expect("classified");
        assert_eq!(d.stage, CkdStage::Stage3);
        assert_eq!(d.source, StageSource::ThresholdDerived);
        assert_eq!(d.classifier_stage, CkdStage::Stage2);
        assert!(!d.stages_agree());
        assert!((d.stage_confidence - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_ties_resolve_to_milder_stage() {
        let c = StageClassifier::new(
            Box::new(Fixed([0.0, 0.5, 0.5, 0.0, 0.0])),
            StageThresholds::default(),
        );
        let d = c.classify(70.0, &features()).expect("classified");
        assert_eq!(d.classifier_stage, CkdStage::Stage2);
        assert!(d.stages_agree());
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_invalid_distribution_is_invariant_error() {
        let c = StageClassifier::new(
            Box::new(Fixed([0.5, 0.5, 0.5, 0.0, 0.0])),
            StageThresholds::default(),
        );
        assert!(matches!(
            c.classify(70.0, &features()),
            Err(PipelineError::InternalInvariant(_))
        ));
    }

    #[test]
    #[should_panic(expected = "distribution")]
    #[cfg(debug_assertions)]
    fn test_invalid_distribution_fails_loudly() {
        let c = StageClassifier::new(
            Box::new(Fixed([0.5, 0.5, 0.5, 0.0, 0.0])),
            StageThresholds::default(),
        );
        let _ = c.classify(70.0, &features());
    }
}
