//! Prediction service: runs one lab observation through the pipeline.
//!
//! RECEIVED -> PREPROCESSED -> REGRESSED -> CLASSIFIED -> EXPLAINED ->
//! GUIDED -> RESPONSE_READY. Linear, no retries; the first failure aborts
//! the request with a typed error.

use std::sync::Arc;

use crate::domain::{
    ckd_epi, LabObservation, PipelineState, PredictionAudit, PredictionResult,
};
use crate::PipelineError;

use super::bundle::ModelBundle;
use super::explain::TOP_K;
use super::guidance::{self, ComorbidityFlags, KnownConditions};
use super::regressor::{EGFR_MAX, EGFR_MIN};

/// Service for CKD predictions over a loaded model bundle.
///
/// Holds no per-request state; cheap to clone and safe to share between
/// threads.
#[derive(Debug, Clone)]
pub struct PredictionService {
    bundle: Arc<ModelBundle>,
}

impl PredictionService {
    #[must_use]
    pub fn new(bundle: Arc<ModelBundle>) -> Self {
        Self { bundle }
    }

    #[must_use]
    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    /// Predict eGFR, stage, risk and guidance for one observation.
    ///
    /// # Errors
    /// `Validation` for bad input, `ModelUnavailable` for missing model
    /// constants, `InternalInvariant` if a pipeline guarantee is broken.
    pub fn predict(&self, obs: &LabObservation) -> Result<PredictionResult, PipelineError> {
        self.predict_for(obs, KnownConditions::default())
    }

    /// [`predict`](Self::predict) with conditions known outside the lab record.
    ///
    /// # Errors
    /// Same as [`predict`](Self::predict).
    pub fn predict_for(
        &self,
        obs: &LabObservation,
        known: KnownConditions,
    ) -> Result<PredictionResult, PipelineError> {
        self.predict_with_audit(obs, known).map(|(result, _)| result)
    }

    /// Predict and also return the audit record with both stage opinions.
    ///
    /// # Errors
    /// Same as [`predict`](Self::predict).
    pub fn predict_with_audit(
        &self,
        obs: &LabObservation,
        known: KnownConditions,
    ) -> Result<(PredictionResult, PredictionAudit), PipelineError> {
        let mut trace = Vec::with_capacity(7);
        let mut enter = |state: PipelineState| {
            tracing::debug!(state = ?state, "pipeline transition");
            trace.push(state);
        };

        enter(PipelineState::Received);

        let prepared = self.bundle.preprocessor().prepare(obs)?;
        enter(PipelineState::Preprocessed);

        let estimate = self
            .bundle
            .regressor()
            .estimate(&prepared.regression, &prepared.completeness)?;
        enter(PipelineState::Regressed);

        let decision = self
            .bundle
            .classifier()
            .classify(estimate.egfr, &prepared.classification)?;
        enter(PipelineState::Classified);

        let attribution = self
            .bundle
            .explainer()
            .explain(self.bundle.regressor().model(), &prepared.regression)?;
        enter(PipelineState::Explained);

        let risk_level = guidance::risk_level(decision.stage, decision.stage_confidence, obs.age);
        let flags = ComorbidityFlags::derive(obs, known);
        let advice = guidance::generate(decision.stage, risk_level, flags);
        enter(PipelineState::Guided);

        let result = PredictionResult {
            egfr_predicted: estimate.egfr,
            egfr_confidence: estimate.confidence,
            ckd_stage: decision.stage,
            stage_confidence: decision.stage_confidence,
            risk_level,
            feature_attributions: attribution.top_k(TOP_K),
            attribution_base_value: attribution.base_value,
            recommendations: advice.recommendations,
            clinical_guidance: advice.clinical_guidance,
            follow_up_months: advice.follow_up_months,
            urgency: advice.urgency,
            out_of_range: estimate.out_of_range,
        };
        check_invariants(&result)?;
        enter(PipelineState::ResponseReady);

        tracing::info!(
            "Prediction complete: stage={}, risk={}, out_of_range={}, stages_agree={}",
            result.ckd_stage,
            result.risk_level,
            result.out_of_range,
            decision.stages_agree()
        );

        let audit = PredictionAudit {
            stage_source: decision.source,
            threshold_stage: decision.threshold_stage,
            classifier_stage: decision.classifier_stage,
            classifier_probabilities: decision.probabilities,
            stages_agree: decision.stages_agree(),
            raw_egfr: estimate.raw_egfr,
            reference_egfr: reference_egfr(obs),
            imputed_fields: prepared.completeness.imputed_names(),
            all_attributions: attribution.named(),
            trace,
        };

        Ok((result, audit))
    }
}

/// CKD-EPI 2021 eGFR for comparison: combined when cystatin C is known,
/// creatinine-only otherwise. Needs age.
fn reference_egfr(obs: &LabObservation) -> Option<f64> {
    let age = obs.age?;
    let scr = obs.serum_creatinine?;
    Some(match obs.cystatin_c {
        Some(cys) => ckd_epi::egfr_combined(scr, cys, age, obs.sex),
        None => ckd_epi::egfr_creatinine(scr, age, obs.sex),
    })
}

fn check_invariants(result: &PredictionResult) -> Result<(), PipelineError> {
    let unit = 0.0..=1.0;
    let violation = if !(EGFR_MIN..=EGFR_MAX).contains(&result.egfr_predicted) {
        Some("eGFR outside the clamp range")
    } else if !unit.contains(&result.egfr_confidence) {
        Some("eGFR confidence outside [0, 1]")
    } else if !unit.contains(&result.stage_confidence) {
        Some("stage confidence outside [0, 1]")
    } else {
        None
    };
    debug_assert!(violation.is_none(), "{violation:?}");
    match violation {
        Some(what) => Err(PipelineError::InternalInvariant(what.to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bundle::fixtures;
    use crate::domain::{CkdStage, Sex, StageSource};
    use chrono::NaiveDate;

    fn service() -> PredictionService {
        PredictionService::new(Arc::new(fixtures::bundle()))
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")
    }

    #[test]
    fn test_full_trace_and_audit() {
        let obs = LabObservation::new(date(), 1.5, Sex::Male)
            .with_cystatin_c(1.2)
            .with_blood_pressure(140.0, 90.0)
            .with_age(55.0);
        let (result, audit) = service()
            .predict_with_audit(&obs, KnownConditions::default())
            .expect("prediction");

        assert_eq!(
            audit.trace,
            vec![
                PipelineState::Received,
                PipelineState::Preprocessed,
                PipelineState::Regressed,
                PipelineState::Classified,
                PipelineState::Explained,
                PipelineState::Guided,
                PipelineState::ResponseReady,
            ]
        );
        assert_eq!(audit.stage_source, StageSource::ThresholdDerived);
        assert_eq!(result.ckd_stage, audit.threshold_stage);
        assert!(audit.imputed_fields.is_empty());
        assert!(audit.reference_egfr.is_some());
        assert_eq!(audit.all_attributions.len(), 6);
        assert!(result.feature_attributions.len() <= TOP_K);

        let total: f64 = audit.all_attributions.iter().map(|a| a.importance).sum::<f64>()
            + result.attribution_base_value;
        assert!((total - audit.raw_egfr).abs() < 1e-6);
    }

    #[test]
    fn test_validation_error_stops_pipeline() {
        let mut obs = LabObservation::new(date(), 1.0, Sex::Female);
        obs.serum_creatinine = None;
        assert!(matches!(
            service().predict(&obs),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_optional_fields_are_imputed() {
        let obs = LabObservation::new(date(), 0.8, Sex::Female);
        let (result, audit) = service()
            .predict_with_audit(&obs, KnownConditions::default())
            .expect("prediction");
        assert_eq!(audit.imputed_fields.len(), 4);
        assert!(audit.reference_egfr.is_none());
        assert!(matches!(result.ckd_stage, CkdStage::Stage1 | CkdStage::Stage2));
    }

    #[test]
    fn test_known_diabetes_adds_recommendations() {
        let obs = LabObservation::new(date(), 1.0, Sex::Female).with_age(50.0);
        let plain = service().predict(&obs).expect("prediction");
        let diabetic = service()
            .predict_for(&obs, KnownConditions { diabetes: true })
            .expect("prediction");
        assert!(diabetic.recommendations.len() > plain.recommendations.len());
        assert_eq!(
            &diabetic.recommendations[..plain.recommendations.len()],
            plain.recommendations.as_slice()
        );
    }
}
