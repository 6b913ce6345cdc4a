//! eGFR regression: clamps the model output and derives a confidence proxy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{FeatureVector, OptionalField, Regression};
use crate::ports::RegressionModel;
use crate::PipelineError;

use super::preprocess::Completeness;

/// Plausibility range for reported eGFR (mL/min/1.73m²).
pub const EGFR_MIN: f64 = 0.0;
pub const EGFR_MAX: f64 = 200.0;

/// Parameters of the confidence proxy, stored with the regressor artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSettings {
    /// Confidence with every optional field supplied
    pub base: f64,
    /// Multiplicative penalty per imputed field, keyed by feature name
    pub missing_penalty: BTreeMap<String, f64>,
    /// Extra factor applied when the output had to be clamped
    pub out_of_range_factor: f64,
}

/// Regressor output for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EgfrEstimate {
    /// Clamped to `[EGFR_MIN, EGFR_MAX]`
    pub egfr: f64,
    /// Model output before clamping
    pub raw_egfr: f64,
    pub confidence: f64,
    pub out_of_range: bool,
}

pub struct EgfrRegressor {
    model: Box<dyn RegressionModel>,
    base: f64,
    penalties: BTreeMap<OptionalField, f64>,
    out_of_range_factor: f64,
}

impl std::fmt::Debug for EgfrRegressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgfrRegressor")
            .field("n_features", &self.model.n_features())
            .field("base", &self.base)
            .field("penalties", &self.penalties)
            .field("out_of_range_factor", &self.out_of_range_factor)
            .finish()
    }
}

impl EgfrRegressor {
    /// # Errors
    /// Returns an error if the confidence settings are out of range or miss a
    /// penalty for an imputable field.
    pub fn new(model: Box<dyn RegressionModel>, settings: &ConfidenceSettings) -> Result<Self, String> {
        if !(settings.base > 0.0 && settings.base <= 1.0) {
            return Err(format!("base confidence {} not in (0, 1]", settings.base));
        }
        if !(0.0..=1.0).contains(&settings.out_of_range_factor) {
            return Err(format!(
                "out_of_range_factor {} not in [0, 1]",
                settings.out_of_range_factor
            ));
        }
        let mut penalties = BTreeMap::new();
        for field in OptionalField::ALL {
            let name = field.feature_name();
            let p = settings
                .missing_penalty
                .get(name)
                .copied()
                .ok_or_else(|| format!("no missing_penalty for {name}"))?;
            // Strictly inside (0, 1) so confidence strictly drops per imputed field.
            if !(p > 0.0 && p < 1.0) {
                return Err(format!("missing_penalty for {name} = {p} not in (0, 1)"));
            }
            penalties.insert(field, p);
        }
        Ok(Self {
            model,
            base: settings.base,
            penalties,
            out_of_range_factor: settings.out_of_range_factor,
        })
    }

    /// The underlying model, for attribution.
    #[must_use]
    pub fn model(&self) -> &dyn RegressionModel {
        self.model.as_ref()
    }

    /// Raw eGFR for a scaled vector, without clamping.
    #[must_use]
    pub fn raw(&self, features: &FeatureVector<Regression>) -> f64 {
        self.model.predict(features.as_slice())
    }

    fn confidence(&self, completeness: &Completeness, out_of_range: bool) -> f64 {
        let mut c = self.base;
        for field in completeness.imputed() {
            c *= 1.0 - self.penalties.get(field).copied().unwrap_or(0.0);
        }
        if out_of_range {
            c *= self.out_of_range_factor;
        }
        c.clamp(0.0, 1.0)
    }

    /// Predict eGFR for one request.
    ///
    /// # Errors
    /// `InternalInvariant` if the model produces a non-finite value.
    pub fn estimate(
        &self,
        features: &FeatureVector<Regression>,
        completeness: &Completeness,
    ) -> Result<EgfrEstimate, PipelineError> {
        let raw_egfr = self.raw(features);
        if !raw_egfr.is_finite() {
            return Err(PipelineError::InternalInvariant(
                "regressor produced a non-finite eGFR".into(),
            ));
        }

        let egfr = raw_egfr.clamp(EGFR_MIN, EGFR_MAX);
        let out_of_range = egfr != raw_egfr;
        if out_of_range {
            tracing::warn!(
                code = "OUT_OF_RANGE",
                "eGFR prediction outside [{EGFR_MIN}, {EGFR_MAX}]; clamped to {egfr}"
            );
        }

        Ok(EgfrEstimate {
            egfr,
            raw_egfr,
            confidence: self.confidence(completeness, out_of_range),
            out_of_range,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(f64);

    impl RegressionModel for Constant {
        fn n_features(&self) -> usize {
            1
        }
        fn decision(&self, _x: &[f64]) -> f64 {
            self.0
        }
        fn predict(&self, _x: &[f64]) -> f64 {
            self.0
        }
    }

    fn settings() -> ConfidenceSettings {
        ConfidenceSettings {
            base: 0.9,
            missing_penalty: OptionalField::ALL
                .iter()
                .map(|f| (f.feature_name().to_string(), 0.1))
                .collect(),
            out_of_range_factor: 0.5,
        }
    }

    fn features() -> FeatureVector<Regression> {
        FeatureVector::from_scaled(vec![0.0])
    }

    fn completeness(imputed: &[OptionalField]) -> Completeness {
        let mut c = Completeness::default();
        for f in imputed {
            c = c.with_imputed(*f);
        }
        c
    }

    #[test]
    fn test_confidence_drops_with_each_imputed_field() {
        let reg = EgfrRegressor::new(Box::new(Constant(70.0)), &settings()).expect("valid");
        let mut last = f64::INFINITY;
        for n in 0..=OptionalField::ALL.len() {
            let est = reg
                .estimate(&features(), &completeness(&OptionalField::ALL[..n]))
                .expect("estimate");
            assert!(est.confidence < last);
            assert!((0.0..=1.0).contains(&est.confidence));
            last = est.confidence;
        }
    }

    #[test]
    fn test_clamps_and_flags_out_of_range() {
        let reg = EgfrRegressor::new(Box::new(Constant(250.0)), &settings()).expect("valid");
        let est = reg.estimate(&features(), &completeness(&[])).expect("estimate");
        assert_eq!(est.egfr, EGFR_MAX);
        assert_eq!(est.raw_egfr, 250.0);
        assert!(est.out_of_range);
        assert!((est.confidence - 0.45).abs() < 1e-12);

        let reg = EgfrRegressor::new(Box::new(Constant(-3.0)), &settings()).expect("valid");
        let est = reg.estimate(&features(), &completeness(&[])).expect("estimate");
        assert_eq!(est.egfr, EGFR_MIN);
        assert!(est.out_of_range);
    }

    #[test]
    fn test_non_finite_output_is_invariant_error() {
        let reg = EgfrRegressor::new(Box::new(Constant(f64::NAN)), &settings()).expect("valid");
        assert!(matches!(
            reg.estimate(&features(), &completeness(&[])),
            Err(PipelineError::InternalInvariant(_))
        ));
    }

    #[test]
    fn test_rejects_bad_settings() {
        let mut s = settings();
        s.missing_penalty.remove("age");
        assert!(EgfrRegressor::new(Box::new(Constant(1.0)), &s).is_err());

        let mut s = settings();
        s.base = 1.5;
        assert!(EgfrRegressor::new(Box::new(Constant(1.0)), &s).is_err());
    }
}
