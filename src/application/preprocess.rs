//! Feature preprocessing: LabObservation -> scaled feature vectors.
//!
//! Steps, in training order:
//! 1. Validate the observation
//! 2. Impute missing optional fields with training-time medians
//! 3. Apply per-feature transforms (`ln` for creatinine and cystatin C)
//! 4. Standardize with the scaler of each feature space
//!
//! The regression and classification scalers come from different fits and
//! are never mixed; the output vectors are typed by their space.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    Classification, FeatureSpace, FeatureVector, LabObservation, OptionalField, Regression,
    FEATURE_NAMES, N_FEATURES,
};
use crate::PipelineError;

/// Transform applied to a raw value before standardization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureTransform {
    #[default]
    Identity,
    Ln,
}

impl FeatureTransform {
    #[must_use]
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Self::Identity => value,
            Self::Ln => value.ln(),
        }
    }
}

/// Standardization parameters of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerColumn {
    pub name: String,
    #[serde(default)]
    pub transform: FeatureTransform,
    pub mean: f64,
    pub std: f64,
}

/// Per-column `(transform(x) - mean) / std`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub columns: Vec<ScalerColumn>,
}

impl StandardScaler {
    /// # Errors
    /// Returns a description of the first column that does not match the
    /// model column order or has unusable parameters.
    pub fn check(&self) -> Result<(), String> {
        if self.columns.len() != N_FEATURES {
            return Err(format!(
                "expected {N_FEATURES} columns, got {}",
                self.columns.len()
            ));
        }
        for (col, expected) in self.columns.iter().zip(FEATURE_NAMES) {
            if col.name != expected {
                return Err(format!("column {:?} where {expected:?} was expected", col.name));
            }
            if !col.mean.is_finite() || !col.std.is_finite() || col.std <= 0.0 {
                return Err(format!("column {:?} has invalid mean/std", col.name));
            }
        }
        Ok(())
    }

    fn transform<S: FeatureSpace>(&self, raw: &[f64; N_FEATURES]) -> Result<FeatureVector<S>, PipelineError> {
        let mut scaled = Vec::with_capacity(N_FEATURES);
        for (col, value) in self.columns.iter().zip(raw) {
            let z = (col.transform.apply(*value) - col.mean) / col.std;
            if !z.is_finite() {
                return Err(PipelineError::validation(format!(
                    "{} cannot be scaled for the {} model",
                    col.name,
                    S::NAME
                )));
            }
            scaled.push(z);
        }
        Ok(FeatureVector::from_scaled(scaled))
    }
}

/// Which optional fields were supplied and which were imputed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completeness {
    imputed: Vec<OptionalField>,
}

impl Completeness {
    #[must_use]
    pub fn imputed(&self) -> &[OptionalField] {
        &self.imputed
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.imputed.is_empty()
    }

    #[must_use]
    pub fn imputed_names(&self) -> Vec<String> {
        self.imputed.iter().map(|f| f.feature_name().to_string()).collect()
    }

    #[cfg(test)]
    pub(crate) fn with_imputed(mut self, field: OptionalField) -> Self {
        self.imputed.push(field);
        self
    }
}

/// Output of the preprocessor for one request.
#[derive(Debug, Clone)]
pub struct PreparedFeatures {
    pub regression: FeatureVector<Regression>,
    pub classification: FeatureVector<Classification>,
    pub completeness: Completeness,
}

#[derive(Debug, Clone)]
pub struct FeaturePreprocessor {
    medians: BTreeMap<OptionalField, f64>,
    regression: StandardScaler,
    classification: StandardScaler,
}

impl FeaturePreprocessor {
    /// # Errors
    /// Returns an error if either scaler is inconsistent or a median is
    /// missing or non-finite.
    pub fn new(
        imputation: &BTreeMap<String, f64>,
        regression: StandardScaler,
        classification: StandardScaler,
    ) -> Result<Self, String> {
        regression.check().map_err(|e| format!("regression scaler: {e}"))?;
        classification
            .check()
            .map_err(|e| format!("classification scaler: {e}"))?;

        let mut medians = BTreeMap::new();
        for field in OptionalField::ALL {
            let name = field.feature_name();
            let value = imputation
                .get(name)
                .copied()
                .ok_or_else(|| format!("no imputation median for {name}"))?;
            if !value.is_finite() {
                return Err(format!("imputation median for {name} is not finite"));
            }
            medians.insert(field, value);
        }

        Ok(Self {
            medians,
            regression,
            classification,
        })
    }

    /// Median used when `field` is missing.
    #[must_use]
    pub fn median(&self, field: OptionalField) -> Option<f64> {
        self.medians.get(&field).copied()
    }

    fn value_or_median(
        &self,
        obs: &LabObservation,
        field: OptionalField,
        completeness: &mut Completeness,
    ) -> Result<f64, PipelineError> {
        if let Some(v) = obs.optional(field) {
            return Ok(v);
        }
        completeness.imputed.push(field);
        self.median(field).ok_or_else(|| {
            PipelineError::ModelUnavailable(format!(
                "no imputation median for {}",
                field.feature_name()
            ))
        })
    }

    /// Turn an observation into both model-ready vectors.
    ///
    /// # Errors
    /// `Validation` for bad input, `ModelUnavailable` if an imputation
    /// constant is absent.
    pub fn prepare(&self, obs: &LabObservation) -> Result<PreparedFeatures, PipelineError> {
        obs.validate().map_err(PipelineError::Validation)?;
        let serum_creatinine = obs.require_creatinine().map_err(PipelineError::validation)?;

        let mut completeness = Completeness::default();
        let raw = [
            self.value_or_median(obs, OptionalField::Age, &mut completeness)?,
            obs.sex.encoded(),
            serum_creatinine,
            self.value_or_median(obs, OptionalField::CystatinC, &mut completeness)?,
            self.value_or_median(obs, OptionalField::SystolicPressure, &mut completeness)?,
            self.value_or_median(obs, OptionalField::DiastolicPressure, &mut completeness)?,
        ];

        if !completeness.is_complete() {
            tracing::debug!("Imputed {} optional field(s)", completeness.imputed.len());
        }

        Ok(PreparedFeatures {
            regression: self.regression.transform(&raw)?,
            classification: self.classification.transform(&raw)?,
            completeness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Sex;
    use chrono::NaiveDate;

    fn scaler(scr_mean: f64) -> StandardScaler {
        StandardScaler {
            columns: FEATURE_NAMES
                .iter()
                .map(|name| ScalerColumn {
                    name: (*name).to_string(),
                    transform: if matches!(*name, "serum_creatinine" | "cystatin_c") {
                        FeatureTransform::Ln
                    } else {
                        FeatureTransform::Identity
                    },
                    mean: if *name == "serum_creatinine" { scr_mean } else { 0.0 },
                    std: 1.0,
                })
                .collect(),
        }
    }

    fn medians() -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("age".to_string(), 60.0),
            ("cystatin_c".to_string(), 1.0),
            ("blood_pressure_systolic".to_string(), 130.0),
            ("blood_pressure_diastolic".to_string(), 80.0),
        ])
    }

    fn observation() -> LabObservation {
        LabObservation::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date"),
            1.0,
            Sex::Female,
        )
    }

    #[test]
    fn test_imputes_missing_fields_in_order() {
        let pre = FeaturePreprocessor::new(&medians(), scaler(0.0), scaler(0.5)).expect("valid");
        let prepared = pre.prepare(&observation().with_age(40.0)).expect("prepared");

        assert_eq!(
            prepared.completeness.imputed(),
            &[
                OptionalField::CystatinC,
                OptionalField::SystolicPressure,
                OptionalField::DiastolicPressure
            ]
        );
        let x = prepared.regression.as_slice();
        assert_eq!(x[0], 40.0);
        assert_eq!(x[1], 1.0);
        // ln(1.0) = 0 and ln(median 1.0) = 0
        assert_eq!(x[2], 0.0);
        assert_eq!(x[3], 0.0);
        assert_eq!(x[4], 130.0);
    }

    #[test]
    fn test_scalers_are_not_cross_applied() {
        let pre = FeaturePreprocessor::new(&medians(), scaler(0.0), scaler(0.5)).expect("valid");
        let prepared = pre.prepare(&observation()).expect("prepared");
        assert_eq!(prepared.regression.as_slice()[2], 0.0);
        assert_eq!(prepared.classification.as_slice()[2], -0.5);
    }

    #[test]
    fn test_missing_creatinine_is_validation_error() {
        let pre = FeaturePreprocessor::new(&medians(), scaler(0.0), scaler(0.0)).expect("valid");
        let mut obs = observation();
        obs.serum_creatinine = None;
        assert!(matches!(pre.prepare(&obs), Err(PipelineError::Validation(_))));

        obs.serum_creatinine = Some(-1.0);
        assert!(matches!(pre.prepare(&obs), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_rejects_missing_median_at_construction() {
        let mut m = medians();
        m.remove("cystatin_c");
        let err = FeaturePreprocessor::new(&m, scaler(0.0), scaler(0.0)).expect_err("must fail");
        assert!(err.contains("cystatin_c"));
    }

    #[test]
    fn test_rejects_misordered_scaler() {
        let mut s = scaler(0.0);
        s.columns.swap(0, 1);
        assert!(s.check().is_err());

        let mut s = scaler(0.0);
        s.columns[3].std = 0.0;
        assert!(s.check().is_err());
    }
}
