//! Lab observation input for CKD prediction.
//!
//! A `LabObservation` is what the outer layer (REST handler, CLI) hands to the
//! pipeline. It is borrowed for the duration of a prediction and never mutated.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::PipelineError;

/// Biological sex as used by the eGFR equations and the trained models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Model encoding: male = 0, female = 1 (matches the training cohort).
    #[must_use]
    pub fn encoded(self) -> f64 {
        match self {
            Self::Male => 0.0,
            Self::Female => 1.0,
        }
    }

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "male" => Ok(Self::Male),
            "f" | "female" => Ok(Self::Female),
            _ => Err(format!("sex must be M or F, got {s:?}")),
        }
    }
}

impl Serialize for Sex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Sex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One set of lab results submitted for prediction.
///
/// `serum_creatinine` is modelled as optional so that a record with the value
/// missing can still be represented and rejected with a validation error
/// rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabObservation {
    pub test_date: NaiveDate,

    /// Serum creatinine in mg/dL (required, > 0)
    #[serde(default)]
    pub serum_creatinine: Option<f64>,

    /// Cystatin C in mg/L
    #[serde(default)]
    pub cystatin_c: Option<f64>,

    /// Systolic blood pressure in mmHg
    #[serde(default, alias = "bp_sys")]
    pub blood_pressure_systolic: Option<f64>,

    /// Diastolic blood pressure in mmHg
    #[serde(default, alias = "bp_dia")]
    pub blood_pressure_diastolic: Option<f64>,

    /// Age in years
    #[serde(default)]
    pub age: Option<f64>,

    pub sex: Sex,
}

/// Optional fields of a `LabObservation` that the preprocessor can impute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionalField {
    Age,
    CystatinC,
    SystolicPressure,
    DiastolicPressure,
}

impl OptionalField {
    pub const ALL: [Self; 4] = [
        Self::Age,
        Self::CystatinC,
        Self::SystolicPressure,
        Self::DiastolicPressure,
    ];

    /// Feature name used in model artifacts.
    #[must_use]
    pub fn feature_name(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::CystatinC => "cystatin_c",
            Self::SystolicPressure => "blood_pressure_systolic",
            Self::DiastolicPressure => "blood_pressure_diastolic",
        }
    }
}

impl LabObservation {
    /// Observation with only the required fields set.
    #[must_use]
    pub fn new(test_date: NaiveDate, serum_creatinine: f64, sex: Sex) -> Self {
        Self {
            test_date,
            serum_creatinine: Some(serum_creatinine),
            cystatin_c: None,
            blood_pressure_systolic: None,
            blood_pressure_diastolic: None,
            age: None,
            sex,
        }
    }

    #[must_use]
    pub fn with_cystatin_c(mut self, value: f64) -> Self {
        self.cystatin_c = Some(value);
        self
    }

    #[must_use]
    pub fn with_blood_pressure(mut self, systolic: f64, diastolic: f64) -> Self {
        self.blood_pressure_systolic = Some(systolic);
        self.blood_pressure_diastolic = Some(diastolic);
        self
    }

    #[must_use]
    pub fn with_age(mut self, age: f64) -> Self {
        self.age = Some(age);
        self
    }

    /// Value of an optional field, if supplied.
    #[must_use]
    pub fn optional(&self, field: OptionalField) -> Option<f64> {
        match field {
            OptionalField::Age => self.age,
            OptionalField::CystatinC => self.cystatin_c,
            OptionalField::SystolicPressure => self.blood_pressure_systolic,
            OptionalField::DiastolicPressure => self.blood_pressure_diastolic,
        }
    }

    /// Validated serum creatinine.
    ///
    /// # Errors
    /// Returns a message if the value is missing, non-finite or not positive.
    pub fn require_creatinine(&self) -> Result<f64, String> {
        match self.serum_creatinine {
            None => Err("serum_creatinine is required".to_string()),
            Some(v) if !v.is_finite() => Err("serum_creatinine must be a finite number".to_string()),
            Some(v) if v <= 0.0 => Err(format!("serum_creatinine must be positive, got {v}")),
            Some(v) => Ok(v),
        }
    }

    /// Validate every field against plausibility ranges.
    ///
    /// # Errors
    /// Returns all validation messages at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.require_creatinine() {
            errors.push(e);
        } else if let Some(v) = self.serum_creatinine.filter(|v| *v > 30.0) {
            errors.push(format!("serum_creatinine {v} out of range (0, 30]"));
        }

        let mut check = |name: &str, value: Option<f64>, lo: f64, hi: f64, lo_inclusive: bool| {
            if let Some(v) = value {
                let above_lo = if lo_inclusive { v >= lo } else { v > lo };
                if !v.is_finite() || !above_lo || v > hi {
                    let open = if lo_inclusive { '[' } else { '(' };
                    errors.push(format!("{name} {v} out of range {open}{lo}, {hi}]"));
                }
            }
        };
        check("cystatin_c", self.cystatin_c, 0.0, 15.0, false);
        check("blood_pressure_systolic", self.blood_pressure_systolic, 50.0, 300.0, true);
        check("blood_pressure_diastolic", self.blood_pressure_diastolic, 20.0, 200.0, true);
        check("age", self.age, 0.0, 130.0, true);

        if let (Some(sys), Some(dia)) = (self.blood_pressure_systolic, self.blood_pressure_diastolic) {
            if sys.is_finite() && dia.is_finite() && dia >= sys {
                errors.push(format!(
                    "blood_pressure_diastolic {dia} must be below systolic {sys}"
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Decode one JSON record. A wrong shape or an unknown sex code is a
    /// validation error for this record alone.
    ///
    /// # Errors
    /// `PipelineError::Validation` with the decoder's message.
    pub fn from_json(value: serde_json::Value) -> Result<Self, PipelineError> {
        serde_json::from_value(value).map_err(|e| PipelineError::validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 14).expect("valid date")
    }

    #[test]
    fn test_sex_parsing() {
        assert_eq!("M".parse::<Sex>(), Ok(Sex::Male));
        assert_eq!("female".parse::<Sex>(), Ok(Sex::Female));
        assert_eq!(" f ".parse::<Sex>(), Ok(Sex::Female));
        assert!("X".parse::<Sex>().is_err());
    }

    #[test]
    fn test_sex_error_echoes_input() {
        let err = " Unknown ".parse::<Sex>().expect_err("not a sex code");
        assert!(err.contains("\" Unknown \""), "{err}");
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let json = r#"{"test_date":"2024-03-14","serum_creatinine":0.8,"sex":"F"}"#;
        let obs: LabObservation = serde_json::from_str(json).expect("Should parse");
        assert_eq!(obs.sex, Sex::Female);
        assert!(obs.cystatin_c.is_none());
        assert!(OptionalField::ALL.iter().all(|f| obs.optional(*f).is_none()));
        assert!(obs.validate().is_ok());
    }

    #[test]
    fn test_deserialize_rejects_unknown_sex() {
        let json = r#"{"test_date":"2024-03-14","serum_creatinine":0.8,"sex":"U"}"#;
        assert!(serde_json::from_str::<LabObservation>(json).is_err());
    }

    #[test]
    fn test_from_json_unknown_sex_is_validation_error() {
        let value = serde_json::json!({
            "test_date": "2024-03-14",
            "serum_creatinine": 0.8,
            "sex": "X"
        });
        match LabObservation::from_json(value) {
            Err(PipelineError::Validation(messages)) => {
                assert!(messages[0].contains("sex must be M or F"), "{messages:?}");
                assert!(messages[0].contains("\"X\""), "{messages:?}");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_json_accepts_valid_record() {
        let value = serde_json::json!({
            "test_date": "2024-03-14",
            "serum_creatinine": 1.5,
            "cystatin_c": 1.2,
            "sex": "M"
        });
        let obs = LabObservation::from_json(value).expect("valid record");
        assert_eq!(obs.sex, Sex::Male);
        assert_eq!(obs.cystatin_c, Some(1.2));
    }

    #[test]
    fn test_bp_aliases() {
        let json = r#"{"test_date":"2024-03-14","serum_creatinine":1.5,"bp_sys":140,"bp_dia":90,"sex":"M"}"#;
        let obs: LabObservation = serde_json::from_str(json).expect("Should parse");
        assert_eq!(obs.blood_pressure_systolic, Some(140.0));
        assert_eq!(obs.blood_pressure_diastolic, Some(90.0));
    }

    #[test]
    fn test_validation() {
        let valid = LabObservation::new(date(), 1.5, Sex::Male)
            .with_cystatin_c(1.2)
            .with_blood_pressure(140.0, 90.0)
            .with_age(55.0);
        assert!(valid.validate().is_ok());

        let mut missing = valid.clone();
        missing.serum_creatinine = None;
        let errors = missing.validate().expect_err("creatinine is required");
        assert!(errors[0].contains("required"));

        let zero = LabObservation::new(date(), 0.0, Sex::Male);
        assert!(zero.validate().is_err());

        let inverted = LabObservation::new(date(), 1.0, Sex::Female).with_blood_pressure(80.0, 90.0);
        assert!(inverted.validate().is_err());

        let nan_age = LabObservation::new(date(), 1.0, Sex::Female).with_age(f64::NAN);
        assert!(nan_age.validate().is_err());
    }
}
