//! Synthetic patient cohort for offline training.
//!
//! Stage prevalence follows a screening population. Each record draws a
//! target eGFR uniformly within its stage band, then derives serum creatinine
//! and cystatin C by inverting the CKD-EPI equations. Both markers carry
//! proportional noise: creatinine the assay's few percent, cystatin C a
//! wider spread for its non-GFR determinants (inflammation, thyroid state,
//! steroids). A regressor fitted on this cohort leans on creatinine.
//! Blood pressure rises with stage.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use statrs::distribution::Normal;

use crate::domain::ckd_epi::{creatinine_for_egfr, cystatin_for_egfr};
use crate::domain::{CkdStage, Sex, N_FEATURES};

use super::TrainingError;

const STAGE_PREVALENCE: [f64; 5] = [0.30, 0.30, 0.25, 0.10, 0.05];
const EGFR_BANDS: [(f64, f64); 5] = [
    (90.0, 140.0),
    (60.0, 89.0),
    (30.0, 59.0),
    (15.0, 29.0),
    (3.0, 14.0),
];
const SYSTOLIC_BASE: [f64; 5] = [120.0, 128.0, 138.0, 148.0, 155.0];
const DIASTOLIC_BASE: [f64; 5] = [78.0, 82.0, 85.0, 88.0, 90.0];
const FEMALE_SHARE: f64 = 0.48;
const MIN_ASSAY: f64 = 0.3;
/// Coefficient of variation of measured serum creatinine.
pub const CREATININE_CV: f64 = 0.05;
/// Coefficient of variation of measured cystatin C around its eGFR-implied value.
pub const CYSTATIN_CV: f64 = 0.15;

/// One synthetic patient.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortRecord {
    pub age: f64,
    pub sex: Sex,
    pub serum_creatinine: f64,
    pub cystatin_c: f64,
    pub blood_pressure_systolic: f64,
    pub blood_pressure_diastolic: f64,
    /// Ground-truth eGFR the labs were derived from
    pub egfr: f64,
    pub stage: CkdStage,
}

impl CohortRecord {
    /// Raw feature row in model column order, before transforms.
    #[must_use]
    pub fn raw_features(&self) -> [f64; N_FEATURES] {
        [
            self.age,
            self.sex.encoded(),
            self.serum_creatinine,
            self.cystatin_c,
            self.blood_pressure_systolic,
            self.blood_pressure_diastolic,
        ]
    }
}

fn normal(mean: f64, sd: f64) -> Result<Normal, TrainingError> {
    Normal::new(mean, sd).map_err(|e| TrainingError::Distribution(e.to_string()))
}

/// Generate `n` records.
///
/// # Errors
/// `InvalidConfig` for `n == 0`; `Distribution` if a distribution cannot be
/// built (not expected with the fixed parameters).
pub fn generate_cohort<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Result<Vec<CohortRecord>, TrainingError> {
    if n == 0 {
        return Err(TrainingError::InvalidConfig("cohort size must be positive".into()));
    }
    let stage_dist = WeightedIndex::new(STAGE_PREVALENCE)
        .map_err(|e| TrainingError::Distribution(e.to_string()))?;
    let scr_noise = normal(0.0, CREATININE_CV)?;
    let cys_noise = normal(0.0, CYSTATIN_CV)?;

    let mut records = Vec::with_capacity(n);
    for _ in 0..n {
        let idx = stage_dist.sample(rng);
        let stage = CkdStage::ALL[idx];
        let (lo, hi) = EGFR_BANDS[idx];
        let egfr = rng.gen_range(lo..hi);

        let age = if idx >= 2 {
            normal(65.0 + 2.0 * (idx as f64 + 1.0), 10.0)?
                .sample(rng)
                .clamp(30.0, 95.0)
        } else {
            normal(58.0, 15.0)?.sample(rng).clamp(18.0, 95.0)
        }
        .trunc();

        let sex = if rng.gen_bool(FEMALE_SHARE) {
            Sex::Female
        } else {
            Sex::Male
        };

        let serum_creatinine =
            (creatinine_for_egfr(egfr, age, sex) * (1.0 + scr_noise.sample(rng))).max(MIN_ASSAY);
        let cystatin_c =
            (cystatin_for_egfr(egfr, age, sex) * (1.0 + cys_noise.sample(rng))).max(MIN_ASSAY);

        let systolic = normal(SYSTOLIC_BASE[idx], 12.0)?.sample(rng).clamp(90.0, 200.0);
        // Keep a positive pulse pressure.
        let diastolic = normal(DIASTOLIC_BASE[idx], 8.0)?
            .sample(rng)
            .clamp(50.0, 120.0)
            .min(systolic - 10.0);

        records.push(CohortRecord {
            age,
            sex,
            serum_creatinine,
            cystatin_c,
            blood_pressure_systolic: systolic,
            blood_pressure_diastolic: diastolic,
            egfr,
            stage,
        });
    }
    Ok(records)
}
