//! CKD-EPI 2021 (race-free) eGFR equations.
//!
//! Used as the clinical reference alongside the learned regressor and by the
//! offline cohort generator to derive creatinine and cystatin C from a target
//! eGFR.

use super::observation::Sex;

/// Creatinine-based eGFR (mL/min/1.73m²).
#[must_use]
pub fn egfr_creatinine(scr: f64, age: f64, sex: Sex) -> f64 {
    let (kappa, alpha, sex_coeff) = match sex {
        Sex::Female => (0.7, -0.241, 1.012),
        Sex::Male => (0.9, -0.302, 1.0),
    };
    let ratio = scr / kappa;
    142.0 * ratio.min(1.0).powf(alpha) * ratio.max(1.0).powf(-1.200) * 0.9938_f64.powf(age) * sex_coeff
}

/// Cystatin C-based eGFR (mL/min/1.73m²).
#[must_use]
pub fn egfr_cystatin(cysc: f64, age: f64, sex: Sex) -> f64 {
    let sex_coeff = match sex {
        Sex::Female => 0.932,
        Sex::Male => 1.0,
    };
    let ratio = cysc / 0.8;
    133.0 * ratio.min(1.0).powf(-0.499) * ratio.max(1.0).powf(-1.328) * 0.996_f64.powf(age) * sex_coeff
}

/// Combined creatinine-cystatin C eGFR (mL/min/1.73m²).
#[must_use]
pub fn egfr_combined(scr: f64, cysc: f64, age: f64, sex: Sex) -> f64 {
    let (kappa, beta, sex_coeff) = match sex {
        Sex::Female => (0.7, -0.219, 0.963),
        Sex::Male => (0.9, -0.144, 1.0),
    };
    let scr_ratio = scr / kappa;
    let cys_ratio = cysc / 0.8;
    135.0
        * scr_ratio.min(1.0).powf(beta)
        * scr_ratio.max(1.0).powf(-0.544)
        * cys_ratio.min(1.0).powf(-0.323)
        * cys_ratio.max(1.0).powf(-0.778)
        * 0.9961_f64.powf(age)
        * sex_coeff
}

/// Serum creatinine that the creatinine equation maps to `egfr`, assuming the
/// patient is above the kappa knee (the common case for reduced function).
#[must_use]
pub fn creatinine_for_egfr(egfr: f64, age: f64, sex: Sex) -> f64 {
    let (kappa, sex_coeff) = match sex {
        Sex::Female => (0.7, 1.012),
        Sex::Male => (0.9, 1.0),
    };
    let base = egfr / (142.0 * sex_coeff * 0.9938_f64.powf(age));
    kappa * base.recip().powf(1.0 / 1.200)
}

/// Cystatin C that the cystatin equation maps to `egfr` above the 0.8 knee.
#[must_use]
pub fn cystatin_for_egfr(egfr: f64, age: f64, sex: Sex) -> f64 {
    let sex_coeff = match sex {
        Sex::Female => 0.932,
        Sex::Male => 1.0,
    };
    let base = egfr / (133.0 * sex_coeff * 0.996_f64.powf(age));
    0.8 * base.recip().powf(1.0 / 1.328)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creatinine_equation_reference_values() {
        // 55-year-old male, SCr 1.5 mg/dL: ~54.6
        let egfr = egfr_creatinine(1.5, 55.0, Sex::Male);
        assert!((egfr - 54.6).abs() < 0.5, "got {egfr}");

        // Female below the knee gets the alpha exponent branch.
        let egfr = egfr_creatinine(0.6, 30.0, Sex::Female);
        assert!(egfr > 110.0 && egfr < 130.0, "got {egfr}");
    }

    #[test]
    fn test_combined_equation_between_components() {
        let scr = egfr_creatinine(1.5, 55.0, Sex::Male);
        let cys = egfr_cystatin(1.2, 55.0, Sex::Male);
        let combined = egfr_combined(1.5, 1.2, 55.0, Sex::Male);
        assert!(combined > scr.min(cys) * 0.9);
        assert!(combined < scr.max(cys) * 1.1);
    }

    #[test]
    fn test_inverse_equations_roundtrip_above_knee() {
        for egfr in [20.0, 45.0, 70.0] {
            let scr = creatinine_for_egfr(egfr, 60.0, Sex::Male);
            assert!((egfr_creatinine(scr, 60.0, Sex::Male) - egfr).abs() < 1e-6);

            let cys = cystatin_for_egfr(egfr, 60.0, Sex::Female);
            assert!((egfr_cystatin(cys, 60.0, Sex::Female) - egfr).abs() < 1e-6);
        }
    }

    #[test]
    fn test_egfr_decreases_with_creatinine() {
        let mut last = f64::INFINITY;
        for i in 1..50 {
            let scr = 0.2 * f64::from(i);
            let egfr = egfr_creatinine(scr, 50.0, Sex::Female);
            assert!(egfr < last);
            last = egfr;
        }
    }
}
