//! Exact Shapley attributions for the eGFR regressor.
//!
//! Interventional Shapley values: the value of a coalition `S` is the model
//! output with features in `S` taken from the request and the rest taken from
//! each background row, averaged over the background. With few features
//! every coalition is enumerated, so the attributions are exact and satisfy
//! `base_value + Σ φ_i = f(x)`.

use crate::domain::{FeatureAttribution, FeatureVector, Regression, FEATURE_NAMES};
use crate::ports::RegressionModel;
use crate::PipelineError;

/// Upper bound for exact enumeration (2^16 coalitions).
pub const MAX_EXACT_FEATURES: usize = 16;

/// Attributions surfaced in a `PredictionResult`.
pub const TOP_K: usize = 5;

/// Full attribution of one prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    /// Expected model output over the background
    pub base_value: f64,
    /// One value per feature, in model column order
    pub values: Vec<f64>,
}

impl Attribution {
    /// Model output the attributions add up to.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.base_value + self.values.iter().sum::<f64>()
    }

    /// Every feature, in model column order.
    #[must_use]
    pub fn named(&self) -> Vec<FeatureAttribution> {
        FEATURE_NAMES
            .iter()
            .zip(&self.values)
            .map(|(name, v)| FeatureAttribution {
                feature: (*name).to_string(),
                importance: *v,
            })
            .collect()
    }

    /// The `k` largest by magnitude, sign preserved; ties keep column order.
    #[must_use]
    pub fn top_k(&self, k: usize) -> Vec<FeatureAttribution> {
        let mut ranked = self.named();
        // `sort_by` is stable.
        ranked.sort_by(|a, b| b.importance.abs().total_cmp(&a.importance.abs()));
        ranked.truncate(k);
        ranked
    }
}

#[derive(Debug, Clone)]
pub struct ShapleyExplainer {
    background: Vec<Vec<f64>>,
    n_features: usize,
    // weights[s] = s! (n - s - 1)! / n!
    weights: Vec<f64>,
}

impl ShapleyExplainer {
    /// # Errors
    /// Returns an error for an empty or ragged background, non-finite values,
    /// or more features than exact enumeration supports.
    pub fn new(background: Vec<Vec<f64>>, n_features: usize) -> Result<Self, String> {
        if n_features == 0 || n_features > MAX_EXACT_FEATURES {
            return Err(format!(
                "exact attribution supports 1..={MAX_EXACT_FEATURES} features, got {n_features}"
            ));
        }
        if background.is_empty() {
            return Err("background set is empty".into());
        }
        if background.iter().any(|row| row.len() != n_features) {
            return Err(format!("every background row must have {n_features} values"));
        }
        if background.iter().flatten().any(|v| !v.is_finite()) {
            return Err("background values must be finite".into());
        }

        let fact: Vec<f64> = (0..=n_features)
            .scan(1.0, |acc, i| {
                if i > 0 {
                    *acc *= i as f64;
                }
                Some(*acc)
            })
            .collect();
        let weights = (0..n_features)
            .map(|s| fact[s] * fact[n_features - s - 1] / fact[n_features])
            .collect();

        Ok(Self {
            background,
            n_features,
            weights,
        })
    }

    /// Mean model output over the background.
    #[must_use]
    pub fn base_value(&self, model: &dyn RegressionModel) -> f64 {
        self.background.iter().map(|b| model.predict(b)).sum::<f64>() / self.background.len() as f64
    }

    /// Attribute the model's raw output at `x`.
    ///
    /// # Errors
    /// `InternalInvariant` if `x` does not match the background width or the
    /// result does not add up.
    pub fn explain(
        &self,
        model: &dyn RegressionModel,
        x: &FeatureVector<Regression>,
    ) -> Result<Attribution, PipelineError> {
        let x = x.as_slice();
        let n = self.n_features;
        if x.len() != n {
            return Err(PipelineError::InternalInvariant(format!(
                "attribution expects {n} features, got {}",
                x.len()
            )));
        }

        // Coalition values v(S) for every subset mask.
        let n_masks = 1usize << n;
        let mut value = vec![0.0; n_masks];
        let mut point = vec![0.0; n];
        for (mask, v) in value.iter_mut().enumerate() {
            let mut acc = 0.0;
            for row in &self.background {
                for j in 0..n {
                    point[j] = if mask & (1 << j) != 0 { x[j] } else { row[j] };
                }
                acc += model.predict(&point);
            }
            *v = acc / self.background.len() as f64;
        }

        let mut phi = vec![0.0; n];
        for (i, phi_i) in phi.iter_mut().enumerate() {
            let bit = 1 << i;
            for mask in (0..n_masks).filter(|m| m & bit == 0) {
                let size = mask.count_ones() as usize;
                *phi_i += self.weights[size] * (value[mask | bit] - value[mask]);
            }
        }

        let attribution = Attribution {
            base_value: value[0],
            values: phi,
        };

        let full = value[n_masks - 1];
        let tolerance = 1e-6 * full.abs().max(1.0);
        if !attribution.values.iter().all(|v| v.is_finite())
            || (attribution.total() - full).abs() > tolerance
        {
            return Err(PipelineError::InternalInvariant(
                "attributions do not sum to the model output".into(),
            ));
        }
        Ok(attribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// f(x) = 2 x0 + x0 x1 - 3 x2
    struct Interacting;

    impl RegressionModel for Interacting {
        fn n_features(&self) -> usize {
            3
        }
        fn decision(&self, x: &[f64]) -> f64 {
            2.0 * x[0] + x[0] * x[1] - 3.0 * x[2]
        }
        fn predict(&self, x: &[f64]) -> f64 {
            self.decision(x)
        }
    }

    #[test]
    fn test_additivity_with_interactions() {
        let explainer =
            ShapleyExplainer::new(vec![vec![0.0, 0.0, 0.0], vec![1.0, -1.0, 0.5]], 3).expect("valid");
        let x = FeatureVector::from_scaled(vec![2.0, 3.0, -1.0]);
        let a = explainer.explain(&Interacting, &x).expect("explained");
        assert!((a.total() - Interacting.predict(&[2.0, 3.0, -1.0])).abs() < 1e-9);
        assert!((a.base_value - explainer.base_value(&Interacting)).abs() < 1e-12);
    }

    #[test]
    fn test_linear_model_attribution_is_weight_times_offset() {
        // Single zero background: φ_i = w_i x_i for a linear model.
        let explainer = ShapleyExplainer::new(vec![vec![0.0; 3]], 3).expect("valid");
        let x = FeatureVector::from_scaled(vec![1.0, 0.0, 2.0]);
        let a = explainer.explain(&Interacting, &x).expect("explained");
        assert!((a.values[0] - 2.0).abs() < 1e-12);
        assert!(a.values[1].abs() < 1e-12);
        assert!((a.values[2] + 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_top_k_orders_by_magnitude_and_keeps_sign() {
        let a = Attribution {
            base_value: 0.0,
            values: vec![1.0, 0.0, -3.0, -1.0, 2.0, 0.5],
        };
        let top = a.top_k(4);
        let names: Vec<_> = top.iter().map(|f| f.feature.as_str()).collect();
        // age (1.0) and cystatin_c (-1.0) tie; age comes first in column order.
        assert_eq!(
            names,
            vec!["serum_creatinine", "blood_pressure_systolic", "age", "cystatin_c"]
        );
        assert_eq!(top[0].importance, -3.0);
    }

    #[test]
    fn test_rejects_bad_background() {
        assert!(ShapleyExplainer::new(vec![], 3).is_err());
        assert!(ShapleyExplainer::new(vec![vec![0.0; 2]], 3).is_err());
        assert!(ShapleyExplainer::new(vec![vec![0.0; 17]], 17).is_err());
    }
}
