//! Support-vector regression inference.
//!
//! Evaluates an exported ε-SVR: `Σ dual_coef_i · K(sv_i, x) + intercept`,
//! optionally followed by an inverse target transform when the model was
//! trained on log-eGFR.

use serde::{Deserialize, Serialize};

use crate::ports::RegressionModel;

/// Kernel function of the trained SVR.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kernel {
    Linear,
    Rbf { gamma: f64 },
    Poly { gamma: f64, coef0: f64, degree: u32 },
}

impl Kernel {
    #[must_use]
    pub fn eval(&self, a: &[f64], b: &[f64]) -> f64 {
        match *self {
            Self::Linear => dot(a, b),
            Self::Rbf { gamma } => {
                let sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                (-gamma * sq).exp()
            }
            Self::Poly { gamma, coef0, degree } => {
                let d = i32::try_from(degree).unwrap_or(i32::MAX);
                (gamma * dot(a, b) + coef0).powi(d)
            }
        }
    }

    fn check(&self) -> Result<(), String> {
        match *self {
            Self::Linear => Ok(()),
            Self::Rbf { gamma } if gamma.is_finite() && gamma > 0.0 => Ok(()),
            Self::Poly { gamma, coef0, degree }
                if gamma.is_finite() && gamma > 0.0 && coef0.is_finite() && (1..=5).contains(&degree) =>
            {
                Ok(())
            }
            other => Err(format!("invalid kernel parameters: {other:?}")),
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Space the model's target was fitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTransform {
    #[default]
    Identity,
    /// Model predicts ln(eGFR)
    Log,
}

impl TargetTransform {
    #[must_use]
    pub fn forward(self, y: f64) -> f64 {
        match self {
            Self::Identity => y,
            Self::Log => y.ln(),
        }
    }

    #[must_use]
    pub fn inverse(self, z: f64) -> f64 {
        match self {
            Self::Identity => z,
            Self::Log => z.exp(),
        }
    }
}

/// Hyperparameters the model was fitted with (informational at inference).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvrHyperparameters {
    pub c: f64,
    pub epsilon: f64,
    #[serde(default)]
    pub tuned_by: Option<String>,
    #[serde(default)]
    pub validation_rmse: Option<f64>,
}

/// Exported SVR parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvrModel {
    pub kernel: Kernel,
    #[serde(default)]
    pub target_transform: TargetTransform,
    pub support_vectors: Vec<Vec<f64>>,
    pub dual_coef: Vec<f64>,
    pub intercept: f64,
    pub hyperparameters: SvrHyperparameters,
}

/// SVR ready for inference.
#[derive(Debug, Clone)]
pub struct SupportVectorRegressor {
    model: SvrModel,
    n_features: usize,
    // Primal weights, precomputed for the linear kernel.
    linear_weights: Option<Vec<f64>>,
}

impl SupportVectorRegressor {
    /// Validate exported parameters and prepare for inference.
    ///
    /// # Errors
    /// Returns a description of the first inconsistency found.
    pub fn new(model: SvrModel, n_features: usize) -> Result<Self, String> {
        model.kernel.check()?;
        if model.support_vectors.is_empty() {
            return Err("model has no support vectors".into());
        }
        if model.support_vectors.len() != model.dual_coef.len() {
            return Err(format!(
                "support vector count {} does not match dual coefficient count {}",
                model.support_vectors.len(),
                model.dual_coef.len()
            ));
        }
        if let Some(bad) = model.support_vectors.iter().position(|sv| sv.len() != n_features) {
            return Err(format!(
                "support vector {bad} has {} features, expected {n_features}",
                model.support_vectors[bad].len()
            ));
        }
        let all_finite = model.intercept.is_finite()
            && model.dual_coef.iter().all(|c| c.is_finite())
            && model.support_vectors.iter().flatten().all(|v| v.is_finite());
        if !all_finite {
            return Err("model parameters must be finite".into());
        }
        let c = model.hyperparameters.c;
        if model.dual_coef.iter().any(|a| a.abs() > c * (1.0 + 1e-9)) {
            return Err(format!("dual coefficient exceeds box constraint C={c}"));
        }

        let linear_weights = matches!(model.kernel, Kernel::Linear).then(|| {
            let mut w = vec![0.0; n_features];
            for (sv, coef) in model.support_vectors.iter().zip(&model.dual_coef) {
                for (wj, xj) in w.iter_mut().zip(sv) {
                    *wj += coef * xj;
                }
            }
            w
        });

        Ok(Self {
            model,
            n_features,
            linear_weights,
        })
    }

    #[must_use]
    pub fn model(&self) -> &SvrModel {
        &self.model
    }

    /// Primal weights, available only for the linear kernel.
    #[must_use]
    pub fn linear_weights(&self) -> Option<&[f64]> {
        self.linear_weights.as_deref()
    }
}

impl RegressionModel for SupportVectorRegressor {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn decision(&self, x: &[f64]) -> f64 {
        if let Some(w) = &self.linear_weights {
            return dot(w, x) + self.model.intercept;
        }
        self.model
            .support_vectors
            .iter()
            .zip(&self.model.dual_coef)
            .map(|(sv, coef)| coef * self.model.kernel.eval(sv, x))
            .sum::<f64>()
            + self.model.intercept
    }

    fn predict(&self, x: &[f64]) -> f64 {
        self.model.target_transform.inverse(self.decision(x))
    }
}
