//! ε-SVR training by dual coordinate descent.
//!
//! The bias is absorbed into the kernel (`K'(a, b) = K(a, b) + 1`), which
//! removes the equality constraint from the dual:
//!
//! ```text
//! min_β  ½ βᵀ (K + 1) β − yᵀβ + ε ‖β‖₁   s.t.  −C ≤ β_i ≤ C
//! ```
//!
//! Each coordinate has a closed-form update (soft-threshold, then clip), and
//! the intercept of the exported model is `Σ β_i`.

use crate::adapters::{Kernel, SvrHyperparameters, SvrModel, TargetTransform};

use super::TrainingError;

/// Coefficients below this magnitude are not support vectors.
const SUPPORT_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvrParams {
    pub kernel: Kernel,
    pub c: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub max_epochs: usize,
    /// Stop once no coefficient moved more than this in an epoch
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_epochs: 200,
            tolerance: 1e-5,
        }
    }
}

fn soft_threshold(z: f64, t: f64) -> f64 {
    if z > t {
        z - t
    } else if z < -t {
        z + t
    } else {
        0.0
    }
}

/// Fit an ε-SVR on `(x, y)`; `y` is already in the target space of `transform`.
///
/// # Errors
/// `InvalidConfig` for bad hyperparameters, `EmptyDataset` for no rows, and
/// `Fit` for ragged or non-finite data.
pub fn fit_svr(
    x: &[Vec<f64>],
    y: &[f64],
    params: SvrParams,
    transform: TargetTransform,
    options: FitOptions,
) -> Result<SvrModel, TrainingError> {
    if x.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }
    if x.len() != y.len() {
        return Err(TrainingError::Fit(format!(
            "{} rows but {} targets",
            x.len(),
            y.len()
        )));
    }
    let width = x[0].len();
    if x.iter().any(|row| row.len() != width) {
        return Err(TrainingError::Fit("ragged feature matrix".into()));
    }
    if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
        return Err(TrainingError::Fit("non-finite training data".into()));
    }
    if !(params.c.is_finite() && params.c > 0.0) || !(params.epsilon.is_finite() && params.epsilon >= 0.0) {
        return Err(TrainingError::InvalidConfig(format!(
            "C must be positive and epsilon non-negative, got C={} epsilon={}",
            params.c, params.epsilon
        )));
    }

    let n = x.len();
    let mut q = vec![0.0; n * n];
    for i in 0..n {
        for j in i..n {
            let v = params.kernel.eval(&x[i], &x[j]) + 1.0;
            q[i * n + j] = v;
            q[j * n + i] = v;
        }
    }

    let mut beta = vec![0.0; n];
    // gradient of the smooth part: Qβ − y
    let mut grad: Vec<f64> = y.iter().map(|v| -v).collect();

    let mut epochs = 0;
    for epoch in 0..options.max_epochs {
        epochs = epoch + 1;
        let mut max_step: f64 = 0.0;
        for i in 0..n {
            let qii = q[i * n + i];
            if qii <= 0.0 {
                continue;
            }
            let z = beta[i] - grad[i] / qii;
            let updated = soft_threshold(z, params.epsilon / qii).clamp(-params.c, params.c);
            let step = updated - beta[i];
            if step != 0.0 {
                beta[i] = updated;
                let row = &q[i * n..(i + 1) * n];
                for (g, qij) in grad.iter_mut().zip(row) {
                    *g += qij * step;
                }
                max_step = max_step.max(step.abs());
            }
        }
        if max_step < options.tolerance {
            break;
        }
    }

    let intercept: f64 = beta.iter().sum();
    let (mut support_vectors, mut dual_coef): (Vec<Vec<f64>>, Vec<f64>) = x
        .iter()
        .zip(&beta)
        .filter(|(_, b)| b.abs() > SUPPORT_TOLERANCE)
        .map(|(row, b)| (row.clone(), *b))
        .unzip();
    if support_vectors.is_empty() {
        // Every target sits inside the tube; keep one zero-weight vector so
        // the exported model stays well-formed.
        support_vectors.push(x[0].clone());
        dual_coef.push(0.0);
    }

    tracing::debug!(
        "SVR fit: {} support vectors of {} rows after {} epoch(s)",
        support_vectors.len(),
        n,
        epochs
    );

    Ok(SvrModel {
        kernel: params.kernel,
        target_transform: transform,
        support_vectors,
        dual_coef,
        intercept,
        hyperparameters: SvrHyperparameters {
            c: params.c,
            epsilon: params.epsilon,
            tuned_by: None,
            validation_rmse: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SupportVectorRegressor;
    use crate::ports::RegressionModel;

    fn line_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..21).map(|i| vec![f64::from(i) / 10.0 - 1.0]).collect();
        let y = x.iter().map(|r| 3.0 * r[0] + 2.0).collect();
        (x, y)
    }

    fn params(kernel: Kernel) -> SvrParams {
        SvrParams {
            kernel,
            c: 100.0,
            epsilon: 0.01,
        }
    }

    #[test]
    fn test_linear_fit_recovers_line() {
        let (x, y) = line_data();
        let model = fit_svr(&x, &y, params(Kernel::Linear), TargetTransform::Identity, FitOptions::default())
            .expect("fit");
        let svr = SupportVectorRegressor::new(model, 1).expect("valid model");
        for (row, target) in x.iter().zip(&y) {
            assert!((svr.predict(row) - target).abs() < 0.05, "at {row:?}");
        }
    }

    #[test]
    fn test_rbf_fit_tracks_curve() {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![f64::from(i) / 10.0]).collect();
        let y: Vec<f64> = x.iter().map(|r| r[0].sin()).collect();
        let model = fit_svr(
            &x,
            &y,
            params(Kernel::Rbf { gamma: 2.0 }),
            TargetTransform::Identity,
            FitOptions {
                max_epochs: 2000,
                tolerance: 1e-7,
            },
        )
        .expect("fit");
        let svr = SupportVectorRegressor::new(model, 1).expect("valid model");
        let rmse = (x
            .iter()
            .zip(&y)
            .map(|(r, t)| (svr.predict(r) - t).powi(2))
            .sum::<f64>()
            / x.len() as f64)
            .sqrt();
        assert!(rmse < 0.1, "rmse {rmse}");
    }

    #[test]
    fn test_dual_respects_box() {
        let (x, y) = line_data();
        let p = SvrParams {
            kernel: Kernel::Linear,
            c: 0.05,
            epsilon: 0.0,
        };
        let model = fit_svr(&x, &y, p, TargetTransform::Identity, FitOptions::default()).expect("fit");
        assert!(model.dual_coef.iter().all(|b| b.abs() <= 0.05 + 1e-12));
    }

    #[test]
    fn test_wide_tube_gives_sparse_model() {
        let (x, y) = line_data();
        let p = SvrParams {
            kernel: Kernel::Linear,
            c: 10.0,
            epsilon: 100.0,
        };
        let model = fit_svr(&x, &y, p, TargetTransform::Identity, FitOptions::default()).expect("fit");
        assert_eq!(model.dual_coef, vec![0.0]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            fit_svr(&[], &[], params(Kernel::Linear), TargetTransform::Identity, FitOptions::default()),
            Err(TrainingError::EmptyDataset)
        ));
        let p = SvrParams {
            kernel: Kernel::Linear,
            c: -1.0,
            epsilon: 0.1,
        };
        assert!(fit_svr(&[vec![0.0]], &[1.0], p, TargetTransform::Identity, FitOptions::default()).is_err());
    }
}
