//! Multinomial logistic (softmax) CKD stage classifier.

use serde::{Deserialize, Serialize};

use crate::ports::StageModel;

/// Exported classifier parameters: one coefficient row and intercept per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxModel {
    /// `coefficients[k]` weights the features for stage `k + 1`
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
    #[serde(default)]
    pub validation_accuracy: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SoftmaxStageClassifier {
    model: SoftmaxModel,
    n_features: usize,
}

impl SoftmaxStageClassifier {
    /// # Errors
    /// Returns a description of the first shape or value problem.
    pub fn new(model: SoftmaxModel, n_features: usize) -> Result<Self, String> {
        if model.coefficients.len() != 5 || model.intercepts.len() != 5 {
            return Err(format!(
                "expected 5 stage rows, got {} coefficient rows and {} intercepts",
                model.coefficients.len(),
                model.intercepts.len()
            ));
        }
        if model.coefficients.iter().any(|row| row.len() != n_features) {
            return Err(format!("every coefficient row must have {n_features} entries"));
        }
        let finite = model.intercepts.iter().all(|v| v.is_finite())
            && model.coefficients.iter().flatten().all(|v| v.is_finite());
        if !finite {
            return Err("classifier parameters must be finite".into());
        }
        Ok(Self { model, n_features })
    }

    fn logits(&self, x: &[f64]) -> [f64; 5] {
        let mut out = [0.0; 5];
        for (k, logit) in out.iter_mut().enumerate() {
            *logit = self.model.intercepts[k]
                + self.model.coefficients[k]
                    .iter()
                    .zip(x)
                    .map(|(w, v)| w * v)
                    .sum::<f64>();
        }
        out
    }
}

impl StageModel for SoftmaxStageClassifier {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> [f64; 5] {
        let logits = self.logits(x);
        // Shift by the max logit for numerical stability.
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut probs = logits.map(|l| (l - max).exp());
        let total: f64 = probs.iter().sum();
        for p in &mut probs {
            *p /= total;
        }
        probs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> SoftmaxStageClassifier {
        SoftmaxStageClassifier::new(
            SoftmaxModel {
                coefficients: vec![
                    vec![-2.0],
                    vec![-1.0],
                    vec![0.0],
                    vec![1.0],
                    vec![2.0],
                ],
                intercepts: vec![0.0, 0.5, 1.0, 0.5, 0.0],
                validation_accuracy: None,
            },
            1,
        )
        .expect("valid classifier")
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let c = classifier();
        for x in [-3.0, 0.0, 0.7, 4.0] {
            let p = c.predict_proba(&[x]);
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_severity_shifts_class() {
        let c = classifier();
        let argmax = |p: [f64; 5]| {
            p.iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0)
        };
        assert_eq!(argmax(c.predict_proba(&[-5.0])), 0);
        assert_eq!(argmax(c.predict_proba(&[0.0])), 2);
        assert_eq!(argmax(c.predict_proba(&[5.0])), 4);
    }

    #[test]
    fn test_extreme_logits_do_not_overflow() {
        let c = classifier();
        let p = c.predict_proba(&[1e6]);
        assert!(p.iter().all(|v| v.is_finite()));
        assert!((p[4] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let model = SoftmaxModel {
            coefficients: vec![vec![1.0]; 4],
            intercepts: vec![0.0; 4],
            validation_accuracy: None,
        };
        assert!(SoftmaxStageClassifier::new(model, 1).is_err());
    }
}
