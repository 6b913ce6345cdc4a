//! Multinomial logistic regression by full-batch gradient descent with L2.

use crate::adapters::SoftmaxModel;

use super::TrainingError;

const N_CLASSES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftmaxOptions {
    pub learning_rate: f64,
    pub epochs: usize,
    /// L2 penalty on the coefficients (not the intercepts)
    pub l2: f64,
}

impl Default for SoftmaxOptions {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            epochs: 600,
            l2: 1e-3,
        }
    }
}

fn probabilities(w: &[Vec<f64>], b: &[f64], x: &[f64]) -> [f64; N_CLASSES] {
    let mut logits = [0.0; N_CLASSES];
    for k in 0..N_CLASSES {
        logits[k] = b[k] + w[k].iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>();
    }
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for l in &mut logits {
        *l = (*l - max).exp();
        total += *l;
    }
    logits.map(|e| e / total)
}

/// Fit a five-class softmax model. `labels[i]` is the 0-based stage index.
///
/// # Errors
/// `EmptyDataset` for no rows; `Fit` for shape problems or labels out of range.
pub fn fit_softmax(
    x: &[Vec<f64>],
    labels: &[usize],
    options: SoftmaxOptions,
) -> Result<SoftmaxModel, TrainingError> {
    if x.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }
    if x.len() != labels.len() {
        return Err(TrainingError::Fit(format!(
            "{} rows but {} labels",
            x.len(),
            labels.len()
        )));
    }
    if let Some(bad) = labels.iter().find(|l| **l >= N_CLASSES) {
        return Err(TrainingError::Fit(format!("label {bad} out of range")));
    }
    let width = x[0].len();
    if x.iter().any(|row| row.len() != width) {
        return Err(TrainingError::Fit("ragged feature matrix".into()));
    }

    let n = x.len() as f64;
    let mut w = vec![vec![0.0; width]; N_CLASSES];
    let mut b = vec![0.0; N_CLASSES];

    for _ in 0..options.epochs {
        let mut grad_w = vec![vec![0.0; width]; N_CLASSES];
        let mut grad_b = [0.0; N_CLASSES];
        for (row, &label) in x.iter().zip(labels) {
            let p = probabilities(&w, &b, row);
            for k in 0..N_CLASSES {
                let err = p[k] - if k == label { 1.0 } else { 0.0 };
                grad_b[k] += err;
                for (g, v) in grad_w[k].iter_mut().zip(row) {
                    *g += err * v;
                }
            }
        }
        for k in 0..N_CLASSES {
            b[k] -= options.learning_rate * grad_b[k] / n;
            for (wi, g) in w[k].iter_mut().zip(&grad_w[k]) {
                *wi -= options.learning_rate * (g / n + options.l2 * *wi);
            }
        }
    }

    let correct = x
        .iter()
        .zip(labels)
        .filter(|(row, &label)| argmax(&probabilities(&w, &b, row)) == label)
        .count();
    tracing::debug!(
        "Softmax fit: training accuracy {:.3}",
        correct as f64 / n
    );

    Ok(SoftmaxModel {
        coefficients: w,
        intercepts: b,
        validation_accuracy: None,
    })
}

/// Index of the largest entry; the first one wins ties.
pub(crate) fn argmax(p: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in p.iter().enumerate() {
        if *v > p[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SoftmaxStageClassifier;
    use crate::ports::StageModel;

    // One feature, five well-separated clusters.
    fn clusters() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for k in 0..N_CLASSES {
            for j in 0..10 {
                x.push(vec![2.0 - k as f64 + f64::from(j) * 0.02]);
                y.push(k);
            }
        }
        (x, y)
    }

    #[test]
    fn test_separates_ordered_clusters() {
        let (x, y) = clusters();
        let model = fit_softmax(
            &x,
            &y,
            SoftmaxOptions {
                learning_rate: 1.0,
                epochs: 3000,
                l2: 0.0,
            },
        )
        .expect("fit");
        let clf = SoftmaxStageClassifier::new(model, 1).expect("valid");
        let correct = x
            .iter()
            .zip(&y)
            .filter(|(row, &label)| argmax(&clf.predict_proba(row)) == label)
            .count();
        assert!(correct >= 40, "only {correct}/50 correct");
    }

    #[test]
    fn test_output_shape() {
        let (x, y) = clusters();
        let model = fit_softmax(&x, &y, SoftmaxOptions::default()).expect("fit");
        assert_eq!(model.coefficients.len(), N_CLASSES);
        assert_eq!(model.intercepts.len(), N_CLASSES);
        assert!(model.coefficients.iter().all(|r| r.len() == 1));
    }

    #[test]
    fn test_rejects_label_out_of_range() {
        assert!(fit_softmax(&[vec![0.0]], &[5], SoftmaxOptions::default()).is_err());
        assert!(matches!(
            fit_softmax(&[], &[], SoftmaxOptions::default()),
            Err(TrainingError::EmptyDataset)
        ));
    }

    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), 1);
    }
}
