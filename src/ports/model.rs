//! Model ports: Traits for the trained models behind the pipeline.
//!
//! The application layer wraps these with clamping, confidence and staging
//! logic; adapters provide the actual inference math.

/// A trained regressor over a fixed-width feature vector.
pub trait RegressionModel: Send + Sync {
    /// Number of inputs the model was trained on.
    fn n_features(&self) -> usize;

    /// Raw decision value in the model's target space.
    fn decision(&self, x: &[f64]) -> f64;

    /// Prediction in output units (target transform undone).
    fn predict(&self, x: &[f64]) -> f64;
}

/// A trained multiclass CKD stage model.
pub trait StageModel: Send + Sync {
    fn n_features(&self) -> usize;

    /// Class probabilities for stages 1 through 5, summing to 1.
    fn predict_proba(&self, x: &[f64]) -> [f64; 5];
}
