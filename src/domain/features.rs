//! Model-ready feature vectors.
//!
//! The regression and classification models were trained with different
//! scalers. Vectors are tagged with their feature space so one path's vector
//! cannot be handed to the other path's model.

use std::marker::PhantomData;

/// Column order the models were trained on.
pub const FEATURE_NAMES: [&str; 6] = [
    "age",
    "sex",
    "serum_creatinine",
    "cystatin_c",
    "blood_pressure_systolic",
    "blood_pressure_diastolic",
];

/// Number of model inputs.
pub const N_FEATURES: usize = FEATURE_NAMES.len();

/// Index of serum creatinine in [`FEATURE_NAMES`].
pub const SERUM_CREATININE_INDEX: usize = 2;

/// Marker for a feature space.
pub trait FeatureSpace: Clone + Copy + std::fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;
}

/// Features scaled for the eGFR regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Regression;

/// Features scaled for the stage classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification;

impl FeatureSpace for Regression {
    const NAME: &'static str = "regression";
}

impl FeatureSpace for Classification {
    const NAME: &'static str = "classification";
}

/// Scaled feature vector for one request, in [`FEATURE_NAMES`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector<S: FeatureSpace> {
    values: Vec<f64>,
    _space: PhantomData<S>,
}

impl<S: FeatureSpace> FeatureVector<S> {
    pub(crate) fn from_scaled(values: Vec<f64>) -> Self {
        Self {
            values,
            _space: PhantomData,
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(feature_name, value)` pairs.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_iteration_follows_model_order() {
        let v = FeatureVector::<Regression>::from_scaled(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let names: Vec<_> = v.named().map(|(n, _)| n).collect();
        assert_eq!(names, FEATURE_NAMES.to_vec());
        assert_eq!(v.as_slice()[SERUM_CREATININE_INDEX], 2.0);
        assert_eq!(Regression::NAME, "regression");
    }
}
