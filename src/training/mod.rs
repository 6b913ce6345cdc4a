//! Offline training: synthetic cohort, SVR hyperparameter search, artifact export.
//!
//! Nothing here runs on the prediction path. The `tune_svr` binary drives
//! [`pipeline::train`] and writes a model directory that
//! [`crate::ModelBundle::load`] accepts.

pub mod cohort;
pub mod gwo;
pub mod pipeline;
pub mod softmax_fit;
pub mod svr_fit;

use std::path::PathBuf;

use crate::PipelineError;

pub use cohort::{generate_cohort, CohortRecord};
pub use gwo::{GreyWolfOptimizer, GwoOutcome};
pub use pipeline::{export, train, KernelChoice, TrainedArtifacts, TrainingConfig, TrainingReport};
pub use softmax_fit::{fit_softmax, SoftmaxOptions};
pub use svr_fit::{fit_svr, FitOptions, SvrParams};

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("Training set is empty")]
    EmptyDataset,

    #[error("Distribution error: {0}")]
    Distribution(String),

    #[error("Model fit failed: {0}")]
    Fit(String),

    #[error("Failed to write {path:?}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The exported bundle was rejected by the loader.
    #[error("Trained bundle failed validation: {0}")]
    Validation(#[from] PipelineError),
}
