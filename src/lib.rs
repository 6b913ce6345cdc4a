//! # ckd-sentinel
//!
//! Clinical decision-support core for Chronic Kidney Disease.
//!
//! Given one set of lab values this crate:
//! - Estimates eGFR with a pretrained support-vector regressor
//! - Stages CKD (KDIGO thresholds, audited by an independent classifier)
//! - Explains the eGFR with exact Shapley attributions
//! - Produces deterministic, table-driven clinical guidance
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core clinical types (observations, stages, results)
//! - `ports`: Trait definitions for artifacts and trained models
//! - `adapters`: Concrete implementations (SVR, softmax, signed model dirs)
//! - `application`: The prediction pipeline and model bundle loading
//! - `training`: Offline SVR fitting and Grey-Wolf hyperparameter search
//! - `config`: File + environment configuration for the binaries

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod training;

pub use application::{LazyModelBundle, ModelBundle, PredictionService};
pub use domain::{CkdStage, LabObservation, PredictionAudit, PredictionResult, RiskLevel, Sex};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the prediction pipeline
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// Caller input is invalid; never retried.
    #[error("Invalid lab observation: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A required model artifact is missing or corrupt.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// A value the pipeline guarantees was violated.
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl PipelineError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }
}

impl From<ports::ArtifactError> for PipelineError {
    fn from(e: ports::ArtifactError) -> Self {
        Self::ModelUnavailable(e.to_string())
    }
}
