//! Domain layer: Core clinical types and rules.
//!
//! This module contains pure Rust types with no I/O.
//! All types are serializable and implement strict validation.

pub mod ckd_epi;
mod features;
mod observation;
mod prediction;
mod stage;

pub use features::{
    Classification, FeatureSpace, FeatureVector, Regression, FEATURE_NAMES, N_FEATURES,
    SERUM_CREATININE_INDEX,
};
pub use observation::{LabObservation, OptionalField, Sex};
pub use prediction::{
    FeatureAttribution, PipelineState, PredictionAudit, PredictionResult, RiskLevel, StageSource,
};
pub use stage::{CkdStage, StageThresholds};
