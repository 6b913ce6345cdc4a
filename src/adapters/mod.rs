//! Adapters layer: Concrete implementations of ports.
//!
//! - `svr`, `softmax`: inference math for the trained models
//! - `fs_artifacts`: manifest-bound, optionally signed model directories
//! - `memory_artifacts`: in-memory artifacts for tests and embedding
//! - `sanitize`: PHI filtering for logs

pub mod fs_artifacts;
pub mod memory_artifacts;
pub mod sanitize;
pub mod softmax;
pub mod svr;

pub use fs_artifacts::{FsArtifactSource, ModelManifest, SignaturePolicy};
pub use memory_artifacts::MemoryArtifactSource;
pub use softmax::{SoftmaxModel, SoftmaxStageClassifier};
pub use svr::{Kernel, SupportVectorRegressor, SvrHyperparameters, SvrModel, TargetTransform};
