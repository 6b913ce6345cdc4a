//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the pipeline and its collaborators (artifact storage, model math).

mod artifact_source;
mod model;

pub use artifact_source::{ArtifactError, ArtifactSource};
pub use model::{RegressionModel, StageModel};
