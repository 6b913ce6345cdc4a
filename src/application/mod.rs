//! Application layer: the prediction pipeline.
//!
//! Components run leaf-first: preprocess, regress, classify, explain, guide.
//! `PredictionService` is the only entry point the outer layer calls.

pub mod bundle;
pub mod classifier;
pub mod explain;
pub mod guidance;
mod orchestrator;
pub mod preprocess;
pub mod regressor;

pub use bundle::{LazyModelBundle, ModelBundle};
pub use guidance::{ComorbidityFlags, KnownConditions};
pub use orchestrator::PredictionService;
