//! Inference module
//!
//! - `runner`: loads a trained run and predicts the top-k classes of a
//!   folder of images
//! - `writer`: writes those predictions as a delimited text file

pub mod runner;
pub mod writer;

// Re-export main types for convenience
pub use runner::{infer, predict, InferInput, InferOutput, InferStage, InferenceRunner};
pub use writer::save_infer;

/// File name used by the CLI when none is given
pub const DEFAULT_RESULTS_FILE: &str = "inference_results.csv";
