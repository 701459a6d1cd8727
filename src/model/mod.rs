//! Model module
//!
//! - `resnet`: residual CNN classifier, with a split forward pass for saliency
//! - `checkpoint`: weight files and the run configuration stored beside them
//! - `grad_cam`: gradient-weighted class activation maps

pub mod checkpoint;
pub mod grad_cam;
pub mod resnet;

// Re-export main types for convenience
pub use checkpoint::{build_model, load_weights, save_run, save_weights};
pub use grad_cam::{grad_cam, SaliencyMap, SaliencyMapper};
pub use resnet::{ResNetClassifier, ResNetClassifierConfig};
