//! # imgclass
//!
//! Folder-indexed image classification with the Burn framework.
//!
//! ## Features
//!
//! - **Dataset indexing** of `{data}/{split}_{size}/{label}/[{background}/]` trees
//! - **Batch loading** with shuffling, drop-last and parallel image decoding
//! - **Top-k inference** with temperature-scaled softmax, written as delimited text
//! - **Evaluation metrics**: top-k, micro/macro accuracy, precision, recall,
//!   F1 and per-class accuracy
//! - **Grad-CAM saliency maps** for a trained residual classifier
//!
//! ## Modules
//!
//! - `dataset`: indexer, transforms, augmentation, batchers and loaders
//! - `model`: residual CNN, weight files, Grad-CAM
//! - `inference`: inference runner and result writer
//! - `evaluation`: metric evaluation over a labeled split
//! - `utils`: errors, logging, metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use imgclass::backend::{default_device, DefaultBackend};
//! use imgclass::inference::{infer, InferInput};
//! use imgclass::model::checkpoint::load_run_config;
//!
//! let config = load_run_config(Path::new("logs/res_256"))?;
//! let input = InferInput::Path("data/images_to_predict".into());
//! infer::<DefaultBackend>(&config, Path::new("logs/res_256"), input, Path::new("out"), "results.csv", &default_device())?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod inference;
pub mod labels;
pub mod model;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::Config;
pub use dataset::index::{create_dataloader, ImageLoader};
pub use dataset::infer::{create_infer_dataloader, InferLoader};
pub use dataset::{ImageFolderDataset, InferDataset, Mode, SampleTransformer};
pub use evaluation::{evaluate, EvalReport};
pub use inference::{InferInput, InferStage, InferenceRunner};
pub use labels::{Labels, Prediction};
pub use model::{ResNetClassifier, SaliencyMap, SaliencyMapper};
pub use utils::error::{PipelineError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics, MetricsConfig};

/// Default image size of the dataset folders
pub const IMAGE_SIZE: u32 = 256;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
