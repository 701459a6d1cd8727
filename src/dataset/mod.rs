//! Dataset module
//!
//! Indexes the `{split}_{image_size}/{label}/[{background}/]` folder layout,
//! turns images into normalised CHW tensors and assembles them into batches.

pub mod augmentation;
pub mod burn_dataset;
pub mod index;
pub mod infer;
pub mod loader;
pub mod transform;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::PipelineError;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{ImageBatch, ImageBatcher, ImageItem, InferBatch, InferBatcher, InferItem};
pub use index::{DatasetStats, ImageFolderDataset, SampleRecord};
pub use infer::InferDataset;
pub use loader::{BatchLoader, ItemSource, LoaderConfig};
pub use transform::SampleTransformer;

/// Dataset split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Val,
    Test,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Val => "val",
            Mode::Test => "test",
        }
    }

    /// Folder name of this split at a given resolution, e.g. `train_256`
    pub fn split_folder(&self, image_size: u32) -> String {
        format!("{}_{}", self.as_str(), image_size)
    }

    /// Only the training split is augmented
    pub fn is_train(&self) -> bool {
        matches!(self, Mode::Train)
    }
}

impl FromStr for Mode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Mode::Train),
            "val" => Ok(Mode::Val),
            "test" => Ok(Mode::Test),
            other => Err(PipelineError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("train".parse::<Mode>().unwrap(), Mode::Train);
        assert_eq!("val".parse::<Mode>().unwrap(), Mode::Val);
        assert_eq!("test".parse::<Mode>().unwrap(), Mode::Test);

        let err = "valid".parse::<Mode>().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMode(ref m) if m == "valid"));
    }

    #[test]
    fn test_split_folder() {
        assert_eq!(Mode::Train.split_folder(256), "train_256");
        assert_eq!(Mode::Test.split_folder(64), "test_64");
        assert!(Mode::Train.is_train());
        assert!(!Mode::Val.is_train());
    }
}
