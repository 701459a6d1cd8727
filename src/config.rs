//! Pipeline Configuration Module
//!
//! Typed configuration for the whole pipeline, read from and written to
//! JSON. Every section has defaults so a config file only needs to name
//! what it changes; `Config::validate` runs on every load.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::DeviceSelector;
use crate::dataset::augmentation::AugmentationConfig;
use crate::labels::Labels;
use crate::utils::error::{PipelineError, Result};
use crate::utils::metrics::MetricsConfig;

/// ImageNet channel means, the default normalisation
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub learning: LearningConfig,
    pub model: ModelConfig,
    pub infer: InferConfig,
    pub metrics: MetricsSection,
}

/// Dataset location, image geometry and label registries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root folder holding `{mode}_{image_size}` split folders
    pub path: PathBuf,
    /// Side of the square model input, also the split folder suffix
    pub image_size: u32,
    /// Ordered class names, index = class id
    pub labels: Vec<String>,
    /// Ordered background names, index = background id
    pub backgrounds: Vec<String>,
    /// Expect `{label}/{background}/` subfolders
    pub use_background: bool,
    pub transforms: TransformsConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data"),
            image_size: crate::IMAGE_SIZE,
            labels: Vec::new(),
            backgrounds: Vec::new(),
            use_background: false,
            transforms: TransformsConfig::default(),
        }
    }
}

/// Per-mode transform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformsConfig {
    /// Channel means subtracted after scaling to [0, 1]
    pub mean: [f32; 3],
    /// Channel standard deviations
    pub std: [f32; 3],
    /// Random augmentations, applied in `train` mode only
    pub train: AugmentationConfig,
}

impl Default for TransformsConfig {
    fn default() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            train: AugmentationConfig::default(),
        }
    }
}

/// Batching and device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    /// Worker threads decoding images; 0 loads on the calling thread
    pub num_workers: usize,
    /// `auto`, `cpu`, `cuda` or `cuda:N`
    pub device: String,
    /// Seed for shuffling and augmentations
    pub seed: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            num_workers: 4,
            device: "auto".to_string(),
            seed: 42,
        }
    }
}

/// Classifier architecture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Weight file stem inside the logging directory
    pub name: String,
    /// Residual blocks per stage (four stages)
    pub layers: Vec<usize>,
    /// Channels of the first stage, doubled at each following stage
    pub base_channels: usize,
    /// Dropout before the classification head
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "res".to_string(),
            layers: vec![2, 2, 2, 2],
            base_channels: 64,
            dropout: 0.0,
        }
    }
}

/// Inference output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferConfig {
    /// Ranked predictions kept per image
    pub top_k: usize,
    /// Divisor applied to the logits before softmax
    pub temperature: f32,
    /// Apply `temperature`; plain softmax otherwise
    pub temperature_scaling: bool,
    /// Field separator of the result file
    pub separator: String,
}

impl Default for InferConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            temperature: 1.5,
            temperature_scaling: true,
            separator: ",".to_string(),
        }
    }
}

/// Evaluation metric selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    /// k of the top-k metrics; `min(3, num_classes)` when unset
    pub top_k: Option<usize>,
    /// Report one accuracy per class
    pub per_class: bool,
}

impl Config {
    /// Load a configuration from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save the configuration as pretty JSON, creating parent folders
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check every field that has a restricted domain
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| Err(PipelineError::Config(msg));

        if self.data.image_size == 0 {
            return err("data.image_size must be > 0".to_string());
        }
        if self.data.labels.is_empty() {
            return err("data.labels must name at least one class".to_string());
        }
        if let Some(dup) = first_duplicate(&self.data.labels) {
            return err(format!("data.labels contains '{}' twice", dup));
        }
        if let Some(dup) = first_duplicate(&self.data.backgrounds) {
            return err(format!("data.backgrounds contains '{}' twice", dup));
        }
        if self.data.use_background && self.data.backgrounds.is_empty() {
            return err("data.use_background is set but data.backgrounds is empty".to_string());
        }
        if self.data.transforms.std.iter().any(|s| *s <= 0.0) {
            return err("data.transforms.std values must be > 0".to_string());
        }

        if self.learning.batch_size == 0 {
            return err("learning.batch_size must be > 0".to_string());
        }
        self.device_selector()?;

        if self.model.layers.len() != 4 || self.model.layers.contains(&0) {
            return err("model.layers must list 4 non-zero block counts".to_string());
        }
        if self.model.base_channels == 0 {
            return err("model.base_channels must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return err("model.dropout must be in [0, 1)".to_string());
        }
        if self.model.name.is_empty() {
            return err("model.name must not be empty".to_string());
        }

        let num_classes = self.num_classes();
        if self.infer.top_k == 0 || self.infer.top_k > num_classes {
            return err(format!(
                "infer.top_k must be in 1..={} but is {}",
                num_classes, self.infer.top_k
            ));
        }
        if !(self.infer.temperature.is_finite() && self.infer.temperature > 0.0) {
            return err("infer.temperature must be a positive number".to_string());
        }
        if self.infer.separator.is_empty() {
            return err("infer.separator must not be empty".to_string());
        }

        self.metrics_config().validate()
    }

    pub fn num_classes(&self) -> usize {
        self.data.labels.len()
    }

    /// Label and background registries
    pub fn labels(&self) -> Labels {
        Labels::new(self.data.labels.clone(), self.data.backgrounds.clone())
    }

    pub fn device_selector(&self) -> Result<DeviceSelector> {
        self.learning.device.parse()
    }

    pub fn metrics_config(&self) -> MetricsConfig {
        let config = MetricsConfig::new(self.num_classes()).with_per_class(self.metrics.per_class);
        match self.metrics.top_k {
            Some(k) => config.with_top_k(k),
            None => config,
        }
    }
}

fn first_duplicate(names: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    names
        .iter()
        .find(|name| !seen.insert(name.as_str()))
        .map(|name| name.as_str())
}
