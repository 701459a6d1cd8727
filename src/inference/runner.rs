//! Inference Runner
//!
//! Loads the weights of a logging directory, predicts the top-k classes of
//! every image of a loader, then writes them with [`save_infer`]. A failure
//! at any stage aborts the whole run and nothing is written.

use std::fmt;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use tracing::{debug, info};

use super::writer::save_infer;
use crate::config::{Config, InferConfig};
use crate::dataset::infer::{create_infer_dataloader, InferLoader};
use crate::labels::{Labels, Prediction};
use crate::model::{checkpoint, ResNetClassifier};
use crate::utils::error::{PipelineError, Result};
use crate::utils::logging::ProgressLogger;

/// Where the images to predict come from
pub enum InferInput<B: Backend> {
    /// A ready loader
    Loader(InferLoader<B>),
    /// A folder of images, indexed with the configuration
    Path(PathBuf),
}

impl<B: Backend> InferInput<B> {
    /// Exactly one of `loader` and `path` must be given
    pub fn from_options(loader: Option<InferLoader<B>>, path: Option<PathBuf>) -> Result<Self> {
        match (loader, path) {
            (Some(loader), None) => Ok(InferInput::Loader(loader)),
            (None, Some(path)) => Ok(InferInput::Path(path)),
            (None, None) => Err(PipelineError::Config(
                "inference needs an image loader or a data path, got neither".to_string(),
            )),
            (Some(_), Some(_)) => Err(PipelineError::Config(
                "inference takes an image loader or a data path, not both".to_string(),
            )),
        }
    }

    fn into_loader(self, config: &Config, device: &B::Device) -> Result<InferLoader<B>> {
        match self {
            InferInput::Loader(loader) => Ok(loader),
            InferInput::Path(path) => create_infer_dataloader(config, &path, device),
        }
    }
}

/// Progress of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferStage {
    Idle,
    LoadingModel,
    Running,
    Saving,
    Done,
}

impl fmt::Display for InferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InferStage::Idle => "idle",
            InferStage::LoadingModel => "loading-model",
            InferStage::Running => "running",
            InferStage::Saving => "saving",
            InferStage::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct InferOutput {
    pub predictions: Vec<Vec<Prediction>>,
    pub paths: Vec<PathBuf>,
    /// Result file
    pub file: PathBuf,
}

/// Top-k predictions of every image of `loader`, in loader order
///
/// Softmax is taken over `logits / temperature` when temperature scaling
/// is enabled.
pub fn predict<B: Backend>(
    model: &ResNetClassifier<B>,
    loader: &mut InferLoader<B>,
    infer: &InferConfig,
    labels: &Labels,
) -> Result<(Vec<Vec<Prediction>>, Vec<PathBuf>)> {
    let temperature = infer.temperature_scaling.then_some(infer.temperature);
    let mut predictions = Vec::with_capacity(loader.num_items());
    let mut paths = Vec::with_capacity(loader.num_items());
    let mut progress = ProgressLogger::new("Inference", loader.num_batches());

    for batch in loader.epoch() {
        let batch = batch?;
        let probs = model.forward_softmax(batch.images, temperature);
        predictions.extend(labels.topk_predictions(probs, infer.top_k)?);
        paths.extend(batch.paths);
        progress.increment();
    }
    progress.finish();

    Ok((predictions, paths))
}

/// Drives one inference run through its stages
pub struct InferenceRunner<B: Backend> {
    config: Config,
    logging_path: PathBuf,
    device: B::Device,
    stage: InferStage,
}

impl<B: Backend> InferenceRunner<B> {
    pub fn new(config: Config, logging_path: &Path, device: &B::Device) -> Self {
        Self {
            config,
            logging_path: logging_path.to_path_buf(),
            device: device.clone(),
            stage: InferStage::Idle,
        }
    }

    pub fn stage(&self) -> InferStage {
        self.stage
    }

    fn enter(&mut self, stage: InferStage) {
        debug!("Inference: {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Predict every image of `input` and write `{dstpath}/{filename}`
    pub fn run(&mut self, input: InferInput<B>, dstpath: &Path, filename: &str) -> Result<InferOutput> {
        self.enter(InferStage::LoadingModel);
        let model = checkpoint::load_weights::<B>(&self.config, &self.logging_path, &self.device)?;
        let mut loader = input.into_loader(&self.config, &self.device)?;

        self.enter(InferStage::Running);
        info!(
            "Predicting {} images (top {}, temperature {})",
            loader.num_items(),
            self.config.infer.top_k,
            if self.config.infer.temperature_scaling {
                self.config.infer.temperature.to_string()
            } else {
                "off".to_string()
            }
        );
        let (predictions, paths) = predict(&model, &mut loader, &self.config.infer, &self.config.labels())?;

        self.enter(InferStage::Saving);
        let file = save_infer(dstpath, filename, &predictions, &paths, &self.config.infer.separator)?;

        self.enter(InferStage::Done);
        Ok(InferOutput {
            predictions,
            paths,
            file,
        })
    }
}

/// One-shot inference with the run stored in `logging_path`
pub fn infer<B: Backend>(
    config: &Config,
    logging_path: &Path,
    input: InferInput<B>,
    dstpath: &Path,
    filename: &str,
    device: &B::Device,
) -> Result<InferOutput> {
    InferenceRunner::new(config.clone(), logging_path, device).run(input, dstpath, filename)
}
