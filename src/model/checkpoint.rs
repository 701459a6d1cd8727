//! Weight files
//!
//! A logging directory holds one run: `{model.name}.mpk` (Burn
//! `CompactRecorder` record) and the `config.json` the model was built from.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::Backend;
use tracing::info;

use super::resnet::{ResNetClassifier, ResNetClassifierConfig, ResNetClassifierRecord};
use crate::config::Config;
use crate::utils::error::{PipelineError, Result};

/// File name of the configuration stored with the weights
pub const CONFIG_FILE: &str = "config.json";

/// Extension `CompactRecorder` gives its files
pub const WEIGHTS_EXTENSION: &str = "mpk";

/// `{logging_path}/{model_name}.mpk`
pub fn weights_path(logging_path: &Path, model_name: &str) -> PathBuf {
    logging_path.join(format!("{}.{}", model_name, WEIGHTS_EXTENSION))
}

/// Freshly initialised classifier for a configuration
pub fn build_model<B: Backend>(config: &Config, device: &B::Device) -> ResNetClassifier<B> {
    ResNetClassifierConfig::from_model_config(&config.model, config.num_classes()).init(device)
}

/// Write the model weights, returning the file path
pub fn save_weights<B: Backend>(
    model: &ResNetClassifier<B>,
    logging_path: &Path,
    model_name: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(logging_path)?;
    let path = weights_path(logging_path, model_name);

    model
        .clone()
        .save_file(path.clone(), &CompactRecorder::new())
        .map_err(|e| PipelineError::Model(format!("Failed to save weights to {:?}: {:?}", path, e)))?;

    info!("Saved {} parameters to {:?}", model.num_params(), path);
    Ok(path)
}

/// Build the configured architecture and load its weights
///
/// Fails when the file is missing, unreadable, or holds a different
/// architecture than the configuration describes.
pub fn load_weights<B: Backend>(
    config: &Config,
    logging_path: &Path,
    device: &B::Device,
) -> Result<ResNetClassifier<B>> {
    let path = weights_path(logging_path, &config.model.name);
    if !path.is_file() {
        return Err(PipelineError::Model(format!("weights file {:?} not found", path)));
    }

    let model = build_model::<B>(config, device);
    let expected = model.num_params();
    let record: ResNetClassifierRecord<B> = Recorder::<B>::load(&CompactRecorder::new(), path.clone(), device)
        .map_err(|e| PipelineError::Model(format!("Failed to load weights from {:?}: {:?}", path, e)))?;

    // Block layout must match before the record is applied
    check_block_layout(&model, &record)
        .map_err(|reason| PipelineError::Model(format!("weights in {:?} do not fit the configured model: {}", path, reason)))?;

    let model = model.load_record(record);
    if model.num_params() != expected {
        return Err(PipelineError::Model(format!(
            "weights in {:?} hold {} parameters, the configured model has {}",
            path,
            model.num_params(),
            expected
        )));
    }

    info!("Loaded weights from {:?}", path);
    Ok(model)
}

fn check_block_layout<B: Backend>(
    model: &ResNetClassifier<B>,
    record: &ResNetClassifierRecord<B>,
) -> std::result::Result<(), String> {
    if record.blocks.len() != model.blocks.len() {
        return Err(format!(
            "{} residual blocks stored, {} configured",
            record.blocks.len(),
            model.blocks.len()
        ));
    }
    for (i, (block, stored)) in model.blocks.iter().zip(&record.blocks).enumerate() {
        if block.downsample.is_some() != stored.downsample.is_some() {
            return Err(format!("block {} differs in its shortcut projection", i));
        }
    }
    Ok(())
}

/// Save weights and configuration side by side
pub fn save_run<B: Backend>(config: &Config, model: &ResNetClassifier<B>, logging_path: &Path) -> Result<PathBuf> {
    let weights = save_weights(model, logging_path, &config.model.name)?;
    config.save(&logging_path.join(CONFIG_FILE))?;
    Ok(weights)
}

/// Configuration stored in a logging directory
pub fn load_run_config(logging_path: &Path) -> Result<Config> {
    Config::load(&logging_path.join(CONFIG_FILE))
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, Tensor};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn tiny_config() -> Config {
        let mut config = Config::default();
        config.data.labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        config.model.layers = vec![1, 1, 1, 1];
        config.model.base_channels = 4;
        config
    }

    #[test]
    fn test_weights_path() {
        assert_eq!(weights_path(Path::new("logs/run"), "res"), PathBuf::from("logs/run/res.mpk"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = tiny_config();

        let model = build_model::<TestBackend>(&config, &device);
        let weights = save_run(&config, &model, dir.path()).unwrap();
        assert!(weights.is_file());
        assert!(dir.path().join(CONFIG_FILE).is_file());

        let loaded_config = load_run_config(dir.path()).unwrap();
        let loaded = load_weights::<TestBackend>(&loaded_config, dir.path(), &device).unwrap();

        let input = Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let a: Vec<f32> = model.forward(input.clone()).into_data().iter::<f32>().collect();
        let b: Vec<f32> = loaded.forward(input).into_data().iter::<f32>().collect();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_block_count_mismatch_is_an_error() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let mut deeper = tiny_config();
        deeper.model.layers = vec![1, 1, 1, 2];

        let model = build_model::<TestBackend>(&deeper, &device);
        save_run(&deeper, &model, dir.path()).unwrap();

        let err = load_weights::<TestBackend>(&tiny_config(), dir.path(), &device).unwrap_err();
        assert!(matches!(err, PipelineError::Model(msg) if msg.contains("5 residual blocks stored, 4 configured")));
    }

    #[test]
    fn test_shortcut_mismatch_is_an_error() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        // Five blocks either way, the first projection moves from block 2 to block 1
        let mut stored = tiny_config();
        stored.model.layers = vec![2, 1, 1, 1];
        let mut configured = tiny_config();
        configured.model.layers = vec![1, 2, 1, 1];

        let model = build_model::<TestBackend>(&stored, &device);
        save_run(&stored, &model, dir.path()).unwrap();

        let err = load_weights::<TestBackend>(&configured, dir.path(), &device).unwrap_err();
        assert!(matches!(err, PipelineError::Model(_)));
    }

    #[test]
    fn test_width_mismatch_is_an_error() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let mut wider = tiny_config();
        wider.model.base_channels = 8;

        let model = build_model::<TestBackend>(&wider, &device);
        save_run(&wider, &model, dir.path()).unwrap();

        let err = load_weights::<TestBackend>(&tiny_config(), dir.path(), &device).unwrap_err();
        assert!(matches!(err, PipelineError::Model(_)));
    }

    #[test]
    fn test_missing_weights() {
        let dir = TempDir::new().unwrap();
        let err = load_weights::<TestBackend>(&tiny_config(), dir.path(), &Default::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Model(_)));
    }
}
