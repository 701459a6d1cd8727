//! Unlabeled inference dataset
//!
//! A flat folder of images to predict. Items keep their path so results can
//! be written next to the file they came from.

use std::path::{Path, PathBuf};

use burn::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::info;
use walkdir::WalkDir;

use super::burn_dataset::{InferBatch, InferBatcher, InferItem};
use super::loader::{BatchLoader, ItemSource, LoaderConfig};
use super::transform::SampleTransformer;
use super::Mode;
use crate::config::Config;
use crate::utils::error::{PipelineError, Result, ResultExt};

/// Supported image extensions
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone)]
pub struct InferDataset {
    root: PathBuf,
    paths: Vec<PathBuf>,
    transformer: SampleTransformer,
}

impl InferDataset {
    /// Index the images of `folder`, transformed like the test split
    pub fn new(config: &Config, folder: &Path) -> Result<Self> {
        let transformer = SampleTransformer::new(&config.data.transforms, Mode::Test, config.data.image_size);
        Self::with_transformer(folder, transformer)
    }

    pub fn with_transformer(folder: &Path, transformer: SampleTransformer) -> Result<Self> {
        if !folder.is_dir() {
            return Err(PipelineError::MissingDirectory(folder.to_path_buf()));
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| PipelineError::Io(e.into()))?;
            if entry.file_type().is_file() && is_image(entry.path()) {
                paths.push(entry.into_path());
            }
        }

        info!("Found {} images to predict in {:?}", paths.len(), folder);

        Ok(Self {
            root: folder.to_path_buf(),
            paths,
            transformer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

impl ItemSource for InferDataset {
    type Item = InferItem;

    fn len(&self) -> usize {
        self.paths.len()
    }

    fn load(&self, index: usize, _rng: &mut ChaCha8Rng) -> Result<InferItem> {
        let path = self
            .paths
            .get(index)
            .with_context(|| format!("index {} out of range for {} images", index, self.paths.len()))?;

        Ok(InferItem {
            image: self.transformer.load(path, None)?,
            path: path.clone(),
        })
    }
}

/// Loader over a folder of images to predict
pub type InferLoader<B> = BatchLoader<B, InferDataset, InferBatcher, InferBatch<B>>;

/// Build an ordered, unshuffled loader over the images of `folder`
pub fn create_infer_dataloader<B: Backend>(
    config: &Config,
    folder: &Path,
    device: &B::Device,
) -> Result<InferLoader<B>> {
    let dataset = InferDataset::new(config, folder)?;
    let loader_config = LoaderConfig::new(config.learning.batch_size)
        .with_num_workers(config.learning.num_workers)
        .with_seed(config.learning.seed);
    BatchLoader::new(
        dataset,
        InferBatcher::new(config.data.image_size as usize),
        loader_config,
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformsConfig;
    use image::{ImageBuffer, Rgb};
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn folder_with_images() -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in ["b.png", "a.jpg", "c.bmp"] {
            ImageBuffer::from_pixel(6, 6, Rgb([1u8, 2, 3]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        dir
    }

    fn transformer() -> SampleTransformer {
        SampleTransformer::new(&TransformsConfig::default(), Mode::Test, 16)
    }

    #[test]
    fn test_scans_only_images_sorted() {
        let dir = folder_with_images();
        let dataset = InferDataset::with_transformer(dir.path(), transformer()).unwrap();

        let names: Vec<_> = dataset
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png", "c.bmp"]);
    }

    #[test]
    fn test_load_keeps_path() {
        let dir = folder_with_images();
        let dataset = InferDataset::with_transformer(dir.path(), transformer()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let item = dataset.load(1, &mut rng).unwrap();
        assert_eq!(item.image.len(), 3 * 16 * 16);
        assert!(item.path.ends_with("b.png"));
    }

    #[test]
    fn test_missing_folder() {
        let err = InferDataset::with_transformer(Path::new("/nonexistent/images"), transformer()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingDirectory(_)));
    }
}
