//! Dataset Indexer
//!
//! Scans a split folder laid out as:
//!
//! ```text
//! {path}/{mode}_{image_size}/
//! ├── cat/
//! │   ├── indoor/        (only with use_background)
//! │   │   └── a.jpg
//! │   └── outdoor/
//! │       └── b.jpg
//! └── dog/
//!     └── ...
//! ```
//!
//! Every registered label folder (and background folder) must exist; a
//! partially prepared split is an error rather than a smaller dataset.
//! Records are label-major, then background-major, then file name order.
//!
//! Every regular file of a leaf folder is a sample, except dot-files such
//! as `.DS_Store` or `.gitkeep`, which are skipped. Subfolders are not
//! descended into.

use std::fmt;
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::burn_dataset::{ImageBatch, ImageBatcher, ImageItem};
use super::loader::{BatchLoader, ItemSource, LoaderConfig};
use super::transform::SampleTransformer;
use super::Mode;
use crate::config::Config;
use crate::labels::Labels;
use crate::utils::error::{PipelineError, Result};

/// One indexed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleRecord {
    pub path: PathBuf,
    /// Class id in the label registry
    pub label: usize,
    /// Background id, when backgrounds are used
    pub background: Option<usize>,
}

impl SampleRecord {
    /// Resolve label and background names against the registries
    pub fn new(path: PathBuf, label: &str, background: Option<&str>, labels: &Labels) -> Result<Self> {
        Ok(Self {
            path,
            label: labels.label_index(label)?,
            background: background.map(|b| labels.background_index(b)).transpose()?,
        })
    }
}

/// Sample counts of a split
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub mode: Mode,
    pub total: usize,
    pub per_label: Vec<(String, usize)>,
    pub per_background: Vec<(String, usize)>,
}

impl fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Split '{}': {} images", self.mode, self.total)?;
        for (name, count) in &self.per_label {
            writeln!(f, "  {:<24} {:>8}", name, count)?;
        }
        if !self.per_background.is_empty() {
            writeln!(f, "Backgrounds:")?;
            for (name, count) in &self.per_background {
                writeln!(f, "  {:<24} {:>8}", name, count)?;
            }
        }
        Ok(())
    }
}

/// Labeled images of one split, transformed on load
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    split_dir: PathBuf,
    mode: Mode,
    records: Vec<SampleRecord>,
    labels: Labels,
    transformer: SampleTransformer,
}

impl ImageFolderDataset {
    /// Index `{data.path}/{mode}_{data.image_size}` with the configured registries
    pub fn new(config: &Config, mode: Mode, use_background: bool) -> Result<Self> {
        let transformer = SampleTransformer::new(&config.data.transforms, mode, config.data.image_size);
        Self::from_parts(&config.data.path, mode, &config.labels(), use_background, transformer)
    }

    pub fn from_parts(
        data_path: &Path,
        mode: Mode,
        labels: &Labels,
        use_background: bool,
        transformer: SampleTransformer,
    ) -> Result<Self> {
        let split_dir = data_path.join(mode.split_folder(transformer.image_size()));
        info!("Indexing {} split at {:?}", mode, split_dir);

        if !split_dir.is_dir() {
            return Err(PipelineError::MissingDirectory(split_dir));
        }

        let mut records = Vec::new();
        for label in labels.labels() {
            let label_dir = split_dir.join(label);

            if use_background {
                for background in labels.backgrounds() {
                    let folder = label_dir.join(background);
                    for path in list_files(&folder)? {
                        records.push(SampleRecord::new(path, label, Some(background), labels)?);
                    }
                }
            } else {
                for path in list_files(&label_dir)? {
                    records.push(SampleRecord::new(path, label, None, labels)?);
                }
            }
            debug!("Label '{}': {} records so far", label, records.len());
        }

        info!("Indexed {} images in {:?}", records.len(), split_dir);

        Ok(Self {
            split_dir,
            mode,
            records,
            labels: labels.clone(),
            transformer,
        })
    }

    pub fn split_dir(&self) -> &Path {
        &self.split_dir
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn transformer(&self) -> &SampleTransformer {
        &self.transformer
    }

    /// Load and transform one record
    pub fn load_item(&self, index: usize, rng: Option<&mut ChaCha8Rng>) -> Result<ImageItem> {
        let record = self.records.get(index).ok_or_else(|| {
            PipelineError::Model(format!(
                "index {} out of range for {} records",
                index,
                self.records.len()
            ))
        })?;

        Ok(ImageItem {
            image: self.transformer.load(&record.path, rng)?,
            label: record.label,
            background: record.background,
            path: record.path.clone(),
        })
    }

    /// Counts per label and per background
    pub fn stats(&self) -> DatasetStats {
        let mut per_label = vec![0usize; self.labels.num_classes()];
        let mut per_background = vec![0usize; self.labels.num_backgrounds()];

        for record in &self.records {
            per_label[record.label] += 1;
            if let Some(b) = record.background {
                per_background[b] += 1;
            }
        }

        let uses_background = self.records.iter().any(|r| r.background.is_some());
        DatasetStats {
            mode: self.mode,
            total: self.records.len(),
            per_label: self.labels.labels().iter().cloned().zip(per_label).collect(),
            per_background: if uses_background {
                self.labels.backgrounds().iter().cloned().zip(per_background).collect()
            } else {
                Vec::new()
            },
        }
    }
}

/// Regular, non-hidden files of a folder, sorted by name
fn list_files(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(PipelineError::MissingDirectory(folder.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| PipelineError::Io(e.into()))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if entry.file_type().is_file() && !hidden {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

impl Dataset<SampleRecord> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<SampleRecord> {
        self.records.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

impl ItemSource for ImageFolderDataset {
    type Item = ImageItem;

    fn len(&self) -> usize {
        self.records.len()
    }

    fn load(&self, index: usize, rng: &mut ChaCha8Rng) -> Result<ImageItem> {
        self.load_item(index, Some(rng))
    }
}

/// Loader over a labeled split
pub type ImageLoader<B> = BatchLoader<B, ImageFolderDataset, ImageBatcher, ImageBatch<B>>;

/// Index a split and wrap it in a batch loader configured by `learning`
pub fn create_dataloader<B: Backend>(
    config: &Config,
    mode: Mode,
    use_background: bool,
    device: &B::Device,
) -> Result<ImageLoader<B>> {
    let dataset = ImageFolderDataset::new(config, mode, use_background)?;
    let batcher = ImageBatcher::new(config.data.image_size as usize);
    BatchLoader::new(dataset, batcher, LoaderConfig::from(&config.learning), device)
}
