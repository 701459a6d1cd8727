//! Evaluation on a labeled split
//!
//! Runs a trained classifier over every batch of a loader and reports the
//! mean cross-entropy loss, the metric vector averaged over batches, the
//! dataset-level metric values and a confusion matrix.

use std::fmt;
use std::path::Path;

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::ElementConversion;
use chrono::Local;
use serde::Serialize;
use tracing::{debug, info};

use crate::dataset::index::ImageLoader;
use crate::model::ResNetClassifier;
use crate::utils::error::{PipelineError, Result};
use crate::utils::metrics::{accumulate, class_targets, BatchView, ConfusionMatrix, Metrics, RunningAverage};

/// Outcome of one evaluation pass
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub timestamp: String,
    pub num_samples: usize,
    pub num_batches: usize,
    /// Mean cross-entropy over batches
    pub loss: f64,
    pub names: Vec<String>,
    /// Per-batch metric vectors summed then divided by the batch count
    pub batch_mean: Vec<f32>,
    /// Metrics over the whole split
    pub aggregate: Vec<f32>,
    pub confusion: ConfusionMatrix,
}

impl EvalReport {
    /// Value of a named metric, dataset-level
    pub fn get(&self, name: &str) -> Option<f32> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.aggregate.get(i).copied())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Saved evaluation report to {:?}", path);
        Ok(())
    }
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} samples in {} batches, loss {:.4}",
            self.num_samples, self.num_batches, self.loss
        )?;
        writeln!(f, "{:<16} {:>10} {:>10}", "Metric", "batch mean", "overall")?;
        for ((name, mean), overall) in self.names.iter().zip(&self.batch_mean).zip(&self.aggregate) {
            writeln!(f, "{:<16} {:>10.4} {:>10.4}", name, mean, overall)?;
        }
        Ok(())
    }
}

/// Evaluate `model` over one epoch of `loader`
pub fn evaluate<B: Backend>(
    model: &ResNetClassifier<B>,
    loader: &mut ImageLoader<B>,
    metrics: &mut Metrics<B>,
) -> Result<EvalReport> {
    evaluate_with_progress(model, loader, metrics, |_, _| {})
}

/// Same as `evaluate`, calling `on_batch(done, total)` after every batch
pub fn evaluate_with_progress<B, F>(
    model: &ResNetClassifier<B>,
    loader: &mut ImageLoader<B>,
    metrics: &mut Metrics<B>,
    mut on_batch: F,
) -> Result<EvalReport>
where
    B: Backend,
    F: FnMut(usize, usize),
{
    let num_classes = metrics.config().num_classes;
    if model.num_classes() != num_classes {
        return Err(PipelineError::Model(format!(
            "model predicts {} classes, metrics expect {}",
            model.num_classes(),
            num_classes
        )));
    }

    let total_batches = loader.num_batches();
    info!("Evaluating {} batches", total_batches);

    metrics.reset();
    let mut totals = metrics.init_metrics();
    let mut loss = RunningAverage::new();
    let mut confusion = ConfusionMatrix::new(num_classes);
    let mut num_samples = 0;

    let mut criterion = None;
    for (index, batch) in loader.epoch().enumerate() {
        let batch = batch?;
        let logits = model.forward(batch.images);

        let loss_fn = criterion.get_or_insert_with(|| CrossEntropyLossConfig::new().init(&logits.device()));
        let batch_loss: f64 = loss_fn
            .forward(logits.clone(), batch.labels.clone())
            .into_scalar()
            .elem();
        loss.add(batch_loss);

        let scores: Vec<f32> = softmax(logits, 1).into_data().iter::<f32>().collect();
        let targets = class_targets(batch.labels)?;
        let view = BatchView::from_scores(&scores, targets, num_classes)?;

        accumulate(&mut totals, &metrics.compute_view(&view));
        confusion.add_batch(&view);
        num_samples += view.len();

        debug!("Batch {}/{}: loss {:.4}", index + 1, total_batches, batch_loss);
        on_batch(index + 1, total_batches);
    }

    let num_batches = loss.count();
    if num_batches == 0 {
        return Err(PipelineError::Config(
            "nothing to evaluate: the loader produced no batches".to_string(),
        ));
    }

    let batch_mean: Vec<f32> = totals.iter().map(|v| v / num_batches as f32).collect();
    debug!("Batch-averaged metrics\n{}", metrics.get_info(&batch_mean)?);

    let report = EvalReport {
        timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        num_samples,
        num_batches,
        loss: loss.average(),
        names: metrics.get_names().to_vec(),
        batch_mean,
        aggregate: metrics.aggregate(),
        confusion,
    };

    info!(
        "Evaluated {} samples: loss {:.4}, accuracy {:.2}%",
        report.num_samples,
        report.loss,
        report.confusion.accuracy() * 100.0
    );
    Ok(report)
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use crate::config::TransformsConfig;
    use crate::dataset::{BatchLoader, ImageBatcher, ImageFolderDataset, LoaderConfig, Mode, SampleTransformer};
    use crate::labels::Labels;
    use crate::model::ResNetClassifierConfig;
    use crate::utils::metrics::MetricsConfig;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn dataset_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        for (label, count) in [("a", 3), ("b", 2), ("c", 2)] {
            let folder = dir.path().join("test_32").join(label);
            std::fs::create_dir_all(&folder).unwrap();
            for i in 0..count {
                ImageBuffer::from_pixel(8, 8, Rgb([40 * i as u8, 100, 200]))
                    .save(folder.join(format!("{}.png", i)))
                    .unwrap();
            }
        }
        dir
    }

    fn loader(dir: &TempDir, batch_size: usize) -> ImageLoader<TestBackend> {
        let labels = Labels::new(vec!["a".into(), "b".into(), "c".into()], vec![]);
        let transformer = SampleTransformer::new(&TransformsConfig::default(), Mode::Test, 32);
        let dataset = ImageFolderDataset::from_parts(dir.path(), Mode::Test, &labels, false, transformer).unwrap();
        BatchLoader::new(
            dataset,
            ImageBatcher::new(32),
            LoaderConfig::new(batch_size),
            &Default::default(),
        )
        .unwrap()
    }

    fn model() -> ResNetClassifier<TestBackend> {
        ResNetClassifierConfig::new(3)
            .with_layers(vec![1, 1, 1, 1])
            .with_base_channels(4)
            .init(&Default::default())
    }

    #[test]
    fn test_evaluate_counts_and_lengths() {
        let dir = dataset_tree();
        let mut loader = loader(&dir, 3);
        let mut metrics =
            Metrics::<TestBackend>::new(MetricsConfig::new(3).with_per_class(true), &Default::default()).unwrap();

        let mut seen = Vec::new();
        let report = evaluate_with_progress(&model(), &mut loader, &mut metrics, |done, total| {
            seen.push((done, total))
        })
        .unwrap();

        assert_eq!(report.num_samples, 7);
        assert_eq!(report.num_batches, 3);
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(report.confusion.total(), 7);
        assert_eq!(report.names.len(), metrics.num_metrics());
        assert_eq!(report.batch_mean.len(), metrics.num_metrics());
        assert_eq!(report.aggregate.len(), metrics.num_metrics());
        assert!(report.loss.is_finite() && report.loss > 0.0);

        // Top-3 over 3 classes always hits
        assert!((report.get("top k micro").unwrap() - 1.0).abs() < 1e-6);
        let accuracy = report.get("acc micro").unwrap() as f64;
        assert!((accuracy - report.confusion.accuracy()).abs() < 1e-5);
    }

    #[test]
    fn test_report_save_and_display() {
        let dir = dataset_tree();
        let mut loader = loader(&dir, 4);
        let mut metrics = Metrics::<TestBackend>::new(MetricsConfig::new(3), &Default::default()).unwrap();
        let report = evaluate(&model(), &mut loader, &mut metrics).unwrap();

        let out = TempDir::new().unwrap();
        let path = out.path().join("reports/eval.json");
        report.save(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["num_samples"], 7);

        let text = report.to_string();
        assert!(text.contains("f1-score macro"));
        assert!(text.contains("7 samples in 2 batches"));
    }

    #[test]
    fn test_class_count_mismatch() {
        let dir = dataset_tree();
        let mut loader = loader(&dir, 4);
        let mut metrics = Metrics::<TestBackend>::new(MetricsConfig::new(2), &Default::default()).unwrap();
        assert!(evaluate(&model(), &mut loader, &mut metrics).is_err());
    }
}
