//! Metrics Module for Model Evaluation
//!
//! A fixed, ordered set of named classification metrics backed by stateful
//! reducers:
//! - Top-k accuracy (micro and macro)
//! - Accuracy (micro and macro)
//! - Macro precision, recall and F1-score
//! - Optional per-class accuracy
//!
//! `Metrics::compute` reduces one batch into a value vector whose layout is
//! given by `Metrics::get_names`. Vectors from consecutive batches can be
//! summed and averaged. Each reducer also keeps running counts on the
//! compute device so `Metrics::aggregate` can report dataset-level values.

use burn::prelude::*;
use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};

use super::error::{PipelineError, Result};

/// Default k for the top-k accuracy metrics
pub const DEFAULT_METRICS_TOP_K: usize = 3;

/// Averaging strategy over classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Average {
    /// Pool the counts of every class, then compute one ratio
    Micro,
    /// Compute one ratio per class, then take the unweighted mean
    Macro,
}

/// Ratio computed from true positive, false positive and false negative counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Accuracy,
    Precision,
    Recall,
    F1,
}

impl StatKind {
    fn ratio(&self, tp: f32, fp: f32, fn_: f32) -> f32 {
        let (num, den) = match self {
            StatKind::Accuracy | StatKind::Recall => (tp, tp + fn_),
            StatKind::Precision => (tp, tp + fp),
            StatKind::F1 => (2.0 * tp, 2.0 * tp + fp + fn_),
        };
        safe_div(num, den)
    }
}

fn safe_div(num: f32, den: f32) -> f32 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Metric selection for a `Metrics` accumulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Number of classes
    pub num_classes: usize,
    /// k used by the top-k accuracy metrics
    pub top_k: usize,
    /// Append one accuracy value per class
    pub per_class: bool,
}

impl MetricsConfig {
    /// Default selection: top-3 (capped at `num_classes`), no per-class values
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            top_k: DEFAULT_METRICS_TOP_K.min(num_classes.max(1)),
            per_class: false,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_per_class(mut self, per_class: bool) -> Self {
        self.per_class = per_class;
        self
    }

    /// Validate the selection
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(PipelineError::Config(
                "metrics need at least one class".to_string(),
            ));
        }
        if self.top_k == 0 || self.top_k > self.num_classes {
            return Err(PipelineError::Config(format!(
                "metrics top_k must be in 1..={} but is {}",
                self.num_classes, self.top_k
            )));
        }
        Ok(())
    }
}

/// Class indices of an integer label tensor, negative labels rejected
pub fn class_targets<B: Backend>(labels: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    labels
        .into_data()
        .iter::<i64>()
        .map(|t| {
            usize::try_from(t)
                .map_err(|_| PipelineError::Model(format!("target class {} is negative", t)))
        })
        .collect()
}

/// Host-side view of one batch: class ranking per sample plus targets
#[derive(Debug, Clone)]
pub struct BatchView {
    num_classes: usize,
    /// Class indices of each sample sorted by decreasing score
    ranked: Vec<Vec<usize>>,
    targets: Vec<usize>,
}

impl BatchView {
    /// Build a view from row-major scores of shape (batch, num_classes)
    pub fn from_scores(scores: &[f32], targets: Vec<usize>, num_classes: usize) -> Result<Self> {
        if num_classes == 0 || scores.len() != targets.len() * num_classes {
            return Err(PipelineError::Model(format!(
                "prediction scores hold {} values, expected {} samples x {} classes",
                scores.len(),
                targets.len(),
                num_classes
            )));
        }
        if let Some(&bad) = targets.iter().find(|&&t| t >= num_classes) {
            return Err(PipelineError::Model(format!(
                "target class {} is outside 0..{}",
                bad, num_classes
            )));
        }

        let ranked = scores
            .chunks(num_classes)
            .map(|row| {
                let mut order: Vec<usize> = (0..num_classes).collect();
                // Stable sort keeps the lower index first on ties
                order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
                order
            })
            .collect();

        Ok(Self {
            num_classes,
            ranked,
            targets,
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Top-1 predicted class per sample
    pub fn predictions(&self) -> Vec<usize> {
        self.ranked.iter().map(|r| r[0]).collect()
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Per-class (tp, fp, fn) counts when each sample predicts its top-k classes
    fn stat_counts(&self, k: usize) -> [Vec<f32>; 3] {
        let mut tp = vec![0.0; self.num_classes];
        let mut fp = vec![0.0; self.num_classes];
        let mut fn_ = vec![0.0; self.num_classes];

        for (ranked, &target) in self.ranked.iter().zip(&self.targets) {
            let top = &ranked[..k.min(ranked.len())];
            for &class in top {
                if class == target {
                    tp[class] += 1.0;
                } else {
                    fp[class] += 1.0;
                }
            }
            if !top.contains(&target) {
                fn_[target] += 1.0;
            }
        }

        [tp, fp, fn_]
    }
}

/// A stateful metric reducer
///
/// `update` folds a batch into the running state and returns the batch-only
/// values; `compute` reports the values over everything seen since `reset`.
pub trait Reducer<B: Backend> {
    /// One name per produced value
    fn names(&self) -> Vec<String>;

    fn update(&mut self, batch: &BatchView) -> Vec<f32>;

    fn compute(&self) -> Vec<f32>;

    fn reset(&mut self);

    /// Move the running state to another device
    fn to_device(&mut self, device: &B::Device);
}

fn counts_tensor<B: Backend>(values: Vec<f32>, device: &B::Device) -> Tensor<B, 1> {
    let len = values.len();
    Tensor::from_floats(TensorData::new(values, [len]), device)
}

fn tensor_values<B: Backend>(tensor: &Tensor<B, 1>) -> Vec<f32> {
    tensor.clone().into_data().iter::<f32>().collect()
}

/// Accuracy, precision, recall or F1 from per-class stat scores
pub struct StatScoreMetric<B: Backend> {
    name: String,
    kind: StatKind,
    average: Average,
    top_k: usize,
    tp: Tensor<B, 1>,
    fp: Tensor<B, 1>,
    fn_: Tensor<B, 1>,
}

impl<B: Backend> StatScoreMetric<B> {
    pub fn new(
        name: &str,
        kind: StatKind,
        average: Average,
        top_k: usize,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            average,
            top_k,
            tp: Tensor::zeros([num_classes], device),
            fp: Tensor::zeros([num_classes], device),
            fn_: Tensor::zeros([num_classes], device),
        }
    }

    fn reduce(&self, tp: &[f32], fp: &[f32], fn_: &[f32]) -> f32 {
        match self.average {
            Average::Micro => self.kind.ratio(
                tp.iter().sum(),
                fp.iter().sum(),
                fn_.iter().sum(),
            ),
            Average::Macro => {
                // Skipped classes: untouched ones at top-1, absent targets at top-k
                let counted = |c: usize| {
                    if self.top_k == 1 {
                        tp[c] + fp[c] + fn_[c] > 0.0
                    } else {
                        tp[c] + fn_[c] > 0.0
                    }
                };
                let ratios: Vec<f32> = (0..tp.len())
                    .filter(|&c| counted(c))
                    .map(|c| self.kind.ratio(tp[c], fp[c], fn_[c]))
                    .collect();
                safe_div(ratios.iter().sum(), ratios.len() as f32)
            }
        }
    }
}

impl<B: Backend> Reducer<B> for StatScoreMetric<B> {
    fn names(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn update(&mut self, batch: &BatchView) -> Vec<f32> {
        let [tp, fp, fn_] = batch.stat_counts(self.top_k);
        let value = self.reduce(&tp, &fp, &fn_);

        let device = self.tp.device();
        self.tp = self.tp.clone() + counts_tensor::<B>(tp, &device);
        self.fp = self.fp.clone() + counts_tensor::<B>(fp, &device);
        self.fn_ = self.fn_.clone() + counts_tensor::<B>(fn_, &device);

        vec![value]
    }

    fn compute(&self) -> Vec<f32> {
        let tp = tensor_values(&self.tp);
        let fp = tensor_values(&self.fp);
        let fn_ = tensor_values(&self.fn_);
        vec![self.reduce(&tp, &fp, &fn_)]
    }

    fn reset(&mut self) {
        self.tp = self.tp.zeros_like();
        self.fp = self.fp.zeros_like();
        self.fn_ = self.fn_.zeros_like();
    }

    fn to_device(&mut self, device: &B::Device) {
        self.tp = self.tp.clone().to_device(device);
        self.fp = self.fp.clone().to_device(device);
        self.fn_ = self.fn_.clone().to_device(device);
    }
}

/// Top-1 accuracy restricted to the samples of each class
///
/// A class without samples reports 0.
pub struct PerClassAccuracy<B: Backend> {
    correct: Tensor<B, 1>,
    total: Tensor<B, 1>,
}

impl<B: Backend> PerClassAccuracy<B> {
    pub fn new(num_classes: usize, device: &B::Device) -> Self {
        Self {
            correct: Tensor::zeros([num_classes], device),
            total: Tensor::zeros([num_classes], device),
        }
    }

    fn ratios(correct: &[f32], total: &[f32]) -> Vec<f32> {
        correct
            .iter()
            .zip(total)
            .map(|(&c, &t)| safe_div(c, t))
            .collect()
    }
}

impl<B: Backend> Reducer<B> for PerClassAccuracy<B> {
    fn names(&self) -> Vec<String> {
        (0..self.correct.dims()[0])
            .map(|i| format!("acc class n°{}", i + 1))
            .collect()
    }

    fn update(&mut self, batch: &BatchView) -> Vec<f32> {
        let num_classes = self.correct.dims()[0];
        let mut correct = vec![0.0; num_classes];
        let mut total = vec![0.0; num_classes];

        for (pred, &target) in batch.predictions().into_iter().zip(batch.targets()) {
            total[target] += 1.0;
            if pred == target {
                correct[target] += 1.0;
            }
        }
        let values = Self::ratios(&correct, &total);

        let device = self.correct.device();
        self.correct = self.correct.clone() + counts_tensor::<B>(correct, &device);
        self.total = self.total.clone() + counts_tensor::<B>(total, &device);

        values
    }

    fn compute(&self) -> Vec<f32> {
        Self::ratios(&tensor_values(&self.correct), &tensor_values(&self.total))
    }

    fn reset(&mut self) {
        self.correct = self.correct.zeros_like();
        self.total = self.total.zeros_like();
    }

    fn to_device(&mut self, device: &B::Device) {
        self.correct = self.correct.clone().to_device(device);
        self.total = self.total.clone().to_device(device);
    }
}

/// Named, ordered collection of metric reducers
///
/// Value layout: `top k micro`, `top k macro`, `acc micro`, `acc macro`,
/// `precision macro`, `recall macro`, `f1-score macro`, then
/// `acc class n°1..=C` when per-class accuracy is enabled.
pub struct Metrics<B: Backend> {
    config: MetricsConfig,
    reducers: Vec<Box<dyn Reducer<B>>>,
    names: Vec<String>,
    device: B::Device,
}

impl<B: Backend> Metrics<B> {
    pub fn new(config: MetricsConfig, device: &B::Device) -> Result<Self> {
        config.validate()?;

        let c = config.num_classes;
        let k = config.top_k;
        let mut reducers: Vec<Box<dyn Reducer<B>>> = vec![
            Box::new(StatScoreMetric::new("top k micro", StatKind::Accuracy, Average::Micro, k, c, device)),
            Box::new(StatScoreMetric::new("top k macro", StatKind::Accuracy, Average::Macro, k, c, device)),
            Box::new(StatScoreMetric::new("acc micro", StatKind::Accuracy, Average::Micro, 1, c, device)),
            Box::new(StatScoreMetric::new("acc macro", StatKind::Accuracy, Average::Macro, 1, c, device)),
            Box::new(StatScoreMetric::new("precision macro", StatKind::Precision, Average::Macro, 1, c, device)),
            Box::new(StatScoreMetric::new("recall macro", StatKind::Recall, Average::Macro, 1, c, device)),
            Box::new(StatScoreMetric::new("f1-score macro", StatKind::F1, Average::Macro, 1, c, device)),
        ];
        if config.per_class {
            reducers.push(Box::new(PerClassAccuracy::new(c, device)));
        }

        let names = reducers.iter().flat_map(|r| r.names()).collect();

        Ok(Self {
            config,
            reducers,
            names,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Names of the values, in vector order
    pub fn get_names(&self) -> &[String] {
        &self.names
    }

    pub fn num_metrics(&self) -> usize {
        self.names.len()
    }

    /// Zero vector to sum batch results into
    pub fn init_metrics(&self) -> Vec<f32> {
        vec![0.0; self.num_metrics()]
    }

    /// Reduce one batch of scores (batch, num_classes) against class indices
    pub fn compute(&mut self, y_pred: Tensor<B, 2>, y_true: Tensor<B, 1, Int>) -> Result<Vec<f32>> {
        let y_pred = y_pred.to_device(&self.device);
        let [_, classes] = y_pred.dims();
        if classes != self.config.num_classes {
            return Err(PipelineError::Model(format!(
                "predictions have {} classes, metrics expect {}",
                classes, self.config.num_classes
            )));
        }

        let scores: Vec<f32> = y_pred.into_data().iter::<f32>().collect();
        let targets = class_targets(y_true)?;

        let view = BatchView::from_scores(&scores, targets, classes)?;
        Ok(self.compute_view(&view))
    }

    /// Same as `compute` with one-hot (or soft) targets, reduced by argmax
    pub fn compute_one_hot(&mut self, y_pred: Tensor<B, 2>, y_true: Tensor<B, 2>) -> Result<Vec<f32>> {
        let [batch, _] = y_true.dims();
        let y_true = y_true.argmax(1).reshape([batch]);
        self.compute(y_pred, y_true)
    }

    /// Reduce an already extracted host-side batch
    pub fn compute_view(&mut self, view: &BatchView) -> Vec<f32> {
        self.reducers
            .iter_mut()
            .flat_map(|r| r.update(view))
            .collect()
    }

    /// Values over every batch since construction or the last `reset`
    pub fn aggregate(&self) -> Vec<f32> {
        self.reducers.iter().flat_map(|r| r.compute()).collect()
    }

    pub fn reset(&mut self) {
        for reducer in &mut self.reducers {
            reducer.reset();
        }
    }

    pub fn to_device(&mut self, device: &B::Device) {
        for reducer in &mut self.reducers {
            reducer.to_device(device);
        }
        self.device = device.clone();
    }

    /// Two-column text table of a value vector
    pub fn get_info(&self, values: &[f32]) -> Result<String> {
        if values.len() != self.num_metrics() {
            return Err(PipelineError::LengthMismatch {
                expected: self.num_metrics(),
                found: values.len(),
            });
        }

        let mut output = String::from("Metrics \t: Values\n");
        output.push_str(&format!("{} | {}\n", "-".repeat(15), "-".repeat(4)));
        for (name, value) in self.names.iter().zip(values) {
            let short: String = name.chars().take(14).collect();
            output.push_str(&format!("{}\t: {:.2}\n", short, value));
        }
        Ok(output)
    }
}

/// Element-wise `total += batch`
pub fn accumulate(total: &mut [f32], batch: &[f32]) {
    for (t, b) in total.iter_mut().zip(batch) {
        *t += b;
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Matrix data (row = actual, column = predicted), row-major
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Add every (target, top-1 prediction) pair of a batch
    pub fn add_batch(&mut self, batch: &BatchView) {
        for (pred, &actual) in batch.predictions().into_iter().zip(batch.targets()) {
            self.add(actual, pred);
        }
    }

    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Pretty print the matrix with optional class names
    pub fn display(&self, class_names: Option<&[String]>) -> String {
        let mut output = String::from("\nConfusion Matrix (rows=actual, cols=predicted):\n\n");

        let label = |i: usize, width: usize| -> String {
            match class_names.and_then(|names| names.get(i)) {
                Some(name) => name.chars().take(width).collect(),
                None => i.to_string(),
            }
        };

        output.push_str("          ");
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>6}", label(col, 6)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>8} ", label(row, 8)));
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    output.push_str(&format!("[{:>4}]", count));
                } else if count > 0 {
                    output.push_str(&format!(" {:>4} ", count));
                } else {
                    output.push_str("    . ");
                }
            }
            output.push('\n');
        }

        output.push_str(&format!("\nAccuracy: {:.2}%\n", self.accuracy() * 100.0));
        output
    }
}

/// Running average for tracking a scalar (loss) over batches
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-4, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(MetricsConfig::new(5).validate().is_ok());
        assert_eq!(MetricsConfig::new(2).top_k, 2);
        assert!(MetricsConfig::new(3).with_top_k(4).validate().is_err());
        assert!(MetricsConfig::new(0).validate().is_err());
    }

    #[test]
    fn test_batch_view_rejects_bad_shapes() {
        assert!(BatchView::from_scores(&[0.1, 0.9, 0.5], vec![0, 1], 2).is_err());
        assert!(BatchView::from_scores(&[0.1, 0.9], vec![2], 2).is_err());
    }

    #[test]
    fn test_stat_counts_top_k() {
        let view = BatchView::from_scores(&[0.1, 0.7, 0.2, 0.6, 0.3, 0.1], vec![2, 2], 3).unwrap();
        let [tp, fp, fn_] = view.stat_counts(2);
        assert_eq!(tp, vec![0.0, 0.0, 1.0]);
        assert_eq!(fp, vec![1.0, 2.0, 0.0]);
        assert_eq!(fn_, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_confusion_matrix() {
        let view = BatchView::from_scores(&[0.9, 0.1, 0.2, 0.8, 0.7, 0.3], vec![0, 1, 1], 2).unwrap();
        let mut cm = ConfusionMatrix::new(2);
        cm.add_batch(&view);
        assert_eq!(cm.get(0, 0), 1);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(1, 0), 1);
        assert_eq!(cm.total(), 3);
        assert!((cm.accuracy() - 2.0 / 3.0).abs() < 1e-9);
        assert!(cm.display(None).contains("Accuracy"));
    }

    #[test]
    fn test_running_average() {
        let mut avg = RunningAverage::new();
        avg.add(1.0);
        avg.add(3.0);
        assert_eq!(avg.average(), 2.0);
        assert_eq!(avg.count(), 2);
    }

    #[cfg(feature = "ndarray")]
    mod tensor {
        use super::*;
        use burn_ndarray::NdArray;

        type TestBackend = NdArray;

        fn batch(scores: &[f32], targets: &[i64], classes: usize) -> (Tensor<TestBackend, 2>, Tensor<TestBackend, 1, Int>) {
            let device = Default::default();
            let n = targets.len();
            let preds = Tensor::from_floats(TensorData::new(scores.to_vec(), [n, classes]), &device);
            let labels = Tensor::from_data(TensorData::new(targets.to_vec(), [n]), &device);
            (preds, labels)
        }

        fn metrics(config: MetricsConfig) -> Metrics<TestBackend> {
            Metrics::new(config, &Default::default()).unwrap()
        }

        #[test]
        fn test_lengths_are_consistent() {
            for per_class in [false, true] {
                let mut m = metrics(MetricsConfig::new(4).with_per_class(per_class));
                let (preds, labels) = batch(&[0.1, 0.2, 0.3, 0.4, 0.4, 0.3, 0.2, 0.1], &[3, 0], 4);
                let values = m.compute(preds, labels).unwrap();
                assert_eq!(m.get_names().len(), m.init_metrics().len());
                assert_eq!(values.len(), m.init_metrics().len());
                assert_eq!(m.num_metrics(), if per_class { 11 } else { 7 });
            }
        }

        #[test]
        fn test_perfect_predictions() {
            let mut m = metrics(MetricsConfig::new(3).with_per_class(true));
            let (preds, labels) = batch(
                &[0.8, 0.1, 0.1, 0.1, 0.8, 0.1, 0.1, 0.1, 0.8],
                &[0, 1, 2],
                3,
            );
            let values = m.compute(preds, labels).unwrap();
            assert_close(&values, &[1.0; 10]);
        }

        #[test]
        fn test_absent_class_reports_zero() {
            let mut m = metrics(MetricsConfig::new(3).with_per_class(true));
            let (preds, labels) = batch(&[0.8, 0.1, 0.1, 0.1, 0.8, 0.1], &[0, 1], 3);
            let values = m.compute(preds, labels).unwrap();
            assert_close(&values[7..], &[1.0, 1.0, 0.0]);
            assert!(values.iter().all(|v| v.is_finite()));
        }

        #[test]
        fn test_mixed_batch_values() {
            let mut m = metrics(MetricsConfig::new(3).with_top_k(2).with_per_class(true));
            let (preds, labels) = batch(
                &[
                    0.7, 0.2, 0.1, //
                    0.1, 0.6, 0.3, //
                    0.5, 0.3, 0.2, //
                    0.2, 0.3, 0.5,
                ],
                &[0, 2, 1, 2],
                3,
            );
            let values = m.compute(preds, labels).unwrap();
            assert_close(
                &values,
                &[1.0, 1.0, 0.5, 0.5, 0.5, 0.5, 4.0 / 9.0, 1.0, 0.0, 0.5],
            );
        }

        #[test]
        fn test_top_k_macro_skips_classes_absent_from_targets() {
            let mut m = metrics(MetricsConfig::new(3).with_top_k(2));
            let (preds, labels) = batch(&[0.7, 0.2, 0.1, 0.6, 0.3, 0.1], &[0, 0], 3);
            let values = m.compute(preds, labels).unwrap();
            // Class 1 sits in every top-2 but is never a target
            assert_close(&values[..2], &[1.0, 1.0]);
            // Top-1 keeps every class that was predicted or targeted
            assert_close(&values[2..4], &[1.0, 1.0]);
        }

        #[test]
        fn test_negative_target_is_rejected() {
            let mut m = metrics(MetricsConfig::new(2));
            let (preds, labels) = batch(&[0.9, 0.1, 0.2, 0.8], &[0, -1], 2);
            assert!(matches!(m.compute(preds, labels), Err(PipelineError::Model(_))));
        }

        #[test]
        fn test_one_hot_targets() {
            let device = Default::default();
            let mut m = metrics(MetricsConfig::new(2));
            let preds = Tensor::<TestBackend, 2>::from_floats([[0.9, 0.1], [0.3, 0.7]], &device);
            let one_hot = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [1.0, 0.0]], &device);
            let values = m.compute_one_hot(preds, one_hot).unwrap();
            assert_close(&values[2..3], &[0.5]);
        }

        #[test]
        fn test_aggregate_and_reset() {
            let mut m = metrics(MetricsConfig::new(2));
            let (p1, l1) = batch(&[0.9, 0.1, 0.8, 0.2], &[0, 1], 2);
            let (p2, l2) = batch(&[0.1, 0.9, 0.2, 0.8], &[1, 1], 2);
            m.compute(p1, l1).unwrap();
            m.compute(p2, l2).unwrap();

            let aggregated = m.aggregate();
            // 3 of 4 samples correct overall
            assert_close(&aggregated[2..3], &[0.75]);

            m.reset();
            assert_close(&m.aggregate(), &m.init_metrics());
        }

        #[test]
        fn test_get_info() {
            let m = metrics(MetricsConfig::new(2).with_per_class(true));
            let info = m.get_info(&m.init_metrics()).unwrap();
            assert!(info.starts_with("Metrics \t: Values\n--------------- | ----\n"));
            assert!(info.contains("top k micro\t: 0.00\n"));
            assert!(info.contains("f1-score macro\t: 0.00\n"));
            assert!(info.contains("acc class n°2\t: 0.00\n"));

            let err = m.get_info(&[0.0; 3]).unwrap_err();
            assert!(matches!(err, PipelineError::LengthMismatch { expected: 9, found: 3 }));
        }

        #[test]
        fn test_accumulate() {
            let mut total = vec![0.0, 1.0];
            accumulate(&mut total, &[0.5, 0.5]);
            assert_eq!(total, vec![0.5, 1.5]);
        }
    }
}
