//! Saliency Mapper (Grad-CAM)
//!
//! The target layer is the second convolution of the last residual block.
//! Its activation is re-entered into the autodiff graph as a leaf, the class
//! score is back-propagated, and the channel-averaged gradients weight the
//! activation maps. The resulting map is min-max scaled, upsampled to the
//! input size and blended over the input as a JET heatmap.

use std::path::Path;

use burn::module::AutodiffModule;
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::{Tensor, TensorData};
use image::{ImageBuffer, Rgb, RgbImage};
use tracing::debug;

use super::checkpoint;
use super::resnet::ResNetClassifier;
use crate::config::Config;
use crate::dataset::transform::SampleTransformer;
use crate::dataset::Mode;
use crate::utils::error::{PipelineError, Result, ResultExt};

const CAM_EPSILON: f32 = 1e-7;

/// Result of one Grad-CAM pass
#[derive(Debug, Clone)]
pub struct SaliencyMap {
    /// Class the map explains
    pub class_index: usize,
    /// Softmax over the model output
    pub probabilities: Vec<f32>,
    /// Row-major map in [0, 1], `width * height` values
    pub heatmap: Vec<f32>,
    pub width: u32,
    pub height: u32,
    /// Heatmap blended over the input image
    pub overlay: RgbImage,
}

impl SaliencyMap {
    pub fn save_overlay(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.overlay
            .save(path)
            .map_err(|e| PipelineError::Io(std::io::Error::other(e)))
    }
}

/// JET colormap, `x` in [0, 1]
pub fn jet(x: f32) -> [f32; 3] {
    let channel = |offset: f32| (1.5 - (4.0 * x - offset).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Shift to zero minimum and divide by the maximum
pub fn min_max_scale(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let shifted: Vec<f32> = values.iter().map(|v| v - min).collect();
    let max = shifted.iter().copied().fold(0.0, f32::max);
    shifted.iter().map(|v| v / (max + CAM_EPSILON)).collect()
}

/// Blend a [0, 1] heatmap over an RGB image given as CHW values in [0, 1]
pub fn overlay_heatmap(image_chw: &[f32], heatmap: &[f32], width: u32, height: u32) -> RgbImage {
    let plane = (width * height) as usize;
    let mut blended = vec![0.0f32; 3 * plane];
    for (i, &h) in heatmap.iter().enumerate().take(plane) {
        let color = jet(h);
        for c in 0..3 {
            blended[i * 3 + c] = 0.5 * color[c] + 0.5 * image_chw[c * plane + i];
        }
    }

    let max = blended.iter().copied().fold(0.0, f32::max).max(CAM_EPSILON);
    ImageBuffer::from_fn(width, height, |x, y| {
        let i = (y * width + x) as usize * 3;
        let px = |c: usize| (255.0 * blended[i + c] / max).round().clamp(0.0, 255.0) as u8;
        Rgb([px(0), px(1), px(2)])
    })
}

/// Grad-CAM over a single-image batch `[1, 3, H, W]`
///
/// Explains `target` when given, the top class otherwise.
pub fn grad_cam<B: AutodiffBackend>(
    model: &ResNetClassifier<B>,
    image: Tensor<B::InnerBackend, 4>,
    target: Option<usize>,
) -> Result<SaliencyMap> {
    let [batch, channels, height, width] = image.dims();
    if batch != 1 || channels != 3 {
        return Err(PipelineError::Model(format!(
            "Grad-CAM expects one RGB image, got shape [{}, {}, {}, {}]",
            batch, channels, height, width
        )));
    }
    let device = image.device();

    // Forward to the target layer without tracking, then re-enter as a leaf
    let split = model.valid().forward_split(image.clone());
    let block_input = Tensor::<B, 4>::from_inner(split.block_input);
    let activation = Tensor::<B, 4>::from_inner(split.target).require_grad();

    let logits = model.forward_from_split_eval(block_input, activation.clone());
    let probabilities: Vec<f32> = softmax(logits.clone().inner(), 1)
        .into_data()
        .iter::<f32>()
        .collect();

    let num_classes = probabilities.len();
    let class_index = match target {
        Some(class) if class < num_classes => class,
        Some(class) => {
            return Err(PipelineError::Model(format!(
                "target class {} outside 0..{}",
                class, num_classes
            )))
        }
        None => probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0),
    };
    debug!("Grad-CAM for class {} (p={:.3})", class_index, probabilities[class_index]);

    let score = logits.slice([0..1, class_index..class_index + 1]).sum();
    let grads = score.backward();
    let gradient = activation
        .grad(&grads)
        .context("no gradient reached the target layer")?;

    // Channel weights = spatially averaged gradients: [1, C, 1, 1]
    let weights = gradient.mean_dim(3).mean_dim(2);
    let cam = (activation.inner() * weights).sum_dim(1).clamp_min(0.0);
    let [_, _, cam_h, cam_w] = cam.dims();

    let cam_values: Vec<f32> = cam.into_data().iter::<f32>().collect();
    let scaled = min_max_scale(&cam_values);
    let cam = Tensor::<B::InnerBackend, 4>::from_floats(TensorData::new(scaled, [1, 1, cam_h, cam_w]), &device);
    let cam = interpolate(
        cam,
        [height, width],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    );
    let heatmap: Vec<f32> = cam
        .into_data()
        .iter::<f32>()
        .map(|v| v.clamp(0.0, 1.0))
        .collect();

    let input_values: Vec<f32> = image.into_data().iter::<f32>().collect();
    let overlay = overlay_heatmap(&min_max_scale(&input_values), &heatmap, width as u32, height as u32);

    Ok(SaliencyMap {
        class_index,
        probabilities,
        heatmap,
        width: width as u32,
        height: height as u32,
        overlay,
    })
}

/// Trained model plus the test-time transform, ready to explain image files
pub struct SaliencyMapper<B: AutodiffBackend> {
    model: ResNetClassifier<B>,
    transformer: SampleTransformer,
    device: B::Device,
}

impl<B: AutodiffBackend> SaliencyMapper<B> {
    pub fn new(model: ResNetClassifier<B>, transformer: SampleTransformer, device: &B::Device) -> Self {
        Self {
            model,
            transformer,
            device: device.clone(),
        }
    }

    /// Load the weights of a logging directory
    pub fn from_run(config: &Config, logging_path: &Path, device: &B::Device) -> Result<Self> {
        let model = checkpoint::load_weights::<B>(config, logging_path, device)?;
        let transformer = SampleTransformer::new(&config.data.transforms, Mode::Test, config.data.image_size);
        Ok(Self::new(model, transformer, device))
    }

    /// Explain the prediction for one image file
    pub fn map_file(&self, path: &Path, target: Option<usize>) -> Result<SaliencyMap> {
        let data = self.transformer.load(path, None)?;
        let size = self.transformer.image_size() as usize;
        let image = Tensor::<B::InnerBackend, 4>::from_floats(
            TensorData::new(data, [1, 3, size, size]),
            &self.device,
        );
        grad_cam(&self.model, image, target)
    }
}
