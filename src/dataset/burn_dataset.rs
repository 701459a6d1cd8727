//! Burn batch types and batchers
//!
//! Items arrive already transformed (normalised CHW vectors); the batchers
//! only stack them into tensors on the target device.
//!
//! - `ImageBatcher`: labeled items, optional background ids
//! - `InferBatcher`: unlabeled items that keep their source path

use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

/// A labeled image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Flattened CHW data [3 * H * W]
    pub image: Vec<f32>,
    pub label: usize,
    pub background: Option<usize>,
    pub path: PathBuf,
}

/// An unlabeled image ready for batching
#[derive(Clone, Debug)]
pub struct InferItem {
    /// Flattened CHW data [3 * H * W]
    pub image: Vec<f32>,
    pub path: PathBuf,
}

/// A batch of labeled images
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Class ids with shape [batch_size]
    pub labels: Tensor<B, 1, Int>,
    /// Background ids with shape [batch_size], when every item has one
    pub backgrounds: Option<Tensor<B, 1, Int>>,
}

/// A batch of images to predict
#[derive(Clone, Debug)]
pub struct InferBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    pub paths: Vec<PathBuf>,
}

fn stack_images<B: Backend>(images: Vec<Vec<f32>>, image_size: usize, device: &B::Device) -> Tensor<B, 4> {
    let batch_size = images.len();
    let data: Vec<f32> = images.into_iter().flatten().collect();
    Tensor::<B, 4>::from_floats(
        TensorData::new(data, [batch_size, 3, image_size, image_size]),
        device,
    )
}

fn index_tensor<B: Backend>(values: Vec<i64>, device: &B::Device) -> Tensor<B, 1, Int> {
    let len = values.len();
    Tensor::<B, 1, Int>::from_data(TensorData::new(values, [len]), device)
}

/// Stacks `ImageItem`s
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let backgrounds: Option<Vec<i64>> = items
            .iter()
            .map(|item| item.background.map(|b| b as i64))
            .collect();
        let images = items.into_iter().map(|item| item.image).collect();

        ImageBatch {
            images: stack_images(images, self.image_size, device),
            labels: index_tensor(labels, device),
            backgrounds: backgrounds.map(|b| index_tensor(b, device)),
        }
    }
}

/// Stacks `InferItem`s
#[derive(Clone, Debug)]
pub struct InferBatcher {
    image_size: usize,
}

impl InferBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, InferItem, InferBatch<B>> for InferBatcher {
    fn batch(&self, items: Vec<InferItem>, device: &B::Device) -> InferBatch<B> {
        let (images, paths): (Vec<_>, Vec<_>) =
            items.into_iter().map(|item| (item.image, item.path)).unzip();

        InferBatch {
            images: stack_images(images, self.image_size, device),
            paths,
        }
    }
}
