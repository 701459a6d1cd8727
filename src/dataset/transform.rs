//! Sample Transformer
//!
//! Decode, augment (train only), resize, scale to [0, 1] and normalise.
//! The output is always a flattened CHW `f32` vector of length
//! `3 * image_size * image_size`.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use rand_chacha::ChaCha8Rng;

use super::augmentation::Augmenter;
use super::Mode;
use crate::config::TransformsConfig;
use crate::utils::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct SampleTransformer {
    mode: Mode,
    image_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
    augmenter: Option<Augmenter>,
}

impl SampleTransformer {
    /// Transform pipeline of a split
    pub fn new(config: &TransformsConfig, mode: Mode, image_size: u32) -> Self {
        let augmenter = (mode.is_train() && !config.train.is_disabled())
            .then(|| Augmenter::new(config.train.clone()));

        Self {
            mode,
            image_size,
            mean: config.mean,
            std: config.std,
            augmenter,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Decode an image file and transform it
    pub fn load(&self, path: &Path, rng: Option<&mut ChaCha8Rng>) -> Result<Vec<f32>> {
        let img = decode(path)?;
        Ok(self.apply(img, rng))
    }

    /// Transform an already decoded image
    ///
    /// Augmentations only run when the pipeline has them and an RNG is given.
    pub fn apply(&self, img: DynamicImage, rng: Option<&mut ChaCha8Rng>) -> Vec<f32> {
        let img = match (&self.augmenter, rng) {
            (Some(augmenter), Some(rng)) => augmenter.augment(img, rng),
            _ => img,
        };

        let rgb = img
            .resize_exact(self.image_size, self.image_size, FilterType::Triangle)
            .to_rgb8();
        let plane = self.image_size as usize * self.image_size as usize;
        let mut data = vec![0.0f32; 3 * plane];

        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                data[c * plane + i] = (value - self.mean[c]) / self.std[c];
            }
        }

        data
    }
}

/// Open and decode an image, naming the file on failure
pub fn decode(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| PipelineError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| PipelineError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| PipelineError::ImageLoad(path.to_path_buf(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use image::{ImageBuffer, Rgb};
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn solid_image(w: u32, h: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(w, h, Rgb(color)))
    }

    fn identity_transforms() -> TransformsConfig {
        TransformsConfig {
            mean: [0.0; 3],
            std: [1.0; 3],
            train: AugmentationConfig::heavy(),
        }
    }

    #[test]
    fn test_output_shape_and_layout() {
        let transformer = SampleTransformer::new(&identity_transforms(), Mode::Test, 16);
        let data = transformer.apply(solid_image(40, 30, [255, 0, 51]), None);

        assert_eq!(data.len(), 3 * 16 * 16);
        assert!((data[0] - 1.0).abs() < 1e-6);
        assert!(data[256].abs() < 1e-6);
        assert!((data[512] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_normalisation() {
        let transforms = TransformsConfig {
            mean: [0.5; 3],
            std: [0.25; 3],
            train: AugmentationConfig::none(),
        };
        let transformer = SampleTransformer::new(&transforms, Mode::Val, 4);
        let data = transformer.apply(solid_image(4, 4, [255, 255, 255]), None);
        assert!(data.iter().all(|v| (v - 2.0).abs() < 1e-5));
    }

    #[test]
    fn test_eval_splits_ignore_rng() {
        let transformer = SampleTransformer::new(&identity_transforms(), Mode::Val, 8);
        let img = solid_image(20, 14, [200, 40, 90]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(transformer.apply(img.clone(), Some(&mut rng)), transformer.apply(img, None));
    }

    #[test]
    fn test_train_output_shape_with_rng() {
        let transformer = SampleTransformer::new(&identity_transforms(), Mode::Train, 12);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let data = transformer.apply(solid_image(20, 20, [10, 20, 30]), Some(&mut rng));
        assert_eq!(data.len(), 3 * 12 * 12);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.png");
        solid_image(10, 10, [0, 128, 255]).save(&path).unwrap();

        let transformer = SampleTransformer::new(&identity_transforms(), Mode::Test, 8);
        let data = transformer.load(&path, None).unwrap();
        assert_eq!(data.len(), 3 * 64);
    }

    #[test]
    fn test_undecodable_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let transformer = SampleTransformer::new(&identity_transforms(), Mode::Test, 8);
        let err = transformer.load(&path, None).unwrap_err();
        assert!(matches!(err, PipelineError::ImageLoad(p, _) if p == path));
    }
}
