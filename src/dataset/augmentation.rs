//! Random train-time augmentations
//!
//! Applied before resizing in `train` mode only; `val` and `test` images are
//! never augmented so evaluation and inference stay deterministic.

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Probabilities and strengths of each augmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Probability of a horizontal flip
    pub horizontal_flip_prob: f32,
    /// Probability of a vertical flip
    pub vertical_flip_prob: f32,
    /// Maximum rotation angle in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f32,
    pub rotation_prob: f32,
    /// Brightness shift range (±brightness_delta, fraction of 255)
    pub brightness_delta: f32,
    pub brightness_prob: f32,
    /// Contrast factor range (1.0 ± contrast_delta)
    pub contrast_delta: f32,
    pub contrast_prob: f32,
    /// Saturation factor range (1.0 ± saturation_delta)
    pub saturation_delta: f32,
    pub saturation_prob: f32,
    /// Gaussian blur sigma (0.0 = disabled)
    pub blur_sigma: f32,
    pub blur_prob: f32,
    /// Gaussian noise standard deviation (fraction of 255, 0.0 = disabled)
    pub noise_std: f32,
    pub noise_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self::medium()
    }
}

impl AugmentationConfig {
    /// Flips and mild color jitter
    pub fn light() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.0,
            rotation_degrees: 10.0,
            rotation_prob: 0.3,
            brightness_delta: 0.1,
            brightness_prob: 0.3,
            contrast_delta: 0.1,
            contrast_prob: 0.3,
            saturation_delta: 0.1,
            saturation_prob: 0.2,
            blur_sigma: 0.0,
            blur_prob: 0.0,
            noise_std: 0.0,
            noise_prob: 0.0,
        }
    }

    pub fn medium() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.2,
            rotation_degrees: 20.0,
            rotation_prob: 0.5,
            brightness_delta: 0.2,
            brightness_prob: 0.5,
            contrast_delta: 0.2,
            contrast_prob: 0.5,
            saturation_delta: 0.2,
            saturation_prob: 0.3,
            blur_sigma: 1.0,
            blur_prob: 0.1,
            noise_std: 0.02,
            noise_prob: 0.1,
        }
    }

    pub fn heavy() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.3,
            rotation_degrees: 30.0,
            rotation_prob: 0.7,
            brightness_delta: 0.3,
            brightness_prob: 0.6,
            contrast_delta: 0.3,
            contrast_prob: 0.6,
            saturation_delta: 0.3,
            saturation_prob: 0.5,
            blur_sigma: 1.5,
            blur_prob: 0.15,
            noise_std: 0.03,
            noise_prob: 0.15,
        }
    }

    /// Every probability at zero
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
            rotation_degrees: 0.0,
            rotation_prob: 0.0,
            brightness_delta: 0.0,
            brightness_prob: 0.0,
            contrast_delta: 0.0,
            contrast_prob: 0.0,
            saturation_delta: 0.0,
            saturation_prob: 0.0,
            blur_sigma: 0.0,
            blur_prob: 0.0,
            noise_std: 0.0,
            noise_prob: 0.0,
        }
    }

    /// True when no augmentation can ever fire
    pub fn is_disabled(&self) -> bool {
        [
            self.horizontal_flip_prob,
            self.vertical_flip_prob,
            self.rotation_prob,
            self.brightness_prob,
            self.contrast_prob,
            self.saturation_prob,
            self.blur_prob,
            self.noise_prob,
        ]
        .iter()
        .all(|p| *p <= 0.0)
    }
}

/// Applies an `AugmentationConfig` with a caller-provided RNG
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Apply each enabled augmentation with its own probability
    pub fn augment(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> DynamicImage {
        let cfg = &self.config;
        let mut result = img;

        if rng.gen::<f32>() < cfg.horizontal_flip_prob {
            result = result.fliph();
        }
        if rng.gen::<f32>() < cfg.vertical_flip_prob {
            result = result.flipv();
        }

        if cfg.rotation_degrees > 0.0 && rng.gen::<f32>() < cfg.rotation_prob {
            let angle = rng.gen_range(-cfg.rotation_degrees..=cfg.rotation_degrees);
            result = rotate(&result, angle);
        }

        if cfg.brightness_delta > 0.0 && rng.gen::<f32>() < cfg.brightness_prob {
            let shift = rng.gen_range(-cfg.brightness_delta..=cfg.brightness_delta) * 255.0;
            result = map_pixels(&result, |v, _| v + shift);
        }

        if cfg.contrast_delta > 0.0 && rng.gen::<f32>() < cfg.contrast_prob {
            let factor = 1.0 + rng.gen_range(-cfg.contrast_delta..=cfg.contrast_delta);
            let mean = mean_luminance(&result.to_rgb8());
            result = map_pixels(&result, |v, _| mean + factor * (v - mean));
        }

        if cfg.saturation_delta > 0.0 && rng.gen::<f32>() < cfg.saturation_prob {
            let factor = 1.0 + rng.gen_range(-cfg.saturation_delta..=cfg.saturation_delta);
            result = map_pixels(&result, |v, gray| gray + factor * (v - gray));
        }

        if cfg.blur_sigma > 0.0 && rng.gen::<f32>() < cfg.blur_prob {
            result = result.blur(cfg.blur_sigma);
        }

        if cfg.noise_std > 0.0 && rng.gen::<f32>() < cfg.noise_prob {
            result = add_noise(&result, cfg.noise_std * 255.0, rng);
        }

        result
    }
}

fn luminance(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn mean_luminance(rgb: &RgbImage) -> f32 {
    let count = (rgb.width() as f64 * rgb.height() as f64).max(1.0);
    let sum: f64 = rgb.pixels().map(|p| luminance(p) as f64).sum();
    (sum / count) as f32
}

/// Map every channel value; `f` receives the value and the pixel luminance
fn map_pixels<F: Fn(f32, f32) -> f32>(img: &DynamicImage, f: F) -> DynamicImage {
    let mut rgb = img.to_rgb8();
    for pixel in rgb.pixels_mut() {
        let gray = luminance(pixel);
        for c in 0..3 {
            pixel[c] = f(pixel[c] as f32, gray).round().clamp(0.0, 255.0) as u8;
        }
    }
    DynamicImage::ImageRgb8(rgb)
}

/// Rotate around the image center, filling uncovered corners with black
fn rotate(img: &DynamicImage, angle_degrees: f32) -> DynamicImage {
    if angle_degrees.abs() < 0.1 {
        return img.clone();
    }

    let (width, height) = img.dimensions();
    let rgb = img.to_rgb8();
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    let output = ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        bilinear_sample(&rgb, cx + dx * cos_a + dy * sin_a, cy - dx * sin_a + dy * cos_a)
    });

    DynamicImage::ImageRgb8(output)
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for (c, out) in result.iter_mut().enumerate() {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        *out = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(result)
}

fn add_noise(img: &DynamicImage, std: f32, rng: &mut ChaCha8Rng) -> DynamicImage {
    let mut rgb = img.to_rgb8();
    for pixel in rgb.pixels_mut() {
        // Box-Muller
        let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
        let u2: f32 = rng.gen();
        let noise = std * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
        for c in 0..3 {
            pixel[c] = (pixel[c] as f32 + noise).clamp(0.0, 255.0) as u8;
        }
    }
    DynamicImage::ImageRgb8(rgb)
}
