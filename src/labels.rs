//! Label and background registries
//!
//! The position of a name in its registry is the integer used for it in
//! every tensor, so a registry is built once per run and shared by reference.

use burn::prelude::*;
use serde::Serialize;

use crate::utils::error::{PipelineError, Result};

/// Ordered class names plus ordered background names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    labels: Vec<String>,
    backgrounds: Vec<String>,
}

/// One ranked prediction for one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class_index: usize,
    pub class_name: String,
    /// Probability in [0, 1]
    pub confidence: f32,
}

impl Labels {
    pub fn new(labels: Vec<String>, backgrounds: Vec<String>) -> Self {
        Self {
            labels,
            backgrounds,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn backgrounds(&self) -> &[String] {
        &self.backgrounds
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    pub fn num_backgrounds(&self) -> usize {
        self.backgrounds.len()
    }

    /// Class id of a label name
    pub fn label_index(&self, name: &str) -> Result<usize> {
        self.labels
            .iter()
            .position(|l| l == name)
            .ok_or_else(|| PipelineError::UnknownLabel(name.to_string()))
    }

    /// Background id of a background name
    pub fn background_index(&self, name: &str) -> Result<usize> {
        self.backgrounds
            .iter()
            .position(|b| b == name)
            .ok_or_else(|| PipelineError::UnknownBackground(name.to_string()))
    }

    pub fn label_name(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// The `k` most probable classes of each row of `probs` (batch, num_classes),
    /// sorted by decreasing confidence
    pub fn topk_predictions<B: Backend>(
        &self,
        probs: Tensor<B, 2>,
        k: usize,
    ) -> Result<Vec<Vec<Prediction>>> {
        let [batch, classes] = probs.dims();
        if classes != self.num_classes() {
            return Err(PipelineError::Model(format!(
                "model outputs {} classes but {} labels are registered",
                classes,
                self.num_classes()
            )));
        }
        if k == 0 || k > classes {
            return Err(PipelineError::Config(format!(
                "top_k must be in 1..={} but is {}",
                classes, k
            )));
        }

        let (values, indices) = probs.topk_with_indices(k, 1);
        let values: Vec<f32> = values.into_data().iter::<f32>().collect();
        let indices: Vec<i64> = indices.into_data().iter::<i64>().collect();

        let mut output = Vec::with_capacity(batch);
        for (row_values, row_indices) in values.chunks(k).zip(indices.chunks(k)) {
            let row = row_values
                .iter()
                .zip(row_indices)
                .map(|(&confidence, &index)| {
                    let class_index = index as usize;
                    let class_name = self
                        .label_name(class_index)
                        .ok_or_else(|| PipelineError::UnknownLabel(format!("class #{}", index)))?
                        .to_string();
                    Ok(Prediction {
                        class_index,
                        class_name,
                        confidence,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            output.push(row);
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Labels {
        Labels::new(
            vec!["cat".to_string(), "dog".to_string(), "fox".to_string()],
            vec!["indoor".to_string(), "outdoor".to_string()],
        )
    }

    #[test]
    fn test_index_lookup() {
        let labels = registry();
        assert_eq!(labels.label_index("dog").unwrap(), 1);
        assert_eq!(labels.background_index("outdoor").unwrap(), 1);
        assert_eq!(labels.label_name(2), Some("fox"));
        assert_eq!(labels.label_name(3), None);
    }

    #[test]
    fn test_unknown_names() {
        let labels = registry();
        assert!(matches!(labels.label_index("cow"), Err(PipelineError::UnknownLabel(_))));
        assert!(matches!(
            labels.background_index("garden"),
            Err(PipelineError::UnknownBackground(_))
        ));
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_topk_predictions() {
        use burn_ndarray::NdArray;

        let device = Default::default();
        let probs = Tensor::<NdArray, 2>::from_floats([[0.1, 0.6, 0.3], [0.7, 0.2, 0.1]], &device);
        let predictions = registry().topk_predictions(probs, 2).unwrap();

        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0][0].class_name, "dog");
        assert_eq!(predictions[0][1].class_name, "fox");
        assert_eq!(predictions[1][0].class_index, 0);
        assert!((predictions[1][0].confidence - 0.7).abs() < 1e-6);
        assert!(predictions[0][0].confidence >= predictions[0][1].confidence);
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_topk_rejects_bad_k() {
        use burn_ndarray::NdArray;

        let device = Default::default();
        let probs = Tensor::<NdArray, 2>::from_floats([[0.5, 0.3, 0.2]], &device);
        assert!(registry().topk_predictions(probs.clone(), 0).is_err());
        assert!(registry().topk_predictions(probs, 4).is_err());
    }
}
