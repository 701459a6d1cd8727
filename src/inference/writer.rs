//! Result file writer
//!
//! One header row, then one row per image:
//! `path, name 1, confidence 1, ..., name k, confidence k`, confidences in
//! percent with one decimal.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::labels::Prediction;
use crate::utils::error::{PipelineError, Result};

/// Header row for `k` ranked predictions
pub fn header(k: usize, sep: &str) -> String {
    let mut fields = vec!["Image".to_string()];
    for j in 1..=k {
        fields.push(format!("Prediction {}", j));
        fields.push(format!("Confidence {} (en %)", j));
    }
    fields.join(sep)
}

/// Row of one image
pub fn row(path: &Path, predictions: &[Prediction], k: usize, sep: &str) -> String {
    let mut fields = vec![path.display().to_string()];
    for prediction in predictions.iter().take(k) {
        fields.push(prediction.class_name.clone());
        fields.push(format!("{:.1}", prediction.confidence * 100.0));
    }
    fields.join(sep)
}

/// Write `{dstpath}/{filename}` and return its path
///
/// The number of ranks comes from the first result.
pub fn save_infer(
    dstpath: &Path,
    filename: &str,
    output: &[Vec<Prediction>],
    images_paths: &[PathBuf],
    sep: &str,
) -> Result<PathBuf> {
    let k = output.first().map(Vec::len).ok_or(PipelineError::EmptyResults)?;
    if images_paths.len() != output.len() {
        return Err(PipelineError::Config(format!(
            "{} results but {} image paths",
            output.len(),
            images_paths.len()
        )));
    }

    std::fs::create_dir_all(dstpath)?;
    let file = dstpath.join(filename);
    let mut writer = BufWriter::new(File::create(&file)?);

    writeln!(writer, "{}", header(k, sep))?;
    for (predictions, path) in output.iter().zip(images_paths) {
        writeln!(writer, "{}", row(path, predictions, k, sep))?;
    }
    writer.flush()?;

    info!("Inference results saved at {:?}", file);
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prediction(index: usize, name: &str, confidence: f32) -> Prediction {
        Prediction {
            class_index: index,
            class_name: name.to_string(),
            confidence,
        }
    }

    fn two_images() -> (Vec<Vec<Prediction>>, Vec<PathBuf>) {
        let output = vec![
            vec![prediction(1, "dog", 0.7), prediction(0, "cat", 0.2), prediction(2, "bird", 0.1)],
            vec![prediction(0, "cat", 0.456), prediction(2, "bird", 0.3), prediction(1, "dog", 0.244)],
        ];
        let paths = vec![PathBuf::from("imgs/a.jpg"), PathBuf::from("imgs/b.jpg")];
        (output, paths)
    }

    #[test]
    fn test_header() {
        assert_eq!(
            header(2, ","),
            "Image,Prediction 1,Confidence 1 (en %),Prediction 2,Confidence 2 (en %)"
        );
    }

    #[test]
    fn test_file_layout() {
        let dir = TempDir::new().unwrap();
        let (output, paths) = two_images();

        let file = save_infer(dir.path(), "results.csv", &output, &paths, ",").unwrap();
        let content = std::fs::read_to_string(&file).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 3);
        for line in &lines {
            assert_eq!(line.split(',').count(), 2 * 3 + 1);
            assert!(!line.ends_with(','));
        }
        assert_eq!(lines[1], "imgs/a.jpg,dog,70.0,cat,20.0,bird,10.0");
        assert_eq!(lines[2], "imgs/b.jpg,cat,45.6,bird,30.0,dog,24.4");
    }

    #[test]
    fn test_custom_separator() {
        let dir = TempDir::new().unwrap();
        let (output, paths) = two_images();

        let file = save_infer(&dir.path().join("out"), "r.txt", &output, &paths, " | ").unwrap();
        let content = std::fs::read_to_string(file).unwrap();
        let first = content.lines().next().unwrap();
        assert!(first.starts_with("Image | Prediction 1 | "));
        assert!(!first.ends_with(" | "));
    }

    #[test]
    fn test_empty_results() {
        let dir = TempDir::new().unwrap();
        let err = save_infer(dir.path(), "r.csv", &[], &[], ",").unwrap_err();
        assert!(matches!(err, PipelineError::EmptyResults));
        assert!(!dir.path().join("r.csv").exists());
    }

    #[test]
    fn test_path_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let (output, mut paths) = two_images();
        paths.pop();
        assert!(save_infer(dir.path(), "r.csv", &output, &paths, ",").is_err());
    }
}
