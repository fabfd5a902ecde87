//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional, L2-normalised embeddings from aligned face
//! crops using the w600k_r50 model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download w600k_r50.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract the embedding of one detected face in an RGB frame.
    pub fn extract(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(frame, landmarks);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

/// Convert a 112×112 RGB crop into a normalised NCHW tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_shape() {
        let crop = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
        assert_eq!(preprocess(&crop).shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_keeps_channel_order() {
        let crop = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([255, 128, 0]));
        let tensor = preprocess(&crop);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] - (128.0 - ARCFACE_MEAN) / ARCFACE_STD).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
