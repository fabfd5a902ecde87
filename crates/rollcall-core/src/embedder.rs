//! Face embedding capability.
//!
//! Everything above the model (gallery loading, matching, the capture loop)
//! talks to an [`Embedder`], so tests can swap in a deterministic fake.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// Detects faces in an image and turns each detected face into an embedding.
pub trait Embedder {
    /// Locate faces, in the pixel space of `image`.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedError>;

    /// One embedding per box in `faces`, in the same order.
    fn embed(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EmbedError>;

    /// Embedding of the most confident face in `image`, or `None` if there is no face.
    fn encode_first(&mut self, image: &RgbImage) -> Result<Option<Embedding>, EmbedError> {
        let faces = self.detect(image)?;
        let Some(face) = faces.into_iter().next() else {
            return Ok(None);
        };
        Ok(self.embed(image, std::slice::from_ref(&face))?.into_iter().next())
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedError> {
        (**self).detect(image)
    }

    fn embed(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EmbedError> {
        (**self).embed(image, faces)
    }
}

/// SCRFD + ArcFace embedder running on ONNX Runtime.
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedError> {
        let scrfd = model_dir.join(DETECTOR_MODEL_FILE);
        let arcface = model_dir.join(RECOGNIZER_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&arcface.to_string_lossy())?;
        tracing::info!(model_dir = %model_dir.display(), "face models loaded");

        Ok(Self { detector, recognizer })
    }
}

impl Embedder for OnnxEmbedder {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EmbedError> {
        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(EmbedError::from))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Deterministic embedder for tests.
    ///
    /// An image is "faceless" when its top-left pixel is pure black. Otherwise it
    /// holds one face covering the middle half of the image, whose embedding is
    /// the top-left pixel's RGB channels scaled to [0, 1].
    pub struct FakeEmbedder;

    impl Embedder for FakeEmbedder {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedError> {
            if image.width() == 0 || image.get_pixel(0, 0).0 == [0, 0, 0] {
                return Ok(Vec::new());
            }
            let (w, h) = (image.width() as f32, image.height() as f32);
            Ok(vec![BoundingBox {
                x: w / 4.0,
                y: h / 4.0,
                width: w / 2.0,
                height: h / 2.0,
                confidence: 0.99,
                landmarks: None,
            }])
        }

        fn embed(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EmbedError> {
            let px = image.get_pixel(0, 0).0;
            Ok(faces
                .iter()
                .map(|_| Embedding::new(px.iter().map(|&c| c as f32 / 255.0).collect()))
                .collect())
        }
    }

    #[test]
    fn test_encode_first_without_face() {
        let img = RgbImage::new(8, 8);
        assert!(FakeEmbedder.encode_first(&img).unwrap().is_none());
    }

    #[test]
    fn test_encode_first_with_face() {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([255, 0, 51]));
        let emb = FakeEmbedder.encode_first(&img).unwrap().unwrap();
        assert_eq!(emb.values, vec![1.0, 0.0, 0.2]);
    }
}
