//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the 3-stride SCRFD model on a letterboxed RGB frame, decodes the
//! anchor-free outputs and suppresses overlapping boxes.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting a frame into the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size - new_w) / 2.0).floor(),
            pad_y: ((size - new_h) / 2.0).floor(),
        }
    }

    /// Map a point in model-input space back to the source frame.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Positions of the (score, bbox, kps) outputs for one stride.
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), model has {}",
                names.len()
            )));
        }

        Ok(Self { session, outputs: output_layout(&names) })
    }

    /// Detect faces in an RGB frame, highest confidence first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let letterbox = Letterbox::fit(frame.width(), frame.height());
        let input = preprocess(frame, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(&self.outputs) {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = tensor(score_idx, "scores")?;
            let bboxes = tensor(bbox_idx, "bboxes")?;
            let kps = tensor(kps_idx, "kps")?;
            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Letterbox an RGB frame into a normalised 1×3×640×640 tensor.
fn preprocess(frame: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let new_w = ((frame.width() as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((frame.height() as f32 * letterbox.scale).round() as u32).max(1);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    // Padding stays at 0.0, which is SCRFD_MEAN after normalisation.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    tensor
}

/// Resolve which model outputs hold score/bbox/kps for each stride.
///
/// Exports named `score_8`, `bbox_8`, `kps_8`, ... are mapped by name; anything
/// else uses the stock positional order [scores 8/16/32, bboxes, kps].
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let position = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let by_name: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((position("score", s)?, position("bbox", s)?, position("kps", s)?)))
        .collect();

    match by_name {
        Some(layout) => [layout[0], layout[1], layout[2]],
        None => {
            tracing::info!(?names, "SCRFD output names not recognised, using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode the above-threshold anchors of one stride into frame-space boxes.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE as usize / stride;
    let grid_h = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&idx| scores[idx] > SCRFD_CONFIDENCE_THRESHOLD)
        .filter_map(|idx| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * step;
            let cy = (cell / grid_w) as f32 * step;

            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.unmap(cx + d[2] * step, cy + d[3] * step);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(cx + k[i * 2] * step, cy + k[i * 2 + 1] * step))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[idx],
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}
