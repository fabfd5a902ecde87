use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are in the pixel space of the image handed to the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer (top, right, bottom, left) box clamped to a `width`×`height` image.
    pub fn location(&self, width: u32, height: u32) -> FaceLocation {
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        FaceLocation {
            top: clamp(self.y, height),
            right: clamp(self.x + self.width, width),
            bottom: clamp(self.y + self.height, height),
            left: clamp(self.x, width),
        }
    }
}

/// Face rectangle as (top, right, bottom, left) pixel edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceLocation {
    /// Multiply all four edges by `factor`, mapping a box found on a
    /// downscaled frame back onto the original frame.
    pub fn upscale(self, factor: u32) -> Self {
        Self {
            top: self.top * factor,
            right: self.right * factor,
            bottom: self.bottom * factor,
            left: self.left * factor,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One reference face: identity (image file stem) plus its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub identity: String,
    pub embedding: Embedding,
}

/// Resolved identity of an observed face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    /// Label drawn on the frame and written to the ledger, or `None` for strangers.
    pub fn label(&self) -> Option<String> {
        match self {
            Identity::Known(_) => Some(self.to_string()),
            Identity::Unknown => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Known(name) => f.write_str(&name.to_uppercase()),
            Identity::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// A face seen on an analysed frame, in original-frame coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub location: FaceLocation,
    pub identity: Identity,
    /// Distance to the nearest gallery entry, if the gallery was non-empty.
    pub distance: Option<f32>,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub identity: Identity,
    /// Index of the nearest gallery entry, whether or not it was accepted.
    pub index: Option<usize>,
    /// Euclidean distance to the nearest gallery entry.
    pub distance: Option<f32>,
}

/// Strategy for comparing a query embedding against a gallery of known faces.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// The nearest entry wins only if its own distance is strictly below the
/// threshold; otherwise the query is `Unknown` even though a nearest entry exists.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let distances: Vec<f32> = gallery
            .iter()
            .map(|entry| query.euclidean_distance(&entry.embedding))
            .collect();
        let accepted: Vec<bool> = distances.iter().map(|&d| d < threshold).collect();

        // First index wins on ties.
        let mut best: Option<(usize, f32)> = None;
        for (i, &d) in distances.iter().enumerate() {
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        match best {
            Some((idx, dist)) if accepted[idx] => MatchResult {
                identity: Identity::Known(gallery[idx].identity.clone()),
                index: Some(idx),
                distance: Some(dist),
            },
            Some((idx, dist)) => MatchResult {
                identity: Identity::Unknown,
                index: Some(idx),
                distance: Some(dist),
            },
            None => MatchResult {
                identity: Identity::Unknown,
                index: None,
                distance: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: f32 = 0.6;

    fn entry(identity: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry { identity: identity.into(), embedding: Embedding::new(values) }
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_identical_embedding_matches() {
        let gallery = vec![entry("alice", vec![0.2, 0.4, 0.1])];
        let query = Embedding::new(vec![0.2, 0.4, 0.1]);
        let result = EuclideanMatcher.compare(&query, &gallery, T);
        assert_eq!(result.identity, Identity::Known("alice".into()));
        assert_eq!(result.distance, Some(0.0));
    }

    #[test]
    fn test_close_query_matches_upper_cased() {
        let gallery = vec![entry("alice", vec![0.0, 0.0])];
        let query = Embedding::new(vec![0.3 * T, 0.0]);
        let result = EuclideanMatcher.compare(&query, &gallery, T);
        assert_eq!(result.identity.to_string(), "ALICE");
    }

    #[test]
    fn test_far_query_is_unknown_despite_argmin() {
        let gallery = vec![entry("alice", vec![0.0, 0.0])];
        let query = Embedding::new(vec![1.5 * T, 0.0]);
        let result = EuclideanMatcher.compare(&query, &gallery, T);
        assert_eq!(result.identity, Identity::Unknown);
        assert_eq!(result.index, Some(0));
        assert_eq!(result.identity.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_label_matches_display_for_known_only() {
        let known = Identity::Known("Alice".into());
        assert_eq!(known.label().as_deref(), Some("ALICE"));
        assert_eq!(known.label(), Some(known.to_string()));
        assert_eq!(Identity::Unknown.label(), None);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let gallery = vec![entry("alice", vec![0.0])];
        let query = Embedding::new(vec![0.5]);
        assert_eq!(EuclideanMatcher.compare(&query, &gallery, 0.5).identity, Identity::Unknown);
    }

    #[test]
    fn test_nearest_entry_wins() {
        let gallery = vec![
            entry("decoy", vec![0.5, 0.0]),
            entry("bob", vec![0.1, 0.0]),
            entry("carol", vec![0.0, 0.55]),
        ];
        let query = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.compare(&query, &gallery, T);
        assert_eq!(result.identity, Identity::Known("bob".into()));
        assert_eq!(result.index, Some(1));
    }

    #[test]
    fn test_tie_picks_first_index() {
        let gallery = vec![entry("first", vec![1.0]), entry("second", vec![-1.0])];
        let query = Embedding::new(vec![0.0]);
        let result = EuclideanMatcher.compare(&query, &gallery, 2.0);
        assert_eq!(result.index, Some(0));
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let result = EuclideanMatcher.compare(&query, &[], T);
        assert_eq!(result.identity, Identity::Unknown);
        assert!(result.index.is_none());
        assert!(result.distance.is_none());
    }

    #[test]
    fn test_location_clamped_to_image() {
        let bbox = BoundingBox {
            x: -3.0, y: 10.4, width: 50.0, height: 200.0,
            confidence: 0.9, landmarks: None,
        };
        let loc = bbox.location(40, 120);
        assert_eq!(loc, FaceLocation { top: 10, right: 40, bottom: 120, left: 0 });
    }

    #[test]
    fn test_upscale_multiplies_every_edge() {
        let loc = FaceLocation { top: 10, right: 45, bottom: 52, left: 7 };
        assert_eq!(loc.upscale(4), FaceLocation { top: 40, right: 180, bottom: 208, left: 28 });
        assert_eq!(loc.upscale(4).width(), loc.width() * 4);
    }
}
