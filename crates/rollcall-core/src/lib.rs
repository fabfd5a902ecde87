//! rollcall-core — Face gallery, matching and attendance ledger.
//!
//! Face detection (SCRFD) and recognition (ArcFace) run via ONNX Runtime
//! behind the [`Embedder`] trait; the gallery, matcher and ledger only see
//! embeddings and identities.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod gallery;
pub mod ledger;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use embedder::{EmbedError, Embedder, OnnxEmbedder};
pub use gallery::{Gallery, GalleryError};
pub use ledger::{DedupPolicy, Ledger, LedgerError, RecordOutcome};
pub use types::{
    BoundingBox, Embedding, EuclideanMatcher, FaceLocation, GalleryEntry, Identity, MatchResult,
    Matcher, Observation,
};

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
