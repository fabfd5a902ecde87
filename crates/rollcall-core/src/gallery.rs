//! Reference face gallery, loaded once at startup from a directory of images.

use crate::embedder::{EmbedError, Embedder};
use crate::types::GalleryEntry;
use image::{ImageError, ImageReader, RgbImage};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("failed to read gallery directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("embedding failed for {path}: {source}")]
    Embed {
        path: PathBuf,
        source: EmbedError,
    },
}

/// Known faces, in directory iteration order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    /// Embed every image in `dir` that decodes and contains a face.
    ///
    /// Undecodable files and faceless images are skipped without error. The
    /// identity of an entry is its file name without extension.
    pub fn load(dir: &Path, embedder: &mut dyn Embedder) -> Result<Self, GalleryError> {
        if !dir.is_dir() {
            return Err(GalleryError::DirectoryNotFound(dir.to_path_buf()));
        }
        let read_dir = std::fs::read_dir(dir).map_err(|source| GalleryError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        for dirent in read_dir {
            let dirent = dirent.map_err(|source| GalleryError::ReadDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = dirent.path();
            if !path.is_file() {
                continue;
            }
            let Some(identity) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let image = match decode_rgb(&path) {
                Ok(img) => img,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping undecodable file");
                    continue;
                }
            };

            let embedding = embedder
                .encode_first(&image)
                .map_err(|source| GalleryError::Embed { path: path.clone(), source })?;
            let Some(embedding) = embedding else {
                tracing::debug!(path = %path.display(), "skipping image with no detectable face");
                continue;
            };

            if !seen.insert(identity.clone()) {
                tracing::warn!(identity, path = %path.display(), "identity appears more than once in gallery");
            }
            entries.push(GalleryEntry { identity, embedding });
        }

        tracing::info!(dir = %dir.display(), entries = entries.len(), "gallery loaded");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn identities(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.identity.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode by content rather than extension, so `dave` or `erin.photo` still load.
fn decode_rgb(path: &Path) -> Result<RgbImage, ImageError> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?.into_rgb8())
}
