//! Display surfaces that receive every presented frame.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, RgbImage};
use rollcall_core::Observation;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const JPEG_QUALITY: u8 = 80;

/// Receives frames after annotation, one call per frame read.
///
/// `observations` is `Some` only for analysed frames; skipped frames are
/// presented raw with `None`.
pub trait FrameSink: Send {
    fn present(&mut self, frame: &RgbImage, observations: Option<&[Observation]>);
}

pub fn encode_jpeg(frame: &RgbImage) -> ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(frame)?;
    Ok(buf)
}

/// Latest presented frame as seen by a reader on another thread.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub jpeg: Option<Vec<u8>>,
    /// Observations of the most recent analysed frame.
    pub observations: Vec<Observation>,
    pub frames: u64,
}

pub type SharedSnapshot = Arc<RwLock<Snapshot>>;

/// Keeps the latest frame as JPEG in shared memory for the dashboard.
pub struct SnapshotSink {
    shared: SharedSnapshot,
}

impl SnapshotSink {
    pub fn new() -> (Self, SharedSnapshot) {
        let shared = SharedSnapshot::default();
        (Self { shared: Arc::clone(&shared) }, shared)
    }
}

impl FrameSink for SnapshotSink {
    fn present(&mut self, frame: &RgbImage, observations: Option<&[Observation]>) {
        let jpeg = match encode_jpeg(frame) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode snapshot");
                return;
            }
        };

        let Ok(mut snapshot) = self.shared.write() else {
            tracing::error!("snapshot lock poisoned");
            return;
        };
        snapshot.jpeg = Some(jpeg);
        snapshot.frames += 1;
        if let Some(observations) = observations {
            snapshot.observations = observations.to_vec();
        }
    }
}

/// Rewrites a JPEG preview file on every presented frame (console mode).
pub struct PreviewFileSink {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl PreviewFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self { path, tmp_path: PathBuf::from(tmp) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, frame: &RgbImage) -> Result<(), String> {
        let jpeg = encode_jpeg(frame).map_err(|e| e.to_string())?;
        std::fs::write(&self.tmp_path, jpeg).map_err(|e| e.to_string())?;
        // Rename so viewers never see a half-written file.
        std::fs::rename(&self.tmp_path, &self.path).map_err(|e| e.to_string())
    }
}

impl FrameSink for PreviewFileSink {
    fn present(&mut self, frame: &RgbImage, observations: Option<&[Observation]>) {
        if let Err(e) = self.write(frame) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write preview");
            return;
        }
        if let Some(observations) = observations {
            for obs in observations {
                tracing::debug!(identity = %obs.identity, distance = ?obs.distance, "face");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rollcall_core::{FaceLocation, Identity};

    fn observation() -> Observation {
        Observation {
            location: FaceLocation { top: 1, right: 5, bottom: 5, left: 1 },
            identity: Identity::Unknown,
            distance: None,
        }
    }

    #[test]
    fn test_encode_jpeg_decodes_back() {
        let frame = RgbImage::from_pixel(16, 8, Rgb([200, 30, 30]));
        let jpeg = encode_jpeg(&frame).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_snapshot_keeps_last_analysed_observations() {
        let (mut sink, shared) = SnapshotSink::new();
        let frame = RgbImage::new(8, 8);

        sink.present(&frame, Some(&[observation()]));
        sink.present(&frame, None);

        let snapshot = shared.read().unwrap();
        assert_eq!(snapshot.frames, 2);
        assert!(snapshot.jpeg.is_some());
        assert_eq!(snapshot.observations.len(), 1);
    }

    #[test]
    fn test_snapshot_empty_analysis_clears_observations() {
        let (mut sink, shared) = SnapshotSink::new();
        let frame = RgbImage::new(8, 8);

        sink.present(&frame, Some(&[observation()]));
        sink.present(&frame, Some(&[]));

        assert!(shared.read().unwrap().observations.is_empty());
    }

    #[test]
    fn test_preview_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PreviewFileSink::new(dir.path().join("preview.jpg"));

        sink.present(&RgbImage::new(8, 8), None);

        assert!(sink.path().exists());
        assert!(!dir.path().join("preview.jpg.tmp").exists());
    }
}
