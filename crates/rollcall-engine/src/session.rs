//! Idle/Running capture session: read, analyse every Nth frame, mark, present.

use crate::annotate::{AnnotateError, Annotator};
use crate::config::Config;
use crate::sink::FrameSink;
use image::RgbImage;
use rollcall_core::{
    EmbedError, Embedder, EuclideanMatcher, Gallery, GalleryError, Ledger, LedgerError, Matcher,
    Observation, OnnxEmbedder, RecordOutcome,
};
use rollcall_hw::frame::downscale;
use rollcall_hw::{CameraError, CameraOpener, Frame, FrameSource, V4lOpener};
use serde::Serialize;
use thiserror::Error;

/// Analysed frames are shrunk by this linear factor before detection.
pub const DOWNSCALE_DIVISOR: u32 = 4;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("session is not running")]
    NotRunning,
}

/// Failures while assembling a session from configuration. All are fatal at startup.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("failed to load face models: {0}")]
    Models(#[from] EmbedError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Font(#[from] AnnotateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Analyse every Nth frame read; clamped to at least 1.
    pub frame_skip: u32,
    pub match_threshold: f32,
}

/// What happened during one [`Session::step`].
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Frames read since the session started, including this one.
    pub sequence: u64,
    pub analysed: bool,
    pub observations: Vec<Observation>,
    /// Identities appended to the ledger by this step.
    pub newly_marked: Vec<String>,
}

/// Capture session state machine.
///
/// The camera is owned only while Running: [`start`](Self::start) opens it
/// and [`stop`](Self::stop) or a failed read drops it.
pub struct Session<O: CameraOpener, E: Embedder> {
    opener: O,
    embedder: E,
    gallery: Gallery,
    annotator: Annotator,
    settings: SessionSettings,
    source: Option<O::Source>,
    frame_count: u64,
    frames_read: u64,
    frames_analysed: u64,
}

impl<O: CameraOpener, E: Embedder> Session<O, E> {
    pub fn new(
        opener: O,
        embedder: E,
        gallery: Gallery,
        annotator: Annotator,
        settings: SessionSettings,
    ) -> Self {
        let settings = SessionSettings {
            frame_skip: settings.frame_skip.max(1),
            ..settings
        };
        Self {
            opener,
            embedder,
            gallery,
            annotator,
            settings,
            source: None,
            frame_count: 0,
            frames_read: 0,
            frames_analysed: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.source.is_some() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Total frames read across all runs.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Total frames analysed across all runs.
    pub fn frames_analysed(&self) -> u64 {
        self.frames_analysed
    }

    /// Idle → Running. Starting an already running session is a no-op.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.source.is_some() {
            tracing::debug!("start requested while running");
            return Ok(());
        }
        let source = self.opener.open()?;
        self.source = Some(source);
        self.frame_count = 0;
        tracing::info!(
            frame_skip = self.settings.frame_skip,
            gallery = self.gallery.len(),
            "session started"
        );
        Ok(())
    }

    /// Running → Idle, releasing the camera. Returns whether a run was stopped.
    pub fn stop(&mut self) -> bool {
        let was_running = self.source.take().is_some();
        if was_running {
            tracing::info!(frames = self.frame_count, "session stopped");
        }
        was_running
    }

    /// Read, optionally analyse, and present one frame.
    ///
    /// A camera or ledger failure ends the run (the session is Idle when the
    /// error is returned). Embedder failures only skip annotation of that frame.
    pub fn step(&mut self, ledger: &mut Ledger, sink: &mut dyn FrameSink) -> Result<StepReport, SessionError> {
        let source = self.source.as_mut().ok_or(SessionError::NotRunning)?;
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed; stopping session");
                self.source = None;
                return Err(e.into());
            }
        };

        self.frame_count += 1;
        self.frames_read += 1;
        let Frame { image: mut image, sequence: camera_sequence } = frame;

        let analysed = self.frame_count % u64::from(self.settings.frame_skip) == 0;
        if !analysed {
            sink.present(&image, None);
            return Ok(StepReport {
                sequence: self.frame_count,
                analysed,
                observations: Vec::new(),
                newly_marked: Vec::new(),
            });
        }

        self.frames_analysed += 1;
        let observations = match self.analyse(&image) {
            Ok(observations) => observations,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    sequence = self.frame_count,
                    camera_sequence,
                    "analysis failed; presenting frame as is"
                );
                sink.present(&image, None);
                return Ok(StepReport {
                    sequence: self.frame_count,
                    analysed,
                    observations: Vec::new(),
                    newly_marked: Vec::new(),
                });
            }
        };

        self.annotator.draw(&mut image, &observations);

        let mut newly_marked = Vec::new();
        for label in observations.iter().filter_map(|o| o.identity.label()) {
            match ledger.record_if_new(&label) {
                Ok(RecordOutcome::Appended(_)) => newly_marked.push(label),
                Ok(RecordOutcome::AlreadyRecorded) => {}
                Err(e) => {
                    tracing::error!(error = %e, "failed to write attendance; stopping session");
                    self.source = None;
                    return Err(e.into());
                }
            }
        }

        sink.present(&image, Some(&observations));

        Ok(StepReport {
            sequence: self.frame_count,
            analysed,
            observations,
            newly_marked,
        })
    }

    /// Detect and identify faces on a downscaled copy of `image`, returning
    /// locations in `image` coordinates.
    fn analyse(&mut self, image: &RgbImage) -> Result<Vec<Observation>, EmbedError> {
        let small = downscale(image, DOWNSCALE_DIVISOR);
        let faces = self.embedder.detect(&small)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.embedder.embed(&small, &faces)?;

        let matcher = EuclideanMatcher;
        let observations = faces
            .iter()
            .zip(&embeddings)
            .map(|(face, embedding)| {
                let result =
                    matcher.compare(embedding, self.gallery.entries(), self.settings.match_threshold);
                Observation {
                    location: face
                        .location(small.width(), small.height())
                        .upscale(DOWNSCALE_DIVISOR),
                    identity: result.identity,
                    distance: result.distance,
                }
            })
            .collect();
        Ok(observations)
    }
}

impl Session<V4lOpener, OnnxEmbedder> {
    /// Load the ONNX models, embed the gallery and prepare the webcam opener.
    /// The camera itself is opened only on [`start`](Self::start).
    pub fn from_config(config: &Config) -> Result<Self, SetupError> {
        let mut embedder = OnnxEmbedder::load(&config.model_dir)?;
        let gallery = Gallery::load(&config.gallery_dir, &mut embedder)?;
        if gallery.is_empty() {
            tracing::warn!(dir = %config.gallery_dir.display(), "gallery is empty; every face will be UNKNOWN");
        }
        let annotator = Annotator::load(config.font_path.as_deref())?;

        Ok(Self::new(
            V4lOpener::new(config.camera_device.clone()),
            embedder,
            gallery,
            annotator,
            SessionSettings {
                frame_skip: config.frame_skip,
                match_threshold: config.match_threshold,
            },
        ))
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use image::Rgb;
    use rollcall_core::{BoundingBox, Embedding, GalleryEntry};
    use rollcall_hw::Frame;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// One face over the middle half of any frame whose top-left pixel is not
    /// black; its embedding is that pixel's RGB scaled to [0, 1].
    pub struct ColorEmbedder;

    impl Embedder for ColorEmbedder {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedError> {
            if image.get_pixel(0, 0).0 == [0, 0, 0] {
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

    /// Embedder whose inference always fails.
    pub struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, EmbedError> {
            Err(EmbedError::Other("model crashed".into()))
        }

        fn embed(&mut self, _image: &RgbImage, _faces: &[BoundingBox]) -> Result<Vec<Embedding>, EmbedError> {
            Err(EmbedError::Other("model crashed".into()))
        }
    }

    pub fn gallery_entry(name: &str, color: [u8; 3]) -> GalleryEntry {
        GalleryEntry {
            identity: name.to_string(),
            embedding: Embedding::new(color.iter().map(|&c| c as f32 / 255.0).collect()),
        }
    }

    pub fn solid(color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(64, 48, Rgb(color))
    }

    /// Plays back a fixed list of frames, then fails like an unplugged camera.
    pub struct ScriptedSource {
        frames: VecDeque<RgbImage>,
        open: Arc<AtomicUsize>,
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            self.frames
                .pop_front()
                .map(|image| Frame::new(image, 0))
                .ok_or_else(|| CameraError::CaptureFailed("device unplugged".into()))
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Hands each opened source the same script and tracks how many are live.
    pub struct ScriptedOpener {
        pub script: Vec<RgbImage>,
        pub open: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl ScriptedOpener {
        pub fn new(script: Vec<RgbImage>) -> Self {
            Self { script, open: Arc::new(AtomicUsize::new(0)), fail: false }
        }
    }

    impl CameraOpener for ScriptedOpener {
        type Source = ScriptedSource;

        fn open(&mut self) -> Result<ScriptedSource, CameraError> {
            if self.fail {
                return Err(CameraError::DeviceNotFound("/dev/video9".into()));
            }
            self.open.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedSource {
                frames: self.script.iter().cloned().collect(),
                open: Arc::clone(&self.open),
            })
        }
    }

    /// Records what it was shown.
    #[derive(Default)]
    pub struct RecordingSink {
        pub presented: Vec<Option<usize>>,
    }

    impl FrameSink for RecordingSink {
        fn present(&mut self, _frame: &RgbImage, observations: Option<&[Observation]>) {
            self.presented.push(observations.map(<[Observation]>::len));
        }
    }
}
