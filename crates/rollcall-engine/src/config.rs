use rollcall_core::DedupPolicy;
use std::path::PathBuf;
use std::str::FromStr;

/// Per-entry-point defaults that differ between the console and the dashboard.
#[derive(Debug, Clone, Copy)]
pub struct EntryDefaults {
    pub frame_skip: u32,
    pub dedup_policy: DedupPolicy,
}

/// Console session: analyse every 5th frame, re-read the ledger on each write.
pub const CONSOLE_DEFAULTS: EntryDefaults = EntryDefaults {
    frame_skip: 5,
    dedup_policy: DedupPolicy::EveryWrite,
};

/// Browser dashboard: analyse every 10th frame, read the ledger once per run.
pub const DASHBOARD_DEFAULTS: EntryDefaults = EntryDefaults {
    frame_skip: 10,
    dedup_policy: DedupPolicy::OncePerRun,
};

/// Euclidean distance below which a unit-length ArcFace embedding is accepted
/// (cosine similarity ≈ 0.40).
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.10;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Directory of reference face images.
    pub gallery_dir: PathBuf,
    /// Attendance CSV file.
    pub attendance_file: PathBuf,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Analyse every Nth frame.
    pub frame_skip: u32,
    pub dedup_policy: DedupPolicy,
    /// TrueType font for label text; labels are strip-only without one.
    pub font_path: Option<PathBuf>,
    /// Dashboard listen address.
    pub listen_addr: String,
    /// Console preview image, rewritten on every presented frame.
    pub preview_path: PathBuf,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env(defaults: EntryDefaults) -> Self {
        Self::from_lookup(defaults, |key| std::env::var(key).ok())
    }

    fn from_lookup(defaults: EntryDefaults, var: impl Fn(&str) -> Option<String>) -> Self {
        let dedup_policy = match var("ROLLCALL_DEDUP_POLICY").map(|v| v.parse::<DedupPolicy>()) {
            Some(Ok(policy)) => policy,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "ignoring ROLLCALL_DEDUP_POLICY");
                defaults.dedup_policy
            }
            None => defaults.dedup_policy,
        };

        Self {
            camera_device: var("ROLLCALL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir: var("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(rollcall_core::default_model_dir),
            gallery_dir: var("ROLLCALL_GALLERY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("Training_images")),
            attendance_file: var("ROLLCALL_ATTENDANCE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("Attendance.csv")),
            match_threshold: parse_var(&var, "ROLLCALL_MATCH_THRESHOLD").unwrap_or(DEFAULT_MATCH_THRESHOLD),
            frame_skip: parse_var(&var, "ROLLCALL_FRAME_SKIP")
                .unwrap_or(defaults.frame_skip)
                .max(1),
            dedup_policy,
            font_path: var("ROLLCALL_FONT").map(PathBuf::from),
            listen_addr: var("ROLLCALL_LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            preview_path: var("ROLLCALL_PREVIEW_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("rollcall-preview.jpg")),
        }
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.parse().ok())
}
