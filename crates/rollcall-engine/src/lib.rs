//! rollcall-engine — Capture session, annotation and display sinks.
//!
//! A [`Session`] owns the camera while Running and is driven one frame at a
//! time; [`spawn_engine`] runs it on its own thread behind an async handle
//! shared by the console and the dashboard.

pub mod annotate;
pub mod config;
pub mod engine;
pub mod session;
pub mod sink;

pub use annotate::{AnnotateError, Annotator};
pub use config::{Config, EntryDefaults, CONSOLE_DEFAULTS, DASHBOARD_DEFAULTS, DEFAULT_MATCH_THRESHOLD};
pub use engine::{spawn_engine, EngineError, EngineHandle, EngineStatus};
pub use session::{
    Session, SessionError, SessionSettings, SessionState, SetupError, StepReport, DOWNSCALE_DIVISOR,
};
pub use sink::{encode_jpeg, FrameSink, PreviewFileSink, SharedSnapshot, Snapshot, SnapshotSink};
