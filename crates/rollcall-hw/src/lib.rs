//! rollcall-hw — Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access and conversion of raw capture buffers
//! into RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraOpener, DeviceInfo, FrameSource, PixelFormat, V4lOpener};
pub use frame::Frame;
