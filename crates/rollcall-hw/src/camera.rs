//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use image::ImageFormat;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Anything that yields frames one at a time. Dropping it releases the device.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Acquires an exclusive [`FrameSource`] when a capture session starts.
pub trait CameraOpener {
    type Source: FrameSource;

    fn open(&mut self) -> Result<Self::Source, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// An open, streaming V4L2 camera.
pub struct Camera {
    // Declared before `_device` so buffers are unmapped before the fd closes.
    stream: MmapStream<'static>,
    _device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and start streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; many webcams answer with MJPG at this size instead.
        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;
        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {} (need YUYV, MJPG, or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = %negotiated.fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        Ok(Self {
            stream,
            _device: device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let sequence = meta.sequence;
        // Some drivers report bytesused = 0 for uncompressed formats.
        let data = if used == 0 { buf } else { &buf[..used] };
        let image = decode(self.pixel_format, self.width, self.height, data)?;
        Ok(Frame::new(image, sequence))
    }
}

/// Convert a raw buffer to RGB based on the negotiated format.
fn decode(format: PixelFormat, width: u32, height: u32, buf: &[u8]) -> Result<image::RgbImage, CameraError> {
    match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(format!("GREY conversion failed: {e}"))),
        PixelFormat::Mjpeg => image::load_from_memory_with_format(buf, ImageFormat::Jpeg)
            .map(|img| img.into_rgb8())
            .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}"))),
    }
}

/// Opens the V4L2 device at a fixed path each time a session starts.
#[derive(Debug, Clone)]
pub struct V4lOpener {
    pub device_path: String,
}

impl V4lOpener {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self { device_path: device_path.into() }
    }
}

impl CameraOpener for V4lOpener {
    type Source = Camera;

    fn open(&mut self) -> Result<Camera, CameraError> {
        Camera::open(&self.device_path)
    }
}
