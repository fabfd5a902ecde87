//! Frame type and pixel conversion: YUYV/GREY to RGB, downscaling.

use image::imageops::{self, FilterType};
use image::RgbImage;

/// A captured RGB camera frame with the driver's buffer sequence number.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self { image, sequence }
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if width % 2 != 0 {
        return Err(FrameError::OddWidth(width));
    }
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: yuyv.len() });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = cb as f32 - 128.0;
    let e = cr as f32 - 128.0;
    let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    [
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ]
}

/// Expand 8-bit grayscale into RGB by replicating the channel.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: gray.len() });
    }
    let rgb = gray[..expected].iter().flat_map(|&g| [g, g, g]).collect();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: gray.len(),
    })
}

/// Shrink an image by an integer linear `divisor` (4 → one quarter width and height).
pub fn downscale(image: &RgbImage, divisor: u32) -> RgbImage {
    let divisor = divisor.max(1);
    let w = (image.width() / divisor).max(1);
    let h = (image.height() / divisor).max(1);
    imageops::resize(image, w, h, FilterType::Triangle)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("YUYV frames need an even width, got {0}")]
    OddWidth(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // 2x1 image: [Y0=16, U=128, Y1=235, V=128] → black and white
        let rgb = yuyv_to_rgb(&[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_red_dominant() {
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let px = rgb.get_pixel(0, 0);
        assert!(px[0] > 200 && px[1] < 40 && px[2] < 40, "got {px:?}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_yuyv_odd_width() {
        assert!(matches!(yuyv_to_rgb(&[0; 6], 3, 1), Err(FrameError::OddWidth(3))));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 200], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_downscale_quarter() {
        let img = RgbImage::from_pixel(640, 480, Rgb([10, 20, 30]));
        let small = downscale(&img, 4);
        assert_eq!(small.dimensions(), (160, 120));
    }

    #[test]
    fn test_downscale_never_empty() {
        let img = RgbImage::new(3, 2);
        assert_eq!(downscale(&img, 4).dimensions(), (1, 1));
    }
}
