//! Frame annotation: a box around every observed face and a label strip beneath it.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rollcall_core::{FaceLocation, Observation};
use std::path::Path;
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const LABEL_HEIGHT: u32 = 35;
const LABEL_PADDING: i32 = 6;
const LABEL_TEXT_SCALE: f32 = 24.0;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to read font {path}: {source}")]
    ReadFont {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid font {0}")]
    InvalidFont(String),
}

/// Fallback label fonts, tried in order when none is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
];

/// Draws observations onto frames.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Annotator that draws boxes and label strips but no text.
    pub fn without_text() -> Self {
        Self { font: None }
    }

    /// Load the configured label font, or the first common system font if none
    /// is configured. Without any font, only boxes and strips are drawn.
    pub fn load(font_path: Option<&Path>) -> Result<Self, AnnotateError> {
        if let Some(path) = font_path {
            return Ok(Self { font: Some(read_font(path)?) });
        }
        let font = SYSTEM_FONTS.iter().map(Path::new).filter(|p| p.is_file()).find_map(|path| {
            match read_font(path) {
                Ok(font) => {
                    tracing::info!(font = %path.display(), "using system font for labels");
                    Some(font)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping system font");
                    None
                }
            }
        });
        if font.is_none() {
            tracing::warn!("no label font found; set ROLLCALL_FONT to draw identity labels");
        }
        Ok(Self { font })
    }

    /// Whether labels are rendered as text.
    pub fn has_text(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every observation onto `frame`.
    pub fn draw(&self, frame: &mut RgbImage, observations: &[Observation]) {
        for obs in observations {
            self.draw_one(frame, obs);
        }
    }

    fn draw_one(&self, frame: &mut RgbImage, obs: &Observation) {
        let loc = obs.location;
        if loc.width() == 0 || loc.height() == 0 {
            return;
        }

        for inset in 0..BOX_THICKNESS {
            if let Some(rect) = inset_rect(&loc, inset) {
                draw_hollow_rect_mut(frame, rect, BOX_COLOR);
            }
        }

        let strip = label_strip(&loc);
        draw_filled_rect_mut(frame, strip, BOX_COLOR);

        if let Some(font) = &self.font {
            draw_text_mut(
                frame,
                TEXT_COLOR,
                loc.left as i32 + LABEL_PADDING,
                strip.top() + LABEL_PADDING,
                PxScale::from(LABEL_TEXT_SCALE),
                font,
                &obs.identity.to_string(),
            );
        }
    }
}

fn read_font(path: &Path) -> Result<FontVec, AnnotateError> {
    let bytes = std::fs::read(path).map_err(|source| AnnotateError::ReadFont {
        path: path.display().to_string(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| AnnotateError::InvalidFont(path.display().to_string()))
}

fn inset_rect(loc: &FaceLocation, inset: u32) -> Option<Rect> {
    let w = loc.width().checked_sub(inset * 2).filter(|&w| w > 0)?;
    let h = loc.height().checked_sub(inset * 2).filter(|&h| h > 0)?;
    Some(Rect::at((loc.left + inset) as i32, (loc.top + inset) as i32).of_size(w, h))
}

/// Filled strip along the inside bottom edge of the face box.
fn label_strip(loc: &FaceLocation) -> Rect {
    let top = loc.bottom as i32 - LABEL_HEIGHT as i32;
    Rect::at(loc.left as i32, top).of_size(loc.width(), LABEL_HEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Identity;

    fn observation(top: u32, right: u32, bottom: u32, left: u32) -> Observation {
        Observation {
            location: FaceLocation { top, right, bottom, left },
            identity: Identity::Known("alice".into()),
            distance: Some(0.1),
        }
    }

    #[test]
    fn test_draws_box_and_strip() {
        let mut frame = RgbImage::new(200, 200);
        Annotator::without_text().draw(&mut frame, &[observation(20, 120, 140, 40)]);

        // Box outline, both thickness rows.
        assert_eq!(frame.get_pixel(80, 20), &BOX_COLOR);
        assert_eq!(frame.get_pixel(80, 21), &BOX_COLOR);
        // Interior above the strip is untouched.
        assert_eq!(frame.get_pixel(80, 60), &Rgb([0, 0, 0]));
        // Strip fills the bottom 35 rows of the box.
        assert_eq!(frame.get_pixel(80, 139 - 10), &BOX_COLOR);
        assert_eq!(frame.get_pixel(80, 140 - LABEL_HEIGHT), &BOX_COLOR);
        // Outside the box is untouched.
        assert_eq!(frame.get_pixel(150, 150), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_text_is_drawn_in_strip() {
        let annotator = Annotator::load(None).unwrap();
        if !annotator.has_text() {
            eprintln!("no system font installed; skipping label text check");
            return;
        }
        let mut frame = RgbImage::new(240, 160);
        annotator.draw(&mut frame, &[observation(20, 220, 140, 20)]);

        let strip_top = 140 - LABEL_HEIGHT;
        let text_pixels = (strip_top..140)
            .flat_map(|y| (20..220).map(move |x| (x, y)))
            .filter(|&(x, y)| {
                let px = frame.get_pixel(x, y);
                px[0] > 200 && px[2] > 200
            })
            .count();
        assert!(text_pixels > 20, "only {text_pixels} text pixels in label strip");
    }

    #[test]
    fn test_degenerate_box_is_skipped() {
        let mut frame = RgbImage::new(50, 50);
        Annotator::without_text().draw(&mut frame, &[observation(10, 10, 30, 10)]);
        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_box_partly_off_frame_does_not_panic() {
        let mut frame = RgbImage::new(64, 48);
        Annotator::without_text().draw(&mut frame, &[observation(30, 200, 90, 40)]);
        assert_eq!(frame.get_pixel(50, 30), &BOX_COLOR);
    }

    #[test]
    fn test_missing_font_is_an_error() {
        let err = Annotator::load(Some(Path::new("/nonexistent/font.ttf"))).err();
        assert!(matches!(err, Some(AnnotateError::ReadFont { .. })));
    }

    #[test]
    fn test_invalid_font_is_an_error() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"not a font").unwrap();
        let err = Annotator::load(Some(tmp.path())).err();
        assert!(matches!(err, Some(AnnotateError::InvalidFont(_))));
    }
}
