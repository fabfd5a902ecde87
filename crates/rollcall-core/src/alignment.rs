//! Face alignment via a 4-DOF similarity transform.
//!
//! Warps a detected face so its five landmarks land on the canonical
//! InsightFace positions of a 112×112 crop.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// ArcFace reference landmarks for a 112×112 output.
pub(crate) const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub(crate) const ALIGNED_SIZE: u32 = 112;

/// Least-squares similarity transform mapping `src` points onto `dst`.
///
/// Returns `[a, b, tx, ty]` for
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn fit_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 4] {
    let n = src.len() as f32;
    let mean = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (msx, msy) = mean(src);
    let (mdx, mdy) = mean(dst);

    let mut norm = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (sx, sy) = (sx - msx, sy - msy);
        let (dx, dy) = (dx - mdx, dy - mdy);
        norm += sx * sx + sy * sy;
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
    }

    if norm <= f32::EPSILON {
        // Degenerate landmarks: pure translation.
        return [1.0, 0.0, mdx - msx, mdy - msy];
    }

    let a = dot / norm;
    let b = cross / norm;
    [a, b, mdx - a * msx + b * msy, mdy - b * msx - a * msy]
}

/// Align a face in `frame` to a 112×112 RGB crop using its landmarks.
///
/// Pixels that fall outside the source frame are black.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    let [a, b, tx, ty] = fit_similarity(landmarks, &REFERENCE_LANDMARKS_112);

    match Projection::from_matrix([a, -b, tx, b, a, ty, 0.0, 0.0, 1.0]) {
        Some(projection) => {
            warp_into(frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut aligned);
        }
        None => tracing::warn!(?landmarks, "singular alignment transform, using blank crop"),
    }

    aligned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(t: [f32; 4], (x, y): (f32, f32)) -> (f32, f32) {
        let [a, b, tx, ty] = t;
        (a * x - b * y + tx, b * x + a * y + ty)
    }

    #[test]
    fn test_identity_transform() {
        let t = fit_similarity(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((t[0] - 1.0).abs() < 1e-4);
        assert!(t[1].abs() < 1e-4);
        assert!(t[2].abs() < 1e-3 && t[3].abs() < 1e-3);
    }

    #[test]
    fn test_recovers_scale_rotation_translation() {
        // 2x scale, 90° rotation, shift (10, -5)
        let truth = [0.0, 2.0, 10.0, -5.0];
        let src: [(f32, f32); 5] = [(1.0, 2.0), (4.0, 2.0), (2.5, 4.0), (1.5, 6.0), (3.5, 6.0)];
        let dst = src.map(|p| apply(truth, p));
        let t = fit_similarity(&src, &dst);
        for (got, want) in t.iter().zip(truth) {
            assert!((got - want).abs() < 1e-3, "got {t:?}, want {truth:?}");
        }
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let aligned = align_face(&frame, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let mut frame = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [(80.0, 60.0), (120.0, 60.0), (100.0, 85.0), (85.0, 110.0), (115.0, 110.0)];

        // Bright 5×5 patch on the left eye survives bilinear sampling.
        let (lx, ly) = (src[0].0 as u32, src[0].1 as u32);
        for y in ly - 2..=ly + 2 {
            for x in lx - 2..=lx + 2 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let aligned = align_face(&frame, &src);
        let (rx, ry) = (
            REFERENCE_LANDMARKS_112[0].0.round() as u32,
            REFERENCE_LANDMARKS_112[0].1.round() as u32,
        );
        let brightest = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap_or(0);
        assert!(brightest > 100, "expected bright patch near ({rx}, {ry}), max={brightest}");
    }
}
