//! Facial metrics from face mesh landmarks.
//!
//! Indices refer to the 468-point MediaPipe face mesh topology. Landmarks
//! are taken in source image pixels; every metric is a ratio, so image
//! scale cancels out.

use crate::types::{FaceMesh, MESH_LANDMARKS};
use spectacles_model::FaceMetrics;
use thiserror::Error;

const RIGHT_EYE: [usize; 4] = [33, 133, 159, 145];
const LEFT_EYE: [usize; 4] = [362, 263, 386, 374];
const NOSE_TIP: usize = 1;
const FACE_RIGHT: usize = 234;
const FACE_LEFT: usize = 454;
const FOREHEAD: usize = 10;
const CHIN: usize = 152;
const JAW_RIGHT: usize = 172;
const JAW_LEFT: usize = 397;
const BROW_RIGHT: usize = 70;
const BROW_LEFT: usize = 300;
const UPPER_LIP: usize = 13;

const GOLDEN_RATIO: f64 = 1.618;
const MIN_EXTENT: f64 = 1e-6;

#[derive(Error, Debug, PartialEq)]
pub enum MetricsError {
    #[error("face mesh has {0} landmarks, need 468")]
    TooFewLandmarks(usize),
    #[error("degenerate face geometry: width={width:.3}, height={height:.3}")]
    Degenerate { width: f64, height: f64 },
}

type Point = (f64, f64);

fn distance(a: Point, b: Point) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Compute the six named metrics from a face mesh.
pub fn compute(mesh: &FaceMesh) -> Result<FaceMetrics, MetricsError> {
    if mesh.len() < MESH_LANDMARKS {
        return Err(MetricsError::TooFewLandmarks(mesh.len()));
    }
    // Length was checked above, so every index resolves.
    let p = |idx: usize| mesh.xy(idx).unwrap_or_default();
    let centre = |indices: &[usize]| {
        let n = indices.len() as f64;
        let (sx, sy) = indices
            .iter()
            .map(|&i| p(i))
            .fold((0.0, 0.0), |acc, q| (acc.0 + q.0, acc.1 + q.1));
        (sx / n, sy / n)
    };

    let right_eye = centre(&RIGHT_EYE);
    let left_eye = centre(&LEFT_EYE);
    let nose_tip = p(NOSE_TIP);

    let face_width = distance(p(FACE_RIGHT), p(FACE_LEFT));
    let face_height = distance(p(FOREHEAD), p(CHIN));
    if face_width < MIN_EXTENT || face_height < MIN_EXTENT {
        return Err(MetricsError::Degenerate {
            width: face_width,
            height: face_height,
        });
    }

    let eye_distance = distance(right_eye, left_eye);
    let jaw_width = distance(p(JAW_RIGHT), p(JAW_LEFT));

    // Midline through the nose tip, not the eye-centre midpoint: distances
    // from that midpoint to both eyes are equal, so symmetry would always be 0.
    let midline = nose_tip.0;
    let symmetry =
        ((right_eye.0 - midline).abs() - (left_eye.0 - midline).abs()).abs() / face_width;

    let golden = ((face_height / face_width) - GOLDEN_RATIO).abs() / GOLDEN_RATIO;

    let brow_to_eye = ((p(BROW_RIGHT).1 - right_eye.1).abs() / face_height
        + (p(BROW_LEFT).1 - left_eye.1).abs() / face_height)
        / 2.0;

    let lip_to_nose = (p(UPPER_LIP).1 - nose_tip.1).abs() / face_height;

    let metrics: FaceMetrics = [
        ("FacialSymmetry", symmetry),
        ("GoldenRatioDeviation", golden),
        ("EyeSpacingRatio", eye_distance / face_width),
        ("JawlineWidthRatio", jaw_width / face_width),
        ("BrowToEyeDistance", brow_to_eye),
        ("LipToNoseDistance", lip_to_nose),
    ]
    .into_iter()
    .map(|(name, value)| (name, round4(value)))
    .collect();

    tracing::debug!(?metrics, "computed facial metrics");
    Ok(metrics)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_face() {
        let m = compute(&fixtures::mesh()).unwrap();
        assert_eq!(m.len(), 6);
        assert_eq!(m.get("FacialSymmetry"), Some(0.0));
        // height 150 / width 100 = 1.5
        assert_eq!(m.get("GoldenRatioDeviation"), Some(round4((1.618 - 1.5) / 1.618)));
        assert_eq!(m.get("EyeSpacingRatio"), Some(0.5));
        assert_eq!(m.get("JawlineWidthRatio"), Some(0.8));
        assert_eq!(m.get("BrowToEyeDistance"), Some(round4(10.0 / 150.0)));
        assert_eq!(m.get("LipToNoseDistance"), Some(0.1));
    }

    #[test]
    fn test_asymmetry_uses_nose_midline() {
        let mut points = fixtures::mesh().points().to_vec();
        for idx in LEFT_EYE {
            points[idx][0] = 235.0;
        }
        let m = compute(&FaceMesh::new(points, 0.99)).unwrap();
        // right eye 25 px from the nose, left eye 35 px: |25 - 35| / 100
        assert_eq!(m.get("FacialSymmetry"), Some(0.1));
    }

    #[test]
    fn test_values_rounded_to_four_places() {
        let mut points = fixtures::mesh().points().to_vec();
        points[UPPER_LIP][1] = 213.3333;
        let m = compute(&FaceMesh::new(points, 0.99)).unwrap();
        for (name, v) in m.iter() {
            assert_eq!(v, round4(v), "{name} not rounded");
        }
    }

    #[test]
    fn test_too_few_landmarks() {
        let mesh = FaceMesh::new(vec![[0.0; 3]; 100], 0.9);
        assert_eq!(compute(&mesh), Err(MetricsError::TooFewLandmarks(100)));
    }

    #[test]
    fn test_degenerate_width() {
        let mut points = fixtures::mesh().points().to_vec();
        points[FACE_LEFT] = points[FACE_RIGHT];
        assert!(matches!(
            compute(&FaceMesh::new(points, 0.9)),
            Err(MetricsError::Degenerate { .. })
        ));
    }
}
