//! 468-point face mesh via ONNX Runtime.
//!
//! The detected face is cut out as a square region 1.5x the detection box,
//! rotated so the eyes are level, and warped to the 192x192 model input by
//! a similarity transform. Landmarks come back in crop pixels and are
//! mapped to the source image through the same transform.

use crate::types::{BoundingBox, FaceMesh, MESH_LANDMARKS};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MESH_MODEL_FILE: &str = "face_landmark.onnx";

const MESH_INPUT_SIZE: usize = 192;
const MESH_ROI_SCALE: f32 = 1.5;
const MESH_OUTPUT_VALUES: usize = MESH_LANDMARKS * 3;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("model file not found: {0}; place face_landmark.onnx in the models directory")]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// 4-DOF similarity transform from crop pixels to source pixels.
///
/// ```text
/// | x |   | a  -b | | u |   | tx |
/// | y | = | b   a | | v | + | ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropTransform {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl CropTransform {
    /// Square region around `face`, rotated so the eye line is horizontal
    /// in an `out_size` x `out_size` crop.
    pub fn for_face(face: &BoundingBox, out_size: usize) -> Self {
        let (cx, cy) = face.center();
        let side = face.width.max(face.height) * MESH_ROI_SCALE;
        let (rx, ry) = face.keypoints[0];
        let (lx, ly) = face.keypoints[1];
        let angle = (ly - ry).atan2(lx - rx);

        let scale = side / out_size as f32;
        let a = scale * angle.cos();
        let b = scale * angle.sin();

        // Crop centre lands on the box centre.
        let half = out_size as f32 / 2.0;
        Self {
            a,
            b,
            tx: cx - (a * half - b * half),
            ty: cy - (b * half + a * half),
        }
    }

    /// Crop pixel to source pixel.
    pub fn apply(&self, u: f32, v: f32) -> (f32, f32) {
        (
            self.a * u - self.b * v + self.tx,
            self.b * u + self.a * v + self.ty,
        )
    }

    /// Source pixel to crop pixel.
    pub fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return (0.0, 0.0);
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        (
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        )
    }

    /// Source pixels per crop pixel.
    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

/// Warp the crop region of `image` into a 1x3xNxN tensor in [0, 1].
///
/// Uses bilinear interpolation. Out-of-bounds pixels are black.
fn warp_crop(image: &RgbImage, transform: &CropTransform, out_size: usize) -> Array4<f32> {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < width && y >= 0 && y < height {
            image.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    let mut tensor = Array4::<f32>::zeros((1, 3, out_size, out_size));
    for v in 0..out_size {
        for u in 0..out_size {
            let (sx, sy) = transform.apply(u as f32, v as f32);
            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            for c in 0..3 {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                tensor[[0, c, v, u]] = val / 255.0;
            }
        }
    }
    tensor
}

/// Map raw (u, v, z) crop landmarks to source pixels.
fn decode_landmarks(raw: &[f32], transform: &CropTransform) -> Vec<[f32; 3]> {
    let scale = transform.scale();
    raw.chunks_exact(3)
        .take(MESH_LANDMARKS)
        .map(|p| {
            let (x, y) = transform.apply(p[0], p[1]);
            [x, y, p[2] * scale]
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Face mesh landmark model.
pub struct FaceMeshModel {
    session: Session,
    num_outputs: usize,
}

impl FaceMeshModel {
    /// Load the face mesh ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, MeshError> {
        if !model_path.exists() {
            return Err(MeshError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face mesh model"
        );

        if num_outputs < 2 {
            return Err(MeshError::InferenceFailed(format!(
                "face mesh model requires landmark and face-flag outputs, got {num_outputs}"
            )));
        }

        Ok(Self {
            session,
            num_outputs,
        })
    }

    /// Place the 468 landmarks on `face` within `image`.
    pub fn infer(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<FaceMesh, MeshError> {
        let transform = CropTransform::for_face(face, MESH_INPUT_SIZE);
        let input = warp_crop(image, &transform, MESH_INPUT_SIZE);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Output names differ between conversions; tell the tensors apart
        // by size instead.
        let mut points = None;
        let mut presence = None;
        for idx in 0..self.num_outputs {
            let (_, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| MeshError::InferenceFailed(format!("output {idx}: {e}")))?;
            if data.len() >= MESH_OUTPUT_VALUES && points.is_none() {
                points = Some(decode_landmarks(data, &transform));
            } else if data.len() == 1 && presence.is_none() {
                presence = Some(sigmoid(data[0]));
            }
        }

        let points = points.ok_or_else(|| {
            let msg = format!("no output with {MESH_OUTPUT_VALUES} landmark values");
            MeshError::InferenceFailed(msg)
        })?;
        let presence = presence
            .ok_or_else(|| MeshError::InferenceFailed("no face-flag output".to_string()))?;

        tracing::debug!(landmarks = points.len(), presence, "face mesh inference finished");
        Ok(FaceMesh::new(points, presence))
    }
}
