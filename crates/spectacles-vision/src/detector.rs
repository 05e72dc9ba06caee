//! BlazeFace short-range face detector via ONNX Runtime.
//!
//! Single-shot detector over 896 fixed anchors (strides 8 and 16) with
//! anchor-relative box and keypoint regression, sigmoid scores and NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "face_detection_short_range.onnx";

const BLAZEFACE_INPUT_SIZE: usize = 128;
const BLAZEFACE_MEAN: f32 = 127.5;
const BLAZEFACE_STD: f32 = 127.5;
const BLAZEFACE_CONFIDENCE_THRESHOLD: f32 = 0.5;
const BLAZEFACE_NMS_THRESHOLD: f32 = 0.3;
const BLAZEFACE_SCORE_CLIP: f32 = 100.0;
/// (stride, anchors per cell). The 16-stride layers share one grid.
const BLAZEFACE_LAYERS: [(usize, usize); 2] = [(8, 2), (16, 6)];
const BLAZEFACE_NUM_ANCHORS: usize = 896;
/// 4 box values + 6 keypoints x 2.
const BLAZEFACE_VALUES_PER_ANCHOR: usize = 16;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; place face_detection_short_range.onnx in the models directory")]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for mapping letterboxed coordinates back to the source image.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices: (regressors, scores).
type OutputIndices = (usize, usize);

/// BlazeFace-based face detector.
pub struct FaceDetector {
    session: Session,
    anchors: Vec<(f32, f32)>,
    outputs: OutputIndices,
}

impl FaceDetector {
    /// Load the BlazeFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded BlazeFace model"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "BlazeFace model requires 2 outputs (regressors, classificators), got {}",
                output_names.len()
            )));
        }

        let outputs = discover_output_indices(&output_names);
        tracing::debug!(?outputs, "BlazeFace output tensor mapping");

        Ok(Self {
            session,
            anchors: generate_anchors(),
            outputs,
        })
    }

    /// Detect faces in an RGB image, returning boxes sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(image);

        let Self {
            session,
            anchors,
            outputs: (regressors_idx, scores_idx),
        } = self;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, boxes) = outputs[*regressors_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("regressors: {e}")))?;
        let (_, scores) = outputs[*scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;

        if boxes.len() < BLAZEFACE_NUM_ANCHORS * BLAZEFACE_VALUES_PER_ANCHOR
            || scores.len() < BLAZEFACE_NUM_ANCHORS
        {
            return Err(DetectorError::InferenceFailed(format!(
                "unexpected output sizes: regressors={}, scores={}",
                boxes.len(),
                scores.len()
            )));
        }

        let detections = decode(boxes, scores, anchors, &letterbox, BLAZEFACE_CONFIDENCE_THRESHOLD);
        let result = nms(detections, BLAZEFACE_NMS_THRESHOLD);
        tracing::debug!(faces = result.len(), "BlazeFace detection finished");
        Ok(result)
    }
}

/// Letterbox an RGB image into a 1x3x128x128 tensor normalized to [-1, 1].
///
/// Padding is left at 0.0, the normalized value of mid-grey.
fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = image.dimensions();
    let size = BLAZEFACE_INPUT_SIZE as u32;
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, BLAZEFACE_INPUT_SIZE, BLAZEFACE_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - BLAZEFACE_MEAN) / BLAZEFACE_STD;
        }
    }

    (tensor, letterbox)
}

/// Anchor centres in normalized input coordinates, in model output order.
fn generate_anchors() -> Vec<(f32, f32)> {
    let mut anchors = Vec::with_capacity(BLAZEFACE_NUM_ANCHORS);
    for &(stride, per_cell) in &BLAZEFACE_LAYERS {
        let grid = BLAZEFACE_INPUT_SIZE / stride;
        for gy in 0..grid {
            for gx in 0..grid {
                let cx = (gx as f32 + 0.5) / grid as f32;
                let cy = (gy as f32 + 0.5) / grid as f32;
                anchors.extend(std::iter::repeat((cx, cy)).take(per_cell));
            }
        }
    }
    anchors
}

/// Discover output tensor ordering by name.
///
/// MediaPipe exports name the outputs "regressors" and "classificators".
/// Other conversions use generic names; those fall back to positional
/// ordering [0] = regressors, [1] = scores.
fn discover_output_indices(names: &[String]) -> OutputIndices {
    let find = |needles: &[&str]| {
        names.iter().position(|n| {
            let n = n.to_ascii_lowercase();
            needles.iter().any(|needle| n.contains(needle))
        })
    };

    match (find(&["regressor", "box"]), find(&["classificator", "score"])) {
        (Some(regressors), Some(scores)) if regressors != scores => {
            tracing::info!("BlazeFace: using name-based output tensor mapping");
            (regressors, scores)
        }
        _ => {
            tracing::info!(
                ?names,
                "BlazeFace: output names not recognized, using positional mapping [0]=regressors, [1]=scores"
            );
            (0, 1)
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decode raw regressor/score tensors into source-image boxes.
fn decode(
    boxes: &[f32],
    scores: &[f32],
    anchors: &[(f32, f32)],
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let size = BLAZEFACE_INPUT_SIZE as f32;
    let to_source = |nx: f32, ny: f32| {
        (
            (nx * size - letterbox.pad_x) / letterbox.scale,
            (ny * size - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();

    for (idx, &(anchor_x, anchor_y)) in anchors.iter().enumerate() {
        let Some(&raw_score) = scores.get(idx) else {
            break;
        };
        let score = sigmoid(raw_score.clamp(-BLAZEFACE_SCORE_CLIP, BLAZEFACE_SCORE_CLIP));
        if score < threshold {
            continue;
        }

        let offset = idx * BLAZEFACE_VALUES_PER_ANCHOR;
        let Some(raw) = boxes.get(offset..offset + BLAZEFACE_VALUES_PER_ANCHOR) else {
            continue;
        };

        // Offsets are in input pixels relative to the anchor centre.
        let cx = anchor_x + raw[0] / size;
        let cy = anchor_y + raw[1] / size;
        let w = raw[2] / size;
        let h = raw[3] / size;

        let (x1, y1) = to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = to_source(cx + w / 2.0, cy + h / 2.0);

        let mut keypoints = [(0.0f32, 0.0f32); 6];
        for (k, kp) in keypoints.iter_mut().enumerate() {
            *kp = to_source(
                anchor_x + raw[4 + k * 2] / size,
                anchor_y + raw[5 + k * 2] / size,
            );
        }

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            keypoints,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|kept| iou(kept, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
