use serde::{Deserialize, Serialize};

/// Number of landmarks produced by the face mesh model.
pub const MESH_LANDMARKS: usize = 468;

/// Bounding box for a detected face, in source image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// BlazeFace keypoints: [right_eye, left_eye, nose, mouth, right_ear, left_ear]
    /// (subject's right/left, so the right eye appears on the image left).
    pub keypoints: [(f32, f32); 6],
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face mesh landmarks in source image pixels, plus the model's
/// face-presence score in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMesh {
    points: Vec<[f32; 3]>,
    presence: f32,
}

impl FaceMesh {
    pub fn new(points: Vec<[f32; 3]>, presence: f32) -> Self {
        Self { points, presence }
    }

    pub fn points(&self) -> &[[f32; 3]] {
        &self.points
    }

    pub fn presence(&self) -> f32 {
        self.presence
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 2D position of landmark `idx`.
    pub fn xy(&self, idx: usize) -> Option<(f64, f64)> {
        self.points.get(idx).map(|p| (p[0] as f64, p[1] as f64))
    }
}
