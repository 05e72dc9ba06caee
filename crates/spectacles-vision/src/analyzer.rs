//! Photo to [`FaceMetrics`].

use crate::detector::{DetectorError, FaceDetector, DETECTOR_MODEL_FILE};
use crate::landmarks::{FaceMeshModel, MeshError, MESH_MODEL_FILE};
use crate::metrics::{self, MetricsError};
use crate::types::FaceMesh;
use image::{DynamicImage, RgbImage};
use spectacles_model::FaceMetrics;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Below this face-presence score the landmarks are not trusted.
const MIN_FACE_PRESENCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("failed to read image {path}: {source}")]
    ImageOpen {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("ambiguous landmarks: {0}")]
    AmbiguousLandmarks(String),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

impl From<MetricsError> for AnalyzerError {
    fn from(e: MetricsError) -> Self {
        Self::AmbiguousLandmarks(e.to_string())
    }
}

/// Produces face mesh landmarks for the most prominent face in an image.
pub trait MeshSource {
    fn face_mesh(&mut self, image: &RgbImage) -> Result<FaceMesh, AnalyzerError>;
}

/// BlazeFace detection followed by face mesh inference.
pub struct OnnxMeshPipeline {
    detector: FaceDetector,
    mesh: FaceMeshModel,
}

impl OnnxMeshPipeline {
    /// Load both ONNX models from `models_dir`.
    pub fn load(models_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&models_dir.join(DETECTOR_MODEL_FILE))?;
        let mesh = FaceMeshModel::load(&models_dir.join(MESH_MODEL_FILE))?;
        Ok(Self { detector, mesh })
    }
}

impl MeshSource for OnnxMeshPipeline {
    fn face_mesh(&mut self, image: &RgbImage) -> Result<FaceMesh, AnalyzerError> {
        let faces = self.detector.detect(image)?;
        let face = faces.first().ok_or(AnalyzerError::NoFaceDetected)?;
        tracing::debug!(
            faces = faces.len(),
            confidence = face.confidence,
            x = face.x,
            y = face.y,
            width = face.width,
            height = face.height,
            "using most confident face"
        );
        Ok(self.mesh.infer(image, face)?)
    }
}

/// Facial metrics extractor over any [`MeshSource`].
pub struct FaceAnalyzer<S = OnnxMeshPipeline> {
    source: S,
}

impl FaceAnalyzer<OnnxMeshPipeline> {
    pub fn load(models_dir: &Path) -> Result<Self, AnalyzerError> {
        Ok(Self::new(OnnxMeshPipeline::load(models_dir)?))
    }
}

impl<S: MeshSource> FaceAnalyzer<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn analyze_path(&mut self, path: &Path) -> Result<FaceMetrics, AnalyzerError> {
        let image = image::open(path).map_err(|source| AnalyzerError::ImageOpen {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "analyzing image"
        );
        self.analyze_image(&image)
    }

    /// Decode an encoded image (PNG, JPEG, ...) and analyze it.
    pub fn analyze_bytes(&mut self, bytes: &[u8]) -> Result<FaceMetrics, AnalyzerError> {
        let image = image::load_from_memory(bytes)?;
        self.analyze_image(&image)
    }

    pub fn analyze_image(&mut self, image: &DynamicImage) -> Result<FaceMetrics, AnalyzerError> {
        let rgb = image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(AnalyzerError::EmptyImage);
        }

        let mesh = self.source.face_mesh(&rgb)?;
        if mesh.presence() < MIN_FACE_PRESENCE {
            return Err(AnalyzerError::AmbiguousLandmarks(format!(
                "face presence {:.2} below {MIN_FACE_PRESENCE}",
                mesh.presence()
            )));
        }

        let metrics = metrics::compute(&mesh)?;
        tracing::info!(?metrics, "facial metrics extracted");
        Ok(metrics)
    }
}
