//! spectacles-vision: photo to facial metrics.
//!
//! A BlazeFace detector finds the face, a 468-point face mesh model
//! places landmarks on an eye-levelled crop, and the metrics module turns
//! the landmarks into the named ratios the recommender consumes. Both
//! models run via ONNX Runtime on CPU.

pub mod analyzer;
pub mod detector;
pub mod landmarks;
pub mod metrics;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, MeshSource, OnnxMeshPipeline};
pub use types::{BoundingBox, FaceMesh};
