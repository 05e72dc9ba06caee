//! spectacles-model: tabular half of the face-to-frame recommender.
//!
//! Merges the raw face/frame datasets, encodes them into a fixed feature
//! schema, fits a standard scaler and a random forest regressor, and ranks
//! catalog frames for a new face using the persisted artifacts.

pub mod artifacts;
pub mod dataset;
pub mod encoding;
pub mod forest;
pub mod preprocess;
pub mod recommender;
pub mod scaler;
pub mod trainer;
pub mod types;

pub use artifacts::{ArtifactPaths, TrainedModel};
pub use encoding::FeatureSchema;
pub use forest::{ForestParams, RandomForest};
pub use recommender::{Recommendation, Recommender};
pub use scaler::StandardScaler;
pub use types::{FaceMetrics, FrameRecord};
