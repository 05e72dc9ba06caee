//! Top-K frame ranking for a single face.

use crate::artifacts::{self, ArtifactError, ArtifactPaths, TrainedModel};
use crate::encoding::{EncodingError, FeatureSchema};
use crate::forest::ForestError;
use crate::scaler::StandardScaler;
use crate::types::{FaceMetrics, FrameRecord};
use ndarray::ArrayView1;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecommendError {
    #[error("model not found: {0}; run `spectacles train` first")]
    ModelNotFound(PathBuf),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("schema mismatch: {0}")]
    Encoding(#[from] EncodingError),
    #[error("schema mismatch: {0} columns do not match X_columns")]
    ArtifactMismatch(&'static str),
    #[error(transparent)]
    Forest(#[from] ForestError),
}

/// One ranked frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// 1-based position in the ranking.
    pub rank: usize,
    pub frame: FrameRecord,
    pub score: f64,
}

/// Read-only bundle of schema, scaler, catalog and model.
#[derive(Debug, Clone)]
pub struct Recommender {
    schema: FeatureSchema,
    scaler: StandardScaler,
    catalog: Vec<FrameRecord>,
    model: TrainedModel,
}

impl Recommender {
    /// Load every artifact and check they agree on the column layout.
    pub fn load(paths: &ArtifactPaths, model_path: &Path) -> Result<Self, RecommendError> {
        if !model_path.exists() {
            return Err(RecommendError::ModelNotFound(model_path.to_path_buf()));
        }
        let schema = artifacts::read_schema(&paths.x_columns())?;
        let scaler: StandardScaler = artifacts::read_bincode(&paths.scaler())?;
        let catalog = artifacts::read_catalog(&paths.catalog())?;
        let model = TrainedModel::load(model_path)?;

        tracing::info!(
            data_dir = %paths.data_dir().display(),
            columns = schema.len(),
            frames = catalog.len(),
            "recommender artifacts loaded"
        );
        Self::from_parts(schema, scaler, catalog, model)
    }

    pub fn from_parts(
        schema: FeatureSchema,
        scaler: StandardScaler,
        catalog: Vec<FrameRecord>,
        model: TrainedModel,
    ) -> Result<Self, RecommendError> {
        if scaler.columns() != schema.names() {
            return Err(RecommendError::ArtifactMismatch("scaler"));
        }
        if model.feature_names != schema.names() || model.forest.n_features() != schema.len() {
            return Err(RecommendError::ArtifactMismatch("model"));
        }
        Ok(Self {
            schema,
            scaler,
            catalog,
            model,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn catalog(&self) -> &[FrameRecord] {
        &self.catalog
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    /// Score every catalog frame for `face` and return the best `top_k`.
    ///
    /// Results are sorted by descending score; equal scores keep catalog
    /// order.
    pub fn recommend(
        &self,
        face: &FaceMetrics,
        top_k: usize,
    ) -> Result<Vec<Recommendation>, RecommendError> {
        let face = self.schema.face_vector(face)?;

        let mut scored = Vec::with_capacity(self.catalog.len());
        for (idx, frame) in self.catalog.iter().enumerate() {
            let mut row = self.schema.encode(&face, frame);
            self.scaler.transform_row(&mut row);
            let score = self.model.forest.predict_row(ArrayView1::from(&row[..]))?;
            scored.push((idx, score));
        }

        // Stable sort: ties stay in catalog order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        if let (Some(best), Some(worst)) = (scored.first(), scored.last()) {
            tracing::debug!(
                best = best.1,
                worst = worst.1,
                frames = scored.len(),
                "scored catalog"
            );
        }

        Ok(scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, (idx, score))| Recommendation {
                rank: i + 1,
                frame: self.catalog[idx].clone(),
                score,
            })
            .collect())
    }
}
