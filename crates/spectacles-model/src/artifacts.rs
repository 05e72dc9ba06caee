//! On-disk artifacts shared by the batch commands and the recommender.
//!
//! Layout under the data directory:
//! - `processed_data.csv`: encoded, unscaled training rows
//! - `X_columns.json`: feature schema (ordered column names)
//! - `scaler.bin`: fitted [`StandardScaler`] (bincode)
//! - `frame_catalog.csv`: unique frames
//!
//! The trained model lives wherever the caller points it (default
//! `models/regressor.bin`).

use crate::encoding::{EncodingError, FeatureSchema};
use crate::forest::RandomForest;
use crate::types::FrameRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PROCESSED_FILE: &str = "processed_data.csv";
pub const X_COLUMNS_FILE: &str = "X_columns.json";
pub const SCALER_FILE: &str = "scaler.bin";
pub const CATALOG_FILE: &str = "frame_catalog.csv";
pub const DEFAULT_MODEL_PATH: &str = "models/regressor.bin";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact not found: {0}; run `spectacles preprocess` first")]
    Missing(PathBuf),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: {source}")]
    Bincode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: EncodingError,
    },
}

impl ArtifactError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::Missing(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Locations of the preprocessing artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    data_dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn processed(&self) -> PathBuf {
        self.data_dir.join(PROCESSED_FILE)
    }

    pub fn x_columns(&self) -> PathBuf {
        self.data_dir.join(X_COLUMNS_FILE)
    }

    pub fn scaler(&self) -> PathBuf {
        self.data_dir.join(SCALER_FILE)
    }

    pub fn catalog(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILE)
    }

    pub fn ensure_dir(&self) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.data_dir).map_err(|e| ArtifactError::io(&self.data_dir, e))
    }
}

pub fn write_schema(path: &Path, schema: &FeatureSchema) -> Result<(), ArtifactError> {
    let json = schema.to_json().map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|e| ArtifactError::io(path, e))
}

pub fn read_schema(path: &Path) -> Result<FeatureSchema, ArtifactError> {
    let text = fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
    let names: Vec<String> = serde_json::from_str(&text).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    FeatureSchema::from_names(names).map_err(|source| ArtifactError::Schema {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
    }
    let file = fs::File::create(path).map_err(|e| ArtifactError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, value).map_err(|source| ArtifactError::Bincode {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(|e| ArtifactError::io(path, e))
}

pub fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let file = fs::File::open(path).map_err(|e| ArtifactError::io(path, e))?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|source| ArtifactError::Bincode {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_catalog(path: &Path, frames: &[FrameRecord]) -> Result<(), ArtifactError> {
    let csv_err = |source| ArtifactError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for frame in frames {
        writer.serialize(frame).map_err(csv_err)?;
    }
    writer.flush().map_err(|e| ArtifactError::io(path, e))
}

pub fn read_catalog(path: &Path) -> Result<Vec<FrameRecord>, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing(path.to_path_buf()));
    }
    let csv_err = |source| ArtifactError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    reader
        .deserialize()
        .collect::<Result<Vec<FrameRecord>, _>>()
        .map_err(csv_err)
}

/// A fitted regressor together with the columns it was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub feature_names: Vec<String>,
    pub forest: RandomForest,
    pub train_rows: usize,
    pub test_r2: f64,
}

impl TrainedModel {
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let model: Self = read_bincode(path)?;
        tracing::info!(
            path = %path.display(),
            trees = model.forest.trees().len(),
            features = model.feature_names.len(),
            "loaded regressor"
        );
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        write_bincode(path, self)?;
        tracing::info!(path = %path.display(), "saved regressor");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures;

    #[test]
    fn test_catalog_roundtrip_keeps_absent_categories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CATALOG_FILE);
        let mut b = fixtures::frame("F2", "Zeta", 130.5);
        b.rim_style = None;
        let frames = vec![fixtures::frame("F1", "Acme", 135.0), b];

        write_catalog(&path, &frames).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("FrameID,Brand,Material,RimStyle,BridgeType,Color,Width_mm"));
        assert!(text.contains("F2,Zeta,Acetate,,Keyhole"));

        assert_eq!(read_catalog(&path).unwrap(), frames);
    }

    #[test]
    fn test_missing_artifacts_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path());
        assert!(matches!(read_schema(&paths.x_columns()), Err(ArtifactError::Missing(_))));
        assert!(matches!(read_catalog(&paths.catalog()), Err(ArtifactError::Missing(_))));
        assert!(matches!(
            read_bincode::<Vec<f64>>(&paths.scaler()),
            Err(ArtifactError::Missing(_))
        ));
    }

    #[test]
    fn test_bincode_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/nested/values.bin");
        write_bincode(&path, &vec![1.5f64, -2.0]).unwrap();
        let back: Vec<f64> = read_bincode(&path).unwrap();
        assert_eq!(back, vec![1.5, -2.0]);
    }

    #[test]
    fn test_corrupt_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(X_COLUMNS_FILE);
        fs::write(&path, r#"["Width_mm", "NotAColumn"]"#).unwrap();
        assert!(matches!(read_schema(&path), Err(ArtifactError::Schema { .. })));
    }
}
