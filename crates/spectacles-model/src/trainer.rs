//! Regressor training over the processed dataset.

use crate::artifacts::{self, ArtifactError, ArtifactPaths, TrainedModel};
use crate::encoding::FeatureSchema;
use crate::forest::{ForestError, ForestParams, RandomForest};
use crate::scaler::StandardScaler;
use crate::types::TARGET_COLUMN;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fewer usable rows than this cannot be split and trained on.
pub const MIN_TRAINING_ROWS: usize = 5;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("{path}: missing column {column}")]
    MissingColumn { path: PathBuf, column: String },
    #[error("target column AdjustedBeautyScore not found in {0}")]
    MissingTarget(PathBuf),
    #[error("{path}: line {line}: invalid value {value:?} in column {column}")]
    InvalidValue {
        path: PathBuf,
        line: usize,
        column: String,
        value: String,
    },
    #[error("insufficient data: {rows} rows, need at least {required}")]
    InsufficientData { rows: usize, required: usize },
    #[error("test fraction must be in (0, 1), got {0}")]
    InvalidTestFraction(f64),
    #[error("scaler columns do not match the feature schema")]
    ScalerMismatch,
    #[error(transparent)]
    Forest(#[from] ForestError),
}

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub forest: ForestParams,
    pub test_fraction: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            test_fraction: 0.2,
        }
    }
}

/// Outcome of a training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub model: TrainedModel,
    pub train_rows: usize,
    pub test_rows: usize,
    pub test_r2: f64,
    /// Share of feature importance held by columns derived from face metrics.
    pub face_importance: f64,
}

/// Read `processed_data.csv` into an unscaled feature matrix and target.
pub fn load_processed(
    path: &Path,
    schema: &FeatureSchema,
) -> Result<(Array2<f64>, Array1<f64>), TrainError> {
    if !path.exists() {
        return Err(ArtifactError::Missing(path.to_path_buf()).into());
    }
    let csv_err = |source| ArtifactError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    let position = |name: &str| headers.iter().position(|h| h == name);

    let target_idx =
        position(TARGET_COLUMN).ok_or_else(|| TrainError::MissingTarget(path.to_path_buf()))?;
    let feature_idx = schema
        .names()
        .iter()
        .map(|name| {
            position(name).ok_or_else(|| TrainError::MissingColumn {
                path: path.to_path_buf(),
                column: name.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut values = Vec::new();
    let mut targets = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        let parse = |idx: usize, column: &str| -> Result<f64, TrainError> {
            let raw = record.get(idx).unwrap_or_default();
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| TrainError::InvalidValue {
                    path: path.to_path_buf(),
                    line: i + 2,
                    column: column.to_string(),
                    value: raw.to_string(),
                })
        };
        for (&idx, name) in feature_idx.iter().zip(schema.names()) {
            values.push(parse(idx, name.as_str())?);
        }
        targets.push(parse(target_idx, TARGET_COLUMN)?);
    }

    let rows = targets.len();
    let x = Array2::from_shape_vec((rows, schema.len()), values)
        .map_err(|e| ArtifactError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
    Ok((x, Array1::from(targets)))
}

/// Seeded shuffle split into (train, test) row indices.
///
/// The test size is rounded up; both sides must end up non-empty.
pub fn split_indices(
    rows: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), TrainError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(TrainError::InvalidTestFraction(test_fraction));
    }
    if rows < MIN_TRAINING_ROWS {
        return Err(TrainError::InsufficientData {
            rows,
            required: MIN_TRAINING_ROWS,
        });
    }
    let test_rows = ((rows as f64) * test_fraction).ceil() as usize;
    if test_rows == 0 || test_rows >= rows {
        return Err(TrainError::InsufficientData {
            rows,
            required: MIN_TRAINING_ROWS,
        });
    }

    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = order.split_off(test_rows);
    Ok((train, order))
}

/// Scale, split and fit. `x` is unscaled and laid out per `schema`.
pub fn fit(
    mut x: Array2<f64>,
    y: Array1<f64>,
    schema: &FeatureSchema,
    scaler: &StandardScaler,
    options: &TrainOptions,
) -> Result<TrainReport, TrainError> {
    if scaler.columns() != schema.names() {
        return Err(TrainError::ScalerMismatch);
    }
    scaler.transform(&mut x);

    let (train, test) = split_indices(x.nrows(), options.test_fraction, options.forest.seed)?;
    let x_train = x.select(Axis(0), &train);
    let y_train = y.select(Axis(0), &train);
    let x_test = x.select(Axis(0), &test);
    let y_test = y.select(Axis(0), &test);

    tracing::info!(
        train = train.len(),
        test = test.len(),
        features = schema.len(),
        trees = options.forest.n_estimators,
        "fitting random forest"
    );
    let forest = RandomForest::fit(x_train.view(), y_train.view(), &options.forest)?;
    let test_r2 = forest.score(x_test.view(), y_test.view())?;

    let face_importance: f64 = schema
        .columns()
        .iter()
        .zip(forest.feature_importances())
        .filter(|(column, _)| column.face_feature().is_some())
        .map(|(_, v)| v)
        .sum();

    tracing::info!(test_r2, face_importance, "training finished");

    Ok(TrainReport {
        model: TrainedModel {
            feature_names: schema.names().to_vec(),
            forest,
            train_rows: train.len(),
            test_r2,
        },
        train_rows: train.len(),
        test_rows: test.len(),
        test_r2,
        face_importance,
    })
}

/// Load the preprocessing artifacts under `paths` and train.
pub fn train(paths: &ArtifactPaths, options: &TrainOptions) -> Result<TrainReport, TrainError> {
    let schema = artifacts::read_schema(&paths.x_columns())?;
    let scaler: StandardScaler = artifacts::read_bincode(&paths.scaler())?;
    let (x, y) = load_processed(&paths.processed(), &schema)?;
    tracing::info!(path = %paths.processed().display(), rows = y.len(), "loaded processed dataset");
    fit(x, y, &schema, &scaler, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::CategoryLevels;
    use crate::types::fixtures;

    #[test]
    fn test_split_sizes_and_disjoint() {
        let (train, test) = split_indices(10, 0.2, 42).unwrap();
        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 8);
        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_rounds_test_size_up() {
        let (train, test) = split_indices(11, 0.2, 1).unwrap();
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);
    }

    #[test]
    fn test_split_is_seeded() {
        assert_eq!(split_indices(50, 0.2, 7).unwrap(), split_indices(50, 0.2, 7).unwrap());
    }

    #[test]
    fn test_split_rejects_small_or_bad_input() {
        assert!(matches!(
            split_indices(4, 0.2, 42),
            Err(TrainError::InsufficientData { rows: 4, required: 5 })
        ));
        assert!(matches!(split_indices(10, 0.0, 42), Err(TrainError::InvalidTestFraction(_))));
        assert!(matches!(split_indices(10, 1.0, 42), Err(TrainError::InvalidTestFraction(_))));
        assert!(matches!(
            split_indices(5, 0.99, 42),
            Err(TrainError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_fit_rejects_mismatched_scaler() {
        let schema = FeatureSchema::from_levels(&CategoryLevels::from_frames(&[fixtures::frame(
            "F1", "Acme", 135.0,
        )]));
        let x = Array2::<f64>::zeros((10, schema.len()));
        let y = Array1::<f64>::zeros(10);
        let other = vec!["Width_mm".to_string()];
        let scaler = StandardScaler::fit(&other, Array2::<f64>::zeros((1, 1)).view(), &[false]);
        assert!(matches!(
            fit(x, y, &schema, &scaler, &TrainOptions::default()),
            Err(TrainError::ScalerMismatch)
        ));
    }

    #[test]
    fn test_missing_target_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_data.csv");
        std::fs::write(&path, "FaceID,FrameID,Width_mm\n1,F1,135\n").unwrap();
        let schema = FeatureSchema::from_names(vec!["Width_mm".into()]).unwrap();
        assert!(matches!(load_processed(&path, &schema), Err(TrainError::MissingTarget(_))));
    }

    #[test]
    fn test_missing_schema_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_data.csv");
        std::fs::write(
            &path,
            "FaceID,FrameID,Width_mm,AdjustedBeautyScore\n1,F1,135,0.5\n",
        )
        .unwrap();
        let schema =
            FeatureSchema::from_names(vec!["Width_mm".into(), "LensHeight_mm".into()]).unwrap();
        match load_processed(&path, &schema) {
            Err(TrainError::MissingColumn { path: p, column }) => {
                assert_eq!(p, path);
                assert_eq!(column, "LensHeight_mm");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_invalid_value_reports_line_and_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_data.csv");
        std::fs::write(
            &path,
            "FaceID,FrameID,Width_mm,AdjustedBeautyScore\n1,F1,135,0.5\n2,F2,wide,0.4\n",
        )
        .unwrap();
        let schema = FeatureSchema::from_names(vec!["Width_mm".into()]).unwrap();
        match load_processed(&path, &schema) {
            Err(TrainError::InvalidValue {
                line, column, value, ..
            }) => {
                assert_eq!(line, 3);
                assert_eq!(column, "Width_mm");
                assert_eq!(value, "wide");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
