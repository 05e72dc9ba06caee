//! Batch preprocessing: raw CSVs to encoded dataset, schema, scaler, catalog.

use crate::artifacts::{self, ArtifactError, ArtifactPaths};
use crate::dataset::{self, DataError, Table};
use crate::encoding::{CategoryLevels, FeatureSchema};
use crate::scaler::StandardScaler;
use crate::types::{FACE_ID_COLUMN, FRAME_ID_COLUMN, TARGET_COLUMN};
use ndarray::Array2;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// What a preprocessing run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessSummary {
    pub rows: usize,
    pub dropped: usize,
    pub features: usize,
    pub frames: usize,
    pub has_target: bool,
}

/// Merge `pairs` with `enrichment` and write every artifact under `out`.
pub fn run(
    pairs: &Path,
    enrichment: &Path,
    out: &ArtifactPaths,
) -> Result<PreprocessSummary, PreprocessError> {
    tracing::info!(
        pairs = %pairs.display(),
        enrichment = %enrichment.display(),
        "loading raw datasets"
    );
    let pairs = Table::read(pairs)?;
    let enrichment = Table::read(enrichment)?;
    let merged = dataset::merge(&pairs, &enrichment)?;

    let levels = CategoryLevels::from_frames(merged.rows.iter().map(|r| &r.frame));
    let schema = FeatureSchema::from_levels(&levels);

    let mut x = Array2::<f64>::zeros((merged.rows.len(), schema.len()));
    for (mut dst, row) in x.rows_mut().into_iter().zip(&merged.rows) {
        // Merge guarantees every face feature is present.
        let face = schema
            .face_vector(&row.face)
            .map_err(|e| ArtifactError::Schema {
                path: pairs.path().to_path_buf(),
                source: e,
            })?;
        for (d, v) in dst.iter_mut().zip(schema.encode(&face, &row.frame)) {
            *d = v;
        }
    }

    let scaler = StandardScaler::fit(schema.names(), x.view(), &schema.one_hot_mask());

    out.ensure_dir()?;
    write_processed(&out.processed(), &schema, &merged.rows, &x)?;
    tracing::info!(
        path = %out.processed().display(),
        rows = merged.rows.len(),
        "saved processed dataset"
    );

    artifacts::write_schema(&out.x_columns(), &schema)?;
    tracing::info!(
        path = %out.x_columns().display(),
        columns = schema.len(),
        "saved feature schema"
    );

    artifacts::write_bincode(&out.scaler(), &scaler)?;
    tracing::info!(path = %out.scaler().display(), "saved scaler");

    let catalog = dataset::frame_catalog(&merged.rows);
    artifacts::write_catalog(&out.catalog(), &catalog)?;
    tracing::info!(path = %out.catalog().display(), frames = catalog.len(), "saved frame catalog");

    Ok(PreprocessSummary {
        rows: merged.rows.len(),
        dropped: merged.dropped,
        features: schema.len(),
        frames: catalog.len(),
        has_target: merged.has_target,
    })
}

fn write_processed(
    path: &Path,
    schema: &FeatureSchema,
    rows: &[dataset::TrainingRow],
    x: &Array2<f64>,
) -> Result<(), ArtifactError> {
    let csv_err = |source| ArtifactError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let has_target = rows.iter().any(|r| r.target.is_some());
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;

    let mut header = vec![FACE_ID_COLUMN.to_string(), FRAME_ID_COLUMN.to_string()];
    header.extend(schema.names().iter().cloned());
    if has_target {
        header.push(TARGET_COLUMN.to_string());
    }
    writer.write_record(&header).map_err(csv_err)?;

    for (row, values) in rows.iter().zip(x.rows()) {
        let mut record = Vec::with_capacity(header.len());
        record.push(row.face_id.clone());
        record.push(row.frame_id.clone());
        record.extend(values.iter().map(|v| v.to_string()));
        if has_target {
            record.push(row.target.map(|t| t.to_string()).unwrap_or_default());
        }
        writer.write_record(&record).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENRICH: &str = "FaceID,FacialSymmetry,GoldenRatioDeviation,EyeSpacingRatio,JawlineWidthRatio,BrowToEyeDistance,LipToNoseDistance,Brand,Material,RimStyle,BridgeType,Color,Width_mm,LensHeight_mm,LensWidth_mm,NoseBridgeWidth_mm,TempleLength_mm\n\
        1,0.01,0.10,0.45,0.80,0.10,0.12,Acme,Metal,Full,Keyhole,Black,135,40,52,18,140\n\
        2,0.02,0.20,0.46,0.70,0.11,0.13,Zeta,Acetate,Half,Saddle,Red,138,41,53,19,145\n";
    const PAIRS: &str = "FaceID,FrameID,AdjustedBeautyScore\n1,F1,0.7\n2,F2,0.4\n1,F2,0.6\n";

    fn setup() -> (tempfile::TempDir, ArtifactPaths) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pairs.csv"), PAIRS).unwrap();
        std::fs::write(dir.path().join("enrich.csv"), ENRICH).unwrap();
        let out = ArtifactPaths::new(dir.path().join("data"));
        (dir, out)
    }

    #[test]
    fn test_run_writes_all_artifacts() {
        let (dir, out) = setup();
        let summary = run(
            &dir.path().join("pairs.csv"),
            &dir.path().join("enrich.csv"),
            &out,
        )
        .unwrap();
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.dropped, 0);
        assert_eq!(summary.frames, 2);
        assert!(summary.has_target);
        // 11 raw + 2 brands + 2 materials + 2 rims + 2 bridges + 2 colors + 30 + 2
        assert_eq!(summary.features, 11 + 10 + 32);

        let schema = artifacts::read_schema(&out.x_columns()).unwrap();
        assert_eq!(schema.len(), summary.features);

        let scaler: StandardScaler = artifacts::read_bincode(&out.scaler()).unwrap();
        assert_eq!(scaler.columns(), schema.names());

        let processed = std::fs::read_to_string(out.processed()).unwrap();
        let header = processed.lines().next().unwrap();
        assert!(header.starts_with("FaceID,FrameID,FacialSymmetry,"));
        assert!(header.ends_with(",JawToFrameWidth,AdjustedBeautyScore"));
        assert_eq!(processed.lines().count(), 4);

        let catalog = artifacts::read_catalog(&out.catalog()).unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_rerun_schema_is_byte_identical() {
        let (dir, out) = setup();
        let pairs = dir.path().join("pairs.csv");
        let enrich = dir.path().join("enrich.csv");

        run(&pairs, &enrich, &out).unwrap();
        let first = std::fs::read(out.x_columns()).unwrap();
        run(&pairs, &enrich, &out).unwrap();
        let second = std::fs::read(out.x_columns()).unwrap();
        assert_eq!(first, second);
    }
}
