//! Raw dataset loading and the FaceID merge.
//!
//! Two CSVs feed preprocessing: a pair table (`FaceID`, `FrameID`, target)
//! and an enrichment table keyed by `FaceID` that carries the face
//! measurements and frame attributes. Enrichment rows are joined onto pairs
//! by `FaceID`, first occurrence winning.

use crate::types::{
    FaceMetrics, FrameRecord, FACE_FEATURES, FACE_ID_COLUMN, FRAME_CATEGORICAL_FEATURES,
    FRAME_ID_COLUMN, FRAME_NUMERIC_FEATURES, TARGET_COLUMN,
};
use csv::StringRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path}: missing required column {column}")]
    MissingColumn { path: PathBuf, column: String },
    #[error("no usable rows after merging ({dropped} dropped)")]
    NoUsableRows { dropped: usize },
}

/// A CSV file held as raw string records with a header index.
#[derive(Debug)]
pub struct Table {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<StringRecord>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self, DataError> {
        let csv_err = |source| DataError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;
        let headers = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();
        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(csv_err)?;

        tracing::debug!(path = %path.display(), rows = rows.len(), "table loaded");
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require(&self, name: &str) -> Result<usize, DataError> {
        self.column(name).ok_or_else(|| DataError::MissingColumn {
            path: self.path.clone(),
            column: name.to_string(),
        })
    }
}

/// One merged (face, frame) observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub face_id: String,
    pub frame_id: String,
    pub face: FaceMetrics,
    pub frame: FrameRecord,
    pub target: Option<f64>,
}

/// Merged rows plus the count of rows dropped as malformed.
#[derive(Debug)]
pub struct Merged {
    pub rows: Vec<TrainingRow>,
    pub dropped: usize,
    pub has_target: bool,
}

/// Column positions in the enrichment table.
struct EnrichmentColumns {
    face: [usize; FACE_FEATURES.len()],
    categorical: [usize; FRAME_CATEGORICAL_FEATURES.len()],
    numeric: [usize; FRAME_NUMERIC_FEATURES.len()],
}

impl EnrichmentColumns {
    fn locate(table: &Table) -> Result<Self, DataError> {
        let mut face = [0; FACE_FEATURES.len()];
        for (slot, name) in face.iter_mut().zip(FACE_FEATURES) {
            *slot = table.require(name)?;
        }
        let mut categorical = [0; FRAME_CATEGORICAL_FEATURES.len()];
        for (slot, name) in categorical.iter_mut().zip(FRAME_CATEGORICAL_FEATURES) {
            *slot = table.require(name)?;
        }
        let mut numeric = [0; FRAME_NUMERIC_FEATURES.len()];
        for (slot, name) in numeric.iter_mut().zip(FRAME_NUMERIC_FEATURES) {
            *slot = table.require(name)?;
        }
        Ok(Self {
            face,
            categorical,
            numeric,
        })
    }
}

fn parse_number(record: &StringRecord, idx: usize) -> Option<f64> {
    record
        .get(idx)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn parse_category(record: &StringRecord, idx: usize) -> Option<String> {
    record
        .get(idx)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Join enrichment onto pairs by `FaceID`.
///
/// Pairs whose face has no enrichment row, or whose numeric cells do not
/// parse, are dropped and counted. An empty result is an error.
pub fn merge(pairs: &Table, enrichment: &Table) -> Result<Merged, DataError> {
    let pair_face = pairs.require(FACE_ID_COLUMN)?;
    let pair_frame = pairs.require(FRAME_ID_COLUMN)?;
    let target = pairs.column(TARGET_COLUMN);
    let enrich_face = enrichment.require(FACE_ID_COLUMN)?;
    let cols = EnrichmentColumns::locate(enrichment)?;

    let mut by_face: HashMap<&str, &StringRecord> = HashMap::new();
    for record in enrichment.rows() {
        if let Some(id) = record.get(enrich_face).filter(|s| !s.is_empty()) {
            by_face.entry(id).or_insert(record);
        }
    }

    let mut rows = Vec::with_capacity(pairs.rows().len());
    let mut dropped = 0usize;

    for (line, record) in pairs.rows().iter().enumerate() {
        let row = (|| {
            let face_id = record.get(pair_face).filter(|s| !s.is_empty())?;
            let frame_id = record.get(pair_frame).filter(|s| !s.is_empty())?;
            let extra = by_face.get(face_id)?;

            let mut face = FaceMetrics::new();
            for (name, &idx) in FACE_FEATURES.iter().zip(&cols.face) {
                face.insert(*name, parse_number(extra, idx)?);
            }

            let mut numeric = [0.0; FRAME_NUMERIC_FEATURES.len()];
            for (slot, &idx) in numeric.iter_mut().zip(&cols.numeric) {
                *slot = parse_number(extra, idx)?;
            }
            let [brand, material, rim_style, bridge_type, color] =
                cols.categorical.map(|idx| parse_category(extra, idx));

            let target = match target {
                Some(idx) => Some(parse_number(record, idx)?),
                None => None,
            };

            Some(TrainingRow {
                face_id: face_id.to_string(),
                frame_id: frame_id.to_string(),
                face,
                frame: FrameRecord {
                    frame_id: frame_id.to_string(),
                    brand,
                    material,
                    rim_style,
                    bridge_type,
                    color,
                    width_mm: numeric[0],
                    lens_height_mm: numeric[1],
                    lens_width_mm: numeric[2],
                    nose_bridge_width_mm: numeric[3],
                    temple_length_mm: numeric[4],
                },
                target,
            })
        })();

        match row {
            Some(row) => rows.push(row),
            None => {
                dropped += 1;
                tracing::debug!(
                    line = line + 2,
                    path = %pairs.path().display(),
                    "dropping malformed pair row"
                );
            }
        }
    }

    if dropped > 0 {
        tracing::warn!(dropped, kept = rows.len(), "dropped malformed rows during merge");
    }
    if rows.is_empty() {
        return Err(DataError::NoUsableRows { dropped });
    }

    Ok(Merged {
        rows,
        dropped,
        has_target: target.is_some(),
    })
}

/// Unique frames by `FrameID`, in order of first appearance.
pub fn frame_catalog(rows: &[TrainingRow]) -> Vec<FrameRecord> {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .filter(|r| seen.insert(r.frame_id.as_str()))
        .map(|r| r.frame.clone())
        .collect()
}
