//! Feature schema and (face, frame) pair encoding.
//!
//! The same [`FeatureSchema`] drives encoding at preprocessing time and at
//! recommendation time, so a pair always lands in the same columns in the
//! same order. Column names are parsed into typed [`FeatureColumn`]s when a
//! schema is loaded; a name the encoder cannot produce is rejected up front.

use crate::types::{
    FaceMetrics, FrameRecord, FACE_FEATURES, FRAME_CATEGORICAL_FEATURES, FRAME_NUMERIC_FEATURES,
};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

const EYE_SPACING: usize = 2;
const JAWLINE_WIDTH: usize = 3;
const WIDTH_MM: usize = 0;
/// Frame widths below this are clamped before dividing.
const MIN_FRAME_WIDTH_MM: f64 = 1.0;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("unknown feature column: {0}")]
    UnknownColumn(String),
    #[error("duplicate feature column: {0}")]
    DuplicateColumn(String),
    #[error("feature schema is empty")]
    EmptySchema,
    #[error("face metrics missing features required by the schema: {}", .0.join(", "))]
    MissingFeatures(Vec<String>),
}

/// A single encoded column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureColumn {
    /// Raw face measurement, index into [`FACE_FEATURES`].
    Face(usize),
    /// Raw frame dimension, index into [`FRAME_NUMERIC_FEATURES`].
    FrameNumeric(usize),
    /// `1.0` when the frame's attribute equals `category`, else `0.0`.
    OneHot { attribute: usize, category: String },
    /// Face measurement times frame dimension.
    Interaction { face: usize, frame: usize },
    /// `EyeSpacingRatio * 100 / max(Width_mm, 1)`.
    EyeToFrameWidth,
    /// `JawlineWidthRatio * 100 / max(Width_mm, 1)`.
    JawToFrameWidth,
}

impl FeatureColumn {
    /// Parse a persisted column name.
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(i) = FACE_FEATURES.iter().position(|f| *f == name) {
            return Some(Self::Face(i));
        }
        if let Some(i) = FRAME_NUMERIC_FEATURES.iter().position(|f| *f == name) {
            return Some(Self::FrameNumeric(i));
        }
        match name {
            "EyeToFrameWidth" => return Some(Self::EyeToFrameWidth),
            "JawToFrameWidth" => return Some(Self::JawToFrameWidth),
            _ => {}
        }
        for (attribute, prefix) in FRAME_CATEGORICAL_FEATURES.iter().enumerate() {
            if let Some(category) = name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('_'))
            {
                return Some(Self::OneHot {
                    attribute,
                    category: category.to_string(),
                });
            }
        }
        let (face, frame) = name.split_once("_x_")?;
        Some(Self::Interaction {
            face: FACE_FEATURES.iter().position(|f| *f == face)?,
            frame: FRAME_NUMERIC_FEATURES.iter().position(|f| *f == frame)?,
        })
    }

    pub fn name(&self) -> String {
        match self {
            Self::Face(i) => FACE_FEATURES[*i].to_string(),
            Self::FrameNumeric(i) => FRAME_NUMERIC_FEATURES[*i].to_string(),
            Self::OneHot {
                attribute,
                category,
            } => format!("{}_{category}", FRAME_CATEGORICAL_FEATURES[*attribute]),
            Self::Interaction { face, frame } => {
                format!("{}_x_{}", FACE_FEATURES[*face], FRAME_NUMERIC_FEATURES[*frame])
            }
            Self::EyeToFrameWidth => "EyeToFrameWidth".to_string(),
            Self::JawToFrameWidth => "JawToFrameWidth".to_string(),
        }
    }

    pub fn is_one_hot(&self) -> bool {
        matches!(self, Self::OneHot { .. })
    }

    /// The face measurement this column reads, if any.
    pub fn face_feature(&self) -> Option<usize> {
        match self {
            Self::Face(i) => Some(*i),
            Self::Interaction { face, .. } => Some(*face),
            Self::EyeToFrameWidth => Some(EYE_SPACING),
            Self::JawToFrameWidth => Some(JAWLINE_WIDTH),
            Self::FrameNumeric(_) | Self::OneHot { .. } => None,
        }
    }

    fn value(&self, face: &FaceVector, frame: &FrameRecord) -> f64 {
        match self {
            Self::Face(i) => face.0[*i],
            Self::FrameNumeric(i) => frame.numeric(*i),
            Self::OneHot {
                attribute,
                category,
            } => {
                if frame.category(*attribute) == Some(category.as_str()) {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Interaction { face: f, frame: g } => face.0[*f] * frame.numeric(*g),
            Self::EyeToFrameWidth => {
                face.0[EYE_SPACING] * 100.0 / frame.numeric(WIDTH_MM).max(MIN_FRAME_WIDTH_MM)
            }
            Self::JawToFrameWidth => {
                face.0[JAWLINE_WIDTH] * 100.0 / frame.numeric(WIDTH_MM).max(MIN_FRAME_WIDTH_MM)
            }
        }
    }
}

/// Face measurements resolved against a schema, in [`FACE_FEATURES`] order.
///
/// Measurements the schema never reads are left at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceVector([f64; FACE_FEATURES.len()]);

impl FaceVector {
    pub fn from_values(values: [f64; FACE_FEATURES.len()]) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

/// Sorted category values seen per categorical attribute.
#[derive(Debug, Clone, Default)]
pub struct CategoryLevels([BTreeSet<String>; FRAME_CATEGORICAL_FEATURES.len()]);

impl CategoryLevels {
    pub fn from_frames<'a>(frames: impl IntoIterator<Item = &'a FrameRecord>) -> Self {
        let mut levels = Self::default();
        for frame in frames {
            for (attribute, set) in levels.0.iter_mut().enumerate() {
                if let Some(category) = frame.category(attribute) {
                    set.insert(category.to_string());
                }
            }
        }
        levels
    }

    pub fn attribute(&self, attribute: usize) -> impl Iterator<Item = &str> {
        self.0[attribute].iter().map(String::as_str)
    }
}

/// Ordered list of encoded columns shared by training and inference.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    columns: Vec<FeatureColumn>,
    names: Vec<String>,
}

impl FeatureSchema {
    /// Canonical schema for the observed category levels.
    ///
    /// Order: face features, frame dimensions, one-hot columns (attribute
    /// order, categories sorted), face x frame interactions, width ratios.
    pub fn from_levels(levels: &CategoryLevels) -> Self {
        let mut columns: Vec<FeatureColumn> = (0..FACE_FEATURES.len())
            .map(FeatureColumn::Face)
            .chain((0..FRAME_NUMERIC_FEATURES.len()).map(FeatureColumn::FrameNumeric))
            .collect();

        for attribute in 0..FRAME_CATEGORICAL_FEATURES.len() {
            columns.extend(levels.attribute(attribute).map(|category| FeatureColumn::OneHot {
                attribute,
                category: category.to_string(),
            }));
        }

        for face in 0..FACE_FEATURES.len() {
            for frame in 0..FRAME_NUMERIC_FEATURES.len() {
                columns.push(FeatureColumn::Interaction { face, frame });
            }
        }
        columns.push(FeatureColumn::EyeToFrameWidth);
        columns.push(FeatureColumn::JawToFrameWidth);

        let names = columns.iter().map(FeatureColumn::name).collect();
        Self { columns, names }
    }

    /// Rebuild a schema from persisted column names.
    pub fn from_names(names: Vec<String>) -> Result<Self, EncodingError> {
        if names.is_empty() {
            return Err(EncodingError::EmptySchema);
        }
        let mut seen = HashSet::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(EncodingError::DuplicateColumn(name.clone()));
            }
            let column = FeatureColumn::parse(name)
                .ok_or_else(|| EncodingError::UnknownColumn(name.clone()))?;
            columns.push(column);
        }
        Ok(Self { columns, names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `true` for columns the scaler must leave untouched.
    pub fn one_hot_mask(&self) -> Vec<bool> {
        self.columns.iter().map(FeatureColumn::is_one_hot).collect()
    }

    /// Face measurements any column reads, in [`FACE_FEATURES`] order.
    pub fn required_face_features(&self) -> Vec<&'static str> {
        let mut required = [false; FACE_FEATURES.len()];
        for column in &self.columns {
            if let Some(i) = column.face_feature() {
                required[i] = true;
            }
        }
        FACE_FEATURES
            .iter()
            .zip(required)
            .filter_map(|(name, needed)| needed.then_some(*name))
            .collect()
    }

    /// Resolve face metrics against this schema.
    ///
    /// Every measurement the schema reads must be present; nothing is
    /// defaulted.
    pub fn face_vector(&self, metrics: &FaceMetrics) -> Result<FaceVector, EncodingError> {
        let mut values = [0.0; FACE_FEATURES.len()];
        let mut missing = Vec::new();
        for name in self.required_face_features() {
            match metrics.get(name) {
                Some(v) => {
                    // FACE_FEATURES contains every required name.
                    let i = FACE_FEATURES.iter().position(|f| *f == name).unwrap_or_default();
                    values[i] = v;
                }
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(EncodingError::MissingFeatures(missing));
        }
        Ok(FaceVector(values))
    }

    /// Encode one (face, frame) pair. Values are unscaled.
    pub fn encode(&self, face: &FaceVector, frame: &FrameRecord) -> Vec<f64> {
        self.columns.iter().map(|c| c.value(face, frame)).collect()
    }

    /// Pretty-printed JSON array of column names.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.names)
    }
}
