use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Face measurements the model is trained on, in schema order.
pub const FACE_FEATURES: [&str; 6] = [
    "FacialSymmetry",
    "GoldenRatioDeviation",
    "EyeSpacingRatio",
    "JawlineWidthRatio",
    "BrowToEyeDistance",
    "LipToNoseDistance",
];

/// Numeric frame dimensions, in schema order.
pub const FRAME_NUMERIC_FEATURES: [&str; 5] = [
    "Width_mm",
    "LensHeight_mm",
    "LensWidth_mm",
    "NoseBridgeWidth_mm",
    "TempleLength_mm",
];

/// Categorical frame attributes, one-hot encoded in this order.
pub const FRAME_CATEGORICAL_FEATURES: [&str; 5] =
    ["Brand", "Material", "RimStyle", "BridgeType", "Color"];

pub const FACE_ID_COLUMN: &str = "FaceID";
pub const FRAME_ID_COLUMN: &str = "FrameID";
pub const TARGET_COLUMN: &str = "AdjustedBeautyScore";

/// Named facial measurements for one face.
///
/// Serialized as a flat JSON object (`{"EyeSpacingRatio": 0.41, ...}`).
/// Keys are kept sorted so iteration and serialization are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceMetrics(BTreeMap<String, f64>);

impl FaceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for FaceMetrics {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<(&'a str, f64)> for FaceMetrics {
    fn from_iter<I: IntoIterator<Item = (&'a str, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

/// One eyeglass frame from the catalog.
///
/// Field names follow the catalog CSV headers. Categorical attributes are
/// optional: an empty cell means the attribute is unknown and encodes to
/// all-zero one-hot columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    #[serde(rename = "FrameID")]
    pub frame_id: String,
    #[serde(rename = "Brand")]
    pub brand: Option<String>,
    #[serde(rename = "Material")]
    pub material: Option<String>,
    #[serde(rename = "RimStyle")]
    pub rim_style: Option<String>,
    #[serde(rename = "BridgeType")]
    pub bridge_type: Option<String>,
    #[serde(rename = "Color")]
    pub color: Option<String>,
    #[serde(rename = "Width_mm")]
    pub width_mm: f64,
    #[serde(rename = "LensHeight_mm")]
    pub lens_height_mm: f64,
    #[serde(rename = "LensWidth_mm")]
    pub lens_width_mm: f64,
    #[serde(rename = "NoseBridgeWidth_mm")]
    pub nose_bridge_width_mm: f64,
    #[serde(rename = "TempleLength_mm")]
    pub temple_length_mm: f64,
}

impl FrameRecord {
    /// Categorical attribute by its index in [`FRAME_CATEGORICAL_FEATURES`].
    pub fn category(&self, attribute: usize) -> Option<&str> {
        let value = match attribute {
            0 => &self.brand,
            1 => &self.material,
            2 => &self.rim_style,
            3 => &self.bridge_type,
            4 => &self.color,
            _ => return None,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Numeric dimension by its index in [`FRAME_NUMERIC_FEATURES`].
    pub fn numeric(&self, feature: usize) -> f64 {
        match feature {
            0 => self.width_mm,
            1 => self.lens_height_mm,
            2 => self.lens_width_mm,
            3 => self.nose_bridge_width_mm,
            4 => self.temple_length_mm,
            _ => f64::NAN,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_metrics_json_is_flat_and_sorted() {
        let mut m = FaceMetrics::new();
        m.insert("JawlineWidthRatio", 0.8);
        m.insert("EyeSpacingRatio", 0.45);
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"EyeSpacingRatio":0.45,"JawlineWidthRatio":0.8}"#);

        let back: FaceMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_frame_empty_category_is_absent() {
        let mut f = fixtures::frame("F1", "Acme", 135.0);
        f.color = Some(String::new());
        assert_eq!(f.category(4), None);
        assert_eq!(f.category(0), Some("Acme"));
        assert_eq!(f.category(9), None);
    }

    #[test]
    fn test_frame_numeric_order_matches_constants() {
        let f = fixtures::frame("F1", "Acme", 135.0);
        assert_eq!(f.numeric(0), 135.0);
        assert_eq!(f.numeric(4), 140.0);
        assert!(f.numeric(5).is_nan());
    }
}
