//! Fixtures shared by the engine and route tests.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array1, Array2};
use spectacles_model::encoding::CategoryLevels;
use spectacles_model::{
    FaceMetrics, FeatureSchema, ForestParams, FrameRecord, RandomForest, Recommender,
    StandardScaler, TrainedModel,
};
use spectacles_vision::{AnalyzerError, FaceMesh, MeshSource};
use std::io::Cursor;

/// Mesh source returning a fixed mesh, or no face at all.
pub struct StubSource(Option<FaceMesh>);

impl StubSource {
    pub fn face() -> Self {
        Self(Some(mesh()))
    }

    pub fn no_face() -> Self {
        Self(None)
    }
}

impl MeshSource for StubSource {
    fn face_mesh(&mut self, _image: &RgbImage) -> Result<FaceMesh, AnalyzerError> {
        self.0.clone().ok_or(AnalyzerError::NoFaceDetected)
    }
}

/// Upright synthetic face: contour 234/454, forehead 10, chin 152, jaw
/// 172/397, nose tip 1, upper lip 13, brows 70/300 and both eye rings.
fn mesh() -> FaceMesh {
    let mut points = vec![[0.0f32; 3]; 468];
    let mut set = |indices: &[usize], x: f32, y: f32| {
        for &idx in indices {
            points[idx] = [x, y, 0.0];
        }
    };
    set(&[234], 150.0, 200.0);
    set(&[454], 250.0, 200.0);
    set(&[10], 200.0, 90.0);
    set(&[152], 200.0, 250.0);
    set(&[172], 158.0, 232.0);
    set(&[397], 242.0, 232.0);
    set(&[1], 201.0, 200.0);
    set(&[13], 201.0, 214.0);
    set(&[70], 174.0, 158.0);
    set(&[300], 226.0, 159.0);
    set(&[33, 133, 159, 145], 176.0, 170.0);
    set(&[362, 263, 386, 374], 224.0, 170.0);
    FaceMesh::new(points, 0.97)
}

pub fn png() -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([200, 170, 150])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn frame(id: &str, brand: &str, width: f64) -> FrameRecord {
    FrameRecord {
        frame_id: id.to_string(),
        brand: Some(brand.to_string()),
        material: Some("Acetate".to_string()),
        rim_style: Some("Full".to_string()),
        bridge_type: Some("Keyhole".to_string()),
        color: Some("Black".to_string()),
        width_mm: width,
        lens_height_mm: 40.0,
        lens_width_mm: 52.0,
        nose_bridge_width_mm: 18.0,
        temple_length_mm: 140.0,
    }
}

/// Three-frame recommender whose forest prefers wider frames.
pub fn recommender() -> Recommender {
    let catalog = vec![
        frame("F-narrow", "Acme", 124.0),
        frame("F-wide", "Lumen", 146.0),
        frame("F-mid", "Acme", 135.0),
    ];
    let schema = FeatureSchema::from_levels(&CategoryLevels::from_frames(&catalog));

    let face: FaceMetrics = [
        ("FacialSymmetry", 0.02),
        ("GoldenRatioDeviation", 0.1),
        ("EyeSpacingRatio", 0.48),
        ("JawlineWidthRatio", 0.84),
        ("BrowToEyeDistance", 0.07),
        ("LipToNoseDistance", 0.09),
    ]
    .into_iter()
    .collect();
    let face = schema.face_vector(&face).unwrap();

    let mut rows = Vec::new();
    let mut targets = Vec::new();
    for i in 0..24 {
        let width = 118.0 + i as f64 * 1.5;
        rows.extend(schema.encode(&face, &frame("t", "Acme", width)));
        targets.push(width / 100.0);
    }
    let mut x = Array2::from_shape_vec((targets.len(), schema.len()), rows).unwrap();
    let scaler = StandardScaler::fit(schema.names(), x.view(), &schema.one_hot_mask());
    scaler.transform(&mut x);

    let params = ForestParams {
        n_estimators: 4,
        min_samples_leaf: 1,
        ..ForestParams::default()
    };
    let forest = RandomForest::fit(x.view(), Array1::from(targets).view(), &params).unwrap();
    let model = TrainedModel {
        feature_names: schema.names().to_vec(),
        forest,
        train_rows: 24,
        test_r2: 0.9,
    };
    Recommender::from_parts(schema, scaler, catalog, model).unwrap()
}
