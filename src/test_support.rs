/// Small artifact bundles and payloads shared by the unit tests.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};

use crate::image_features::FEATURE_VECTOR_LENGTH;
use crate::predictor::PredictorKind;

fn write(dir: &Path, stem: &str, value: &Value)
{
    fs::write(dir.join(format!("{}.json", stem)), value.to_string()).unwrap();
}

/// Three-class stacking ensemble decided by the first feature:
/// below 50 -> class 0, otherwise class 2.
fn numeric_classifier(n_features: usize) -> Value
{
    let forest = json!({
        "type": "random_forest",
        "classes": [0, 1, 2],
        "n_features_in": n_features,
        "estimators": [{
            "children_left": [1, -1, -1],
            "children_right": [2, -1, -1],
            "feature": [0, -2, -2],
            "threshold": [50.0, -2.0, -2.0],
            "value": [[4.0, 2.0, 4.0], [4.0, 1.0, 0.0], [0.0, 1.0, 4.0]],
            "classes": [0, 1, 2],
            "n_features_in": n_features,
        }],
    });
    let uniform = json!({
        "type": "logistic_regression",
        "coef": vec![vec![0.0; n_features]; 3],
        "intercept": [0.0, 0.0, 0.0],
        "classes": [0, 1, 2],
    });
    json!({
        "type": "stacking",
        "classes": [0, 1, 2],
        "passthrough": false,
        "estimators": [forest, uniform],
        "final_estimator": {
            "type": "logistic_regression",
            "coef": [
                [4.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 4.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 4.0, 0.0, 0.0, 0.0],
            ],
            "intercept": [0.0, 0.0, 0.0],
            "classes": [0, 1, 2],
        },
    })
}

pub fn numeric_labels(kind: PredictorKind) -> [&'static str; 3]
{
    match kind
    {
        PredictorKind::Fertilizer => ["Urea", "DAP", "14-35-14"],
        _ => ["maize", "rice", "wheat"],
    }
}

/// Writes a loadable crop or fertilizer bundle with an identity scaler.
pub fn write_numeric_artifacts(dir: &Path, kind: PredictorKind)
{
    let n_features = kind.expected_feature_count().unwrap();
    let scale_stem = kind.scaler_stem().unwrap();

    write(dir, kind.classifier_stem(), &numeric_classifier(n_features));
    write(dir, kind.labels_stem(), &json!({ "classes": numeric_labels(kind) }));
    write(dir, scale_stem, &json!({ "mean": vec![0.0; n_features], "scale": vec![1.0; n_features] }));
}

/// Writes a disease bundle whose single-leaf forest always predicts class 1.
pub fn write_disease_artifacts(dir: &Path)
{
    let forest = json!({
        "type": "random_forest",
        "classes": [0, 1],
        "n_features_in": FEATURE_VECTOR_LENGTH,
        "estimators": [{
            "children_left": [-1],
            "children_right": [-1],
            "feature": [-2],
            "threshold": [-2.0],
            "value": [[1.0, 3.0]],
            "classes": [0, 1],
            "n_features_in": FEATURE_VECTOR_LENGTH,
        }],
    });
    let kind = PredictorKind::Disease;
    write(dir, kind.classifier_stem(), &forest);
    write(dir, kind.labels_stem(), &json!({ "0": "Tomato___healthy", "1": "Tomato___Early_blight" }));
}

/// A small synthetic leaf photo, PNG encoded and base64 encoded.
pub fn leaf_png_base64() -> String
{
    let image = RgbImage::from_fn(60, 45, |x, y| {
        if (x / 6 + y / 6) % 3 == 0 { Rgb([120, 90, 30]) } else { Rgb([40, 140 + (x % 50) as u8, 35]) }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    STANDARD.encode(bytes)
}
