/// Pretrained preprocessing and label artifacts, deserialized from the JSON
/// exports that accompany each classifier.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::error::Error;

/// Feature-wise standardization fit at training time: `(x - mean) / scale`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardScaler
{
    #[serde(default)]
    pub mean: Option<Vec<f64>>,
    #[serde(default)]
    pub scale: Option<Vec<f64>>,
}

impl StandardScaler
{
    pub fn n_features(&self) -> Option<usize>
    {
        self.mean.as_ref().or(self.scale.as_ref()).map(Vec::len)
    }

    pub fn validate(&self) -> anyhow::Result<()>
    {
        if let (Some(mean), Some(scale)) = (&self.mean, &self.scale)
        {
            anyhow::ensure!(
                mean.len() == scale.len(),
                "scaler mean has {} entries but scale has {}", mean.len(), scale.len());
        }
        Ok(())
    }

    pub fn transform(&self, features: ArrayView2<'_, f64>) -> Result<Array2<f64>, Error>
    {
        if let Some(expected) = self.n_features()
        {
            let actual = features.len_of(Axis(1));
            if actual != expected
            {
                return Err(Error::inference(format!(
                    "X has {} features, but StandardScaler is expecting {} features as input.", actual, expected)));
            }
        }

        let mut scaled = features.to_owned();
        if let Some(mean) = &self.mean
        {
            scaled -= &Array1::from(mean.clone());
        }
        if let Some(scale) = &self.scale
        {
            // Constant features were fit with a zero scale; they are left unscaled.
            let scale: Array1<f64> = scale.iter().map(|&s| if s == 0.0 { 1.0 } else { s }).collect();
            scaled /= &scale;
        }
        Ok(scaled)
    }
}

/// Maps a class index back to the label it was encoded from (`classes[index]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelEncoder
{
    pub classes: Vec<String>,
}

impl LabelEncoder
{
    pub fn inverse_transform(&self, index: i64) -> Result<&str, Error>
    {
        usize::try_from(index).ok()
            .and_then(|i| self.classes.get(i))
            .map(String::as_str)
            .ok_or_else(|| Error::inference(format!("y contains previously unseen labels: [{}]", index)))
    }
}

/// Explicit class index to label dictionary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct LabelMap(pub FxHashMap<i64, String>);

impl LabelMap
{
    pub fn get(&self, index: i64) -> Result<&str, Error>
    {
        self.0.get(&index)
            .map(String::as_str)
            .ok_or_else(|| Error::inference(format!("No label for class index {}", index)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LabelDecoder
{
    Encoder(LabelEncoder),
    Map(LabelMap),
}

impl LabelDecoder
{
    pub fn decode(&self, index: i64) -> Result<String, Error>
    {
        match self
        {
            LabelDecoder::Encoder(encoder) => encoder.inverse_transform(index).map(str::to_string),
            LabelDecoder::Map(map) => map.get(index).map(str::to_string),
        }
    }

    pub fn labels(&self) -> Vec<&str>
    {
        match self
        {
            LabelDecoder::Encoder(encoder) => encoder.classes.iter().map(String::as_str).collect(),
            LabelDecoder::Map(map) => map.0.values().map(String::as_str).collect(),
        }
    }
}

/// Everything needed to run one predictor.
pub struct ModelArtifactBundle
{
    pub classifier: Box<dyn Classifier + Send + Sync>,
    pub labels: LabelDecoder,
    pub scaler: Option<StandardScaler>,
}

#[cfg(test)]
mod tests
{
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn scaler_standardizes_each_feature()
    {
        let scaler = StandardScaler { mean: Some(vec![1.0, 10.0]), scale: Some(vec![2.0, 5.0]) };
        let scaled = scaler.transform(array![[3.0, 0.0]].view()).unwrap();
        assert_abs_diff_eq!(scaled, array![[1.0, -2.0]], epsilon = 1e-12);
    }

    #[test]
    fn scaler_leaves_constant_features_unscaled()
    {
        let scaler = StandardScaler { mean: Some(vec![4.0]), scale: Some(vec![0.0]) };
        let scaled = scaler.transform(array![[6.0]].view()).unwrap();
        assert_abs_diff_eq!(scaled, array![[2.0]], epsilon = 1e-12);
    }

    #[test]
    fn scaler_without_mean_only_scales()
    {
        let scaler: StandardScaler = serde_json::from_str(r#"{"mean": null, "scale": [4.0]}"#).unwrap();
        let scaled = scaler.transform(array![[6.0]].view()).unwrap();
        assert_abs_diff_eq!(scaled, array![[1.5]], epsilon = 1e-12);
    }

    #[test]
    fn scaler_rejects_wrong_feature_count()
    {
        let scaler = StandardScaler { mean: Some(vec![0.0; 7]), scale: Some(vec![1.0; 7]) };
        let error = scaler.transform(array![[1.0, 2.0, 3.0]].view()).unwrap_err();
        assert_eq!(error.to_string(), "X has 3 features, but StandardScaler is expecting 7 features as input.");
    }

    #[test]
    fn scaler_validation_catches_mismatched_parameters()
    {
        let scaler = StandardScaler { mean: Some(vec![0.0; 2]), scale: Some(vec![1.0; 3]) };
        assert!(scaler.validate().is_err());
    }

    #[test]
    fn label_encoder_inverse_transform()
    {
        let encoder: LabelEncoder = serde_json::from_str(r#"{"classes": ["maize", "rice", "wheat"]}"#).unwrap();
        assert_eq!(encoder.inverse_transform(1).unwrap(), "rice");
        assert!(encoder.inverse_transform(3).is_err());
        assert!(encoder.inverse_transform(-1).is_err());
    }

    #[test]
    fn label_map_reads_integer_keys()
    {
        let map: LabelMap = serde_json::from_str(r#"{"0": "Tomato___healthy", "1": "Tomato___Early_blight"}"#).unwrap();
        let decoder = LabelDecoder::Map(map);
        assert_eq!(decoder.decode(1).unwrap(), "Tomato___Early_blight");
        assert!(decoder.decode(2).is_err());
        assert_eq!(decoder.labels().len(), 2);
    }
}
