use std::path::Path;
use std::sync::Mutex;

use anyhow::anyhow;
use log::info;
use ndarray::{Array1, ArrayView2};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};

use crate::classifier::Classifier;

/// Name of the predicted-label output that scikit-learn ONNX exports produce.
pub const LABEL_OUTPUT: &str = "output_label";

/// A classifier exported to ONNX. Inputs are fed as a single f32 matrix.
pub struct OnnxClassifier
{
    session: Mutex<Session>,
    n_features: Option<usize>,
}

impl OnnxClassifier
{
    pub fn from_file(model_path: &Path, n_features: Option<usize>) -> anyhow::Result<Self>
    {
        let session = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to set optimization level: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| anyhow!("Failed to load ONNX model: {}", e))?;
        info!("Loaded ONNX classifier from {}", model_path.display());

        Ok(Self { session: Mutex::new(session), n_features })
    }

    fn to_input(features: ArrayView2<'_, f64>) -> anyhow::Result<Value>
    {
        let shape = vec![features.nrows(), features.ncols()];
        let data: Vec<f32> = features.iter().map(|&x| x as f32).collect();
        Tensor::from_array((shape, data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| anyhow!("Failed to create tensor: {}", e))
    }
}

impl Classifier for OnnxClassifier
{
    fn n_features(&self) -> Option<usize>
    {
        self.n_features
    }

    fn predict(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array1<i64>>
    {
        let input = Self::to_input(features)?;
        let mut session = self.session
            .lock()
            .map_err(|_| anyhow!("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| anyhow!("ONNX inference failed: {}", e))?;
        let labels = outputs
            .get(LABEL_OUTPUT)
            .ok_or_else(|| anyhow!("Missing {} tensor", LABEL_OUTPUT))?
            .try_extract_tensor::<i64>()
            .map_err(|e| anyhow!("Failed to extract tensor: {}", e))?;

        Ok(labels.1.iter().copied().collect())
    }
}
