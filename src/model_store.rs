use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use log::{debug, info};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;

use crate::classifier::{Classifier, ClassifierModel};
use crate::error::Error;
use crate::models::{LabelDecoder, LabelEncoder, LabelMap, ModelArtifactBundle, StandardScaler};
use crate::predictor::PredictorKind;

/// Loads artifact bundles from a model directory and keeps them for the
/// lifetime of the process.
pub struct ModelStore
{
    model_dir: PathBuf,
    bundles: Mutex<FxHashMap<PredictorKind, Arc<ModelArtifactBundle>>>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Error>
{
    let file = File::open(path).map_err(|e| Error::artifact(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::artifact(path, e))
}

impl ModelStore
{
    pub fn new(model_dir: impl Into<PathBuf>) -> Self
    {
        Self { model_dir: model_dir.into(), bundles: Mutex::new(FxHashMap::default()) }
    }

    pub fn artifact_path(&self, stem: &str) -> PathBuf
    {
        self.model_dir.join(format!("{}.json", stem))
    }

    #[cfg(feature = "onnx")]
    pub fn onnx_path(&self, stem: &str) -> PathBuf
    {
        self.model_dir.join(format!("{}.onnx", stem))
    }

    fn has_classifier(&self, kind: PredictorKind) -> bool
    {
        #[cfg(feature = "onnx")]
        {
            if self.onnx_path(kind.classifier_stem()).exists()
            {
                return true;
            }
        }
        self.artifact_path(kind.classifier_stem()).exists()
    }

    /// Required artifact files that are not present in the model directory.
    pub fn missing_artifacts(&self, kind: PredictorKind) -> Vec<PathBuf>
    {
        let mut missing = Vec::new();
        if !self.has_classifier(kind)
        {
            missing.push(self.artifact_path(kind.classifier_stem()));
        }
        for stem in std::iter::once(kind.labels_stem()).chain(kind.scaler_stem())
        {
            let path = self.artifact_path(stem);
            if !path.exists()
            {
                missing.push(path);
            }
        }
        missing
    }

    pub fn is_loaded(&self, kind: PredictorKind) -> bool
    {
        self.bundles.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&kind)
    }

    /// Returns the bundle for `kind`, reading it from disk on first use.
    pub fn load(&self, kind: PredictorKind) -> Result<Arc<ModelArtifactBundle>, Error>
    {
        let mut bundles = self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bundle) = bundles.get(&kind)
        {
            return Ok(Arc::clone(bundle));
        }

        let start = Instant::now();
        let bundle = Arc::new(self.read_bundle(kind)?);
        info!("Loaded {} model artifacts from {} in {:?}", kind, self.model_dir.display(), start.elapsed());

        bundles.insert(kind, Arc::clone(&bundle));
        Ok(bundle)
    }

    fn read_bundle(&self, kind: PredictorKind) -> Result<ModelArtifactBundle, Error>
    {
        let classifier = self.read_classifier(kind)?;

        let labels_path = self.artifact_path(kind.labels_stem());
        let labels = if kind.takes_image()
        {
            LabelDecoder::Map(read_json::<LabelMap>(&labels_path)?)
        }
        else
        {
            LabelDecoder::Encoder(read_json::<LabelEncoder>(&labels_path)?)
        };
        if labels.labels().is_empty()
        {
            return Err(Error::artifact(&labels_path, anyhow::anyhow!("no class labels")));
        }
        debug!("{} labels: {:?}", kind, labels.labels());

        let scaler = match kind.scaler_stem()
        {
            Some(stem) =>
            {
                let path = self.artifact_path(stem);
                let scaler: StandardScaler = read_json(&path)?;
                scaler.validate().map_err(|e| Error::artifact(&path, e))?;
                Some(scaler)
            },
            None => None,
        };

        Ok(ModelArtifactBundle { classifier, labels, scaler })
    }

    fn read_classifier(&self, kind: PredictorKind) -> Result<Box<dyn Classifier + Send + Sync>, Error>
    {
        #[cfg(feature = "onnx")]
        {
            let path = self.onnx_path(kind.classifier_stem());
            if path.exists()
            {
                let classifier = crate::onnx::OnnxClassifier::from_file(&path, kind.model_input_length())
                    .map_err(|e| Error::artifact(&path, e))?;
                return Ok(Box::new(classifier));
            }
        }

        let path = self.artifact_path(kind.classifier_stem());
        let model: ClassifierModel = read_json(&path)?;
        model.validate().map_err(|e| Error::artifact(&path, e))?;
        if let (Some(expected), Some(actual)) = (kind.model_input_length(), model.n_features())
        {
            if expected != actual
            {
                debug!("{} classifier was fit on {} features, requests provide {}", kind, actual, expected);
            }
        }
        Ok(Box::new(model))
    }
}
