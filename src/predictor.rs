use std::fmt::{self, Display, Formatter};

use log::{debug, error, info, warn};
use ndarray::{Array1, Axis};

use crate::error::Error;
use crate::image_features::{self, FEATURE_VECTOR_LENGTH};
use crate::interface::{PredictionRequest, PredictionResult};
use crate::model_store::ModelStore;
use crate::preprocessing;

/// The three independent predictors. Each owns its own artifact bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictorKind
{
    Crop,
    Fertilizer,
    Disease,
}

impl PredictorKind
{
    pub fn name(self) -> &'static str
    {
        match self
        {
            PredictorKind::Crop => "crop",
            PredictorKind::Fertilizer => "fertilizer",
            PredictorKind::Disease => "disease",
        }
    }

    pub fn classifier_stem(self) -> &'static str
    {
        match self
        {
            PredictorKind::Crop => "crop_stacking_model",
            PredictorKind::Fertilizer => "fertilizer_stacking_model",
            PredictorKind::Disease => "disease_rf_model",
        }
    }

    pub fn labels_stem(self) -> &'static str
    {
        match self
        {
            PredictorKind::Crop => "crop_label_encoder",
            PredictorKind::Fertilizer => "fertilizer_label_encoder",
            PredictorKind::Disease => "disease_label_map",
        }
    }

    pub fn scaler_stem(self) -> Option<&'static str>
    {
        match self
        {
            PredictorKind::Crop => Some("crop_scaler"),
            PredictorKind::Fertilizer => Some("fertilizer_scaler"),
            PredictorKind::Disease => None,
        }
    }

    /// The request field holding this predictor's input.
    pub fn input_field(self) -> &'static str
    {
        if self.takes_image() { "image" } else { "features" }
    }

    pub fn takes_image(self) -> bool
    {
        self == PredictorKind::Disease
    }

    /// Number of numeric features the caller is expected to send.
    /// Crop: N, P, K, temperature, humidity, pH, rainfall.
    pub fn expected_feature_count(self) -> Option<usize>
    {
        match self
        {
            PredictorKind::Crop => Some(7),
            PredictorKind::Fertilizer => Some(14),
            PredictorKind::Disease => None,
        }
    }

    /// Width of the matrix handed to the classifier.
    pub fn model_input_length(self) -> Option<usize>
    {
        match self
        {
            PredictorKind::Disease => Some(FEATURE_VECTOR_LENGTH),
            _ => self.expected_feature_count(),
        }
    }
}

impl Display for PredictorKind
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

fn describe(request: &PredictionRequest) -> &'static str
{
    match request
    {
        PredictionRequest::NumericFeatures(_) => "numeric features",
        PredictionRequest::Image(_) => "image data",
    }
}

/// Runs validated requests through the artifact bundles held by a store.
pub struct PredictionService<'a>
{
    store: &'a ModelStore,
}

impl<'a> PredictionService<'a>
{
    pub fn new(store: &'a ModelStore) -> Self
    {
        Self { store }
    }

    /// Never fails: every error becomes an error result.
    pub fn predict(&self, kind: PredictorKind, request: &PredictionRequest) -> PredictionResult
    {
        match self.try_predict(kind, request)
        {
            Ok(prediction) =>
            {
                info!("Predicted {} label {:?}", kind, prediction);
                PredictionResult::Prediction { prediction }
            },
            Err(e) =>
            {
                error!("{} prediction failed: {}", kind, e.trace());
                PredictionResult::from_error(&e)
            },
        }
    }

    pub fn try_predict(&self, kind: PredictorKind, request: &PredictionRequest) -> Result<String, Error>
    {
        let features = match (kind.takes_image(), request)
        {
            (true, PredictionRequest::Image(payload)) =>
            {
                let image = preprocessing::decode_image(payload)?;
                image_features::extract_features(&image)?
            },
            (false, PredictionRequest::NumericFeatures(values)) =>
            {
                if let Some(expected) = kind.expected_feature_count()
                {
                    if values.len() != expected
                    {
                        warn!("The {} predictor expects {} features, got {}", kind, expected, values.len());
                    }
                }
                Array1::from(values.clone())
            },
            _ => return Err(Error::inference(format!("The {} predictor cannot handle {}", kind, describe(request)))),
        };
        debug!("Feature vector has {} entries", features.len());

        let bundle = self.store.load(kind)?;

        let mut matrix = features.insert_axis(Axis(0));
        if let Some(scaler) = &bundle.scaler
        {
            matrix = scaler.transform(matrix.view())?;
        }

        let predicted = bundle.classifier
            .predict(matrix.view())
            .map_err(|e| Error::inference(format!("{:#}", e)))?;
        let index = predicted.first()
            .copied()
            .ok_or_else(|| Error::inference("The classifier returned no prediction"))?;
        debug!("Classifier predicted class index {}", index);

        bundle.labels.decode(index)
    }
}
