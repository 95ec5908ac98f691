/// This module contains the structs written to stdout by the predictor binaries.
/// They are serialized as JSON objects and parsed by the web server that spawns the predictors.
/// The names of the fields become the JSON keys, so they must be kept in sync with that server.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A validated request, produced by the adapter before any model is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionRequest
{
    NumericFeatures(Vec<f64>),
    /// Base64 encoded image.
    Image(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PredictionResult
{
    Prediction
    {
        prediction: String,
    },
    Error
    {
        error: String,
        traceback: String,
    },
}

impl PredictionResult
{
    pub fn from_error(error: &Error) -> Self
    {
        PredictionResult::Error { error: error.to_string(), traceback: error.trace() }
    }
}

/// Written when a request is rejected before prediction.
#[derive(Debug, Serialize)]
pub struct RejectedRequest<'a>
{
    pub error: &'a Error,
    /// The raw stdin contents, echoed back when they could not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<&'a str>,
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn prediction_serialization()
    {
        let result = PredictionResult::Prediction { prediction: "rice".to_string() };
        assert_eq!(serde_json::to_string(&result).unwrap(), r#"{"prediction":"rice"}"#);
    }

    #[test]
    fn error_serialization()
    {
        let error = Error::inference("X has 3 features, but StandardScaler is expecting 7 features as input.");
        let result = PredictionResult::from_error(&error);

        let value: serde_json::Value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["error"], "X has 3 features, but StandardScaler is expecting 7 features as input.");
        assert!(value["traceback"].as_str().unwrap().starts_with("InferenceError: "));

        let deserialized: PredictionResult = serde_json::from_value(value).unwrap();
        assert_eq!(deserialized, result);
    }

    #[test]
    fn rejected_request_serialization()
    {
        let error = Error::Shape("No image data provided".to_string());
        let rejected = RejectedRequest { error: &error, input: None };
        assert_eq!(serde_json::to_string(&rejected).unwrap(), r#"{"error":"No image data provided"}"#);

        let rejected = RejectedRequest { error: &error, input: Some("not json") };
        assert_eq!(serde_json::to_string(&rejected).unwrap(), r#"{"error":"No image data provided","input":"not json"}"#);
    }
}
