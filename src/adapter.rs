/// Stdin/stdout glue shared by the predictor binaries.
/// Reads one JSON request, validates its shape, runs the prediction and writes
/// one JSON line. Diagnostics go to stderr through `log`.

use std::io::{self, Read, Write};
use std::process::ExitCode;

use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::Error;
use crate::interface::{PredictionRequest, PredictionResult, RejectedRequest};
use crate::logging;
use crate::model_store::ModelStore;
use crate::predictor::{PredictionService, PredictorKind};

/// How a request ended, as seen by the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus
{
    /// A result (possibly a prediction error) was written.
    Completed,
    /// The request was malformed and never reached a model.
    Rejected,
}

impl AdapterStatus
{
    pub fn exit_code(self) -> u8
    {
        match self
        {
            AdapterStatus::Completed => 0,
            AdapterStatus::Rejected => 1,
        }
    }
}

impl From<AdapterStatus> for ExitCode
{
    fn from(status: AdapterStatus) -> Self
    {
        ExitCode::from(status.exit_code())
    }
}

fn json_type(value: &Value) -> &'static str
{
    match value
    {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parses the request body. Callers sometimes JSON-encode the object twice,
/// so a string value is parsed once more; if that fails the string is kept.
pub fn parse_envelope(raw: &str) -> Result<Value, Error>
{
    match serde_json::from_str::<Value>(raw)?
    {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner)
        {
            Ok(value) => Ok(value),
            Err(_) => Ok(Value::String(inner)),
        },
        value => Ok(value),
    }
}

fn numeric_features(mut object: Map<String, Value>, field: &str) -> Result<Vec<f64>, Error>
{
    let features = match object.remove(field)
    {
        None | Some(Value::Null) => return Err(Error::Shape("No features provided".to_string())),
        Some(Value::Array(features)) => features,
        Some(other) => return Err(Error::Shape(format!("Expected {} to be an array, got {}", field, json_type(&other)))),
    };
    if features.is_empty()
    {
        return Err(Error::Shape("No features provided".to_string()));
    }

    features.iter()
        .enumerate()
        .map(|(i, value)| {
            value.as_f64()
                .ok_or_else(|| Error::Shape(format!("Feature {} must be a number, got {}", i, json_type(value))))
        })
        .collect()
}

/// Any non-empty string is passed on; the decoder judges its contents.
fn image_payload(mut object: Map<String, Value>, field: &str) -> Result<String, Error>
{
    match object.remove(field)
    {
        Some(Value::String(image)) if !image.is_empty() => Ok(image),
        None | Some(Value::Null) | Some(Value::String(_)) => Err(Error::Shape("No image data provided".to_string())),
        Some(other) => Err(Error::Shape(format!("Expected {} to be a base64 string, got {}", field, json_type(&other)))),
    }
}

/// Checks the request shape for `kind` and converts it to a typed request.
pub fn parse_request(kind: PredictorKind, value: Value) -> Result<PredictionRequest, Error>
{
    let object = match value
    {
        Value::Object(object) => object,
        other => return Err(Error::Shape(format!("Expected JSON object, got {}", json_type(&other)))),
    };

    if kind.takes_image()
    {
        Ok(PredictionRequest::Image(image_payload(object, kind.input_field())?))
    }
    else
    {
        Ok(PredictionRequest::NumericFeatures(numeric_features(object, kind.input_field())?))
    }
}

fn write_json_line<W: Write, T: Serialize>(output: &mut W, value: &T) -> Result<(), Error>
{
    serde_json::to_writer(&mut *output, value).map_err(io::Error::from)?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}

/// Handles one request from `input`, writing the JSON response to `output`.
/// Only I/O failures are returned as errors.
pub fn handle<R: Read, W: Write>(kind: PredictorKind, store: &ModelStore, mut input: R, mut output: W) -> Result<AdapterStatus, Error>
{
    let mut raw = String::new();
    input.read_to_string(&mut raw)?;
    let raw = raw.trim();

    if kind.takes_image()
    {
        info!("Received {} request with {} bytes of input", kind, raw.len());
    }
    else
    {
        info!("Received {} request: {}", kind, raw);
    }

    let request = match parse_envelope(raw).and_then(|value| parse_request(kind, value))
    {
        Ok(request) => request,
        Err(e) if e.is_request_error() =>
        {
            warn!("Rejected {} request: {}", kind, e);
            let echo_input = matches!(e, Error::Parse(_)) && !kind.takes_image();
            let rejected = RejectedRequest { error: &e, input: echo_input.then_some(raw) };
            write_json_line(&mut output, &rejected)?;
            return Ok(AdapterStatus::Rejected);
        },
        Err(e) => return Err(e),
    };

    let missing = store.missing_artifacts(kind);
    if !missing.is_empty()
    {
        let names: Vec<_> = missing.iter().map(|path| path.display().to_string()).collect();
        warn!("Missing {} model artifacts: {}", kind, names.join(", "));
    }

    let result = PredictionService::new(store).predict(kind, &request);
    write_json_line(&mut output, &result)?;
    Ok(AdapterStatus::Completed)
}

/// Entry point of the predictor binaries.
pub fn run_process(kind: PredictorKind) -> ExitCode
{
    logging::init();
    let config = Config::from_env();
    debug!("Loading {} model artifacts from {}", kind, config.model_dir.display());
    let store = ModelStore::new(config.model_dir);

    let stdin = io::stdin();
    let stdout = io::stdout();
    match handle(kind, &store, stdin.lock(), stdout.lock())
    {
        Ok(status) => status.into(),
        Err(e) =>
        {
            error!("{} predictor failed: {}", kind, e.trace());
            if let Ok(line) = serde_json::to_string(&PredictionResult::from_error(&e))
            {
                // Stdout itself may be what failed; nothing more can be reported.
                let _ = writeln!(io::stdout().lock(), "{}", line);
            }
            ExitCode::FAILURE
        },
    }
}
