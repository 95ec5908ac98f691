use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

/// The sub-step of feature extraction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureStage
{
    Input,
    Grayscale,
    Gradient,
    Texture,
    Color,
}

impl Display for FeatureStage
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
    {
        let name = match self
        {
            FeatureStage::Input => "input",
            FeatureStage::Grayscale => "grayscale",
            FeatureStage::Gradient => "gradient histogram",
            FeatureStage::Texture => "texture histogram",
            FeatureStage::Color => "color histogram",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError
{
    #[error("Invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Unable to decode image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, thiserror::Error)]
pub enum Error
{
    #[error("JSON parsing error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Shape(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Feature extraction failed at the {stage} stage: {reason}")]
    FeatureExtraction
    {
        stage: FeatureStage,
        reason: String,
    },
    #[error("Unable to load model artifact {}", .path.display())]
    ArtifactLoad
    {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("{0}")]
    Inference(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error
{
    pub fn feature(stage: FeatureStage, reason: impl Into<String>) -> Self
    {
        Error::FeatureExtraction { stage, reason: reason.into() }
    }

    pub fn artifact(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self
    {
        Error::ArtifactLoad { path: path.into(), source: source.into() }
    }

    pub fn inference(message: impl Display) -> Self
    {
        Error::Inference(message.to_string())
    }

    /// Name of the error class, as reported in diagnostic traces.
    pub fn kind(&self) -> &'static str
    {
        match self
        {
            Error::Parse(_) => "ParseError",
            Error::Shape(_) => "ShapeError",
            Error::Decode(_) => "DecodeError",
            Error::FeatureExtraction { .. } => "FeatureExtractionError",
            Error::ArtifactLoad { .. } => "ArtifactLoadError",
            Error::Inference(_) => "InferenceError",
            Error::Io(_) => "IoError",
        }
    }

    /// Adapter-level errors reject the request before any model is touched.
    pub fn is_request_error(&self) -> bool
    {
        matches!(self, Error::Parse(_) | Error::Shape(_))
    }

    /// Renders the error kind, message and full cause chain.
    pub fn trace(&self) -> String
    {
        let mut trace = format!("{}: {}", self.kind(), self);
        let mut source = StdError::source(self);
        while let Some(cause) = source
        {
            trace.push_str(&format!("\nCaused by: {}", cause));
            source = StdError::source(cause);
        }
        trace
    }
}

impl serde::Serialize for Error
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
      S: serde::ser::Serializer,
    {
      serializer.serialize_str(self.to_string().as_ref())
    }
}
