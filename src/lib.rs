pub mod error;
pub mod config;
pub mod logging;
pub mod interface;
pub mod preprocessing;
pub mod image_features;
pub mod classifier;
pub mod models;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod model_store;
pub mod predictor;
pub mod adapter;

#[cfg(test)]
mod test_support;
