//! Incremental category classifier: feature extraction, frequency counters,
//! and JSON persistence of the learned model.

pub mod classifier;
pub mod features;
pub mod persist;

pub use classifier::{
    CategoryScore, IncrementalClassifier, PredictionResult, Predictor, Statistics,
};
pub use features::{FeatureInput, Features};
pub use persist::{model_file_in, ModelError, ModelSnapshot, MODEL_FILE_NAME};
