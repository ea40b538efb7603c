mod math;
mod session_pool;

pub mod classifier;
pub mod config;
pub mod error;
pub mod generator;
pub mod labels;
pub mod preprocess;
pub mod probabilities;

pub use classifier::{Classifier, OrtClipClassifier};
pub use error::InferenceError;
pub use generator::{GeneratorKind, GeneratorRegistry, TextGenerator};
pub use labels::Condition;
pub use probabilities::ClassProbabilities;
