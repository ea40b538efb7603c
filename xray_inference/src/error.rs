use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Error decoding image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("Error reading image: {0}")]
    ImageRead(#[from] std::io::Error),
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
    #[error("Invalid tensor shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Model output `{0}` not found")]
    MissingOutput(&'static str),
    #[error("Unexpected model output: {0}")]
    UnexpectedOutput(String),
    #[error("Session mutex poisoned")]
    SessionPoisoned,
    #[error("No text generator available for `{0}`")]
    GeneratorUnavailable(String),
    #[error("Inference task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl InferenceError {
    pub(crate) fn tokenizer(err: impl std::fmt::Display) -> Self {
        InferenceError::Tokenizer(err.to_string())
    }
}
