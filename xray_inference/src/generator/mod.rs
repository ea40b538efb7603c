mod causal;
mod decoding;
mod registry;
mod seq2seq;

pub use causal::CausalLmGenerator;
pub use decoding::Decoder;
pub use registry::GeneratorRegistry;
pub use seq2seq::Seq2SeqGenerator;

use crate::error::InferenceError;
use async_trait::async_trait;
use std::fmt;

/// Pretrained language models that can write report text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneratorKind {
    Gpt2,
    GptNeo,
    /// bart-large-cnn summarization, used whenever the selector is not recognized.
    Bart,
}

impl GeneratorKind {
    pub const FALLBACK: GeneratorKind = GeneratorKind::Bart;

    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorKind::Gpt2 => "gpt2",
            GeneratorKind::GptNeo => "gptneo",
            GeneratorKind::Bart => "bart",
        }
    }

    /// Maps the `llm` form field to a model. A missing field selects GPT-2,
    /// anything unrecognized selects the summarizer.
    pub fn from_form_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            None => GeneratorKind::Gpt2,
            Some(v) if v == "gpt2" => GeneratorKind::Gpt2,
            Some(v) if v == "gptneo" => GeneratorKind::GptNeo,
            Some(_) => GeneratorKind::FALLBACK,
        }
    }

    pub fn is_summarizer(&self) -> bool {
        matches!(self, GeneratorKind::Bart)
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync + 'static {
    fn kind(&self) -> GeneratorKind;

    /// `max_length` caps the output in tokens.
    async fn generate(&self, prompt: &str, max_length: usize) -> Result<String, InferenceError>;
}
