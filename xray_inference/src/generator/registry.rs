use super::{CausalLmGenerator, GeneratorKind, Seq2SeqGenerator, TextGenerator};
use crate::{config::GeneratorsConfig, error::InferenceError};
use std::{collections::HashMap, sync::Arc};

/// Generators loaded at start-up, shared read-only between requests.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<GeneratorKind, Arc<dyn TextGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GeneratorsConfig) -> Result<Self, InferenceError> {
        let mut registry = Self::new();

        if let Some(gpt2) = &config.gpt2 {
            registry.insert(Arc::new(CausalLmGenerator::new(GeneratorKind::Gpt2, gpt2)?));
        }
        if let Some(gptneo) = &config.gptneo {
            registry.insert(Arc::new(CausalLmGenerator::new(
                GeneratorKind::GptNeo,
                gptneo,
            )?));
        }
        if let Some(bart) = &config.bart {
            registry.insert(Arc::new(Seq2SeqGenerator::new(GeneratorKind::Bart, bart)?));
        }

        tracing::info!("Text generators loaded: {:?}", registry.loaded());
        Ok(registry)
    }

    pub fn insert(&mut self, generator: Arc<dyn TextGenerator>) {
        self.generators.insert(generator.kind(), generator);
    }

    /// Falls back to the summarizer when `kind` was not loaded.
    pub fn resolve(&self, kind: GeneratorKind) -> Result<Arc<dyn TextGenerator>, InferenceError> {
        if let Some(generator) = self.generators.get(&kind) {
            return Ok(generator.clone());
        }

        match self.generators.get(&GeneratorKind::FALLBACK) {
            Some(generator) => {
                tracing::warn!(
                    "{} is not loaded, falling back to {}",
                    kind,
                    GeneratorKind::FALLBACK
                );
                Ok(generator.clone())
            }
            None => Err(InferenceError::GeneratorUnavailable(kind.to_string())),
        }
    }

    pub fn loaded(&self) -> Vec<GeneratorKind> {
        let mut kinds: Vec<GeneratorKind> = self.generators.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}
