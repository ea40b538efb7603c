use super::{decoding::Decoder, GeneratorKind, TextGenerator};
use crate::{
    config::{CausalLmConfig, DecodingConfig},
    error::InferenceError,
    session_pool::{last_position_logits, SessionPool},
};
use async_trait::async_trait;
use ndarray::Array2;
use ort::value::TensorRef;
use std::sync::Arc;
use tokenizers::Tokenizer;

const LOGITS_OUTPUT: &str = "logits";

/// Decoder-only language model (GPT-2, GPT-Neo) exported without past key
/// values. Every step re-runs the whole sequence.
#[derive(Clone)]
pub struct CausalLmGenerator {
    kind: GeneratorKind,
    pool: SessionPool,
    tokenizer: Arc<Tokenizer>,
    eos_token_id: u32,
    use_position_ids: bool,
    decoding: DecodingConfig,
}

impl CausalLmGenerator {
    pub fn new(kind: GeneratorKind, config: &CausalLmConfig) -> Result<Self, InferenceError> {
        let pool = SessionPool::new(&config.get_path(), config.num_instances)?;
        let tokenizer =
            Tokenizer::from_file(config.get_tokenizer_path()).map_err(InferenceError::tokenizer)?;
        let eos_token_id = tokenizer.token_to_id(&config.eos_token).ok_or_else(|| {
            InferenceError::Tokenizer(format!("unknown eos token {}", config.eos_token))
        })?;

        tracing::info!("Loaded {} text generator", kind);

        Ok(Self {
            kind,
            pool,
            tokenizer: Arc::new(tokenizer),
            eos_token_id,
            use_position_ids: config.use_position_ids,
            decoding: config.decoding.clone(),
        })
    }

    /// Returns the prompt followed by its continuation, at most `max_length`
    /// tokens in total.
    pub fn generate_blocking(
        &self,
        prompt: &str,
        max_length: usize,
    ) -> Result<String, InferenceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(InferenceError::tokenizer)?;
        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        if ids.is_empty() {
            ids.push(self.eos_token_id as i64);
        }
        let prompt_len = ids.len();

        let mut decoder = Decoder::new(&self.decoding);
        extend_sequence(
            &mut ids,
            max_length,
            self.eos_token_id,
            &mut decoder,
            |ids| self.next_token_logits(ids),
        )?;

        tracing::debug!(
            "{} generated {} tokens after a {} token prompt",
            self.kind,
            ids.len() - prompt_len,
            prompt_len
        );

        let ids: Vec<u32> = ids.into_iter().map(|id| id as u32).collect();
        self.tokenizer
            .decode(&ids, true)
            .map_err(InferenceError::tokenizer)
    }

    fn next_token_logits(&self, ids: &[i64]) -> Result<Vec<f32>, InferenceError> {
        let seq_len = ids.len();
        let input_ids = Array2::from_shape_vec((1, seq_len), ids.to_vec())?;
        let attention_mask = Array2::<i64>::ones((1, seq_len));
        let position_ids = Array2::from_shape_vec((1, seq_len), (0..seq_len as i64).collect())?;

        self.pool.with_session(|session| {
            let outputs = if self.use_position_ids {
                session.run(ort::inputs![
                    "input_ids" => TensorRef::from_array_view(input_ids.view())?,
                    "attention_mask" => TensorRef::from_array_view(attention_mask.view())?,
                    "position_ids" => TensorRef::from_array_view(position_ids.view())?
                ])?
            } else {
                session.run(ort::inputs![
                    "input_ids" => TensorRef::from_array_view(input_ids.view())?,
                    "attention_mask" => TensorRef::from_array_view(attention_mask.view())?
                ])?
            };

            let logits = outputs
                .get(LOGITS_OUTPUT)
                .ok_or(InferenceError::MissingOutput(LOGITS_OUTPUT))?;
            last_position_logits(logits)
        })
    }
}

/// Appends tokens to `ids` until EOS or until the whole sequence, prompt
/// included, reaches `max_length`. EOS itself is not appended.
fn extend_sequence(
    ids: &mut Vec<i64>,
    max_length: usize,
    eos_token_id: u32,
    decoder: &mut Decoder,
    mut next_logits: impl FnMut(&[i64]) -> Result<Vec<f32>, InferenceError>,
) -> Result<(), InferenceError> {
    while ids.len() < max_length {
        let mut logits = next_logits(ids)?;
        let next = decoder.next_token(&mut logits, ids, eos_token_id);
        if next == eos_token_id {
            break;
        }
        ids.push(next as i64);
    }
    Ok(())
}

#[async_trait]
impl TextGenerator for CausalLmGenerator {
    fn kind(&self) -> GeneratorKind {
        self.kind
    }

    async fn generate(&self, prompt: &str, max_length: usize) -> Result<String, InferenceError> {
        let generator = self.clone();
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || generator.generate_blocking(&prompt, max_length))
            .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplingMode;

    const EOS: u32 = 0;

    fn greedy() -> Decoder {
        Decoder::new(&DecodingConfig {
            sampling: SamplingMode::Greedy,
            ..DecodingConfig::sampling()
        })
    }

    /// Logits that pick `script[step]` at each step.
    fn scripted(script: Vec<u32>) -> impl FnMut(&[i64]) -> Result<Vec<f32>, InferenceError> {
        let mut step = 0;
        move |_ids| {
            let mut logits = vec![0.0; 16];
            logits[script[step] as usize] = 10.0;
            step += 1;
            Ok(logits)
        }
    }

    #[test]
    fn test_stops_at_eos_and_keeps_prompt() {
        let mut ids = vec![5, 6];
        let mut calls = 0;
        let mut script = scripted(vec![7, 8, EOS, 9]);

        extend_sequence(&mut ids, 50, EOS, &mut greedy(), |ids| {
            calls += 1;
            script(ids)
        })
        .unwrap();

        assert_eq!(ids, vec![5, 6, 7, 8]);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_max_length_counts_prompt() {
        let mut ids = vec![5, 6, 7];

        extend_sequence(&mut ids, 5, EOS, &mut greedy(), scripted(vec![9; 10])).unwrap();

        assert_eq!(ids, vec![5, 6, 7, 9, 9]);
    }

    #[test]
    fn test_prompt_at_max_length_runs_no_step() {
        let mut ids = vec![1, 2, 3, 4];

        extend_sequence(&mut ids, 4, EOS, &mut greedy(), |_| {
            panic!("no step expected")
        })
        .unwrap();

        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_logits_error_propagates() {
        let mut ids = vec![1];

        let result = extend_sequence(&mut ids, 10, EOS, &mut greedy(), |_| {
            Err(InferenceError::MissingOutput("logits"))
        });

        assert!(matches!(result, Err(InferenceError::MissingOutput("logits"))));
    }
}
