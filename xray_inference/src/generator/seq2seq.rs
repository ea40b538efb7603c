use super::{decoding::Decoder, GeneratorKind, TextGenerator};
use crate::{
    config::{DecodingConfig, Seq2SeqConfig},
    error::InferenceError,
    session_pool::{last_position_logits, to_array, SessionPool},
};
use async_trait::async_trait;
use ndarray::{Array2, ArrayD};
use ort::value::TensorRef;
use std::sync::Arc;
use tokenizers::Tokenizer;

const ENCODER_OUTPUT: &str = "last_hidden_state";
const DECODER_OUTPUT: &str = "logits";

/// Encoder-decoder summarizer (BART) exported as separate encoder and decoder
/// graphs.
#[derive(Clone)]
pub struct Seq2SeqGenerator {
    kind: GeneratorKind,
    encoder: SessionPool,
    decoder: SessionPool,
    tokenizer: Arc<Tokenizer>,
    decoder_start_token_id: u32,
    bos_token_id: u32,
    eos_token_id: u32,
    max_source_length: usize,
    decoding: DecodingConfig,
}

struct EncodedSource {
    attention_mask: Array2<i64>,
    hidden_states: ArrayD<f32>,
}

impl Seq2SeqGenerator {
    pub fn new(kind: GeneratorKind, config: &Seq2SeqConfig) -> Result<Self, InferenceError> {
        let encoder = SessionPool::new(&config.get_encoder_path(), config.num_instances)?;
        let decoder = SessionPool::new(&config.get_decoder_path(), config.num_instances)?;
        let tokenizer =
            Tokenizer::from_file(config.get_tokenizer_path()).map_err(InferenceError::tokenizer)?;

        tracing::info!("Loaded {} summarizer", kind);

        Ok(Self {
            kind,
            encoder,
            decoder,
            tokenizer: Arc::new(tokenizer),
            decoder_start_token_id: config.decoder_start_token_id,
            bos_token_id: config.bos_token_id,
            eos_token_id: config.eos_token_id,
            max_source_length: config.max_source_length,
            decoding: config.decoding.clone(),
        })
    }

    pub fn generate_blocking(
        &self,
        prompt: &str,
        max_length: usize,
    ) -> Result<String, InferenceError> {
        let source = self.encode(prompt)?;

        let mut decoder = Decoder::new(&self.decoding);
        let ids = decode_summary(
            SummaryTokens {
                decoder_start: self.decoder_start_token_id,
                bos: self.bos_token_id,
                eos: self.eos_token_id,
            },
            max_length,
            &mut decoder,
            |ids| self.next_token_logits(ids, &source),
        )?;

        tracing::debug!("{} produced {} summary tokens", self.kind, ids.len());

        let ids: Vec<u32> = ids.into_iter().map(|id| id as u32).collect();
        let summary = self
            .tokenizer
            .decode(&ids, true)
            .map_err(InferenceError::tokenizer)?;
        Ok(summary.trim().to_string())
    }

    fn encode(&self, prompt: &str) -> Result<EncodedSource, InferenceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(InferenceError::tokenizer)?;
        let ids: Vec<i64> = encoding
            .get_ids()
            .iter()
            .take(self.max_source_length)
            .map(|&id| id as i64)
            .collect();

        let seq_len = ids.len();
        let input_ids = Array2::from_shape_vec((1, seq_len), ids)?;
        let attention_mask = Array2::<i64>::ones((1, seq_len));

        let hidden_states = self.encoder.with_session(|session| {
            let outputs = session.run(ort::inputs![
                "input_ids" => TensorRef::from_array_view(input_ids.view())?,
                "attention_mask" => TensorRef::from_array_view(attention_mask.view())?
            ])?;
            let hidden = outputs
                .get(ENCODER_OUTPUT)
                .ok_or(InferenceError::MissingOutput(ENCODER_OUTPUT))?;
            to_array(hidden)
        })?;

        Ok(EncodedSource {
            attention_mask,
            hidden_states,
        })
    }

    fn next_token_logits(
        &self,
        ids: &[i64],
        source: &EncodedSource,
    ) -> Result<Vec<f32>, InferenceError> {
        let decoder_ids = Array2::from_shape_vec((1, ids.len()), ids.to_vec())?;

        self.decoder.with_session(|session| {
            let mask = TensorRef::from_array_view(source.attention_mask.view())?;
            let hidden = TensorRef::from_array_view(source.hidden_states.view())?;
            let outputs = session.run(ort::inputs![
                "input_ids" => TensorRef::from_array_view(decoder_ids.view())?,
                "encoder_attention_mask" => mask,
                "encoder_hidden_states" => hidden
            ])?;
            let logits = outputs
                .get(DECODER_OUTPUT)
                .ok_or(InferenceError::MissingOutput(DECODER_OUTPUT))?;
            last_position_logits(logits)
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct SummaryTokens {
    decoder_start: u32,
    bos: u32,
    eos: u32,
}

/// Decoder start, then the forced BOS, then model tokens up to and including
/// EOS. The sequence never grows past `max_length`.
fn decode_summary(
    tokens: SummaryTokens,
    max_length: usize,
    decoder: &mut Decoder,
    mut next_logits: impl FnMut(&[i64]) -> Result<Vec<f32>, InferenceError>,
) -> Result<Vec<i64>, InferenceError> {
    let mut ids = vec![tokens.decoder_start as i64];
    while ids.len() < max_length {
        let next = if ids.len() == 1 {
            tokens.bos
        } else {
            let mut logits = next_logits(&ids)?;
            decoder.next_token(&mut logits, &ids, tokens.eos)
        };
        ids.push(next as i64);
        if next == tokens.eos {
            break;
        }
    }
    Ok(ids)
}

#[async_trait]
impl TextGenerator for Seq2SeqGenerator {
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

    const TOKENS: SummaryTokens = SummaryTokens {
        decoder_start: 2,
        bos: 0,
        eos: 2,
    };

    fn logits_for(token: usize) -> Vec<f32> {
        let mut logits = vec![0.0; 32];
        logits[token] = 10.0;
        logits
    }

    fn decoder(min_length: usize) -> Decoder {
        Decoder::new(&DecodingConfig {
            min_length,
            no_repeat_ngram_size: 0,
            ..DecodingConfig::summarization()
        })
    }

    #[test]
    fn test_forces_bos_after_decoder_start() {
        let mut seen = Vec::new();

        let ids = decode_summary(TOKENS, 10, &mut decoder(0), |ids| {
            seen.push(ids.to_vec());
            Ok(logits_for(if ids.len() < 4 { 11 } else { 2 }))
        })
        .unwrap();

        assert_eq!(ids, vec![2, 0, 11, 11, 2]);
        assert_eq!(seen[0], vec![2, 0]);
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_min_length_delays_eos() {
        let ids = decode_summary(TOKENS, 20, &mut decoder(5), |ids| {
            let mut logits = logits_for(2);
            logits[10 + ids.len()] = 5.0;
            Ok(logits)
        })
        .unwrap();

        assert_eq!(ids, vec![2, 0, 12, 13, 14, 2]);
    }

    #[test]
    fn test_respects_max_length() {
        let ids = decode_summary(TOKENS, 4, &mut decoder(0), |_| Ok(logits_for(7))).unwrap();

        assert_eq!(ids, vec![2, 0, 7, 7]);
    }
}
