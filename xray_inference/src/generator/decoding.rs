use crate::{
    config::{DecodingConfig, SamplingMode},
    math::{argmax, softmax},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Per-request token selection: length and n-gram constraints, then greedy or
/// top-k sampling.
pub struct Decoder {
    config: DecodingConfig,
    rng: StdRng,
}

impl Decoder {
    pub fn new(config: &DecodingConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config: config.clone(),
            rng,
        }
    }

    /// `history` is the full sequence the logits were computed for.
    pub fn next_token(&mut self, logits: &mut [f32], history: &[i64], eos_token_id: u32) -> u32 {
        let eos = eos_token_id as usize;
        if history.len() < self.config.min_length && eos < logits.len() {
            logits[eos] = f32::NEG_INFINITY;
        }
        if self.config.no_repeat_ngram_size > 0 {
            ban_repeated_ngrams(logits, history, self.config.no_repeat_ngram_size);
        }

        let token = match self.config.sampling {
            SamplingMode::Greedy => argmax(logits).unwrap_or(eos),
            SamplingMode::TopK => sample_top_k(
                logits,
                self.config.top_k,
                self.config.temperature,
                &mut self.rng,
            )
            .unwrap_or(eos),
        };

        token as u32
    }
}

fn sample_top_k(logits: &[f32], k: usize, temperature: f32, rng: &mut impl Rng) -> Option<usize> {
    if temperature <= 0. {
        return argmax(logits);
    }

    let mut candidates: Vec<(usize, f32)> = logits
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, logit)| logit.is_finite())
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(k.max(1));

    let scaled: Vec<f32> = candidates.iter().map(|(_, logit)| logit / temperature).collect();
    let probs = softmax(&scaled);

    let mut draw: f32 = rng.random();
    for ((index, _), prob) in candidates.iter().zip(probs) {
        if draw < prob {
            return Some(*index);
        }
        draw -= prob;
    }

    candidates.last().map(|(index, _)| *index)
}

/// Forbids any token that would repeat an n-gram already present in `history`.
fn ban_repeated_ngrams(logits: &mut [f32], history: &[i64], n: usize) {
    if n == 0 || history.len() + 1 < n {
        return;
    }

    let prefix = &history[history.len() + 1 - n..];
    for window in history.windows(n) {
        if &window[..n - 1] == prefix {
            let banned = window[n - 1] as usize;
            if banned < logits.len() {
                logits[banned] = f32::NEG_INFINITY;
            }
        }
    }
}
