use crate::{
    config::{ClassifierConfig, ClassifierHead},
    error::InferenceError,
    labels::Condition,
    preprocess::clip_pixel_values,
    probabilities::ClassProbabilities,
    session_pool::{to_array, SessionPool},
};
use async_trait::async_trait;
use image::RgbImage;
use ndarray::Array2;
use ort::value::TensorRef;
use std::sync::Arc;
use tokenizers::Tokenizer;

/// Default CLIP text context length.
const CLIP_MAX_TOKENS: usize = 77;
const CLIP_PAD_TOKEN: &str = "<|endoftext|>";

const ZERO_SHOT_OUTPUT: &str = "logits_per_image";
const LINEAR_HEAD_OUTPUT: &str = "logits";

#[async_trait]
pub trait Classifier: Send + Sync + 'static {
    async fn classify(&self, image: RgbImage) -> Result<ClassProbabilities, InferenceError>;
}

/// Tokenized label prompts, one row per [`Condition`].
#[derive(Debug)]
struct LabelPrompts {
    input_ids: Array2<i64>,
    attention_mask: Array2<i64>,
}

#[derive(Clone)]
pub struct OrtClipClassifier {
    pool: SessionPool,
    head: ClassifierHead,
    prompts: Option<Arc<LabelPrompts>>,
}

impl OrtClipClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, InferenceError> {
        let pool = SessionPool::new(&config.get_path(), config.num_instances)?;

        let prompts = match config.head {
            ClassifierHead::ZeroShot => {
                let tokenizer_path = config.get_tokenizer_path().ok_or_else(|| {
                    InferenceError::Tokenizer("zero-shot head needs a tokenizer".into())
                })?;
                let tokenizer =
                    Tokenizer::from_file(&tokenizer_path).map_err(InferenceError::tokenizer)?;
                let prompts = label_prompts(&config.prompt_template);
                tracing::info!("Zero-shot label prompts: {:?}", prompts);
                Some(Arc::new(tokenize_prompts(&tokenizer, &prompts)?))
            }
            ClassifierHead::LinearHead => None,
        };

        Ok(Self {
            pool,
            head: config.head,
            prompts,
        })
    }

    pub fn classify_blocking(
        &self,
        image: &RgbImage,
    ) -> Result<ClassProbabilities, InferenceError> {
        let pixel_values = clip_pixel_values(image);

        let logits = match (self.head, &self.prompts) {
            (ClassifierHead::ZeroShot, Some(prompts)) => self.pool.with_session(|session| {
                let outputs = session.run(ort::inputs![
                    "input_ids" => TensorRef::from_array_view(prompts.input_ids.view())?,
                    "attention_mask" => TensorRef::from_array_view(prompts.attention_mask.view())?,
                    "pixel_values" => TensorRef::from_array_view(pixel_values.view())?
                ])?;
                let output = outputs
                    .get(ZERO_SHOT_OUTPUT)
                    .ok_or(InferenceError::MissingOutput(ZERO_SHOT_OUTPUT))?;
                to_array(output)
            })?,
            (ClassifierHead::ZeroShot, None) => {
                return Err(InferenceError::Tokenizer(
                    "zero-shot head has no label prompts".into(),
                ))
            }
            (ClassifierHead::LinearHead, _) => self.pool.with_session(|session| {
                let outputs = session.run(ort::inputs![
                    "pixel_values" => TensorRef::from_array_view(pixel_values.view())?
                ])?;
                let output = outputs
                    .get(LINEAR_HEAD_OUTPUT)
                    .ok_or(InferenceError::MissingOutput(LINEAR_HEAD_OUTPUT))?;
                to_array(output)
            })?,
        };

        let logits: Vec<f32> = logits.iter().copied().collect();
        let probabilities = ClassProbabilities::from_logits(&logits)?;

        tracing::debug!(
            "Classified as {} with confidence {:.3}",
            probabilities.prediction(),
            probabilities.confidence()
        );

        Ok(probabilities)
    }
}

#[async_trait]
impl Classifier for OrtClipClassifier {
    async fn classify(&self, image: RgbImage) -> Result<ClassProbabilities, InferenceError> {
        let classifier = self.clone();
        tokio::task::spawn_blocking(move || classifier.classify_blocking(&image)).await?
    }
}

pub fn label_prompts(template: &str) -> Vec<String> {
    Condition::ALL
        .iter()
        .map(|condition| template.replace("{label}", condition.label()))
        .collect()
}

fn tokenize_prompts(
    tokenizer: &Tokenizer,
    prompts: &[String],
) -> Result<LabelPrompts, InferenceError> {
    let pad_id = tokenizer
        .get_padding()
        .map(|padding| padding.pad_id)
        .or_else(|| tokenizer.token_to_id(CLIP_PAD_TOKEN))
        .unwrap_or(0);

    let sequences = prompts
        .iter()
        .map(|prompt| {
            tokenizer
                .encode(prompt.as_str(), true)
                .map(|encoding| encoding.get_ids().to_vec())
                .map_err(InferenceError::tokenizer)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (input_ids, attention_mask) = pad_batch(&sequences, pad_id, CLIP_MAX_TOKENS);
    Ok(LabelPrompts {
        input_ids,
        attention_mask,
    })
}

/// Right-pads token sequences to a common length, truncating at `max_len`.
fn pad_batch(
    sequences: &[Vec<u32>],
    pad_id: u32,
    max_len: usize,
) -> (Array2<i64>, Array2<i64>) {
    let width = sequences
        .iter()
        .map(|ids| ids.len().min(max_len))
        .max()
        .unwrap_or(0)
        .max(1);

    let mut input_ids = Array2::from_elem((sequences.len(), width), pad_id as i64);
    let mut attention_mask = Array2::zeros((sequences.len(), width));
    for (row, ids) in sequences.iter().enumerate() {
        for (col, &id) in ids.iter().take(width).enumerate() {
            input_ids[[row, col]] = id as i64;
            attention_mask[[row, col]] = 1;
        }
    }

    (input_ids, attention_mask)
}
