use serde::Deserialize;
use std::path::PathBuf;

pub trait Validatable {
    fn required_files(&self) -> Vec<PathBuf>;

    fn validate(&self) -> Result<(), String> {
        for path in self.required_files() {
            if !path.exists() {
                return Err(format!("Model file not found: {:?}", path));
            }
        }
        Ok(())
    }
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierHead {
    /// Full CLIP graph scoring the image against one text prompt per label.
    ZeroShot,
    /// CLIP image encoder followed by a trained 3-class linear head.
    LinearHead,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    pub head: ClassifierHead,
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default)]
    pub tokenizer_file: Option<String>,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

fn default_prompt_template() -> String {
    "{label}".into()
}

impl ClassifierConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn get_tokenizer_path(&self) -> Option<PathBuf> {
        self.tokenizer_file
            .as_ref()
            .map(|file| self.model_dir.join(file))
    }
}

impl Validatable for ClassifierConfig {
    fn required_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.get_path()];
        files.extend(self.get_tokenizer_path());
        files
    }

    fn validate(&self) -> Result<(), String> {
        if self.head == ClassifierHead::ZeroShot && self.tokenizer_file.is_none() {
            return Err("zero_shot classifier requires `tokenizer_file`".into());
        }
        for path in self.required_files() {
            if !path.exists() {
                return Err(format!("Model file not found: {:?}", path));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    Greedy,
    TopK,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodingConfig {
    pub sampling: SamplingMode,
    pub top_k: usize,
    pub temperature: f32,
    pub seed: Option<u64>,
    pub min_length: usize,
    pub no_repeat_ngram_size: usize,
}

/// Decoding knobs as written in the config file. Unset knobs keep the
/// generator's own defaults.
#[derive(Debug, Deserialize, Default)]
struct DecodingOverrides {
    sampling: Option<SamplingMode>,
    top_k: Option<usize>,
    temperature: Option<f32>,
    seed: Option<u64>,
    min_length: Option<usize>,
    no_repeat_ngram_size: Option<usize>,
}

impl DecodingOverrides {
    fn apply(self, base: DecodingConfig) -> DecodingConfig {
        DecodingConfig {
            sampling: self.sampling.unwrap_or(base.sampling),
            top_k: self.top_k.unwrap_or(base.top_k),
            temperature: self.temperature.unwrap_or(base.temperature),
            seed: self.seed.or(base.seed),
            min_length: self.min_length.unwrap_or(base.min_length),
            no_repeat_ngram_size: self
                .no_repeat_ngram_size
                .unwrap_or(base.no_repeat_ngram_size),
        }
    }
}

fn deserialize_sampling_decoding<'de, D>(deserializer: D) -> Result<DecodingConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(DecodingOverrides::deserialize(deserializer)?.apply(DecodingConfig::sampling()))
}

fn deserialize_summarization_decoding<'de, D>(deserializer: D) -> Result<DecodingConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(DecodingOverrides::deserialize(deserializer)?.apply(DecodingConfig::summarization()))
}

fn default_top_k() -> usize {
    50
}

fn default_temperature() -> f32 {
    1.0
}

impl DecodingConfig {
    /// Top-k sampling used by the text-generation pipelines.
    pub fn sampling() -> Self {
        Self {
            sampling: SamplingMode::TopK,
            top_k: default_top_k(),
            temperature: default_temperature(),
            seed: None,
            min_length: 0,
            no_repeat_ngram_size: 0,
        }
    }

    /// Greedy decoding with the bart-large-cnn length and repetition settings.
    pub fn summarization() -> Self {
        Self {
            sampling: SamplingMode::Greedy,
            top_k: default_top_k(),
            temperature: default_temperature(),
            seed: None,
            min_length: 56,
            no_repeat_ngram_size: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CausalLmConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    pub tokenizer_file: String,
    #[serde(default = "default_eos_token")]
    pub eos_token: String,
    #[serde(default)]
    pub use_position_ids: bool,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(
        default = "DecodingConfig::sampling",
        deserialize_with = "deserialize_sampling_decoding"
    )]
    pub decoding: DecodingConfig,
}

fn default_eos_token() -> String {
    "<|endoftext|>".into()
}

impl CausalLmConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn get_tokenizer_path(&self) -> PathBuf {
        self.model_dir.join(&self.tokenizer_file)
    }
}

impl Validatable for CausalLmConfig {
    fn required_files(&self) -> Vec<PathBuf> {
        vec![self.get_path(), self.get_tokenizer_path()]
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Seq2SeqConfig {
    pub model_dir: PathBuf,
    pub encoder_file: String,
    pub decoder_file: String,
    pub tokenizer_file: String,
    #[serde(default = "default_decoder_start_token_id")]
    pub decoder_start_token_id: u32,
    #[serde(default)]
    pub bos_token_id: u32,
    #[serde(default = "default_decoder_start_token_id")]
    pub eos_token_id: u32,
    #[serde(default = "default_max_source_length")]
    pub max_source_length: usize,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(
        default = "DecodingConfig::summarization",
        deserialize_with = "deserialize_summarization_decoding"
    )]
    pub decoding: DecodingConfig,
}

fn default_decoder_start_token_id() -> u32 {
    2
}

fn default_max_source_length() -> usize {
    1024
}

impl Seq2SeqConfig {
    pub fn get_encoder_path(&self) -> PathBuf {
        self.model_dir.join(&self.encoder_file)
    }

    pub fn get_decoder_path(&self) -> PathBuf {
        self.model_dir.join(&self.decoder_file)
    }

    pub fn get_tokenizer_path(&self) -> PathBuf {
        self.model_dir.join(&self.tokenizer_file)
    }
}

impl Validatable for Seq2SeqConfig {
    fn required_files(&self) -> Vec<PathBuf> {
        vec![
            self.get_encoder_path(),
            self.get_decoder_path(),
            self.get_tokenizer_path(),
        ]
    }
}

/// Generators to load at start-up. Any of them may be left out.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GeneratorsConfig {
    #[serde(default)]
    pub gpt2: Option<CausalLmConfig>,
    #[serde(default)]
    pub gptneo: Option<CausalLmConfig>,
    #[serde(default)]
    pub bart: Option<Seq2SeqConfig>,
}

impl GeneratorsConfig {
    pub fn validate(&self) -> Result<(), String> {
        for config in [&self.gpt2, &self.gptneo].into_iter().flatten() {
            config.validate()?;
        }
        if let Some(bart) = &self.bart {
            bart.validate()?;
        }
        Ok(())
    }
}
