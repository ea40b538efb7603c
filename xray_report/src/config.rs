use serde::Deserialize;
use std::path::PathBuf;
use xray_inference::config::{ClassifierConfig, GeneratorsConfig, Validatable};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub uploads: UploadsConfig,
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub generators: GeneratorsConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.classifier.validate()?;
        self.generators.validate()?;
        if self.report.strategy == ReportStrategy::Generative
            && self.generators.gpt2.is_none()
            && self.generators.gptneo.is_none()
            && self.generators.bart.is_none()
        {
            return Err("generative report strategy needs at least one generator".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    pub dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStrategy {
    Template,
    Generative,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_report_strategy")]
    pub strategy: ReportStrategy,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

fn default_report_strategy() -> ReportStrategy {
    ReportStrategy::Template
}

fn default_max_length() -> usize {
    250
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            strategy: default_report_strategy(),
            max_length: default_max_length(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("XRAY")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    checked(config.try_deserialize::<Config>()?)
}

/// Runs before tracing is installed, so failures travel in the error.
fn checked(config: Config) -> Result<Config, config::ConfigError> {
    config.validate().map_err(|e| {
        config::ConfigError::Message(format!("Configuration validation failed: {}", e))
    })?;
    Ok(config)
}
