use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::inference::ClassifierOutput;
use crate::preprocess::{Normalization, DEFAULT_IMAGE_SIZE};

pub const DEFAULT_MODEL_URL: &str = "https://models.neurolens.dev/brain-tumor/v1/model.onnx";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_FETCH_RETRIES: u32 = 3;
pub const DEFAULT_MAX_MODEL_BYTES: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model_config: ModelConfig,
    pub preprocess_config: PreprocessConfig,
    /// Start in mock mode; the model is never fetched
    pub mock_mode: bool,
    /// `None` keeps results in a temporary store for this session only
    pub results_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub url: String,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
    pub max_model_bytes: u64,
    pub classifier_output: ClassifierOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub image_size: u32,
    pub normalization: Normalization,
}

impl ModelConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_config: ModelConfig {
                url: DEFAULT_MODEL_URL.to_string(),
                fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
                fetch_retries: DEFAULT_FETCH_RETRIES,
                max_model_bytes: DEFAULT_MAX_MODEL_BYTES,
                classifier_output: ClassifierOutput::default(),
            },
            preprocess_config: PreprocessConfig {
                image_size: DEFAULT_IMAGE_SIZE,
                normalization: Normalization::default(),
            },
            mock_mode: false,
            results_path: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let url = env::var("NEUROLENS_MODEL_URL").unwrap_or_else(|_| DEFAULT_MODEL_URL.to_string());

        let image_size = env::var("NEUROLENS_IMAGE_SIZE")
            .unwrap_or_else(|_| DEFAULT_IMAGE_SIZE.to_string())
            .parse()
            .ok()
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_IMAGE_SIZE);

        let normalization = match env::var("NEUROLENS_NORMALIZATION") {
            Ok(value) => parse_normalization(&value)?,
            Err(_) => Normalization::default(),
        };

        let classifier_output = match env::var("NEUROLENS_CLASSIFIER_OUTPUT") {
            Ok(value) => parse_classifier_output(&value)?,
            Err(_) => ClassifierOutput::default(),
        };

        let mock_mode = env::var("NEUROLENS_MOCK_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let fetch_timeout_secs = env::var("NEUROLENS_FETCH_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_FETCH_TIMEOUT_SECS.to_string())
            .parse()
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);

        let fetch_retries = env::var("NEUROLENS_FETCH_RETRIES")
            .unwrap_or_else(|_| DEFAULT_FETCH_RETRIES.to_string())
            .parse()
            .unwrap_or(DEFAULT_FETCH_RETRIES);

        let max_model_bytes = env::var("NEUROLENS_MAX_MODEL_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_MODEL_BYTES.to_string())
            .parse()
            .unwrap_or(DEFAULT_MAX_MODEL_BYTES);

        let results_path = env::var("NEUROLENS_RESULTS_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            model_config: ModelConfig {
                url,
                fetch_timeout_secs,
                fetch_retries,
                max_model_bytes,
                classifier_output,
            },
            preprocess_config: PreprocessConfig {
                image_size,
                normalization,
            },
            mock_mode,
            results_path,
        })
    }
}

fn parse_normalization(value: &str) -> Result<Normalization> {
    match value.trim().to_ascii_lowercase().as_str() {
        "zero_one" => Ok(Normalization::ZeroOne),
        "minus_one_one" => Ok(Normalization::MinusOneOne),
        other => Err(anyhow!(
            "Invalid NEUROLENS_NORMALIZATION '{}': expected zero_one or minus_one_one",
            other
        )),
    }
}

fn parse_classifier_output(value: &str) -> Result<ClassifierOutput> {
    match value.trim().to_ascii_lowercase().as_str() {
        "logits" => Ok(ClassifierOutput::Logits),
        "probabilities" => Ok(ClassifierOutput::Probabilities),
        other => Err(anyhow!(
            "Invalid NEUROLENS_CLASSIFIER_OUTPUT '{}': expected logits or probabilities",
            other
        )),
    }
}
