use std::path::PathBuf;

use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Parameters controlling text generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    /// Nucleus threshold; `1.0` disables the filter.
    pub top_p: f64,
    /// Stochastic sampling when true, argmax otherwise.
    pub do_sample: bool,
    /// Seed for the sampler RNG. `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Token ids that end generation. They are not included in the output.
    pub stop_token_ids: Vec<u32>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.3,
            top_p: 0.9,
            do_sample: true,
            seed: None,
            stop_token_ids: vec![],
        }
    }
}

/// Floating-point dtype used for non-quantized weights and activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDtype {
    F32,
    F16,
    Bf16,
}

impl ComputeDtype {
    pub fn as_dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::F16 => DType::F16,
            Self::Bf16 => DType::BF16,
        }
    }

    /// The dtype to actually use on `device`. Half precision matmuls are
    /// not supported by every CPU backend, so CPU always computes in f32.
    pub fn for_device(self, device: &Device) -> DType {
        if matches!(device, Device::Cpu) {
            DType::F32
        } else {
            self.as_dtype()
        }
    }
}

impl std::str::FromStr for ComputeDtype {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" => Ok(Self::F32),
            "f16" | "float16" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            other => Err(CoreError::config(
                "compute_dtype",
                format!("unknown dtype '{other}' (expected f32, f16 or bf16)"),
            )),
        }
    }
}

/// Where and how to load a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hub identifier, for logs.
    pub repo_id: String,
    /// Directory holding the weights and `tokenizer.json`.
    pub model_dir: PathBuf,
    /// Explicit tokenizer file, when it lives outside `model_dir`.
    pub tokenizer_path: Option<PathBuf>,
    /// Exact GGUF file to load. `None` means the only `.gguf` in `model_dir`.
    pub gguf_file: Option<PathBuf>,
    /// Maximum prompt + completion length in tokens.
    pub max_sequence_length: usize,
    pub compute_dtype: ComputeDtype,
}

impl ModelConfig {
    pub fn tokenizer_file(&self) -> PathBuf {
        self.tokenizer_path
            .clone()
            .unwrap_or_else(|| self.model_dir.join("tokenizer.json"))
    }
}

/// A causal language model that can continue a tokenized prompt.
pub trait Model: Send {
    /// Load weights and tokenizer described by `config` onto `device`.
    fn load(config: &ModelConfig, device: &Device) -> CoreResult<Self>
    where
        Self: Sized;

    /// Generate up to `params.max_new_tokens` tokens after `prompt_ids`.
    ///
    /// Returns only the newly generated ids. Generation stops early at any id
    /// in `params.stop_token_ids` (not included) or when the sequence reaches
    /// the model's maximum length.
    fn generate(&mut self, prompt_ids: &[u32], params: &SamplingParams) -> CoreResult<Vec<u32>>;
}
