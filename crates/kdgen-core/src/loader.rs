use std::path::Path;
use std::sync::Arc;

use candle_core::Device;
use tracing::info;

use crate::{
    chat_template::ChatFormat,
    error::{CoreError, CoreResult},
    llama::LlamaModel,
    model::{Model, ModelConfig, SamplingParams},
    quantized::QuantizedModel,
    tokenizer::Tokenizer,
};

/// Weight layout found in a model directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsKind {
    Gguf,
    Safetensors,
}

impl WeightsKind {
    /// Decision rules, in order:
    /// 1. an explicit GGUF file, or any `.gguf` in `dir`
    /// 2. `model.safetensors` or `model.safetensors.index.json`
    pub fn detect(dir: &Path, explicit_gguf: bool) -> Option<Self> {
        let has_gguf = explicit_gguf
            || std::fs::read_dir(dir)
                .map(|mut d| {
                    d.any(|e| {
                        e.ok()
                            .and_then(|e| e.path().extension().map(|x| x == "gguf"))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
        if has_gguf {
            return Some(Self::Gguf);
        }
        if dir.join("model.safetensors").exists() || dir.join("model.safetensors.index.json").exists() {
            return Some(Self::Safetensors);
        }
        None
    }
}

/// Either backend, chosen from the files present at load time.
pub enum AnyModel {
    Quantized(QuantizedModel),
    Llama(LlamaModel),
}

impl AnyModel {
    pub fn tokenizer_arc(&self) -> Arc<Tokenizer> {
        match self {
            AnyModel::Quantized(m) => m.tokenizer_arc(),
            AnyModel::Llama(m) => m.tokenizer_arc(),
        }
    }

    pub fn architecture(&self) -> &str {
        match self {
            AnyModel::Quantized(m) => m.architecture(),
            AnyModel::Llama(m) => m.architecture(),
        }
    }

    /// Chat template detected from the vocabulary at load time.
    pub fn chat_format(&self) -> ChatFormat {
        match self {
            AnyModel::Quantized(m) => m.chat_format(),
            AnyModel::Llama(m) => m.chat_format(),
        }
    }
}

impl std::fmt::Debug for AnyModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyModel::Quantized(m) => f.debug_tuple("AnyModel::Quantized").field(m).finish(),
            AnyModel::Llama(m) => f.debug_tuple("AnyModel::Llama").field(m).finish(),
        }
    }
}

impl Model for AnyModel {
    fn load(config: &ModelConfig, device: &Device) -> CoreResult<Self> {
        match WeightsKind::detect(&config.model_dir, config.gguf_file.is_some()) {
            Some(WeightsKind::Gguf) => {
                info!("Detected GGUF weights");
                QuantizedModel::load(config, device).map(AnyModel::Quantized)
            }
            Some(WeightsKind::Safetensors) => {
                info!("Detected safetensors weights");
                LlamaModel::load(config, device).map(AnyModel::Llama)
            }
            None => Err(CoreError::config(
                "model_dir",
                format!(
                    "no supported model weights (.gguf or .safetensors) found in {}",
                    config.model_dir.display()
                ),
            )),
        }
    }

    fn generate(&mut self, prompt_ids: &[u32], params: &SamplingParams) -> CoreResult<Vec<u32>> {
        match self {
            AnyModel::Quantized(m) => m.generate(prompt_ids, params),
            AnyModel::Llama(m) => m.generate(prompt_ids, params),
        }
    }
}
