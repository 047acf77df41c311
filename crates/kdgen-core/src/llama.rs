use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig};
use tracing::{debug, info};

use crate::{
    chat_template::ChatFormat,
    error::{CoreError, CoreResult},
    generation::run_generation,
    model::{Model, ModelConfig, SamplingParams},
    tokenizer::Tokenizer,
};

/// LLaMA-family model loaded from full-precision safetensors at the
/// configured compute dtype.
pub struct LlamaModel {
    inner: Llama,
    config: Config,
    tokenizer: Arc<Tokenizer>,
    chat_format: ChatFormat,
    device: Device,
    dtype: DType,
    max_sequence_length: usize,
}

impl std::fmt::Debug for LlamaModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaModel")
            .field("dtype", &self.dtype)
            .field("chat_format", &self.chat_format)
            .field("max_sequence_length", &self.max_sequence_length)
            .finish()
    }
}

impl LlamaModel {
    pub fn tokenizer_arc(&self) -> Arc<Tokenizer> {
        Arc::clone(&self.tokenizer)
    }

    pub fn architecture(&self) -> &str {
        "llama"
    }

    pub fn chat_format(&self) -> ChatFormat {
        self.chat_format
    }
}

/// Safetensors files making up the model, sharded index first.
pub(crate) fn safetensors_files(model_dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let index_path = model_dir.join("model.safetensors.index.json");
    if index_path.exists() {
        let index: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&index_path)?)?;
        let shards: BTreeSet<&str> = index["weight_map"]
            .as_object()
            .map(|m| m.values().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if shards.is_empty() {
            return Err(CoreError::config("model_dir", "safetensors index has an empty weight_map"));
        }
        return Ok(shards.into_iter().map(|s| model_dir.join(s)).collect());
    }

    let single = model_dir.join("model.safetensors");
    if single.exists() {
        return Ok(vec![single]);
    }

    Err(CoreError::config(
        "model_dir",
        format!("no safetensors weights found in {}", model_dir.display()),
    ))
}

impl Model for LlamaModel {
    fn load(config: &ModelConfig, device: &Device) -> CoreResult<Self> {
        info!(
            repo_id = %config.repo_id,
            model_dir = %config.model_dir.display(),
            "Loading LLaMA safetensors model"
        );

        let raw = std::fs::read_to_string(config.model_dir.join("config.json"))?;
        let llama_config: LlamaConfig = serde_json::from_str(&raw)?;
        let llama_config = llama_config.into_config(false);
        let dtype = config.compute_dtype.for_device(device);
        debug!(?dtype, layers = llama_config.num_hidden_layers, "Resolved LLaMA config");

        let tokenizer = Arc::new(Tokenizer::from_file(&config.tokenizer_file())?);
        let chat_format = ChatFormat::detect("llama", |t| tokenizer.token_id(t).is_some());

        let files = safetensors_files(&config.model_dir)?;
        // SAFETY: the weight files are not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, device)? };
        let inner = Llama::load(vb, &llama_config)?;

        info!(chat_format = %chat_format, "Model loaded");
        Ok(Self {
            inner,
            config: llama_config,
            tokenizer,
            chat_format,
            device: device.clone(),
            dtype,
            max_sequence_length: config.max_sequence_length,
        })
    }

    fn generate(&mut self, prompt_ids: &[u32], params: &SamplingParams) -> CoreResult<Vec<u32>> {
        // Stale K/V from a previous prompt would leak into this one.
        let mut cache = Cache::new(true, self.dtype, &self.config, &self.device)?;
        let inner = &self.inner;
        let max_len = self.max_sequence_length.min(self.config.max_position_embeddings);
        run_generation(&self.device, prompt_ids, params, max_len, |x, pos| {
            Ok(inner.forward(x, pos, &mut cache)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"").unwrap();
        let files = safetensors_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("model.safetensors")]);
    }

    #[test]
    fn sharded_layout_dedups_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let index = serde_json::json!({
            "weight_map": {
                "lm_head.weight": "model-00002-of-00002.safetensors",
                "model.embed_tokens.weight": "model-00001-of-00002.safetensors",
                "model.norm.weight": "model-00002-of-00002.safetensors"
            }
        });
        std::fs::write(dir.path().join("model.safetensors.index.json"), index.to_string()).unwrap();
        let files = safetensors_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("model-00001-of-00002.safetensors"),
                dir.path().join("model-00002-of-00002.safetensors"),
            ]
        );
    }

    #[test]
    fn missing_weights_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(safetensors_files(dir.path()), Err(CoreError::Config { .. })));
    }

    #[test]
    fn llama31_config_parses() {
        let raw = r#"{
            "hidden_size": 4096, "intermediate_size": 14336, "vocab_size": 128256,
            "num_hidden_layers": 32, "num_attention_heads": 32, "num_key_value_heads": 8,
            "rms_norm_eps": 1e-05, "rope_theta": 500000.0, "max_position_embeddings": 131072,
            "bos_token_id": 128000, "eos_token_id": [128001, 128008, 128009],
            "rope_scaling": {"factor": 8.0, "low_freq_factor": 1.0, "high_freq_factor": 4.0,
                             "original_max_position_embeddings": 8192, "rope_type": "llama3"},
            "tie_word_embeddings": false
        }"#;
        let cfg: LlamaConfig = serde_json::from_str(raw).unwrap();
        let cfg = cfg.into_config(false);
        assert_eq!(cfg.num_key_value_heads, 8);
        assert!(cfg.rope_scaling.is_some());
    }
}
