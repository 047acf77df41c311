//! Teacher model loading.
//!
//! Resolves weights and tokenizer on the Hub, picks a device, and wraps the
//! loaded [`AnyModel`] as a [`TextGenerator`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use kdgen_core::{
    device_name, place_weights, select_device, AnyModel, ChatFormat, ComputeDtype, Model,
    ModelConfig, Tokenizer,
};
use kdgen_hub::{HubClient, ModelFiles};

use crate::response::{GenerationConfig, TextGenerator};

pub const DEFAULT_MODEL_ID: &str = "meta-llama/Llama-3.1-8B-Instruct";

/// How the teacher weights are quantized and placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Load 4-bit GGUF weights from `gguf_repo`; otherwise full safetensors
    /// from the model id.
    pub load_in_4bit: bool,
    pub gguf_repo: String,
    /// Quantization variant in the GGUF repo listing.
    pub quant_tag: String,
    /// Dtype for safetensors weights. GGUF kernels compute in f32.
    pub compute_dtype: ComputeDtype,
    /// Fall back to CPU when the accelerator lacks memory for the weights.
    pub cpu_offload: bool,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            load_in_4bit: true,
            gguf_repo: "bartowski/Meta-Llama-3.1-8B-Instruct-GGUF".to_string(),
            quant_tag: "Q4_K_M".to_string(),
            compute_dtype: ComputeDtype::Bf16,
            cpu_offload: true,
        }
    }
}

/// Everything about loading the teacher that is not quantization.
#[derive(Debug, Clone)]
pub struct TeacherOptions {
    pub revision: String,
    pub cache_dir: Option<PathBuf>,
    pub prefer_gpu: bool,
    pub cuda_device_id: usize,
    pub max_sequence_length: usize,
}

impl Default for TeacherOptions {
    fn default() -> Self {
        Self {
            revision: "main".to_string(),
            cache_dir: None,
            prefer_gpu: true,
            cuda_device_id: 0,
            max_sequence_length: 4096,
        }
    }
}

/// Download the files `quant` calls for, without loading them.
pub async fn fetch_teacher_files(
    hub: &HubClient,
    model_id: &str,
    revision: &str,
    quant: &QuantizationConfig,
) -> Result<ModelFiles> {
    let files = if quant.load_in_4bit {
        hub.fetch_gguf(model_id, &quant.gguf_repo, revision, &quant.quant_tag).await
    } else {
        hub.fetch_safetensors(model_id, revision).await
    };
    files.with_context(|| format!("Failed to fetch teacher model '{model_id}'"))
}

/// Load the teacher model and tokenizer.
///
/// Requires `HF_TOKEN`; a missing token fails before any network call. Any
/// failure is logged and returned without retry.
pub async fn load_teacher_model(
    model_id: &str,
    quant: &QuantizationConfig,
    options: &TeacherOptions,
) -> Result<TeacherModel> {
    let result = async {
        let hub = HubClient::from_env(options.cache_dir.as_deref(), true)?;
        let files = fetch_teacher_files(&hub, model_id, &options.revision, quant).await?;
        TeacherModel::from_files(model_id, &files, quant, options)
    }
    .await;

    if let Err(e) = &result {
        error!(model_id, error = %format!("{e:#}"), "Failed to load teacher model");
    }
    result
}

/// A loaded teacher model with its tokenizer and stop tokens.
pub struct TeacherModel {
    model: AnyModel,
    tokenizer: Arc<Tokenizer>,
    chat_format: ChatFormat,
    stop_token_ids: Vec<u32>,
}

impl std::fmt::Debug for TeacherModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeacherModel")
            .field("model", &self.model)
            .field("chat_format", &self.chat_format)
            .field("stop_token_ids", &self.stop_token_ids)
            .finish()
    }
}

impl TeacherModel {
    /// Load already-downloaded files onto the best device.
    pub fn from_files(
        model_id: &str,
        files: &ModelFiles,
        quant: &QuantizationConfig,
        options: &TeacherOptions,
    ) -> Result<Self> {
        let device = select_device(options.prefer_gpu, options.cuda_device_id)?;
        let device = place_weights(device, &files.model_dir, quant.cpu_offload)?;

        let config = ModelConfig {
            repo_id: model_id.to_string(),
            model_dir: files.model_dir.clone(),
            tokenizer_path: Some(files.tokenizer.clone()),
            gguf_file: files.gguf_file.clone(),
            max_sequence_length: options.max_sequence_length,
            compute_dtype: quant.compute_dtype,
        };
        let model = AnyModel::load(&config, &device)
            .with_context(|| format!("Failed to load teacher model '{model_id}'"))?;

        let tokenizer = model.tokenizer_arc();
        let chat_format = model.chat_format();
        let stop_token_ids = tokenizer.stop_token_ids(chat_format.stop_tokens());

        info!(
            arch = model.architecture(),
            chat_format = %chat_format,
            device = device_name(&device),
            "Teacher model loaded"
        );
        Ok(Self { model, tokenizer, chat_format, stop_token_ids })
    }

    pub fn tokenizer(&self) -> Arc<Tokenizer> {
        Arc::clone(&self.tokenizer)
    }
}

impl TextGenerator for TeacherModel {
    fn chat_format(&self) -> ChatFormat {
        self.chat_format
    }

    fn generate_text(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        // The chat template already carries BOS.
        let mut ids = self.tokenizer.encode(prompt, false).context("Teacher tokenisation failed")?;
        let params = config.sampling_params(self.stop_token_ids.clone());
        let completion = self.model.generate(&ids, &params).context("Teacher generation failed")?;
        ids.extend(completion);
        self.tokenizer.decode(&ids, true).context("Teacher decoding failed")
    }
}
