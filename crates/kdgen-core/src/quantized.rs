use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{quantized::gguf_file, Device, Tensor};
use candle_transformers::models::{quantized_llama, quantized_qwen2};
use tracing::info;

use crate::{
    chat_template::ChatFormat,
    error::{CoreError, CoreResult},
    generation::run_generation,
    model::{Model, ModelConfig, SamplingParams},
    tokenizer::Tokenizer,
};

/// LLaMA-family or Qwen2 block-quantized weights behind one `forward`.
enum QuantizedWeights {
    Llama(quantized_llama::ModelWeights),
    Qwen2(quantized_qwen2::ModelWeights),
}

impl QuantizedWeights {
    /// The KV cache restarts whenever `index_pos` is 0.
    fn forward(&mut self, x: &Tensor, index_pos: usize) -> candle_core::Result<Tensor> {
        match self {
            Self::Llama(m) => m.forward(x, index_pos),
            Self::Qwen2(m) => m.forward(x, index_pos),
        }
    }
}

/// GGUF quantized model (e.g. a `Q4_K_M` Llama-3.1 file).
///
/// Weights stay block-quantized in memory and are dequantized per matmul;
/// activations are f32.
pub struct QuantizedModel {
    weights: QuantizedWeights,
    tokenizer: Arc<Tokenizer>,
    arch: String,
    chat_format: ChatFormat,
    device: Device,
    max_sequence_length: usize,
}

impl std::fmt::Debug for QuantizedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuantizedModel")
            .field("arch", &self.arch)
            .field("chat_format", &self.chat_format)
            .field("max_sequence_length", &self.max_sequence_length)
            .finish()
    }
}

impl QuantizedModel {
    pub fn tokenizer_arc(&self) -> Arc<Tokenizer> {
        Arc::clone(&self.tokenizer)
    }

    /// The GGUF `general.architecture` string (e.g. `"llama"`).
    pub fn architecture(&self) -> &str {
        &self.arch
    }

    pub fn chat_format(&self) -> ChatFormat {
        self.chat_format
    }
}

/// Resolve the GGUF file to load: the explicit path when given, otherwise
/// the single `.gguf` in `model_dir`.
pub(crate) fn find_gguf(model_dir: &Path, explicit: Option<&Path>) -> CoreResult<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(CoreError::config(
                "gguf_file",
                format!("{} does not exist", path.display()),
            ));
        }
        return Ok(path.to_path_buf());
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(model_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("gguf") {
            paths.push(path);
        }
    }
    paths.sort();

    match paths.len() {
        0 => Err(CoreError::config(
            "model_dir",
            format!(
                "no .gguf file found in {}; run `kdgen pull` to download it",
                model_dir.display()
            ),
        )),
        1 => Ok(paths.remove(0)),
        n => Err(CoreError::config(
            "model_dir",
            format!(
                "{n} .gguf files found in {}; set the exact file to load \
                 (sharded GGUF is not supported)",
                model_dir.display()
            ),
        )),
    }
}

impl Model for QuantizedModel {
    fn load(config: &ModelConfig, device: &Device) -> CoreResult<Self> {
        let path = find_gguf(&config.model_dir, config.gguf_file.as_deref())?;
        info!(repo_id = %config.repo_id, path = %path.display(), "Loading quantized GGUF model");

        let mut file = std::fs::File::open(&path)?;
        let content = gguf_file::Content::read(&mut file)
            .map_err(|e| e.with_path(&path))?;

        let arch = match content.metadata.get("general.architecture") {
            Some(gguf_file::Value::String(s)) => s.clone(),
            _ => "llama".to_string(),
        };
        info!(architecture = %arch, tensors = content.tensor_infos.len(), "Read GGUF header");

        let weights = match arch.as_str() {
            "qwen2" => QuantizedWeights::Qwen2(quantized_qwen2::ModelWeights::from_gguf(
                content, &mut file, device,
            )?),
            _ => QuantizedWeights::Llama(quantized_llama::ModelWeights::from_gguf(
                content, &mut file, device,
            )?),
        };

        let tokenizer = Arc::new(Tokenizer::from_file(&config.tokenizer_file())?);
        let chat_format = ChatFormat::detect(&arch, |t| tokenizer.token_id(t).is_some());
        info!(chat_format = %chat_format, "Quantized model loaded");

        Ok(Self {
            weights,
            tokenizer,
            arch,
            chat_format,
            device: device.clone(),
            max_sequence_length: config.max_sequence_length,
        })
    }

    fn generate(&mut self, prompt_ids: &[u32], params: &SamplingParams) -> CoreResult<Vec<u32>> {
        let weights = &mut self.weights;
        run_generation(&self.device, prompt_ids, params, self.max_sequence_length, |x, pos| {
            Ok(weights.forward(x, pos)?)
        })
    }
}
