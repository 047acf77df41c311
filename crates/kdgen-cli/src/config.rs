use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use kdgen_core::ComputeDtype;
use kdgen_distill::{
    DatasetSource, GenerationConfig, OutputConfig, PipelineConfig, PromptStyle,
    QuantizationConfig, RunOptions, TeacherOptions,
};
use kdgen_hub::expand_tilde;

/// Full runtime configuration loaded from TOML + env vars.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub model: ModelSection,
    pub dataset: DatasetSection,
    pub generation: GenerationSection,
    pub output: OutputSection,
    pub device: DeviceConfig,
    #[serde(default)]
    pub hub: HubSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelSection {
    pub model_id: String,
    pub revision: String,
    pub load_in_4bit: bool,
    pub gguf_repo: String,
    pub quant_tag: String,
    pub compute_dtype: ComputeDtype,
    pub cpu_offload: bool,
    pub max_sequence_length: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetSection {
    pub repo: String,
    pub split: String,
    pub sample_size: usize,
    pub seed: u64,
    /// Read JSON-lines files from this directory instead of the Hub.
    pub local_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationSection {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub do_sample: bool,
    pub prompt_style: PromptStyle,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputSection {
    pub dir: PathBuf,
    pub file_prefix: String,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub prefer_gpu: bool,
    pub cuda_device_id: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HubSection {
    /// Unset means the hf-hub default cache.
    pub cache_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let quant = QuantizationConfig::default();
        let teacher = TeacherOptions::default();
        let generation = GenerationConfig::default();
        let output = OutputConfig::default();
        Self {
            model: ModelSection {
                model_id: kdgen_distill::teacher::DEFAULT_MODEL_ID.to_string(),
                revision: teacher.revision,
                load_in_4bit: quant.load_in_4bit,
                gguf_repo: quant.gguf_repo,
                quant_tag: quant.quant_tag,
                compute_dtype: quant.compute_dtype,
                cpu_offload: quant.cpu_offload,
                max_sequence_length: teacher.max_sequence_length,
            },
            dataset: DatasetSection {
                repo: kdgen_distill::dataset::ALPACA_REPO.to_string(),
                split: "train".to_string(),
                sample_size: 8000,
                seed: 42,
                local_dir: None,
            },
            generation: GenerationSection {
                max_new_tokens: generation.max_new_tokens,
                temperature: generation.temperature,
                top_p: generation.top_p,
                do_sample: generation.do_sample,
                prompt_style: PromptStyle::Chat,
                seed: generation.seed,
            },
            output: OutputSection {
                dir: output.dir,
                file_prefix: output.file_prefix,
                chunk_size: output.chunk_size,
            },
            device: DeviceConfig {
                prefer_gpu: teacher.prefer_gpu,
                cuda_device_id: teacher.cuda_device_id,
            },
            hub: HubSection::default(),
        }
    }
}

impl AppConfig {
    /// Cache directory with `~` expanded, if one is configured.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.hub.cache_dir.as_deref().map(|raw| expand_tilde(raw.as_ref()))
    }

    pub fn dataset_source(&self) -> DatasetSource {
        match &self.dataset.local_dir {
            Some(dir) => DatasetSource::Local(dir.clone()),
            None => DatasetSource::Hub {
                repo: self.dataset.repo.clone(),
                split: self.dataset.split.clone(),
            },
        }
    }

    pub fn quantization(&self) -> QuantizationConfig {
        QuantizationConfig {
            load_in_4bit: self.model.load_in_4bit,
            gguf_repo: self.model.gguf_repo.clone(),
            quant_tag: self.model.quant_tag.clone(),
            compute_dtype: self.model.compute_dtype,
            cpu_offload: self.model.cpu_offload,
        }
    }

    /// Everything [`kdgen_distill::generate_dataset`] needs for one run.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let gen = &self.generation;
        PipelineConfig {
            model_id: self.model.model_id.clone(),
            quantization: self.quantization(),
            teacher: TeacherOptions {
                revision: self.model.revision.clone(),
                cache_dir: self.cache_dir(),
                prefer_gpu: self.device.prefer_gpu,
                cuda_device_id: self.device.cuda_device_id,
                max_sequence_length: self.model.max_sequence_length,
            },
            dataset: self.dataset_source(),
            sample_size: self.dataset.sample_size,
            seed: self.dataset.seed,
            run: RunOptions {
                generation: GenerationConfig {
                    max_new_tokens: gen.max_new_tokens,
                    temperature: gen.temperature,
                    top_p: gen.top_p,
                    do_sample: gen.do_sample,
                    seed: gen.seed,
                },
                style: gen.prompt_style,
                output: OutputConfig {
                    dir: self.output.dir.clone(),
                    file_prefix: self.output.file_prefix.clone(),
                    chunk_size: self.output.chunk_size,
                },
                show_progress: true,
            },
        }
    }
}

/// Load configuration from:
/// 1. Built-in defaults
/// 2. `config/default.toml` (if present)
/// 3. A custom config file path (if provided)
/// 4. Environment variables such as `KDGEN__DATASET__SAMPLE_SIZE`
pub fn load_config(config_file: Option<&PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder()
        // Layer 1: defaults baked in
        .set_default("model.model_id", "meta-llama/Llama-3.1-8B-Instruct")?
        .set_default("model.revision", "main")?
        .set_default("model.load_in_4bit", true)?
        .set_default("model.gguf_repo", "bartowski/Meta-Llama-3.1-8B-Instruct-GGUF")?
        .set_default("model.quant_tag", "Q4_K_M")?
        .set_default("model.compute_dtype", "bf16")?
        .set_default("model.cpu_offload", true)?
        .set_default("model.max_sequence_length", 4096_i64)?
        .set_default("dataset.repo", "tatsu-lab/alpaca")?
        .set_default("dataset.split", "train")?
        .set_default("dataset.sample_size", 8000_i64)?
        .set_default("dataset.seed", 42_i64)?
        .set_default("generation.max_new_tokens", 512_i64)?
        .set_default("generation.temperature", 0.3)?
        .set_default("generation.top_p", 0.9)?
        .set_default("generation.do_sample", true)?
        .set_default("generation.prompt_style", "chat")?
        .set_default("output.dir", "teacher_datasets")?
        .set_default("output.file_prefix", "alpaca_kd_chunk")?
        .set_default("output.chunk_size", 2000_i64)?
        .set_default("device.prefer_gpu", true)?
        .set_default("device.cuda_device_id", 0_i64)?
        // Layer 2: project default.toml
        .add_source(File::with_name("config/default").required(false));

    // Layer 3: optional user-supplied config file
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    // Layer 4: environment variables. `__` separates section and key so that
    // keys may contain underscores (KDGEN__OUTPUT__CHUNK_SIZE).
    builder = builder.add_source(
        Environment::with_prefix("KDGEN")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
