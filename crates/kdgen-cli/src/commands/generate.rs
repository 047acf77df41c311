use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use kdgen_distill::{generate_dataset, PromptStyle};

use crate::config::AppConfig;

/// Per-run overrides on top of the loaded configuration.
#[derive(Debug, Clone, Default, Args)]
pub struct GenerateArgs {
    /// Teacher model (Hugging Face repo id).
    #[arg(long)]
    pub model_id: Option<String>,

    /// Number of dataset rows to process.
    #[arg(long)]
    pub sample_size: Option<usize>,

    /// Seed for the dataset shuffle.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Records per output file.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Directory the chunk files are written to.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum new tokens per response.
    #[arg(long)]
    pub max_new_tokens: Option<usize>,

    /// Prompt format: "chat" (system + user turns) or "alpaca".
    #[arg(long, value_name = "STYLE")]
    pub prompt_style: Option<PromptStyle>,

    /// Read JSON-lines rows from DIR instead of downloading the dataset.
    #[arg(long, value_name = "DIR")]
    pub dataset_dir: Option<PathBuf>,

    /// Run the teacher on the GPU when one is available.
    #[arg(long, conflicts_with = "cpu")]
    pub gpu: bool,

    /// Force CPU inference.
    #[arg(long)]
    pub cpu: bool,
}

impl GenerateArgs {
    /// Layer the flags that were given over `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(id) = &self.model_id {
            config.model.model_id = id.clone();
        }
        if let Some(n) = self.sample_size {
            config.dataset.sample_size = n;
        }
        if let Some(seed) = self.seed {
            config.dataset.seed = seed;
        }
        if let Some(n) = self.chunk_size {
            config.output.chunk_size = n;
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(n) = self.max_new_tokens {
            config.generation.max_new_tokens = n;
        }
        if let Some(style) = self.prompt_style {
            config.generation.prompt_style = style;
        }
        if let Some(dir) = &self.dataset_dir {
            config.dataset.local_dir = Some(dir.clone());
        }
        if self.gpu {
            config.device.prefer_gpu = true;
        }
        if self.cpu {
            config.device.prefer_gpu = false;
        }
    }
}

/// Run the full generation pass and print where the records went.
pub async fn run(args: &GenerateArgs, config: &AppConfig) -> anyhow::Result<()> {
    let mut config = config.clone();
    args.apply(&mut config);

    info!(
        model_id = %config.model.model_id,
        sample_size = config.dataset.sample_size,
        output_dir = %config.output.dir.display(),
        "Starting teacher dataset generation"
    );

    let summary = generate_dataset(&config.pipeline_config())
        .await
        .context("Teacher dataset generation failed")?;

    println!(
        "\nWrote {} of {} record(s) in {:.1}s ({} skipped)",
        summary.written,
        summary.total,
        summary.elapsed.as_secs_f64(),
        summary.skipped
    );
    for path in &summary.chunks {
        println!("  {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_leave_config_untouched() {
        let mut cfg = AppConfig::default();
        GenerateArgs::default().apply(&mut cfg);
        assert_eq!(cfg.dataset.sample_size, 8000);
        assert_eq!(cfg.output.chunk_size, 2000);
        assert!(cfg.device.prefer_gpu);
        assert!(cfg.dataset.local_dir.is_none());
    }

    #[test]
    fn flags_override_config() {
        let mut cfg = AppConfig::default();
        let args = GenerateArgs {
            sample_size: Some(10),
            chunk_size: Some(4),
            output_dir: Some(PathBuf::from("out")),
            prompt_style: Some(PromptStyle::Alpaca),
            dataset_dir: Some(PathBuf::from("rows")),
            cpu: true,
            ..Default::default()
        };
        args.apply(&mut cfg);
        assert_eq!(cfg.dataset.sample_size, 10);
        assert_eq!(cfg.output.chunk_size, 4);
        assert_eq!(cfg.output.dir, PathBuf::from("out"));
        assert_eq!(cfg.generation.prompt_style, PromptStyle::Alpaca);
        assert_eq!(cfg.dataset.local_dir, Some(PathBuf::from("rows")));
        assert!(!cfg.device.prefer_gpu);
    }
}
