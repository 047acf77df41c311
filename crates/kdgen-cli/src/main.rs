use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use commands::generate::GenerateArgs;
use config::load_config;

/// kdgen: build a knowledge-distillation dataset from a teacher model.
///
/// Without a subcommand, runs `generate` with the configured defaults.
#[derive(Debug, Parser)]
#[command(name = "kdgen", version, about, long_about = None)]
struct Cli {
    /// Path to a custom configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log format: "pretty" (default) or "json".
    #[arg(long, global = true, default_value = "pretty", value_name = "FORMAT")]
    log_format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate teacher responses and write them as chunked JSONL.
    ///
    /// Requires HF_TOKEN (from the environment or a .env file).
    Generate(GenerateArgs),

    /// Download the teacher model and the dataset into the Hub cache.
    Pull,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // HF_TOKEN may live in .env
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    init_tracing(&cli.log_format);

    let cfg = load_config(cli.config.as_ref())
        .context("Failed to load configuration")?;

    match cli.command {
        None => {
            commands::generate::run(&GenerateArgs::default(), &cfg).await?;
        }
        Some(Commands::Generate(args)) => {
            commands::generate::run(&args, &cfg).await?;
        }
        Some(Commands::Pull) => {
            commands::pull::run(&cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing(log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry
            .with(fmt::layer().json())
            .init();
    } else {
        registry
            .with(fmt::layer().pretty())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_is_accepted() {
        let cli = Cli::try_parse_from(["kdgen"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_format, "pretty");
    }

    #[test]
    fn generate_flags_parse() {
        let cli = Cli::try_parse_from([
            "kdgen",
            "generate",
            "--sample-size",
            "100",
            "--prompt-style",
            "alpaca",
            "--cpu",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, "json");
        match cli.command {
            Some(Commands::Generate(args)) => {
                assert_eq!(args.sample_size, Some(100));
                assert_eq!(args.prompt_style, Some(kdgen_distill::PromptStyle::Alpaca));
                assert!(args.cpu);
                assert!(!args.gpu);
            }
            other => panic!("expected generate, got {other:?}"),
        }
    }

    #[test]
    fn gpu_and_cpu_conflict() {
        assert!(Cli::try_parse_from(["kdgen", "generate", "--gpu", "--cpu"]).is_err());
    }

    #[test]
    fn bad_prompt_style_is_rejected() {
        assert!(Cli::try_parse_from(["kdgen", "generate", "--prompt-style", "poem"]).is_err());
    }
}
