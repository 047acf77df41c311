use anyhow::Context;
use tracing::info;

use kdgen_distill::teacher::fetch_teacher_files;
use kdgen_distill::DatasetSource;
use kdgen_hub::HubClient;

use crate::config::AppConfig;

/// Download the teacher weights, tokenizer and dataset split into the Hub
/// cache without generating anything.
pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let cache_dir = config.cache_dir();
    let hub = HubClient::from_env(cache_dir.as_deref(), true)?;
    let quant = config.quantization();

    info!(
        model_id = %config.model.model_id,
        load_in_4bit = quant.load_in_4bit,
        quant_tag = %quant.quant_tag,
        "Pulling teacher model"
    );
    let files =
        fetch_teacher_files(&hub, &config.model.model_id, &config.model.revision, &quant).await?;

    println!(
        "\nTeacher '{}' cached in {}",
        config.model.model_id,
        files.model_dir.display()
    );
    if let Some(gguf) = &files.gguf_file {
        println!("  {}", gguf.display());
    }
    println!("  {}", files.tokenizer.display());

    match config.dataset_source() {
        DatasetSource::Hub { repo, split } => {
            info!(repo = %repo, split = %split, "Pulling dataset");
            let paths = hub
                .fetch_dataset_split(&repo, &split)
                .await
                .with_context(|| format!("Failed to download dataset '{repo}'"))?;
            println!("Dataset '{repo}' ({split}), {} file(s):", paths.len());
            for p in &paths {
                println!("  {}", p.display());
            }
        }
        DatasetSource::Local(dir) => {
            println!("Dataset is read from {}; nothing to pull", dir.display());
        }
    }

    Ok(())
}
