//! The generation run: load, iterate, write.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::{load_dataset, DatasetSource, Sample};
use crate::response::{get_teacher_response, GenerationConfig, PromptStyle, TextGenerator};
use crate::teacher::{load_teacher_model, QuantizationConfig, TeacherOptions};
use crate::writer::ChunkWriter;

/// One output row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherRecord {
    pub instruction: String,
    pub input: String,
    pub teacher_response: String,
    pub ground_truth: String,
}

impl TeacherRecord {
    pub fn new(sample: &Sample, teacher_response: String) -> Self {
        Self {
            instruction: sample.instruction.clone(),
            input: sample.input.clone(),
            teacher_response,
            ground_truth: sample.output.clone(),
        }
    }
}

/// Output location and rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub file_prefix: String,
    pub chunk_size: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("teacher_datasets"),
            file_prefix: "alpaca_kd_chunk".to_string(),
            chunk_size: 2000,
        }
    }
}

/// Settings for the per-sample loop.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub generation: GenerationConfig,
    pub style: PromptStyle,
    pub output: OutputConfig,
    pub show_progress: bool,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub written: usize,
    pub skipped: usize,
    pub chunks: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Full configuration of a generation run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model_id: String,
    pub quantization: QuantizationConfig,
    pub teacher: TeacherOptions,
    pub dataset: DatasetSource,
    pub sample_size: usize,
    pub seed: u64,
    pub run: RunOptions,
}

/// Load the teacher, load the dataset subsample, and generate every record.
pub async fn generate_dataset(config: &PipelineConfig) -> Result<RunSummary> {
    info!(model_id = %config.model_id, "Loading teacher model");
    let mut teacher =
        load_teacher_model(&config.model_id, &config.quantization, &config.teacher).await?;

    info!(
        source = ?config.dataset,
        sample_size = config.sample_size,
        seed = config.seed,
        "Loading dataset"
    );
    let cache_dir = config.teacher.cache_dir.as_deref();
    let samples = load_dataset(&config.dataset, cache_dir, config.sample_size, config.seed)
        .await
        .context("Failed to load dataset")?;

    run_generation(&mut teacher, &samples, &config.run)
}

/// Generate a response for every sample in order and write the records.
///
/// A sample whose generation fails is logged, left out of the output and
/// counted in [`RunSummary::skipped`]. Output errors abort the run.
pub fn run_generation<G: TextGenerator + ?Sized>(
    generator: &mut G,
    samples: &[Sample],
    options: &RunOptions,
) -> Result<RunSummary> {
    let output = &options.output;
    let mut writer = ChunkWriter::new(&output.dir, &output.file_prefix, output.chunk_size)?;
    let pb = if options.show_progress {
        progress_bar(samples.len() as u64)
    } else {
        ProgressBar::hidden()
    };

    info!(
        samples = samples.len(),
        style = %options.style,
        output_dir = %output.dir.display(),
        chunk_size = output.chunk_size,
        "Generating teacher responses"
    );

    let start = Instant::now();
    let mut skipped = 0usize;
    for (index, sample) in samples.iter().enumerate() {
        let config = options.generation.for_sample(index);
        let result = get_teacher_response(
            &mut *generator,
            &sample.instruction,
            &sample.input,
            &config,
            options.style,
        );
        match result {
            Ok(response) => writer.write(&TeacherRecord::new(sample, response))?,
            Err(e) => {
                skipped += 1;
                warn!(index, error = %format!("{e:#}"), "Generation failed, skipping sample");
            }
        }
        pb.inc(1);
        pb.set_message(format!("written {} | skipped {skipped}", writer.records()));
    }

    let chunks = writer.finish()?;
    let elapsed = start.elapsed();
    pb.finish_with_message(format!("done | written {} | skipped {skipped}", chunks.records));

    let summary = RunSummary {
        total: samples.len(),
        written: chunks.records,
        skipped,
        chunks: chunks.files,
        elapsed,
    };
    info!(
        total = summary.total,
        written = summary.written,
        skipped = summary.skipped,
        chunks = summary.chunks.len(),
        elapsed_secs = elapsed.as_secs_f64(),
        "Generation complete"
    );
    Ok(summary)
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) ETA {eta} | {msg}",
    )
    .map(|s| s.progress_chars("█▓░"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("starting...");
    pb
}
