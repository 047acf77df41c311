//! # kdgen-distill
//!
//! Builds a knowledge-distillation corpus from a teacher model:
//!
//! 1. Load the teacher (4-bit GGUF by default) and its tokenizer.
//! 2. Load `tatsu-lab/alpaca` and keep a seeded subsample.
//! 3. Ask the teacher to answer each instruction, extract the answer from
//!    the decoded text, and append `{instruction, input, teacher_response,
//!    ground_truth}` to rotating `alpaca_kd_chunk<N>.jsonl` files.
//!
//! Samples whose generation fails are skipped and counted.

pub mod dataset;
pub mod pipeline;
pub mod response;
pub mod teacher;
pub mod writer;

pub use dataset::{load_dataset, subsample, DatasetSource, Sample};
pub use pipeline::{
    generate_dataset, run_generation, OutputConfig, PipelineConfig, RunOptions, RunSummary,
    TeacherRecord,
};
pub use response::{
    extract_response, get_teacher_response, GenerationConfig, PromptStyle, TextGenerator,
};
pub use teacher::{load_teacher_model, QuantizationConfig, TeacherModel, TeacherOptions};
pub use writer::{ChunkSummary, ChunkWriter};
