//! # kdgen-core
//!
//! Inference building blocks for the kdgen teacher pipeline: model loading,
//! tokenization, chat-template formatting, sampling and device selection.
//!
//! ## Supported weights
//!
//! | Format | Architectures | Struct |
//! |--------|---------------|--------|
//! | GGUF (block-quantized) | LLaMA-family, Qwen2 | [`QuantizedModel`] |
//! | Safetensors | LLaMA-family | [`LlamaModel`] |
//!
//! [`AnyModel`] picks the backend from the files present in the model
//! directory.
//!
//! ## Feature Flags
//!
//! | Flag | Effect |
//! |---|---|
//! | `cuda` | Enable CUDA GPU acceleration |
//! | `metal` | Enable Apple Metal GPU acceleration |

pub mod chat_template;
pub mod device;
pub mod error;
mod generation;
pub mod llama;
pub mod loader;
pub mod model;
pub mod quantized;
pub mod sampling;
pub mod tokenizer;

pub use chat_template::{ChatFormat, ChatMessage, Role};
pub use device::{device_name, place_weights, select_device};
pub use error::{CoreError, CoreResult};
pub use llama::LlamaModel;
pub use loader::{AnyModel, WeightsKind};
pub use model::{ComputeDtype, Model, ModelConfig, SamplingParams};
pub use quantized::QuantizedModel;
pub use sampling::Sampler;
pub use tokenizer::Tokenizer;
