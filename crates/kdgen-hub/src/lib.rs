//! # kdgen-hub
//!
//! Hugging Face Hub access for kdgen. Every download goes through the
//! `hf-hub` cache, so repeated runs reuse local files.
//!
//! ```rust,no_run
//! use kdgen_hub::HubClient;
//!
//! # async fn run() -> kdgen_hub::HubResult<()> {
//! let hub = HubClient::from_env(None, true)?;
//! let files = hub
//!     .fetch_gguf(
//!         "meta-llama/Llama-3.1-8B-Instruct",
//!         "bartowski/Meta-Llama-3.1-8B-Instruct-GGUF",
//!         "main",
//!         "Q4_K_M",
//!     )
//!     .await?;
//! let alpaca = hub.fetch_dataset_split("tatsu-lab/alpaca", "train").await?;
//! # let _ = (files, alpaca);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod select;

pub use auth::{require_token, TOKEN_ENV};
pub use client::{expand_tilde, HubClient, ModelFiles};
pub use error::{HubError, HubResult};
