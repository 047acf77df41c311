use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model config error: {field}: {reason}")]
    Config { field: String, reason: String },

    #[error("Prompt too long: {got} tokens, max {max}")]
    SequenceTooLong { got: usize, max: usize },

    #[error("Empty prompt: encoded to zero tokens")]
    EmptyPrompt,
}

impl CoreError {
    pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
        Self::Config { field: field.to_string(), reason: reason.into() }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
