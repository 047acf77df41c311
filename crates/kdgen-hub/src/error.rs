use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("HF_TOKEN is not set; export it or add it to a .env file")]
    MissingToken,

    #[error("Hugging Face API error: {0}")]
    Api(#[from] hf_hub::api::tokio::ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Nothing matching {what} in '{repo}'")]
    NotFound { repo: String, what: String },

    #[error("Download failed for '{file}': {reason}")]
    DownloadFailed { file: String, reason: String },
}

pub type HubResult<T> = Result<T, HubError>;
