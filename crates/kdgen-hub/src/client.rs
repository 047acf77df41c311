use std::path::{Path, PathBuf};

use hf_hub::{
    api::tokio::{Api, ApiBuilder, ApiRepo},
    Repo, RepoType,
};
use tracing::{debug, info, warn};

use crate::{
    auth::{auth_hint, require_token},
    error::{HubError, HubResult},
    select::{has_file, select_gguf, split_parquet_files},
};

const TOKENIZER_FILE: &str = "tokenizer.json";
const SAFETENSORS_INDEX: &str = "model.safetensors.index.json";
const SAFETENSORS_SINGLE: &str = "model.safetensors";
const CONFIG_FILE: &str = "config.json";

/// Local paths of a downloaded model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// Snapshot directory holding the weights.
    pub model_dir: PathBuf,
    /// The GGUF file, for quantized downloads.
    pub gguf_file: Option<PathBuf>,
    pub tokenizer: PathBuf,
}

/// Authenticated Hugging Face Hub client backed by the `hf-hub` cache.
pub struct HubClient {
    api: Api,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient").finish_non_exhaustive()
    }
}

impl HubClient {
    /// Build a client with the token from `HF_TOKEN`.
    ///
    /// Fails with [`HubError::MissingToken`] before touching the network.
    pub fn from_env(cache_dir: Option<&Path>, progress: bool) -> HubResult<Self> {
        let token = require_token()?;
        Self::new(Some(token), cache_dir, progress)
    }

    /// Build a client; `None` makes anonymous requests (public repos only).
    pub fn new(token: Option<String>, cache_dir: Option<&Path>, progress: bool) -> HubResult<Self> {
        let mut builder = ApiBuilder::new()
            .with_token(token)
            .with_progress(progress);
        if let Some(dir) = cache_dir {
            let dir = expand_tilde(dir);
            std::fs::create_dir_all(&dir)?;
            builder = builder.with_cache_dir(dir);
        }
        Ok(Self { api: builder.build()? })
    }

    fn model_repo(&self, repo_id: &str, revision: &str) -> ApiRepo {
        self.api.repo(Repo::with_revision(repo_id.to_string(), RepoType::Model, revision.to_string()))
    }

    /// Download the `quant_tag` GGUF file from `gguf_repo` plus a tokenizer.
    ///
    /// `tokenizer.json` comes from the GGUF repo when it ships one, otherwise
    /// from `model_id` (usually gated, hence the token).
    pub async fn fetch_gguf(
        &self,
        model_id: &str,
        gguf_repo: &str,
        revision: &str,
        quant_tag: &str,
    ) -> HubResult<ModelFiles> {
        let repo = self.model_repo(gguf_repo, "main");
        let listing = list_files(&repo, gguf_repo).await?;
        let filename = select_gguf(gguf_repo, &listing, Some(quant_tag))?;
        info!(repo = gguf_repo, file = %filename, "Fetching GGUF weights");
        let gguf_file = get(&repo, gguf_repo, &filename).await?;

        let tokenizer = if has_file(&listing, TOKENIZER_FILE) {
            get(&repo, gguf_repo, TOKENIZER_FILE).await?
        } else {
            debug!(model_id, "GGUF repo has no tokenizer.json, using the base model's");
            get(&self.model_repo(model_id, revision), model_id, TOKENIZER_FILE).await?
        };

        let model_dir = parent_dir(&gguf_file);
        Ok(ModelFiles { model_dir, gguf_file: Some(gguf_file), tokenizer })
    }

    /// Download full-precision safetensors weights, `config.json` and the
    /// tokenizer of `model_id`.
    pub async fn fetch_safetensors(&self, model_id: &str, revision: &str) -> HubResult<ModelFiles> {
        let repo = self.model_repo(model_id, revision);
        info!(repo = model_id, revision, "Fetching safetensors weights");

        get(&repo, model_id, CONFIG_FILE).await?;
        let tokenizer = get(&repo, model_id, TOKENIZER_FILE).await?;

        match repo.get(SAFETENSORS_INDEX).await {
            Ok(index_path) => {
                let index: serde_json::Value =
                    serde_json::from_str(&std::fs::read_to_string(&index_path)?)?;
                let mut shards: Vec<String> = index["weight_map"]
                    .as_object()
                    .map(|m| m.values().filter_map(|v| v.as_str()).map(String::from).collect())
                    .unwrap_or_default();
                shards.sort();
                shards.dedup();
                for shard in &shards {
                    get(&repo, model_id, shard).await?;
                }
            }
            Err(e) => {
                debug!(error = %e, "No safetensors index, trying single file");
                get(&repo, model_id, SAFETENSORS_SINGLE).await?;
            }
        }

        let model_dir = parent_dir(&tokenizer);
        Ok(ModelFiles { model_dir, gguf_file: None, tokenizer })
    }

    /// Download every parquet file of `split` in dataset `repo_id`.
    pub async fn fetch_dataset_split(&self, repo_id: &str, split: &str) -> HubResult<Vec<PathBuf>> {
        let repo = self.api.repo(Repo::new(repo_id.to_string(), RepoType::Dataset));
        let listing = list_files(&repo, repo_id).await?;
        let files = split_parquet_files(&listing, split);
        if files.is_empty() {
            return Err(HubError::NotFound {
                repo: repo_id.to_string(),
                what: format!("parquet files for split '{split}'"),
            });
        }
        info!(repo = repo_id, split, files = files.len(), "Fetching dataset split");

        let mut paths = Vec::with_capacity(files.len());
        for name in &files {
            paths.push(get(&repo, repo_id, name).await?);
        }
        Ok(paths)
    }
}

async fn list_files(repo: &ApiRepo, repo_id: &str) -> HubResult<Vec<String>> {
    let info = repo.info().await.map_err(|e| {
        let msg = e.to_string();
        HubError::DownloadFailed {
            file: format!("<repo info: {repo_id}>"),
            reason: format!("{msg}{}", auth_hint(&msg)),
        }
    })?;
    Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
}

async fn get(repo: &ApiRepo, repo_id: &str, filename: &str) -> HubResult<PathBuf> {
    repo.get(filename).await.map_err(|e| {
        let msg = e.to_string();
        warn!(repo = repo_id, file = filename, error = %msg, "Download failed");
        HubError::DownloadFailed {
            file: format!("{repo_id}/{filename}"),
            reason: format!("{msg}{}", auth_hint(&msg)),
        }
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map(|home| home.join(rest)).unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
