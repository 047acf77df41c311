use std::path::Path;

use tokenizers::Tokenizer as HfTokenizer;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

const EOS_CANDIDATES: &[&str] = &["<|end_of_text|>", "</s>", "<|endoftext|>", "<eos>"];
const BOS_CANDIDATES: &[&str] = &["<|begin_of_text|>", "<s>", "<|startoftext|>", "<bos>"];

/// Thin wrapper around the Hugging Face `tokenizers` crate.
#[derive(Debug)]
pub struct Tokenizer {
    inner: HfTokenizer,
    eos_token_id: Option<u32>,
    bos_token_id: Option<u32>,
}

impl From<HfTokenizer> for Tokenizer {
    fn from(inner: HfTokenizer) -> Self {
        let eos_token_id = special_token_id(&inner, EOS_CANDIDATES);
        let bos_token_id = special_token_id(&inner, BOS_CANDIDATES);
        Self { inner, eos_token_id, bos_token_id }
    }
}

impl Tokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let inner = HfTokenizer::from_file(path).map_err(|e| {
            CoreError::Tokenizer(format!("failed to load {}: {e}", path.display()))
        })?;
        let tok = Self::from(inner);
        debug!(
            path = %path.display(),
            eos_token_id = tok.eos_token_id,
            bos_token_id = tok.bos_token_id,
            vocab_size = tok.vocab_size(),
            "Tokenizer loaded"
        );
        Ok(tok)
    }

    /// Parse a serialized `tokenizer.json` held in memory.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        HfTokenizer::from_bytes(bytes)
            .map(Self::from)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))
    }

    /// Encode text to token ids.
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> CoreResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode a sequence of token ids back to a string.
    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> CoreResult<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    pub fn bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }

    /// Vocabulary size including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Look up the id of an exact token string (e.g. `"<|eot_id|>"`).
    pub fn token_id(&self, text: &str) -> Option<u32> {
        self.inner.token_to_id(text)
    }

    /// Resolve stop-token strings to ids, dropping those not in the
    /// vocabulary. The EOS id is always included when known.
    pub fn stop_token_ids(&self, names: &[&str]) -> Vec<u32> {
        let mut ids: Vec<u32> = names.iter().filter_map(|n| self.token_id(n)).collect();
        if let Some(eos) = self.eos_token_id {
            if !ids.contains(&eos) {
                ids.push(eos);
            }
        }
        ids
    }
}

fn special_token_id(tokenizer: &HfTokenizer, candidates: &[&str]) -> Option<u32> {
    candidates.iter().find_map(|c| tokenizer.token_to_id(c))
}
