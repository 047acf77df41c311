use crate::error::{HubError, HubResult};

/// Environment variable holding the Hugging Face access token.
pub const TOKEN_ENV: &str = "HF_TOKEN";

/// Read the access token from the environment.
///
/// Callers load `.env` beforehand if they want it honoured. Fails with
/// [`HubError::MissingToken`] when the variable is absent or blank, before
/// any network traffic.
pub fn require_token() -> HubResult<String> {
    token_from(std::env::var(TOKEN_ENV).ok())
}

fn token_from(value: Option<String>) -> HubResult<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(HubError::MissingToken),
    }
}

/// Hint appended to errors that look like an authorization failure.
pub(crate) fn auth_hint(msg: &str) -> &'static str {
    if msg.contains("401") || msg.contains("403") {
        " (hint: the repo may be gated; check that HF_TOKEN has been granted access)"
    } else {
        ""
    }
}
