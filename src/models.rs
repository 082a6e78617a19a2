use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

pub const MAX_MODEL_CHARS: usize = 128;
pub const MAX_TOKENS_CAP: u32 = 4096;

// What the client sends us
#[derive(Debug, Deserialize, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

// What we send upstream, after validation
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

// Upstream response format, also returned to the client as-is
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
}

impl GenerateRequest {
    /// Checks client input and fills in the default model.
    pub fn validate(
        self,
        max_prompt_chars: usize,
        default_model: &str,
    ) -> Result<UpstreamRequest, ProxyError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(ProxyError::BadRequest("prompt must not be empty".into()));
        }
        let prompt_chars = prompt.chars().count();
        if prompt_chars > max_prompt_chars {
            return Err(ProxyError::BadRequest(format!(
                "prompt is {prompt_chars} characters, limit is {max_prompt_chars}"
            )));
        }

        let model = match self.model {
            Some(model) => {
                validate_model(&model)?;
                model
            }
            None => default_model.to_string(),
        };

        if let Some(max_tokens) = self.max_tokens
            && !(1..=MAX_TOKENS_CAP).contains(&max_tokens)
        {
            return Err(ProxyError::BadRequest(format!(
                "max_tokens must be between 1 and {MAX_TOKENS_CAP}"
            )));
        }

        Ok(UpstreamRequest {
            model,
            prompt: prompt.to_string(),
            stream: false,
            max_tokens: self.max_tokens,
        })
    }
}

fn validate_model(model: &str) -> Result<(), ProxyError> {
    if model.is_empty() || model.len() > MAX_MODEL_CHARS {
        return Err(ProxyError::BadRequest(format!(
            "model name must be 1 to {MAX_MODEL_CHARS} characters"
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-');
    if !model.chars().all(allowed) {
        return Err(ProxyError::BadRequest(
            "model name contains invalid characters".into(),
        ));
    }
    Ok(())
}
