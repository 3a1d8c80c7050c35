//! Wire formats for the supported backends
//!
//! Ollama's daemon and OpenWebUI-style gateways answer the same kind of
//! question over different shapes. A [`RequestAdapter`] owns one shape:
//! it knows the endpoint path, how to package a prompt into a request body,
//! and where the answer text hides in the response body. The rest of the
//! pipeline never looks inside a payload.

use serde_json::{Map, Value, json};

use super::ProviderError;

/// Generation options (`temperature`, `num_predict`, and friends), forwarded
/// verbatim where the wire format has a place for them.
pub type GenOptions = Map<String, Value>;

/// Which wire format the configured backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// A local Ollama daemon, `/api/generate` style.
    Ollama,
    /// An OpenWebUI-compatible gateway, OpenAI chat-completions style.
    OpenWebUi,
}

impl Backend {
    /// The adapter implementing this backend's wire format.
    pub fn adapter(&self) -> &'static dyn RequestAdapter {
        match self {
            Backend::Ollama => &OllamaAdapter,
            Backend::OpenWebUi => &OpenWebUiAdapter,
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Backend::Ollama),
            "open-webui" | "openwebui" => Ok(Backend::OpenWebUi),
            other => Err(ProviderError::UnknownBackend(other.to_string())),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Ollama => write!(f, "ollama"),
            Backend::OpenWebUi => write!(f, "open-webui"),
        }
    }
}

/// Builds request bodies and extracts answer text for one wire format.
pub trait RequestAdapter: Send + Sync {
    /// Relative path of the single-turn completion endpoint.
    fn chat_endpoint(&self) -> &'static str;

    /// Build the JSON body asking `model` to answer `prompt`.
    fn package(&self, model: &str, prompt: &str, options: &GenOptions) -> Value;

    /// Pull the answer text out of a parsed response body. `None` means the
    /// body carried no text where this format puts it.
    fn unpackage(&self, response: &Value) -> Option<String>;
}

/// Generate-style adapter for the Ollama daemon.
pub struct OllamaAdapter;

impl RequestAdapter for OllamaAdapter {
    fn chat_endpoint(&self) -> &'static str {
        "/api/generate"
    }

    fn package(&self, model: &str, prompt: &str, options: &GenOptions) -> Value {
        let mut payload = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });
        if !options.is_empty() {
            payload["options"] = Value::Object(options.clone());
        }
        payload
    }

    fn unpackage(&self, response: &Value) -> Option<String> {
        response
            .get("response")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// Chat-completions adapter for OpenWebUI-compatible gateways.
pub struct OpenWebUiAdapter;

impl RequestAdapter for OpenWebUiAdapter {
    fn chat_endpoint(&self) -> &'static str {
        "/api/chat/completions"
    }

    // Generation options are a generate-style concept; this format does not
    // carry them.
    fn package(&self, model: &str, prompt: &str, _options: &GenOptions) -> Value {
        json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }

    fn unpackage(&self, response: &Value) -> Option<String> {
        response
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()
            .map(|s| s.to_string())
    }
}
