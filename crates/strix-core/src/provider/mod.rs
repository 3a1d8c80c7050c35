//! Model provider — the two-phase request pipeline
//!
//! A [`ModelProvider`] connects to one backend, fetches its model catalog
//! once, and then answers prompts in two phases. Phase one sends the user's
//! question to a default model wrapped in a routing prompt and asks it to
//! pick the model that should answer, to craft that model's prompt, and to
//! justify the pick. Phase two executes the crafted prompt against the
//! chosen model. Routing failures degrade to the default model; answer
//! failures are rendered into the outcome text, so a request never fails
//! outright.

pub mod adapter;
pub mod catalog;

pub use adapter::{Backend, GenOptions, OllamaAdapter, OpenWebUiAdapter, RequestAdapter};
pub use catalog::{ModelCatalog, ModelDescriptor, parse_parameter_size};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Marker prefixed to every failure rendered into an outcome text, so
/// downstream surfaces can spot trouble without parsing prose.
pub const ERROR_MARKER: &str = "!!ERROR!!";

/// Character budget the answering model is asked to honor. Slightly under
/// Discord's 2000-character message cap to leave room for trimming.
pub const REPLY_CHAR_BUDGET: usize = 1990;

/// Errors that indicate a broken deployment rather than a runtime condition.
/// These surface at connect time; `request` never returns them.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown backend type '{0}' (supported: \"ollama\", \"open-webui\")")]
    UnknownBackend(String),

    #[error("model catalog: {0}")]
    Catalog(String),

    #[error("unrecognized parameter size '{0}' (expected a number with an \"M\" or \"B\" suffix)")]
    BadParameterSize(String),

    #[error("the backend at {0} lists no models")]
    EmptyCatalog(String),
}

/// Connection settings for one backend.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the backend, scheme and host, no trailing path.
    pub base_url: String,
    /// Bearer token, when the backend wants one.
    pub api_key: Option<String>,
    /// Model that runs the routing phase. When unset, the catalog
    /// recommendation takes its place.
    pub model: Option<String>,
    pub backend: Backend,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

/// The routing decision threaded through the two phases. Immutable: each
/// phase produces a new state instead of mutating shared fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestState {
    /// Model slated to answer.
    pub model: String,
    /// Prompt that model will receive.
    pub prompt: String,
    /// The routing phase's justification, empty until it succeeds.
    pub reason: String,
}

/// What one call to [`ModelProvider::request`] produced.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Display-ready answer, or a marker-prefixed failure. Never empty.
    pub text: String,
    /// Wall time of the answering call in seconds, rounded to milliseconds.
    /// `None` when that call never completed with HTTP 200.
    pub elapsed_secs: Option<f64>,
    /// Parsed body of the answering call, when it returned valid JSON.
    pub raw: Option<Value>,
    /// The routing decision that produced this answer.
    pub state: RequestState,
}

/// Anything that can turn a prompt into a reply string. The rule engine
/// talks to the provider through this seam so tests can stub it out.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn ask(&self, prompt: &str) -> String;
}

/// The routing phase's answer contract: one JSON object, these keys.
#[derive(Debug, Deserialize)]
struct ModelChoice {
    model: String,
    prompt: String,
    reason: String,
}

/// Raw result of one HTTP exchange, before classification.
struct CallResult {
    elapsed: f64,
    status: StatusCode,
    body: String,
}

/// Client for one configured backend, holding the catalog snapshot fetched
/// at connect time.
pub struct ModelProvider {
    config: ProviderConfig,
    adapter: &'static dyn RequestAdapter,
    http: reqwest::Client,
    catalog: ModelCatalog,
    recommended: String,
}

impl std::fmt::Debug for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelProvider")
            .field("base_url", &self.config.base_url)
            .field("backend", &self.config.backend)
            .field("model", &self.config.model)
            .field("api_key", &self.config.api_key.as_deref().map(|_| "[REDACTED]"))
            .field("recommended", &self.recommended)
            .finish_non_exhaustive()
    }
}

impl ModelProvider {
    /// Connect to the backend: build the HTTP client, fetch the catalog, and
    /// compute the size-based recommendation. Configuration and catalog
    /// problems fail here, not at request time.
    pub async fn connect(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");

        let catalog = catalog::fetch(&http, &config.base_url, config.api_key.as_deref()).await?;
        let Some(recommended) = catalog.recommend().map(|d| d.id.clone()) else {
            return Err(ProviderError::EmptyCatalog(config.base_url.clone()));
        };

        info!(
            "connected to {} ({} backend, {} models, recommending '{}')",
            config.base_url,
            config.backend,
            catalog.len(),
            recommended
        );
        Ok(Self {
            adapter: config.backend.adapter(),
            config,
            http,
            catalog,
            recommended,
        })
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// The catalog's size-based recommendation, fixed at connect time.
    pub fn recommended_model(&self) -> &str {
        &self.recommended
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// One full two-phase exchange with default generation options.
    pub async fn request(&self, user_prompt: &str) -> RequestOutcome {
        self.request_with_options(user_prompt, &GenOptions::new())
            .await
    }

    /// One full two-phase exchange. This never fails: every failure mode is
    /// rendered into [`RequestOutcome::text`].
    pub async fn request_with_options(
        &self,
        user_prompt: &str,
        options: &GenOptions,
    ) -> RequestOutcome {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.adapter.chat_endpoint()
        );

        let initial = self.initial_state(user_prompt);
        debug!("routing phase: asking '{}' to pick a model", initial.model);
        let payload = self
            .adapter
            .package(&initial.model, &initial.prompt, options);
        let state = match self.call(&url, &payload).await {
            Ok(result) if result.status.is_success() => {
                let reply = serde_json::from_str::<Value>(&result.body)
                    .ok()
                    .and_then(|body| self.adapter.unpackage(&body));
                apply_selection(initial, reply.as_deref())
            }
            Ok(result) => {
                warn!(
                    "routing phase answered HTTP {}; keeping '{}'",
                    result.status, initial.model
                );
                initial
            }
            Err(rendered) => {
                warn!("routing phase failed: {rendered}");
                initial
            }
        };

        debug!("answer phase: asking '{}'", state.model);
        let payload = self.adapter.package(&state.model, &state.prompt, options);
        let call = self.call(&url, &payload).await;
        self.classify(state, call)
    }

    /// The state phase one starts from: the configured model (or the
    /// recommendation) running the routing prompt.
    fn initial_state(&self, user_prompt: &str) -> RequestState {
        RequestState {
            model: self
                .config
                .model
                .clone()
                .unwrap_or_else(|| self.recommended.clone()),
            prompt: selection_prompt(&self.catalog.names(), &self.recommended, user_prompt),
            reason: String::new(),
        }
    }

    /// One POST to the backend. `Err` carries a display-ready transport
    /// failure; HTTP status classification is the caller's job.
    async fn call(&self, url: &str, payload: &Value) -> Result<CallResult, String> {
        let started = Instant::now();
        let mut request = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Err(format!(
                    "{ERROR_MARKER} Request to {} failed: {e}. Check SERVER_URL and that the backend is up.",
                    self.config.base_url
                ));
            }
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Err(format!(
                    "{ERROR_MARKER} Reading the response from {} failed: {e}",
                    self.config.base_url
                ));
            }
        };
        Ok(CallResult {
            elapsed: started.elapsed().as_secs_f64(),
            status,
            body,
        })
    }

    /// Fold the answering call into the one outcome every request produces.
    fn classify(&self, state: RequestState, call: Result<CallResult, String>) -> RequestOutcome {
        match call {
            Err(rendered) => RequestOutcome {
                text: rendered,
                elapsed_secs: None,
                raw: None,
                state,
            },
            Ok(result) if result.status == StatusCode::UNAUTHORIZED => RequestOutcome {
                text: format!(
                    "{ERROR_MARKER} Authentication issue. {} rejected the request; check SERVER_API_KEY.",
                    self.config.base_url
                ),
                elapsed_secs: None,
                raw: None,
                state,
            },
            Ok(result) if result.status == StatusCode::OK => {
                let elapsed = Some(round_millis(result.elapsed));
                match serde_json::from_str::<Value>(&result.body) {
                    Ok(body) => match self.adapter.unpackage(&body) {
                        Some(text) if !text.is_empty() => RequestOutcome {
                            text,
                            elapsed_secs: elapsed,
                            raw: Some(body),
                            state,
                        },
                        _ => RequestOutcome {
                            text: format!("{ERROR_MARKER} The backend answered without any text."),
                            elapsed_secs: elapsed,
                            raw: Some(body),
                            state,
                        },
                    },
                    Err(e) => RequestOutcome {
                        text: format!("{ERROR_MARKER} The backend's answer was not JSON: {e}"),
                        elapsed_secs: elapsed,
                        raw: None,
                        state,
                    },
                }
            }
            Ok(result) if is_model_not_found(&result.body) => {
                let mut text = format!(
                    "{ERROR_MARKER} Model '{}' was not found at {}.",
                    state.model, self.config.base_url
                );
                if !state.reason.is_empty() {
                    text.push_str(&format!("\nIt was picked because: {}", state.reason));
                }
                text.push_str("\nIt may not be installed or loaded; try another model.");
                RequestOutcome {
                    text,
                    elapsed_secs: None,
                    raw: None,
                    state,
                }
            }
            Ok(result) => RequestOutcome {
                text: format!(
                    "{ERROR_MARKER} The backend answered HTTP {}: {}",
                    result.status, result.body
                ),
                elapsed_secs: None,
                raw: None,
                state,
            },
        }
    }
}

#[async_trait]
impl ModelClient for ModelProvider {
    async fn ask(&self, prompt: &str) -> String {
        let outcome = self.request(prompt).await;
        if let Some(elapsed) = outcome.elapsed_secs {
            debug!("'{}' answered in {elapsed}s", outcome.state.model);
        }
        outcome.text
    }
}

/// The routing prompt: catalog listing, the user's message, and a strict
/// JSON answer contract.
fn selection_prompt(names: &[&str], recommended: &str, user_prompt: &str) -> String {
    format!(
        "You are the routing stage of a Discord bot. Pick the model best suited to answer \
         the user's message, write the prompt that model will receive, and explain the pick. \
         Choose only from these models: {}. By parameter count, {recommended} is the default \
         candidate; prefer another when the message clearly calls for it.\n\
         User message:\n{user_prompt}\n\
         Answer with exactly one JSON object and nothing else (no prose, no code fences). \
         Use the keys \"model\", \"prompt\", and \"reason\". The crafted prompt must tell \
         the model to keep its reply under {} characters. Example: \
         {{\"model\": \"llama3:latest\", \"prompt\": \"In under {} characters, explain...\", \
         \"reason\": \"general question, largest model\"}}",
        names.join(", "),
        REPLY_CHAR_BUDGET,
        REPLY_CHAR_BUDGET
    )
}

/// Hard limit restated on the crafted prompt, since routing models routinely
/// forget to pass the instruction along.
fn reply_limit_reminder() -> String {
    format!("Strong reminder: keep the full reply under {REPLY_CHAR_BUDGET} characters.")
}

/// Apply a routing-phase reply to the threaded state. A valid routing object
/// moves the state to the chosen model and crafted prompt; anything else
/// passes the state through unchanged.
fn apply_selection(state: RequestState, reply: Option<&str>) -> RequestState {
    let Some(text) = reply else {
        warn!("routing phase returned no text; keeping '{}'", state.model);
        return state;
    };
    match serde_json::from_str::<ModelChoice>(strip_code_fences(text)) {
        Ok(choice) => {
            debug!("routed to '{}': {}", choice.model, choice.reason);
            RequestState {
                model: choice.model,
                prompt: format!("{}\n{}", choice.prompt, reply_limit_reminder()),
                reason: choice.reason,
            }
        }
        Err(e) => {
            warn!(
                "routing reply is not a routing object ({e}); keeping '{}'",
                state.model
            );
            state
        }
    }
}

/// Trim the markdown code fences some models wrap around JSON answers,
/// despite being told not to.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed);
    trimmed.trim()
}

/// Backends report a missing model as a JSON body with a `detail` field.
fn is_model_not_found(body: &str) -> bool {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str().map(String::from)))
        .is_some_and(|detail| detail.eq_ignore_ascii_case("model not found"))
}

fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}
