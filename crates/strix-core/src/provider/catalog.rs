//! Model catalog — fetching, normalization, and recommendation
//!
//! Backends publish their installed models in two shapes: the Ollama daemon
//! returns `{"models": [{"model": ...}]}` from `/api/tags`, hosted gateways
//! return `{"data": [{"id": ...}]}` from `/api/models`. Both are folded into
//! one [`ModelCatalog`] of [`ModelDescriptor`]s, and a greedy pass over
//! declared parameter counts picks the default recommendation.

use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::ProviderError;

/// Gateway domains that publish their catalog at `/api/models` instead of
/// the Ollama daemon's `/api/tags`.
const HOSTED_GATEWAY_DOMAINS: &[&str] = &["fau.edu"];

/// One entry from the backend's model listing.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    /// Identifier the backend expects in request payloads.
    pub id: String,
    /// Declared parameter count, normalized to millions. `None` when the
    /// entry does not declare one.
    pub parameter_millions: Option<f64>,
    /// The untouched catalog record, kept for operators and diagnostics.
    pub raw: Value,
}

/// The backend's normalized model listing.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    /// Normalize a raw listing response. Accepts both known shapes; anything
    /// else is a catalog error.
    pub fn from_response(body: &Value) -> Result<Self, ProviderError> {
        let entries = body
            .get("data")
            .or_else(|| body.get("models"))
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ProviderError::Catalog(
                    "listing response carries neither a 'data' nor a 'models' array".to_string(),
                )
            })?;

        let mut models = Vec::with_capacity(entries.len());
        for entry in entries {
            match descriptor_from_entry(entry)? {
                Some(descriptor) => models.push(descriptor),
                None => warn!("skipping catalog entry without a model identifier: {entry}"),
            }
        }

        let sizeless = models
            .iter()
            .filter(|d| d.parameter_millions.is_none())
            .count();
        if sizeless > 0 {
            warn!(
                "{sizeless} of {} catalog entries declare no parameter size and will score 0 in recommendation",
                models.len()
            );
        }
        Ok(Self { models })
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    /// Identifiers in listing order.
    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|d| d.id == id)
    }

    /// Greedy size-based recommendation: a strictly larger parameter count
    /// wins, ties keep the earliest entry, entries without a declared size
    /// score 0.
    pub fn recommend(&self) -> Option<&ModelDescriptor> {
        let mut best: Option<&ModelDescriptor> = None;
        let mut best_score = f64::NEG_INFINITY;
        for descriptor in &self.models {
            let score = descriptor.parameter_millions.unwrap_or(0.0);
            if score > best_score {
                best_score = score;
                best = Some(descriptor);
            }
        }
        if let Some(winner) = best {
            if winner.parameter_millions.is_none() {
                warn!(
                    "recommended model '{}' declares no parameter size; the pick is arbitrary",
                    winner.id
                );
            }
        }
        best
    }
}

/// Relative path of the model listing endpoint for the given base URL.
/// Hosted gateway domains get `/api/models`; everything else, including
/// unparsable URLs, falls back to the daemon's `/api/tags`.
pub fn listing_endpoint(base_url: &str) -> &'static str {
    let hosted = Url::parse(base_url)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.to_ascii_lowercase()))
        .is_some_and(|host| {
            HOSTED_GATEWAY_DOMAINS
                .iter()
                .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
        });
    if hosted { "/api/models" } else { "/api/tags" }
}

/// Fetch and normalize the backend's model listing.
pub async fn fetch(
    http: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
) -> Result<ModelCatalog, ProviderError> {
    let url = format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        listing_endpoint(base_url)
    );
    debug!("fetching model listing from {url}");

    let mut request = http.get(&url).header("Content-Type", "application/json");
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Catalog(format!("request to {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Catalog(format!(
            "{url} answered HTTP {status}: {body}"
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| ProviderError::Catalog(format!("listing response from {url} is not JSON: {e}")))?;
    ModelCatalog::from_response(&body)
}

/// Normalize a declared parameter size to millions. `"830M"` is 830,
/// `"7B"` is 7000. Anything else is a configuration-grade error.
pub fn parse_parameter_size(raw: &str) -> Result<f64, ProviderError> {
    let trimmed = raw.trim();
    let parsed = if let Some(head) = trimmed.strip_suffix('M') {
        head.trim().parse::<f64>().ok()
    } else if let Some(head) = trimmed.strip_suffix('B') {
        head.trim().parse::<f64>().ok().map(|v| v * 1000.0)
    } else {
        None
    };
    parsed.ok_or_else(|| ProviderError::BadParameterSize(raw.to_string()))
}

fn descriptor_from_entry(entry: &Value) -> Result<Option<ModelDescriptor>, ProviderError> {
    let Some(id) = entry
        .get("model")
        .or_else(|| entry.get("id"))
        .and_then(|v| v.as_str())
    else {
        return Ok(None);
    };

    // The daemon nests details directly; hosted gateways nest them under
    // an `ollama` passthrough object.
    let declared_size = entry
        .get("details")
        .or_else(|| entry.get("ollama").and_then(|o| o.get("details")))
        .and_then(|details| details.get("parameter_size"))
        .and_then(|v| v.as_str());

    let parameter_millions = match declared_size {
        Some(size) => Some(parse_parameter_size(size)?),
        None => None,
    };

    Ok(Some(ModelDescriptor {
        id: id.to_string(),
        parameter_millions,
        raw: entry.clone(),
    }))
}
