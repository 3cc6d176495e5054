//! Ollama client implementation.
//!
//! Thin typed wrapper over the Ollama HTTP API surface the chat node needs:
//!
//! - `POST /api/chat` — non-streaming chat completion with tools, format,
//!   options, keep_alive, and think
//! - `POST /api/show` — model metadata, used to discover the maximum
//!   context window
//! - `GET /api/tags` — installed model names
//!
//! Messages and tool specs cross this boundary as raw `serde_json::Value`s:
//! graph slots carry arbitrary message fields (images, thinking, tool
//! metadata) that must round-trip untouched.

use crate::config::OllamaConfig;
use crate::error::{LlmError, Result};
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<Value>,
    pub think: bool,
}

impl ChatPayload {
    pub fn new(model: impl Into<String>, messages: Vec<Value>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            stream: false,
            format: None,
            options: None,
            keep_alive: None,
            think: false,
        }
    }
}

/// Response body of `POST /api/chat` (non-streaming).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    /// Assistant message; kept raw to preserve thinking/tool_calls fields.
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
}

impl ChatResponse {
    /// Generation counters present on this response, keyed by metric name.
    pub fn metrics(&self) -> Map<String, Value> {
        let mut metrics = Map::new();
        let pairs = [
            ("total_duration", self.total_duration),
            ("load_duration", self.load_duration),
            ("prompt_eval_count", self.prompt_eval_count),
            ("prompt_eval_duration", self.prompt_eval_duration),
            ("eval_count", self.eval_count),
            ("eval_duration", self.eval_duration),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                metrics.insert(key.to_string(), Value::from(value));
            }
        }
        metrics
    }
}

/// Response body of `POST /api/show`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelShow {
    #[serde(default)]
    pub model_info: Map<String, Value>,
    #[serde(default)]
    pub parameters: String,
}

impl ModelShow {
    /// Maximum context window advertised by this model, if any.
    ///
    /// Scans `model_info` for integer `*context_length*` entries and the
    /// `parameters` text for `num_ctx N` lines; the maximum wins.
    pub fn max_context(&self) -> Option<u64> {
        let mut candidates: Vec<u64> = self
            .model_info
            .iter()
            .filter(|(key, _)| key.contains("context_length"))
            .filter_map(|(_, value)| value.as_u64())
            .collect();

        for line in self.parameters.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("num_ctx") {
                if let Ok(n) = rest.trim().parse::<u64>() {
                    candidates.push(n);
                }
            }
        }

        candidates.into_iter().filter(|&n| n > 0).max()
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Client for one Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    config: OllamaConfig,
    client: Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, payload: &ChatPayload) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.config.host);
        let response = self.client.post(&url).json(payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!(
                "Ollama API error {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    /// Model metadata for the context-window probe.
    pub async fn show(&self, model: &str) -> Result<ModelShow> {
        let url = format!("{}/api/show", self.config.host);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({"model": model, "verbose": true}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LlmError::Provider(format!(
                "Ollama API error {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    /// Names of the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.config.host);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(LlmError::Provider(
                "Failed to fetch models from Ollama".to_string(),
            ));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

fn context_cache() -> &'static DashMap<String, u64> {
    static CACHE: OnceLock<DashMap<String, u64>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Resolve the maximum context window for `(host, model)`.
///
/// Uses a dedicated short-timeout client so an absent backend never stalls
/// graph execution, and caches the answer per `(host, model)` pair.
pub async fn resolve_max_context(host: &str, model: &str) -> Option<u64> {
    if host.is_empty() || model.is_empty() {
        return None;
    }
    let cache_key = format!("{host}::{model}");
    if let Some(cached) = context_cache().get(&cache_key) {
        return Some(*cached);
    }

    let client = OllamaClient::new(
        OllamaConfig::new(host).with_timeout(Duration::from_secs(1)),
    );
    match client.show(model).await {
        Ok(show) => {
            let max_ctx = show.max_context()?;
            context_cache().insert(cache_key, max_ctx);
            Some(max_ctx)
        }
        Err(e) => {
            warn!(%model, "failed to resolve context window: {e}");
            None
        }
    }
}

/// Clamp `options.num_ctx` to the model's maximum context window.
///
/// If the user did not set `num_ctx`, it is set to the maximum; otherwise it
/// is clamped to `min(user, max)`. Without a resolvable maximum the options
/// pass through untouched.
pub async fn apply_context_window(
    host: &str,
    model: &str,
    mut options: Map<String, Value>,
) -> Map<String, Value> {
    let Some(max_ctx) = resolve_max_context(host, model).await else {
        return options;
    };

    let user_ctx = options.get("num_ctx").and_then(Value::as_u64);
    let effective = match user_ctx {
        Some(user) if user > 0 => user.min(max_ctx),
        _ => max_ctx,
    };
    debug!(%model, max_ctx, effective, "applying context window clamp");
    options.insert("num_ctx".to_string(), Value::from(effective));
    options
}
