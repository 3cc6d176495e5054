//! Tavily-backed web search tool
//!
//! Provider implementation behind the registry's `web_search` schema. The
//! API key is pulled from the call context (`tavily_api_key` credential) at
//! execution time, never stored on the tool. All failures come back as
//! structured `{"error", "message"}` objects so the model can observe and
//! react to them.

use super::{default_web_search_schema, ToolContext, ToolProvider};
use crate::rate_limit::SlidingWindowLimiter;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Web search via the Tavily REST API.
pub struct WebSearchTool {
    client: reqwest::Client,
    limiter: Arc<SlidingWindowLimiter>,
}

impl WebSearchTool {
    pub fn new() -> Self {
        let timeout_s = std::env::var("WEB_SEARCH_TIMEOUT_S")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(12u64);
        Self::with_limiter(
            timeout_s,
            Arc::new(SlidingWindowLimiter::new(4, Duration::from_secs(1))),
        )
    }

    pub fn with_limiter(timeout_s: u64, limiter: Arc<SlidingWindowLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_s))
            .build()
            .unwrap_or_default();
        Self { client, limiter }
    }

    async fn search(&self, query: &str, arguments: &Value, api_key: &str) -> Value {
        let k = arguments
            .get("k")
            .and_then(Value::as_i64)
            .unwrap_or(5)
            .clamp(1, 10);
        let time_range = arguments
            .get("time_range")
            .and_then(Value::as_str)
            .unwrap_or("month");
        let topic = arguments
            .get("topic")
            .and_then(Value::as_str)
            .unwrap_or("general");

        let payload = json!({
            "query": query,
            "max_results": k,
            "search_depth": "basic",
            "time_range": time_range,
            "topic": topic,
            "include_answer": false,
            "include_raw_content": false,
            "include_images": false,
        });

        self.limiter.acquire().await;
        debug!(%query, k, "web_search: querying tavily");

        let response = match self
            .client
            .post(TAVILY_ENDPOINT)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return json!({"error": "provider_error", "message": e.to_string()}),
        };
        if !response.status().is_success() {
            return json!({
                "error": "provider_error",
                "message": format!("tavily returned {}", response.status()),
            });
        }
        let data: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return json!({"error": "provider_error", "message": e.to_string()}),
        };

        let items: Vec<Value> = data
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .take(k as usize)
                    .map(|it| {
                        json!({
                            "title": it.get("title").and_then(Value::as_str).unwrap_or(""),
                            "url": it
                                .get("url")
                                .or_else(|| it.get("link"))
                                .and_then(Value::as_str)
                                .unwrap_or(""),
                            "snippet": it
                                .get("content")
                                .or_else(|| it.get("snippet"))
                                .and_then(Value::as_str)
                                .unwrap_or(""),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        json!({"results": items, "used_provider": "tavily"})
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolProvider for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn schema(&self) -> Value {
        default_web_search_schema()
    }

    async fn execute(&self, arguments: Value, context: ToolContext) -> Value {
        let Some(api_key) = context.credential("tavily_api_key") else {
            return json!({
                "error": "missing_api_key",
                "message": "tavily_api_key credential not available",
            });
        };

        let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");
        if query.trim().is_empty() {
            return json!({
                "error": "invalid_arguments",
                "message": "'query' is required and must be a string",
            });
        }

        self.search(query, &arguments, &api_key).await
    }
}
