//! Configuration for the Ollama client.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default backend host when neither inputs, params, nor the environment
/// provide one.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Resolve the backend host from the `OLLAMA_HOST` environment variable,
/// falling back to the local default.
pub fn env_host() -> String {
    std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string())
}

/// Configuration for an [`OllamaClient`](crate::ollama::OllamaClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the Ollama server, e.g. `http://localhost:11434`.
    pub host: String,

    /// Request timeout for chat calls.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    // Chat completions on local hardware can take minutes.
    Duration::from_secs(600)
}

impl OllamaConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            timeout: default_timeout(),
        }
    }

    /// Configuration using `OLLAMA_HOST` or the local default.
    pub fn from_env() -> Self {
        Self::new(env_host())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_stored_verbatim() {
        let config = OllamaConfig::new("http://10.0.0.2:11434");
        assert_eq!(config.host, "http://10.0.0.2:11434");
        assert_eq!(config.timeout, default_timeout());
    }

    #[test]
    fn timeout_is_overridable() {
        let config = OllamaConfig::new("h").with_timeout(Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
