//! Client configuration

use crate::{ClientError, Result};
use std::time::Duration;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// API endpoint URL
    pub endpoint: String,
    /// Ingest endpoint URL for chunk uploads
    pub ingest_endpoint: String,
    /// API key (bearer token)
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Simultaneous requests in one propagation fan-out
    pub max_concurrency: usize,
    /// Simultaneous chunk uploads per file
    pub chunk_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            ingest_endpoint: "http://localhost:8080".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            user_agent: format!("stratus-client/{}", env!("CARGO_PKG_VERSION")),
            max_concurrency: 10,
            chunk_concurrency: 4,
        }
    }
}

impl Config {
    /// Create a new config with the given endpoint, also used for ingest
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            ingest_endpoint: endpoint.clone(),
            endpoint,
            ..Default::default()
        }
    }

    /// Load from `STRATUS_*` environment variables (and a `.env` file if present)
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let mut config = match std::env::var("STRATUS_ENDPOINT") {
            Ok(endpoint) => Self::new(endpoint),
            Err(_) => Self::default(),
        };
        if let Ok(ingest) = std::env::var("STRATUS_INGEST_ENDPOINT") {
            config.ingest_endpoint = ingest;
        }
        if let Ok(key) = std::env::var("STRATUS_API_KEY") {
            config.api_key = Some(key);
        }
        if let Some(secs) = env_number("STRATUS_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs as u64);
        }
        if let Some(n) = env_number("STRATUS_MAX_CONCURRENCY")? {
            config.max_concurrency = n;
        }
        if let Some(n) = env_number("STRATUS_CHUNK_CONCURRENCY")? {
            config.chunk_concurrency = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the ingest endpoint
    pub fn with_ingest_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.ingest_endpoint = endpoint.into();
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the propagation fan-out limit
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Set the per-file chunk upload limit
    pub fn with_chunk_concurrency(mut self, limit: usize) -> Self {
        self.chunk_concurrency = limit;
        self
    }

    /// Reject limits that would stall every fan-out
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(ClientError::Config("max_concurrency must be at least 1".into()));
        }
        if self.chunk_concurrency == 0 {
            return Err(ClientError::Config("chunk_concurrency must be at least 1".into()));
        }
        Ok(())
    }

    /// Build the base URL for API requests
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    /// Build the base URL for chunk uploads
    pub fn ingest_url(&self) -> &str {
        self.ingest_endpoint.trim_end_matches('/')
    }
}

fn env_number(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ClientError::Config(format!("{} is not a number: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_concurrency, 10);
        assert!(config.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = Config::new("https://api.example.com/")
            .with_api_key("secret")
            .with_ingest_endpoint("https://ingest.example.com")
            .with_max_concurrency(3);

        assert_eq!(config.base_url(), "https://api.example.com");
        assert_eq!(config.ingest_url(), "https://ingest.example.com");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.max_concurrency, 3);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = Config::default().with_chunk_concurrency(0);
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }
}
