//! Configuration management

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::Target;
use crate::tools::PageLimits;

/// How the server talks to its MCP client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC over stdin/stdout
    #[default]
    Stdio,
    /// HTTP with server-sent events
    Sse,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Initial Blaze base URL (default: http://localhost:8080/fhir)
    pub blaze_base_url: String,
    /// Backend request timeout in seconds (default: 30)
    pub blaze_timeout: f64,
    /// Allow compaction and re-indexing (default: true)
    pub admin_tools_enabled: bool,
    /// Page size used when a search gives none (default: 20)
    pub default_page_size: u32,
    /// Upper bound for every page size argument (default: 100)
    pub max_page_size: u32,
    /// Transport mode (default: stdio)
    pub transport: TransportMode,
    /// Bind host for the SSE transport (default: 0.0.0.0)
    pub host: String,
    /// Bind port for the SSE transport (default: 8000)
    pub port: u16,
    /// Log filter (default: info)
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            blaze_base_url: "http://localhost:8080/fhir".to_string(),
            blaze_timeout: 30.0,
            admin_tools_enabled: true,
            default_page_size: 20,
            max_page_size: 100,
            transport: TransportMode::Stdio,
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Check the settings before anything is started
    pub fn validate(&self) -> Result<()> {
        if !self.blaze_timeout.is_finite() || self.blaze_timeout <= 0.0 {
            bail!("blaze timeout must be a positive number of seconds, got {}", self.blaze_timeout);
        }
        if self.default_page_size == 0 {
            bail!("default page size must be at least 1");
        }
        if self.default_page_size > self.max_page_size {
            bail!(
                "default page size {} exceeds max page size {}",
                self.default_page_size,
                self.max_page_size
            );
        }
        self.initial_target()?;
        Ok(())
    }

    /// Backend timeout; fails for values a `Duration` cannot hold
    pub fn timeout(&self) -> Result<Duration> {
        match Duration::try_from_secs_f64(self.blaze_timeout) {
            Ok(timeout) => Ok(timeout),
            Err(e) => bail!("blaze timeout {} seconds is out of range: {e}", self.blaze_timeout),
        }
    }

    /// The target the session starts with
    pub fn initial_target(&self) -> Result<Target> {
        Target::new(&self.blaze_base_url, self.timeout()?)
            .map_err(|e| anyhow::anyhow!("invalid blaze base URL: {e}"))
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(config.page_limits(), PageLimits::default());
    }

    #[rstest]
    #[case(ServerConfig { blaze_timeout: 0.0, ..Default::default() })]
    #[case(ServerConfig { blaze_timeout: f64::NAN, ..Default::default() })]
    #[case(ServerConfig { blaze_timeout: 1e20, ..Default::default() })]
    #[case(ServerConfig { blaze_timeout: f64::MAX, ..Default::default() })]
    #[case(ServerConfig { default_page_size: 0, ..Default::default() })]
    #[case(ServerConfig { default_page_size: 200, max_page_size: 100, ..Default::default() })]
    #[case(ServerConfig { blaze_base_url: "localhost:8080".to_string(), ..Default::default() })]
    fn test_invalid_configs(#[case] config: ServerConfig) {
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_timeout_is_a_diagnostic() {
        let config = ServerConfig {
            blaze_timeout: 1e20,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"blaze_base_url": "https://blaze.example.org/fhir", "transport": "sse"}"#).unwrap();
        assert_eq!(config.transport, TransportMode::Sse);
        assert_eq!(config.max_page_size, 100);
        assert!(config.admin_tools_enabled);
    }
}
