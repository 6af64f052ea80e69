use crate::core::errors::ConfigError;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Which wire protocol the model endpoint speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// OpenAI-compatible `/chat/completions` with inline images
    OpenAi,
    /// Bespoke `POST /api/analyze` contract
    Custom,
}

impl EndpointMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointMode::OpenAi => "openai",
            EndpointMode::Custom => "custom",
        }
    }
}

impl fmt::Display for EndpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(EndpointMode::OpenAi),
            "custom" => Ok(EndpointMode::Custom),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Model endpoint configuration
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub mode: EndpointMode,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_max_tokens: u32,
    pub custom_base_url: Option<String>,
    /// Per-attempt request deadline
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            mode: EndpointMode::OpenAi,
            openai_base_url: None,
            openai_model: None,
            openai_api_key: None,
            openai_max_tokens: 800,
            custom_base_url: None,
            timeout_ms: 60_000,
            max_retries: 2,
            retry_base_delay_ms: 1_000,
        }
    }
}

/// Batch analysis configuration
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Images analyzed at once within a batch (1 = strictly sequential)
    pub concurrency: usize,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub endpoint: EndpointConfig,
    pub analysis: AnalysisConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key/value source (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::load(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn load<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let log_level = lookup("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let mode = match non_empty("AI_MODE") {
            Some(raw) => raw.parse()?,
            None => EndpointMode::OpenAi,
        };

        let defaults = EndpointConfig::default();

        Ok(Self {
            server: ServerConfig {
                port: lookup("SERVER_PORT")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3001),
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                log_level,
            },
            endpoint: EndpointConfig {
                mode,
                openai_base_url: non_empty("OPENAI_BASE_URL"),
                openai_model: non_empty("OPENAI_MODEL"),
                openai_api_key: non_empty("OPENAI_API_KEY"),
                openai_max_tokens: lookup("OPENAI_MAX_TOKENS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.openai_max_tokens),
                custom_base_url: non_empty("CUSTOM_BASE_URL"),
                timeout_ms: lookup("AI_TIMEOUT_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.timeout_ms),
                max_retries: lookup("AI_MAX_RETRIES")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.max_retries),
                retry_base_delay_ms: lookup("AI_RETRY_BASE_DELAY_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry_base_delay_ms),
            },
            analysis: AnalysisConfig {
                concurrency: lookup("ANALYSIS_CONCURRENCY")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AI_TIMEOUT_MS".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        if self.endpoint.openai_max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "OPENAI_MAX_TOKENS".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        if self.analysis.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ANALYSIS_CONCURRENCY".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn analysis_concurrency(&self) -> usize {
        self.analysis.concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.endpoint.mode, EndpointMode::OpenAi);
        assert_eq!(config.endpoint.timeout_ms, 60_000);
        assert_eq!(config.endpoint.max_retries, 2);
        assert_eq!(config.analysis_concurrency(), 1);
        assert_eq!(config.server_port(), 3001);
        assert_eq!(config.log_level(), Level::INFO);
    }

    #[test]
    fn test_custom_mode_and_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("AI_MODE", " Custom "),
            ("CUSTOM_BASE_URL", "http://gpu-box:8080"),
            ("AI_TIMEOUT_MS", "1500"),
            ("AI_MAX_RETRIES", "4"),
            ("LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint.mode, EndpointMode::Custom);
        assert_eq!(config.endpoint.custom_base_url.as_deref(), Some("http://gpu-box:8080"));
        assert_eq!(config.endpoint.timeout(), Duration::from_millis(1500));
        assert_eq!(config.endpoint.max_retries, 4);
        assert_eq!(config.log_level(), Level::DEBUG);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("AI_MODE", "gemini")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMode(ref m) if m == "gemini"));
    }

    #[test]
    fn test_blank_values_are_treated_as_absent() {
        let config = Config::from_lookup(lookup_from(&[("OPENAI_API_KEY", "   ")])).unwrap();
        assert!(config.endpoint.openai_api_key.is_none());
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let err = Config::from_lookup(lookup_from(&[("ANALYSIS_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
