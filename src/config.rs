use std::fmt;
use std::time::Duration;

use clap::Parser;

use crate::rate_limit::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Clone)]
#[command(name = "api-key-proxy", version)]
#[command(about = "Rate-limited proxy that keeps the upstream AI API key on the server")]
pub struct Config {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0", env = "PROXY_HOST")]
    pub host: String,

    /// Port to run the server on.
    #[arg(short, long, default_value_t = 8080, env = "PROXY_PORT")]
    pub port: u16,

    /// Base URL of the upstream AI API.
    #[arg(short, long, default_value = "http://localhost:11434", env = "UPSTREAM_URL")]
    pub upstream_url: String,

    /// API key sent upstream as a bearer token. Never returned to clients.
    #[arg(long, env = "UPSTREAM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model used when the client does not name one.
    #[arg(long, default_value = "llama3", env = "UPSTREAM_MODEL")]
    pub default_model: String,

    /// Upstream request timeout in seconds.
    #[arg(long, default_value_t = 30, env = "UPSTREAM_TIMEOUT")]
    pub upstream_timeout: u64,

    /// Rate limit max requests per window.
    #[arg(long, default_value_t = DEFAULT_MAX_REQUESTS, env = "RATE_LIMIT")]
    pub rate_limit: u32,

    /// Rate limit window in seconds.
    #[arg(long, default_value_t = DEFAULT_WINDOW.as_secs(), env = "RATE_WINDOW")]
    pub rate_window: u64,

    /// Longest prompt accepted, in characters.
    #[arg(long, default_value_t = 4000, env = "MAX_PROMPT_CHARS")]
    pub max_prompt_chars: usize,

    /// CORS allowed origins (comma-separated). Empty for no CORS, "*" for any.
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Take the client identity from X-Forwarded-For (only behind a trusted proxy).
    #[arg(long, env = "TRUST_PROXY_HEADERS")]
    pub trust_proxy_headers: bool,

    /// Log level.
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[arg(long, default_value = "text", env = "LOG_FORMAT")]
    pub log_format: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("rate limit must be at least 1 request per window")]
    ZeroRateLimit,
    #[error("rate window must be at least 1 second")]
    ZeroRateWindow,
    #[error("upstream timeout must be at least 1 second")]
    ZeroTimeout,
    #[error("upstream url must start with http:// or https://, got {0:?}")]
    UpstreamUrl(String),
    #[error("unknown log format {0:?}, expected \"text\" or \"json\"")]
    LogFormat(String),
}

impl Config {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit == 0 {
            return Err(ConfigError::ZeroRateLimit);
        }
        if self.rate_window == 0 {
            return Err(ConfigError::ZeroRateWindow);
        }
        if self.upstream_timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if !(self.upstream_url.starts_with("http://") || self.upstream_url.starts_with("https://"))
        {
            return Err(ConfigError::UpstreamUrl(self.upstream_url.clone()));
        }
        if self.log_format != "text" && self.log_format != "json" {
            return Err(ConfigError::LogFormat(self.log_format.clone()));
        }
        Ok(())
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }
}

// Hand-written so the key never ends up in logs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("upstream_url", &self.upstream_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("default_model", &self.default_model)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("rate_limit", &self.rate_limit)
            .field("rate_window", &self.rate_window)
            .field("max_prompt_chars", &self.max_prompt_chars)
            .field("cors_origins", &self.cors_origins)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .finish()
    }
}
