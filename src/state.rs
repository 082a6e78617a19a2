use std::sync::Arc;

use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::upstream::UpstreamClient;

// app's shared state

pub struct AppState {
    pub upstream: UpstreamClient,
    pub rate_limiter: Arc<RateLimiter>,
    pub max_prompt_chars: usize,
    pub default_model: String,
    pub trust_proxy_headers: bool,
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("api-key-proxy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let upstream = UpstreamClient::new(
            client,
            &config.upstream_url,
            config.api_key.clone(),
            config.upstream_timeout(),
        );
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit, config.rate_window()));

        Ok(Self {
            upstream,
            rate_limiter,
            max_prompt_chars: config.max_prompt_chars,
            default_model: config.default_model.clone(),
            trust_proxy_headers: config.trust_proxy_headers,
            cors_origins: config.cors_origins.clone(),
        })
    }
}
