use std::time::{Duration, Instant};

use reqwest::header::AUTHORIZATION;

use crate::error::ProxyError;
use crate::metrics::{UPSTREAM_ERRORS, UPSTREAM_LATENCY};
use crate::models::{GenerateResponse, UpstreamRequest};

/// Client for the upstream AI API. Holds the only copy of the API key.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            // an empty key is as good as none
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forwards one validated request and normalizes every failure.
    pub async fn generate(&self, request: &UpstreamRequest) -> Result<GenerateResponse, ProxyError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProxyError::NotConfigured);
        };

        let start = Instant::now();
        let result = self.send(api_key, request).await;
        UPSTREAM_LATENCY.observe(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            UPSTREAM_ERRORS.inc();
            tracing::warn!(error = %e, model = %request.model, "upstream call failed");
        }
        result
    }

    async fn send(
        &self,
        api_key: &str,
        request: &UpstreamRequest,
    ) -> Result<GenerateResponse, ProxyError> {
        let res = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = res.status();
        if !status.is_success() {
            // body may echo request details, keep it out of the client response
            let body = res.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body = %truncate(&body, 512), "upstream error body");
            return Err(ProxyError::UpstreamStatus(status.as_u16()));
        }

        res.json::<GenerateResponse>().await.map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::UpstreamTimeout
    } else if e.is_decode() {
        ProxyError::Upstream(format!("parse error: {e}"))
    } else {
        ProxyError::Upstream(e.without_url().to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
