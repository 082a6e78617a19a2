use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, TextEncoder, register_counter, register_gauge,
    register_histogram,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("proxy_requests_total", "Total number of proxied requests").unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter = register_counter!(
        "proxy_rate_limited_total",
        "Requests rejected by the rate limiter"
    )
    .unwrap();
    pub static ref UPSTREAM_ERRORS: Counter = register_counter!(
        "proxy_upstream_errors_total",
        "Upstream calls that failed or timed out"
    )
    .unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "proxy_upstream_latency_seconds",
        "Upstream call latency in seconds"
    )
    .unwrap();
    pub static ref RATE_LIMIT_ENTRIES: Gauge = register_gauge!(
        "proxy_rate_limit_entries",
        "Rate limit windows held in memory after the last sweep"
    )
    .unwrap();
}

// Render the default registry in the Prometheus text format
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metrics() {
        REQUEST_TOTAL.inc();
        RATE_LIMIT_ENTRIES.set(3.0);

        let text = render().unwrap();
        assert!(text.contains("proxy_requests_total"));
        assert!(text.contains("proxy_rate_limit_entries"));
    }
}
