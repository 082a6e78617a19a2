//! Rate limiting middleware and client identity extraction.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{ProxyError, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING};
use crate::metrics::RATE_LIMITED_TOTAL;
use crate::state::AppState;

/// Identity shared by every caller whose address cannot be determined.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Picks the rate limit identity for a request.
///
/// `X-Forwarded-For` is only honored when the proxy sits behind a trusted
/// reverse proxy; otherwise any client could pick its own quota bucket.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy
        && let Some(ip) = forwarded_ip(headers)
    {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;
    xff.split(',').next()?.trim().parse().ok()
}

/// Rejects with 429 once the caller's window is used up; otherwise tags
/// the response with the remaining quota.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let identity = client_identity(req.headers(), peer, state.trust_proxy_headers);

    let limiter = &state.rate_limiter;
    let decision = limiter.check(&identity);

    if !decision.allowed {
        RATE_LIMITED_TOTAL.inc();
        tracing::debug!(%identity, retry_after = decision.retry_after, "rate limit exceeded");
        return Err(ProxyError::TooManyRequests {
            retry_after: decision.retry_after,
            limit: limiter.limit(),
        });
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limiter.limit()));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    Ok(response)
}
