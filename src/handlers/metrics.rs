use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

use crate::error::ProxyError;

pub async fn metrics_handler() -> Result<impl IntoResponse, ProxyError> {
    let body = crate::metrics::render().map_err(ProxyError::Internal)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
