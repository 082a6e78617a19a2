use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;

use crate::error::ProxyError;
use crate::metrics::REQUEST_TOTAL;
use crate::models::{GenerateRequest, GenerateResponse};
use crate::state::AppState;

// Rate limiting already happened in the middleware layer
pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ProxyError> {
    REQUEST_TOTAL.inc();

    let Json(payload) = payload?;
    let request = payload.validate(state.max_prompt_chars, &state.default_model)?;

    tracing::debug!(model = %request.model, prompt_chars = request.prompt.chars().count(), "forwarding request");

    state.upstream.generate(&request).await.map(Json)
}
