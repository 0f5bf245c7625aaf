//! Media server publish hooks
//!
//! nginx-rtmp style callbacks: any 2xx lets the publish proceed, anything
//! else rejects it. Both GET (query) and POST (form) variants are accepted.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use tracing::error;

use crate::services::PublishDecision;
use crate::web::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PublishParams {
    #[serde(default)]
    pub app: String,
    /// Stream key as sent by the broadcaster
    #[serde(default)]
    pub name: String,
}

pub async fn publish(
    State(state): State<AppState>,
    Query(params): Query<PublishParams>,
) -> Response {
    authorize(&state, params).await
}

pub async fn publish_form(
    State(state): State<AppState>,
    Form(params): Form<PublishParams>,
) -> Response {
    authorize(&state, params).await
}

async fn authorize(state: &AppState, params: PublishParams) -> Response {
    match state
        .gatekeeper
        .authorize_publish(&params.app, &params.name)
        .await
    {
        Ok(PublishDecision::Allow { .. }) => (StatusCode::OK, "OK").into_response(),
        Ok(PublishDecision::Deny(reason)) => (StatusCode::FORBIDDEN, reason.as_str()).into_response(),
        Err(e) => {
            // Broadcasters only ever see a terse reason
            error!("Publish authorization failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// Malformed parameters still get a 200; teardown must never fail
pub async fn publish_done(
    State(state): State<AppState>,
    params: Option<Query<PublishParams>>,
) -> Response {
    let params = params.map(|Query(p)| p).unwrap_or_default();
    state.gatekeeper.notify_publish_done(&params.name).await;
    (StatusCode::OK, "OK").into_response()
}

pub async fn publish_done_form(
    State(state): State<AppState>,
    params: Option<Form<PublishParams>>,
) -> Response {
    let params = params.map(|Form(p)| p).unwrap_or_default();
    state.gatekeeper.notify_publish_done(&params.name).await;
    (StatusCode::OK, "OK").into_response()
}
