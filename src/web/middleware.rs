//! HTTP middleware

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::{responses::handle_error, AppState};
use crate::errors::AppError;

/// Bearer-token guard for administrative routes.
///
/// Open when no `web.admin_token` is configured.
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state
        .config
        .web
        .admin_token
        .as_deref()
        .filter(|token| !token.is_empty())
    else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    if provided == Some(expected) {
        next.run(request).await
    } else {
        warn!(
            method = %request.method(),
            uri = %request.uri(),
            "Rejected administrative request"
        );
        handle_error(AppError::permission_denied(
            request.method().as_str(),
            request.uri().path(),
        ))
    }
}
