//! Transcoding profile handlers

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{ProfileCreateRequest, ProfileUpdateRequest};
use crate::web::{
    responses::{created, handle_error, handle_result, no_content},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ProfileListParams {
    #[serde(default)]
    pub defaults: bool,
}

pub async fn list_profiles(
    State(state): State<AppState>,
    Query(params): Query<ProfileListParams>,
) -> Response {
    handle_result(state.profiles.list(params.defaults).await)
}

pub async fn get_profile(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    handle_result(state.profiles.get(id).await)
}

pub async fn create_profile(
    State(state): State<AppState>,
    Json(request): Json<ProfileCreateRequest>,
) -> Response {
    match state.profiles.create(request).await {
        Ok(profile) => created(profile),
        Err(e) => handle_error(e),
    }
}

pub async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ProfileUpdateRequest>,
) -> Response {
    handle_result(state.profiles.update(id, request).await)
}

pub async fn delete_profile(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.profiles.delete(id).await {
        Ok(()) => no_content(),
        Err(e) => handle_error(e),
    }
}
