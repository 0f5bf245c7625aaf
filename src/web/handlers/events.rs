//! Event and stream provisioning handlers

use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{
    Event, EventCreateRequest, EventStatus, EventStatusUpdateRequest, Stream, ViewerReport,
};
use crate::web::{
    responses::{created, handle_error, handle_result},
    AppState,
};

pub async fn create_event(
    State(state): State<AppState>,
    Json(mut request): Json<EventCreateRequest>,
) -> Response {
    let result: AppResult<Event> = async {
        request.name = request.name.trim().to_string();
        if request.name.is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
        match request.status {
            None | Some(EventStatus::Draft) | Some(EventStatus::Scheduled) => {}
            Some(other) => {
                return Err(AppError::validation(format!(
                    "events cannot be created as {}",
                    other
                )))
            }
        }
        Ok(state.streams.create_event(request).await?)
    }
    .await;

    match result {
        Ok(event) => created(event),
        Err(e) => handle_error(e),
    }
}

pub async fn get_event(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let result: AppResult<Event> = async {
        state
            .streams
            .find_event(id)
            .await?
            .ok_or_else(|| AppError::not_found("event", id.to_string()))
    }
    .await;

    handle_result(result)
}

pub async fn update_event_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<EventStatusUpdateRequest>,
) -> Response {
    handle_result(state.stream_state.set_event_status(id, request.status).await)
}

pub async fn list_event_streams(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let result: AppResult<Vec<Stream>> = async {
        if state.streams.find_event(id).await?.is_none() {
            return Err(AppError::not_found("event", id.to_string()));
        }
        Ok(state.streams.list_streams_for_event(id).await?)
    }
    .await;

    handle_result(result)
}

pub async fn create_stream(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.streams.create_stream(id).await {
        Ok(stream) => created(stream),
        Err(e) => handle_error(e.into()),
    }
}

pub async fn get_stream(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let result: AppResult<Stream> = async {
        state
            .streams
            .find_stream(id)
            .await?
            .ok_or_else(|| AppError::not_found("stream", id.to_string()))
    }
    .await;

    handle_result(result)
}

/// Issue a new stream key; the previous one stops authorizing immediately
pub async fn rotate_stream_key(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    handle_result(
        state
            .streams
            .rotate_stream_key(id)
            .await
            .map_err(AppError::from),
    )
}

pub async fn report_viewers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(report): Json<ViewerReport>,
) -> Response {
    if report.current < 0 {
        return handle_error(AppError::validation("current must not be negative"));
    }
    handle_result(
        state
            .streams
            .record_viewers(id, report.current)
            .await
            .map_err(AppError::from),
    )
}
