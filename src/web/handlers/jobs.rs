//! Transcoding job and playlist handlers
//!
//! Job status is always read from the job table, never from the supervisor's
//! registry, so a job that exits between two reads is reported consistently.

use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{
    MasterPlaylistResponse, StartJobsRequest, StartJobsResponse, StartSingleJobRequest,
    TranscodingJob, TranscodingStatusResponse,
};
use crate::services::StopOutcome;
use crate::web::{
    responses::{accepted, handle_error, handle_result, no_content, ok},
    AppState,
};

/// Start the default profile set for a stream
pub async fn start_jobs(
    State(state): State<AppState>,
    Json(request): Json<StartJobsRequest>,
) -> Response {
    let result: AppResult<StartJobsResponse> = async {
        let profiles = state.profiles.default_profiles().await?;
        let jobs = state
            .supervisor
            .start_profile_set(request.stream_id, &request.input_url, &profiles)
            .await?;
        Ok(StartJobsResponse {
            jobs,
            active_jobs: state.supervisor.active_job_count().await,
        })
    }
    .await;

    match result {
        Ok(response) => accepted(response),
        Err(e) => handle_error(e),
    }
}

pub async fn start_single_job(
    State(state): State<AppState>,
    Json(request): Json<StartSingleJobRequest>,
) -> Response {
    let result: AppResult<StartJobsResponse> = async {
        let profile = state.profiles.get(request.profile_id).await?;
        let job = state
            .supervisor
            .start_single_job(request.stream_id, &request.input_url, &profile)
            .await?;
        Ok(StartJobsResponse {
            jobs: vec![job],
            active_jobs: state.supervisor.active_job_count().await,
        })
    }
    .await;

    match result {
        Ok(response) => accepted(response),
        Err(e) => handle_error(e),
    }
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    handle_result(find_job(&state, id).await)
}

pub async fn list_stream_jobs(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
) -> Response {
    handle_result(
        state
            .supervisor
            .list_jobs_for_stream(stream_id)
            .await
            .map_err(AppError::from),
    )
}

/// Stop a job without deleting it
pub async fn stop_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let result: AppResult<TranscodingJob> = async {
        if state.supervisor.stop_job(id).await? == StopOutcome::NotFound {
            return Err(AppError::not_found("transcoding_job", id.to_string()));
        }
        find_job(&state, id).await
    }
    .await;

    handle_result(result)
}

pub async fn delete_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.supervisor.delete_job(id).await {
        Ok(true) => no_content(),
        Ok(false) => handle_error(AppError::not_found("transcoding_job", id.to_string())),
        Err(e) => handle_error(e.into()),
    }
}

pub async fn generate_master_playlist(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
) -> Response {
    match state.manifests.generate_master_manifest(stream_id).await {
        Ok(manifest) => ok(MasterPlaylistResponse {
            stream_id,
            url: manifest.url,
            renditions: manifest.renditions,
        }),
        Err(e) => handle_error(e.into()),
    }
}

pub async fn transcoding_status(State(state): State<AppState>) -> Response {
    ok(TranscodingStatusResponse {
        active_jobs: state.supervisor.active_job_count().await,
        status: "operational".to_string(),
    })
}

async fn find_job(state: &AppState, id: Uuid) -> AppResult<TranscodingJob> {
    state
        .supervisor
        .get_job(id)
        .await?
        .ok_or_else(|| AppError::not_found("transcoding_job", id.to_string()))
}
