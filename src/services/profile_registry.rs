//! Transcoding profile registry
//!
//! Validates profile definitions on the way into the repository. Jobs copy a
//! profile's parameters when they are created, so edits here never reach a
//! running encode.

use tracing::info;
use uuid::Uuid;

use crate::errors::{AppError, AppResult, RepositoryError};
use crate::models::{ProfileCreateRequest, ProfileUpdateRequest, TranscodingProfile};
use crate::repositories::{ProfileQuery, ProfileRepository, Repository};

/// x264 presets accepted by the encoder
pub const ENCODER_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

const MAX_DIMENSION: u32 = 7680;
const MAX_FRAMERATE: u32 = 120;
/// kbps
pub const MAX_VIDEO_BITRATE: u32 = 100_000;
/// kbps
pub const MAX_AUDIO_BITRATE: u32 = 1_024;

#[derive(Clone)]
pub struct ProfileRegistry {
    profiles: ProfileRepository,
}

impl ProfileRegistry {
    pub fn new(profiles: ProfileRepository) -> Self {
        Self { profiles }
    }

    pub async fn list(&self, only_defaults: bool) -> AppResult<Vec<TranscodingProfile>> {
        Ok(self.profiles.find_all(ProfileQuery { only_defaults }).await?)
    }

    /// The profile set used when no explicit profile is named
    pub async fn default_profiles(&self) -> AppResult<Vec<TranscodingProfile>> {
        Ok(self.profiles.find_all(ProfileQuery::defaults()).await?)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<TranscodingProfile> {
        self.profiles
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("transcoding_profile", id.to_string()))
    }

    pub async fn create(&self, mut request: ProfileCreateRequest) -> AppResult<TranscodingProfile> {
        request.name = request.name.trim().to_string();
        request.preset = request.preset.trim().to_lowercase();
        validate_profile(
            &request.name,
            request.width,
            request.height,
            request.video_bitrate,
            request.audio_bitrate,
            request.framerate,
            &request.preset,
        )?;

        let profile = self
            .profiles
            .create(request)
            .await
            .map_err(duplicate_name_as_validation)?;
        info!(
            profile_id = %profile.id,
            "Created transcoding profile '{}' ({}x{} @ {}kbps)",
            profile.name, profile.width, profile.height, profile.video_bitrate
        );
        Ok(profile)
    }

    pub async fn update(
        &self,
        id: Uuid,
        mut request: ProfileUpdateRequest,
    ) -> AppResult<TranscodingProfile> {
        let existing = self.get(id).await?;

        request.name = request.name.map(|n| n.trim().to_string());
        request.preset = request.preset.map(|p| p.trim().to_lowercase());
        validate_profile(
            request.name.as_deref().unwrap_or(&existing.name),
            request.width.unwrap_or(existing.width),
            request.height.unwrap_or(existing.height),
            request.video_bitrate.unwrap_or(existing.video_bitrate),
            request.audio_bitrate.unwrap_or(existing.audio_bitrate),
            request.framerate.unwrap_or(existing.framerate),
            request.preset.as_deref().unwrap_or(&existing.preset),
        )?;

        let profile = self
            .profiles
            .update(id, request)
            .await
            .map_err(duplicate_name_as_validation)?;
        info!(profile_id = %profile.id, "Updated transcoding profile '{}'", profile.name);
        Ok(profile)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        self.profiles.delete(id).await.map_err(|e| match e {
            RepositoryError::RecordNotFound { .. } => {
                AppError::not_found("transcoding_profile", id.to_string())
            }
            other => other.into(),
        })?;
        info!(profile_id = %id, "Deleted transcoding profile");
        Ok(())
    }
}

fn duplicate_name_as_validation(e: RepositoryError) -> AppError {
    match e {
        RepositoryError::ConstraintViolation { .. } => {
            AppError::validation("a profile with this name already exists")
        }
        other => other.into(),
    }
}

fn validate_profile(
    name: &str,
    width: u32,
    height: u32,
    video_bitrate: u32,
    audio_bitrate: u32,
    framerate: u32,
    preset: &str,
) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::validation("name must not be empty"));
    }
    for (field, value) in [("width", width), ("height", height)] {
        if value == 0 || value > MAX_DIMENSION {
            return Err(AppError::validation(format!(
                "{} must be between 1 and {}",
                field, MAX_DIMENSION
            )));
        }
        // libx264 with 4:2:0 chroma rejects odd dimensions
        if value % 2 != 0 {
            return Err(AppError::validation(format!("{} must be even", field)));
        }
    }
    for (field, value, max) in [
        ("video_bitrate", video_bitrate, MAX_VIDEO_BITRATE),
        ("audio_bitrate", audio_bitrate, MAX_AUDIO_BITRATE),
    ] {
        if value == 0 || value > max {
            return Err(AppError::validation(format!(
                "{} must be between 1 and {} kbps",
                field, max
            )));
        }
    }
    if framerate == 0 || framerate > MAX_FRAMERATE {
        return Err(AppError::validation(format!(
            "framerate must be between 1 and {}",
            MAX_FRAMERATE
        )));
    }
    if !ENCODER_PRESETS.contains(&preset) {
        return Err(AppError::validation(format!("unknown preset '{}'", preset)));
    }
    Ok(())
}
