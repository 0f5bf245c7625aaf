//! Transcoding profiles and jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Named target encode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscodingProfile {
    pub id: Uuid,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: u32, // kbps
    pub audio_bitrate: u32, // kbps
    pub framerate: u32,
    pub preset: String, // "veryfast", "medium", ...
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TranscodingProfile {
    /// Freeze the encode parameters for a job
    pub fn snapshot(&self) -> EncodeParameters {
        EncodeParameters {
            profile_id: self.id,
            profile_name: self.name.clone(),
            width: self.width,
            height: self.height,
            video_bitrate: self.video_bitrate,
            audio_bitrate: self.audio_bitrate,
            framerate: self.framerate,
            preset: self.preset.clone(),
        }
    }
}

/// Encode parameters copied from a profile at job creation.
///
/// Later edits or deletion of the profile never reach a job holding one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncodeParameters {
    pub profile_id: Uuid,
    pub profile_name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    pub framerate: u32,
    pub preset: String,
}

impl EncodeParameters {
    /// Peak bandwidth advertised in the master playlist, bits per second
    pub fn bandwidth(&self) -> u64 {
        (self.video_bitrate as u64 + self.audio_bitrate as u64) * 1000
    }

    /// Filesystem/URL safe directory name for this rendition
    pub fn rendition_slug(&self) -> String {
        let slug: String = self
            .profile_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_{}", slug, self.profile_id.simple())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCreateRequest {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    pub framerate: u32,
    pub preset: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    pub name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_bitrate: Option<u32>,
    pub audio_bitrate: Option<u32>,
    pub framerate: Option<u32>,
    pub preset: Option<String>,
    pub is_default: Option<bool>,
}

/// Persisted job status.
///
/// Stopping is a supervisor-side transition and lands on `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscodingJob {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub profile_id: Uuid,
    pub encode: EncodeParameters,
    pub status: JobStatus,
    #[serde(skip)]
    pub sequence: i64,
    pub input_url: String,
    pub output_url: Option<String>,
    pub hls_playlist_url: Option<String>,
    pub progress: u8,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// What callers get back from starting a job; polling goes through the job id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: Uuid,
    pub stream_id: Uuid,
    pub profile_id: Uuid,
    pub profile_name: String,
    pub status: JobStatus,
}

impl From<&TranscodingJob> for JobHandle {
    fn from(job: &TranscodingJob) -> Self {
        Self {
            job_id: job.id,
            stream_id: job.stream_id,
            profile_id: job.profile_id,
            profile_name: job.encode.profile_name.clone(),
            status: job.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobsRequest {
    pub stream_id: Uuid,
    pub input_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSingleJobRequest {
    pub stream_id: Uuid,
    pub input_url: String,
    pub profile_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobsResponse {
    pub jobs: Vec<JobHandle>,
    pub active_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodingStatusResponse {
    pub active_jobs: usize,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterPlaylistResponse {
    pub stream_id: Uuid,
    pub url: String,
    pub renditions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(name: &str) -> EncodeParameters {
        EncodeParameters {
            profile_id: Uuid::nil(),
            profile_name: name.to_string(),
            width: 1280,
            height: 720,
            video_bitrate: 2500,
            audio_bitrate: 128,
            framerate: 30,
            preset: "veryfast".to_string(),
        }
    }

    #[test]
    fn bandwidth_sums_audio_and_video_in_bits() {
        assert_eq!(params("720p").bandwidth(), 2_628_000);
    }

    #[test]
    fn rendition_slug_is_path_safe() {
        let slug = params("HD 720p/main").rendition_slug();
        assert!(slug.starts_with("hd_720p_main_"));
        assert!(!slug.contains('/'));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
