//! Transcoding job repository
//!
//! Job rows are the durable record of every encode. Each state-changing write
//! carries a sequence number from the job's ticket and is applied only when it
//! is newer than the last accepted write and the current status allows the
//! transition, so a late progress tick cannot resurrect a terminal job.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use uuid::Uuid;

use super::{parse_enum, parse_uuid};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{EncodeParameters, JobStatus, TranscodingJob};

const JOB_COLUMNS: &str = "id, stream_id, profile_id, profile_name, width, height, \
     video_bitrate, audio_bitrate, framerate, preset, status, sequence, input_url, \
     output_url, hls_playlist_url, progress, error_message, started_at, completed_at, created_at";

#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Sqlite>,
}

impl JobRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> RepositoryResult<TranscodingJob> {
        let profile_id = parse_uuid(&row.try_get::<String, _>("profile_id")?)?;
        Ok(TranscodingJob {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            stream_id: parse_uuid(&row.try_get::<String, _>("stream_id")?)?,
            profile_id,
            encode: EncodeParameters {
                profile_id,
                profile_name: row.try_get("profile_name")?,
                width: row.try_get::<i64, _>("width")? as u32,
                height: row.try_get::<i64, _>("height")? as u32,
                video_bitrate: row.try_get::<i64, _>("video_bitrate")? as u32,
                audio_bitrate: row.try_get::<i64, _>("audio_bitrate")? as u32,
                framerate: row.try_get::<i64, _>("framerate")? as u32,
                preset: row.try_get("preset")?,
            },
            status: parse_enum(&row.try_get::<String, _>("status")?)?,
            sequence: row.try_get("sequence")?,
            input_url: row.try_get("input_url")?,
            output_url: row.try_get("output_url")?,
            hls_playlist_url: row.try_get("hls_playlist_url")?,
            progress: row.try_get::<i64, _>("progress")?.clamp(0, 100) as u8,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Insert a PENDING job holding a frozen copy of the encode parameters
    pub async fn create_pending(
        &self,
        stream_id: Uuid,
        input_url: &str,
        encode: &EncodeParameters,
    ) -> RepositoryResult<TranscodingJob> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO transcoding_jobs (
                id, stream_id, profile_id, profile_name, width, height,
                video_bitrate, audio_bitrate, framerate, preset,
                status, sequence, input_url, progress, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, 0, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(stream_id.to_string())
        .bind(encode.profile_id.to_string())
        .bind(&encode.profile_name)
        .bind(encode.width as i64)
        .bind(encode.height as i64)
        .bind(encode.video_bitrate as i64)
        .bind(encode.audio_bitrate as i64)
        .bind(encode.framerate as i64)
        .bind(&encode.preset)
        .bind(input_url)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("transcoding_jobs", "id", id.to_string()))
    }

    pub async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<TranscodingJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transcoding_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    /// The PENDING or PROCESSING job for a stream and profile, if any
    pub async fn find_unfinished(
        &self,
        stream_id: Uuid,
        profile_id: Uuid,
    ) -> RepositoryResult<Option<TranscodingJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transcoding_jobs \
             WHERE stream_id = ? AND profile_id = ? AND status IN ('pending', 'processing')",
            JOB_COLUMNS
        ))
        .bind(stream_id.to_string())
        .bind(profile_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    pub async fn list_for_stream(&self, stream_id: Uuid) -> RepositoryResult<Vec<TranscodingJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transcoding_jobs WHERE stream_id = ? ORDER BY created_at, id",
            JOB_COLUMNS
        ))
        .bind(stream_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    /// Jobs whose rendition can be listed in a master playlist: COMPLETED, or
    /// PROCESSING with a known playlist location
    pub async fn list_renditions(&self, stream_id: Uuid) -> RepositoryResult<Vec<TranscodingJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transcoding_jobs \
             WHERE stream_id = ? AND hls_playlist_url IS NOT NULL \
               AND (status = 'completed' OR status = 'processing') \
             ORDER BY created_at, id",
            JOB_COLUMNS
        ))
        .bind(stream_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    /// PENDING -> PROCESSING
    pub async fn mark_processing(
        &self,
        id: Uuid,
        sequence: i64,
        output_url: &str,
        hls_playlist_url: &str,
        started_at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transcoding_jobs
            SET status = 'processing', sequence = ?, output_url = ?, hls_playlist_url = ?,
                started_at = ?
            WHERE id = ? AND status = 'pending' AND sequence < ?
            "#,
        )
        .bind(sequence)
        .bind(output_url)
        .bind(hls_playlist_url)
        .bind(started_at.to_rfc3339())
        .bind(id.to_string())
        .bind(sequence)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn update_progress(
        &self,
        id: Uuid,
        sequence: i64,
        progress: u8,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transcoding_jobs SET progress = ?, sequence = ?
            WHERE id = ? AND status = 'processing' AND sequence < ?
            "#,
        )
        .bind(progress.min(100) as i64)
        .bind(sequence)
        .bind(id.to_string())
        .bind(sequence)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// PROCESSING -> COMPLETED, progress forced to 100
    pub async fn mark_completed(&self, id: Uuid, sequence: i64) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transcoding_jobs
            SET status = 'completed', progress = 100, sequence = ?, completed_at = ?
            WHERE id = ? AND status = 'processing' AND sequence < ?
            "#,
        )
        .bind(sequence)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(sequence)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// PENDING | PROCESSING -> FAILED; terminal rows are left untouched
    pub async fn mark_failed(
        &self,
        id: Uuid,
        sequence: i64,
        error_message: &str,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transcoding_jobs
            SET status = 'failed', sequence = ?, error_message = ?, completed_at = ?
            WHERE id = ? AND status IN ('pending', 'processing') AND sequence < ?
            "#,
        )
        .bind(sequence)
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(sequence)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail every non-terminal job; used once at startup when no process can be alive
    pub async fn fail_unfinished(&self, error_message: &str) -> RepositoryResult<Vec<Uuid>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE transcoding_jobs
            SET status = 'failed', error_message = ?, completed_at = ?, sequence = sequence + 1
            WHERE status IN ('pending', 'processing')
            RETURNING id
            "#,
        )
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        ids.iter().map(|id| parse_uuid(id)).collect()
    }

    pub async fn status_of(&self, id: Uuid) -> RepositoryResult<Option<JobStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM transcoding_jobs WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        status.as_deref().map(parse_enum::<JobStatus>).transpose()
    }

    pub async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM transcoding_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn encode() -> EncodeParameters {
        EncodeParameters {
            profile_id: Uuid::new_v4(),
            profile_name: "720p".to_string(),
            width: 1280,
            height: 720,
            video_bitrate: 2500,
            audio_bitrate: 128,
            framerate: 30,
            preset: "veryfast".to_string(),
        }
    }

    async fn pending_job() -> (JobRepository, TranscodingJob) {
        let db = Database::in_memory().await.unwrap();
        let repo = JobRepository::new(db.pool());
        let job = repo
            .create_pending(Uuid::new_v4(), "rtmp://localhost/live/key", &encode())
            .await
            .unwrap();
        (repo, job)
    }

    #[tokio::test]
    async fn stale_progress_cannot_resurrect_failed_job() {
        let (repo, job) = pending_job().await;
        assert!(repo
            .mark_processing(job.id, 1, "/tmp/out", "http://cdn/out/index.m3u8", Utc::now())
            .await
            .unwrap());
        assert!(repo.mark_failed(job.id, 3, "stopped by operator").await.unwrap());

        // Tick issued before the stop, delivered after it
        assert!(!repo.update_progress(job.id, 2, 40).await.unwrap());
        // Tick issued after the stop
        assert!(!repo.update_progress(job.id, 4, 50).await.unwrap());
        assert!(!repo.mark_completed(job.id, 5).await.unwrap());

        let job = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("stopped by operator"));
    }

    #[tokio::test]
    async fn out_of_order_progress_is_rejected() {
        let (repo, job) = pending_job().await;
        repo.mark_processing(job.id, 1, "/tmp/out", "http://cdn/out/index.m3u8", Utc::now())
            .await
            .unwrap();

        assert!(repo.update_progress(job.id, 3, 60).await.unwrap());
        assert!(!repo.update_progress(job.id, 2, 30).await.unwrap());

        let job = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.progress, 60);
    }

    #[tokio::test]
    async fn completion_forces_full_progress() {
        let (repo, job) = pending_job().await;
        repo.mark_processing(job.id, 1, "/tmp/out", "http://cdn/out/index.m3u8", Utc::now())
            .await
            .unwrap();
        assert!(repo.mark_completed(job.id, 2).await.unwrap());

        let job = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn one_unfinished_job_per_stream_and_profile() {
        let (repo, job) = pending_job().await;
        let same = job.encode.clone();

        let err = repo
            .create_pending(job.stream_id, "rtmp://localhost/live/key", &same)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ConstraintViolation { .. }));
        assert_eq!(
            repo.find_unfinished(job.stream_id, job.profile_id)
                .await
                .unwrap()
                .map(|j| j.id),
            Some(job.id)
        );

        // A terminal job frees the rendition
        repo.mark_failed(job.id, 1, "stopped by operator").await.unwrap();
        assert!(repo
            .find_unfinished(job.stream_id, job.profile_id)
            .await
            .unwrap()
            .is_none());
        repo.create_pending(job.stream_id, "rtmp://localhost/live/key", &same)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unfinished_jobs_are_failed_on_reconcile() {
        let (repo, job) = pending_job().await;
        let other = repo
            .create_pending(job.stream_id, "rtmp://localhost/live/key", &encode())
            .await
            .unwrap();
        repo.mark_processing(other.id, 1, "/tmp/out", "http://cdn/out/index.m3u8", Utc::now())
            .await
            .unwrap();

        let mut failed = repo.fail_unfinished("orphaned").await.unwrap();
        failed.sort();
        let mut expected = vec![job.id, other.id];
        expected.sort();
        assert_eq!(failed, expected);
        assert_eq!(
            repo.status_of(other.id).await.unwrap(),
            Some(JobStatus::Failed)
        );
    }
}
