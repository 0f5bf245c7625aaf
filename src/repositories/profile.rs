//! Transcoding profile repository

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use uuid::Uuid;

use super::{parse_uuid, traits::Repository};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{ProfileCreateRequest, ProfileUpdateRequest, TranscodingProfile};

/// Query parameters specific to profiles
#[derive(Debug, Clone, Default)]
pub struct ProfileQuery {
    /// Only return profiles flagged as default. Several may be flagged at once.
    pub only_defaults: bool,
}

impl ProfileQuery {
    pub fn defaults() -> Self {
        Self {
            only_defaults: true,
        }
    }
}

#[derive(Clone)]
pub struct ProfileRepository {
    pool: Pool<Sqlite>,
}

const PROFILE_COLUMNS: &str = "id, name, width, height, video_bitrate, audio_bitrate, \
     framerate, preset, is_default, created_at, updated_at";

impl ProfileRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> RepositoryResult<TranscodingProfile> {
        Ok(TranscodingProfile {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            name: row.try_get("name")?,
            width: row.try_get::<i64, _>("width")? as u32,
            height: row.try_get::<i64, _>("height")? as u32,
            video_bitrate: row.try_get::<i64, _>("video_bitrate")? as u32,
            audio_bitrate: row.try_get::<i64, _>("audio_bitrate")? as u32,
            framerate: row.try_get::<i64, _>("framerate")? as u32,
            preset: row.try_get("preset")?,
            is_default: row.try_get("is_default")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Repository<TranscodingProfile, Uuid> for ProfileRepository {
    type CreateRequest = ProfileCreateRequest;
    type UpdateRequest = ProfileUpdateRequest;
    type Query = ProfileQuery;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<TranscodingProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transcoding_profiles WHERE id = ?",
            PROFILE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_all(&self, query: ProfileQuery) -> RepositoryResult<Vec<TranscodingProfile>> {
        let sql = if query.only_defaults {
            format!(
                "SELECT {} FROM transcoding_profiles WHERE is_default = TRUE \
                 ORDER BY height DESC, video_bitrate DESC, name",
                PROFILE_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM transcoding_profiles ORDER BY height DESC, video_bitrate DESC, name",
                PROFILE_COLUMNS
            )
        };

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn create(&self, request: ProfileCreateRequest) -> RepositoryResult<TranscodingProfile> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO transcoding_profiles (
                id, name, width, height, video_bitrate, audio_bitrate,
                framerate, preset, is_default, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&request.name)
        .bind(request.width as i64)
        .bind(request.height as i64)
        .bind(request.video_bitrate as i64)
        .bind(request.audio_bitrate as i64)
        .bind(request.framerate as i64)
        .bind(&request.preset)
        .bind(request.is_default)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("transcoding_profiles", "id", id.to_string()))
    }

    async fn update(
        &self,
        id: Uuid,
        request: ProfileUpdateRequest,
    ) -> RepositoryResult<TranscodingProfile> {
        let existing = self.find_by_id(id).await?.ok_or_else(|| {
            RepositoryError::record_not_found("transcoding_profiles", "id", id.to_string())
        })?;

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE transcoding_profiles
            SET name = ?, width = ?, height = ?, video_bitrate = ?, audio_bitrate = ?,
                framerate = ?, preset = ?, is_default = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(request.name.unwrap_or(existing.name))
        .bind(request.width.unwrap_or(existing.width) as i64)
        .bind(request.height.unwrap_or(existing.height) as i64)
        .bind(request.video_bitrate.unwrap_or(existing.video_bitrate) as i64)
        .bind(request.audio_bitrate.unwrap_or(existing.audio_bitrate) as i64)
        .bind(request.framerate.unwrap_or(existing.framerate) as i64)
        .bind(request.preset.unwrap_or(existing.preset))
        .bind(request.is_default.unwrap_or(existing.is_default))
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("transcoding_profiles", "id", id.to_string()))
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM transcoding_profiles WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::record_not_found(
                "transcoding_profiles",
                "id",
                id.to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn request(name: &str, height: u32, is_default: bool) -> ProfileCreateRequest {
        ProfileCreateRequest {
            name: name.to_string(),
            width: height * 16 / 9,
            height,
            video_bitrate: height * 3,
            audio_bitrate: 128,
            framerate: 30,
            preset: "veryfast".to_string(),
            is_default,
        }
    }

    #[tokio::test]
    async fn defaults_are_a_set_not_a_single_profile() {
        let db = Database::in_memory().await.unwrap();
        let repo = ProfileRepository::new(db.pool());

        repo.create(request("720p", 720, true)).await.unwrap();
        repo.create(request("480p", 480, true)).await.unwrap();
        repo.create(request("1080p", 1080, false)).await.unwrap();

        let defaults = repo.find_all(ProfileQuery::defaults()).await.unwrap();
        let names: Vec<_> = defaults.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["720p", "480p"]);

        let all = repo.find_all(ProfileQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].name, "1080p");
    }

    #[tokio::test]
    async fn update_keeps_unspecified_fields() {
        let db = Database::in_memory().await.unwrap();
        let repo = ProfileRepository::new(db.pool());
        let created = repo.create(request("720p", 720, false)).await.unwrap();

        let updated = repo
            .update(
                created.id,
                ProfileUpdateRequest {
                    video_bitrate: Some(3000),
                    is_default: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.video_bitrate, 3000);
        assert!(updated.is_default);
        assert_eq!(updated.height, 720);
        assert_eq!(updated.name, "720p");
    }

    #[tokio::test]
    async fn delete_unknown_profile_is_not_found() {
        let db = Database::in_memory().await.unwrap();
        let repo = ProfileRepository::new(db.pool());

        let err = repo.delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::RecordNotFound { .. }));
    }
}
