//! Event and stream repository
//!
//! The gatekeeper only ever needs a key lookup and single-row updates from here,
//! so every hot-path method is one statement.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use uuid::Uuid;

use super::{parse_enum, parse_uuid};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{Event, EventCreateRequest, EventStatus, Stream, StreamStatus};

const STREAM_COLUMNS: &str = "id, event_id, stream_key, status, started_at, ended_at, \
     peak_viewers, total_views, created_at, updated_at";

#[derive(Clone)]
pub struct StreamRepository {
    pool: Pool<Sqlite>,
}

impl StreamRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn map_event(row: &SqliteRow) -> RepositoryResult<Event> {
        Ok(Event {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            name: row.try_get("name")?,
            status: parse_enum(&row.try_get::<String, _>("status")?)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn map_stream(row: &SqliteRow) -> RepositoryResult<Stream> {
        Ok(Stream {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            event_id: parse_uuid(&row.try_get::<String, _>("event_id")?)?,
            stream_key: row.try_get("stream_key")?,
            status: parse_enum(&row.try_get::<String, _>("status")?)?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            peak_viewers: row.try_get("peak_viewers")?,
            total_views: row.try_get("total_views")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn generate_stream_key() -> String {
        format!("live_{}", Uuid::new_v4().simple())
    }

    // Events

    pub async fn create_event(&self, request: EventCreateRequest) -> RepositoryResult<Event> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let status = request.status.unwrap_or(EventStatus::Draft);

        sqlx::query(
            "INSERT INTO events (id, name, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&request.name)
        .bind(status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_event(id)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("events", "id", id.to_string()))
    }

    pub async fn find_event(&self, id: Uuid) -> RepositoryResult<Option<Event>> {
        let row = sqlx::query("SELECT id, name, status, created_at, updated_at FROM events WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_event).transpose()
    }

    /// Promote an event to LIVE unless it is already live or closed
    ///
    /// Returns whether the row changed.
    pub async fn promote_event_live(&self, event_id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE events SET status = 'live', updated_at = ? \
             WHERE id = ? AND status IN ('draft', 'scheduled')",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(event_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set an event status without touching its streams
    ///
    /// Closed events (ENDED, CANCELLED) are never reopened, and an event with a
    /// LIVE stream never moves back to DRAFT or SCHEDULED. Both checks live in
    /// the statement itself. Returns false when the write was refused or the
    /// event is missing.
    pub async fn set_event_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE events SET status = ?, updated_at = ?
            WHERE id = ?
              AND status NOT IN ('ended', 'cancelled')
              AND (
                  ? NOT IN ('draft', 'scheduled')
                  OR NOT EXISTS (
                      SELECT 1 FROM streams
                      WHERE streams.event_id = events.id AND streams.status = 'live'
                  )
              )
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(event_id.to_string())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Close an event and end every live stream under it in one transaction
    ///
    /// Returns the ids of the streams that were ended, or `None` when the event
    /// was already closed or does not exist.
    pub async fn close_event(
        &self,
        event_id: Uuid,
        status: EventStatus,
    ) -> RepositoryResult<Option<Vec<Uuid>>> {
        debug_assert!(!status.accepts_publish());
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE events SET status = ?, updated_at = ? \
             WHERE id = ? AND status NOT IN ('ended', 'cancelled')",
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(event_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let ended: Vec<String> = sqlx::query_scalar(
            "UPDATE streams SET status = 'ended', ended_at = ?, updated_at = ? \
             WHERE event_id = ? AND status = 'live' RETURNING id",
        )
        .bind(&now)
        .bind(&now)
        .bind(event_id.to_string())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        ended
            .iter()
            .map(|id| parse_uuid(id))
            .collect::<RepositoryResult<Vec<_>>>()
            .map(Some)
    }

    // Streams

    pub async fn create_stream(&self, event_id: Uuid) -> RepositoryResult<Stream> {
        if self.find_event(event_id).await?.is_none() {
            return Err(RepositoryError::record_not_found(
                "events",
                "id",
                event_id.to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO streams (id, event_id, stream_key, status, created_at, updated_at)
            VALUES (?, ?, ?, 'idle', ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(event_id.to_string())
        .bind(Self::generate_stream_key())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_stream(id)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("streams", "id", id.to_string()))
    }

    pub async fn find_stream(&self, id: Uuid) -> RepositoryResult<Option<Stream>> {
        let row = sqlx::query(&format!("SELECT {} FROM streams WHERE id = ?", STREAM_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_stream).transpose()
    }

    pub async fn find_stream_by_key(&self, stream_key: &str) -> RepositoryResult<Option<Stream>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM streams WHERE stream_key = ?",
            STREAM_COLUMNS
        ))
        .bind(stream_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_stream).transpose()
    }

    pub async fn list_streams_for_event(&self, event_id: Uuid) -> RepositoryResult<Vec<Stream>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM streams WHERE event_id = ? ORDER BY created_at",
            STREAM_COLUMNS
        ))
        .bind(event_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_stream).collect()
    }

    /// Flip a stream to LIVE, but only while its event still accepts publishes
    ///
    /// The event check and the write are one statement, so an event closed
    /// concurrently can never end up with a freshly LIVE stream.
    pub async fn mark_stream_live(
        &self,
        stream_id: Uuid,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let at = at.to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE streams SET status = 'live', started_at = ?, ended_at = NULL, updated_at = ?
            WHERE id = ?
              AND EXISTS (
                  SELECT 1 FROM events
                  WHERE events.id = streams.event_id
                    AND events.status NOT IN ('ended', 'cancelled')
              )
            "#,
        )
        .bind(&at)
        .bind(&at)
        .bind(stream_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_stream_ended(
        &self,
        stream_id: Uuid,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let at = at.to_rfc3339();
        let result = sqlx::query(
            "UPDATE streams SET status = ?, ended_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(StreamStatus::Ended.as_str())
        .bind(&at)
        .bind(&at)
        .bind(stream_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace a stream's key; the old key is retired and never handed out again
    pub async fn rotate_stream_key(&self, stream_id: Uuid) -> RepositoryResult<Stream> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let old_key: Option<String> =
            sqlx::query_scalar("SELECT stream_key FROM streams WHERE id = ?")
                .bind(stream_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;

        let Some(old_key) = old_key else {
            tx.rollback().await?;
            return Err(RepositoryError::record_not_found(
                "streams",
                "id",
                stream_id.to_string(),
            ));
        };

        sqlx::query(
            "INSERT INTO retired_stream_keys (stream_key, stream_id, retired_at) VALUES (?, ?, ?)",
        )
        .bind(&old_key)
        .bind(stream_id.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let new_key = loop {
            let candidate = Self::generate_stream_key();
            let retired: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM retired_stream_keys WHERE stream_key = ?")
                    .bind(&candidate)
                    .fetch_one(&mut *tx)
                    .await?;
            if retired == 0 {
                break candidate;
            }
        };

        sqlx::query("UPDATE streams SET stream_key = ?, updated_at = ? WHERE id = ?")
            .bind(&new_key)
            .bind(&now)
            .bind(stream_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.find_stream(stream_id)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("streams", "id", stream_id.to_string()))
    }

    /// Record a viewer-count sample: every report counts as a view, peak keeps the maximum
    pub async fn record_viewers(&self, stream_id: Uuid, current: i64) -> RepositoryResult<Stream> {
        let result = sqlx::query(
            "UPDATE streams SET peak_viewers = MAX(peak_viewers, ?), total_views = total_views + 1, \
             updated_at = ? WHERE id = ?",
        )
        .bind(current.max(0))
        .bind(Utc::now().to_rfc3339())
        .bind(stream_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::record_not_found(
                "streams",
                "id",
                stream_id.to_string(),
            ));
        }

        self.find_stream(stream_id)
            .await?
            .ok_or_else(|| RepositoryError::record_not_found("streams", "id", stream_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    async fn setup() -> (StreamRepository, Event, Stream) {
        let db = Database::in_memory().await.unwrap();
        let repo = StreamRepository::new(db.pool());
        let event = repo
            .create_event(EventCreateRequest {
                name: "Keynote".to_string(),
                status: Some(EventStatus::Scheduled),
            })
            .await
            .unwrap();
        let stream = repo.create_stream(event.id).await.unwrap();
        (repo, event, stream)
    }

    #[tokio::test]
    async fn new_streams_are_idle_with_unique_keys() {
        let (repo, event, stream) = setup().await;
        let other = repo.create_stream(event.id).await.unwrap();

        assert_eq!(stream.status, StreamStatus::Idle);
        assert!(stream.stream_key.starts_with("live_"));
        assert_ne!(stream.stream_key, other.stream_key);
    }

    #[tokio::test]
    async fn rotated_key_invalidates_old_key() {
        let (repo, _event, stream) = setup().await;
        let rotated = repo.rotate_stream_key(stream.id).await.unwrap();

        assert_ne!(rotated.stream_key, stream.stream_key);
        assert!(repo
            .find_stream_by_key(&stream.stream_key)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            repo.find_stream_by_key(&rotated.stream_key)
                .await
                .unwrap()
                .map(|s| s.id),
            Some(stream.id)
        );
    }

    #[tokio::test]
    async fn stream_cannot_go_live_under_closed_event() {
        let (repo, event, stream) = setup().await;
        repo.close_event(event.id, EventStatus::Cancelled)
            .await
            .unwrap();

        assert!(!repo.mark_stream_live(stream.id, Utc::now()).await.unwrap());
        let stream = repo.find_stream(stream.id).await.unwrap().unwrap();
        assert_eq!(stream.status, StreamStatus::Idle);
    }

    #[tokio::test]
    async fn closing_event_ends_live_streams() {
        let (repo, event, stream) = setup().await;
        assert!(repo.mark_stream_live(stream.id, Utc::now()).await.unwrap());

        let ended = repo
            .close_event(event.id, EventStatus::Ended)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ended, vec![stream.id]);

        let stream = repo.find_stream(stream.id).await.unwrap().unwrap();
        assert_eq!(stream.status, StreamStatus::Ended);
        assert!(stream.ended_at.is_some());

        // Closed events stay closed
        assert!(repo
            .close_event(event.id, EventStatus::Cancelled)
            .await
            .unwrap()
            .is_none());
        assert!(!repo
            .set_event_status(event.id, EventStatus::Scheduled)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn event_with_live_stream_stays_live() {
        let (repo, event, stream) = setup().await;

        // Publish lands first, then a status change back to planning
        assert!(repo.mark_stream_live(stream.id, Utc::now()).await.unwrap());
        assert!(repo.promote_event_live(event.id).await.unwrap());
        for status in [EventStatus::Draft, EventStatus::Scheduled] {
            assert!(!repo.set_event_status(event.id, status).await.unwrap());
        }

        let event = repo.find_event(event.id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Live);
        let stream = repo.find_stream(stream.id).await.unwrap().unwrap();
        assert_eq!(stream.status, StreamStatus::Live);

        // Once the stream ends the event may be rescheduled
        repo.mark_stream_ended(stream.id, Utc::now()).await.unwrap();
        assert!(repo
            .set_event_status(event.id, EventStatus::Scheduled)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn viewer_reports_track_peak_and_total() {
        let (repo, _event, stream) = setup().await;
        repo.record_viewers(stream.id, 12).await.unwrap();
        repo.record_viewers(stream.id, 40).await.unwrap();
        let stream = repo.record_viewers(stream.id, 7).await.unwrap();

        assert_eq!(stream.peak_viewers, 40);
        assert_eq!(stream.total_views, 3);
    }
}
