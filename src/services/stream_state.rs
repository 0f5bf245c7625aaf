//! Stream and event status synchronization
//!
//! Keeps the two status machines consistent: a LIVE stream implies a LIVE
//! event, and closing an event ends its streams and stops their encoders.
//! Job failures never feed back into stream or event status.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::job_supervisor::JobSupervisor;
use crate::errors::{AppError, AppResult};
use crate::models::{Event, EventStatus, Stream, StreamStatus};
use crate::repositories::StreamRepository;

/// Outcome of a go-live attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoLive {
    /// Stream is LIVE; `event_promoted` tells whether the event moved to LIVE now
    Live { event_promoted: bool },
    /// The event was closed before the stream could go live
    EventInactive,
}

#[derive(Clone)]
pub struct StreamStateSynchronizer {
    streams: StreamRepository,
    supervisor: JobSupervisor,
}

impl StreamStateSynchronizer {
    pub fn new(streams: StreamRepository, supervisor: JobSupervisor) -> Self {
        Self {
            streams,
            supervisor,
        }
    }

    /// Flip a stream to LIVE and promote its event.
    ///
    /// The stream write is conditional on the event still being open. A failed
    /// promotion after that is logged and tolerated.
    pub async fn go_live(&self, stream: &Stream) -> AppResult<GoLive> {
        if !self.streams.mark_stream_live(stream.id, Utc::now()).await? {
            return Ok(GoLive::EventInactive);
        }

        let event_promoted = match self.streams.promote_event_live(stream.event_id).await {
            Ok(promoted) => promoted,
            Err(e) => {
                warn!(
                    stream_id = %stream.id,
                    event_id = %stream.event_id,
                    "Stream is live but event promotion failed: {}",
                    e
                );
                false
            }
        };

        info!(
            stream_id = %stream.id,
            event_id = %stream.event_id,
            event_promoted,
            "Stream went live"
        );
        Ok(GoLive::Live { event_promoted })
    }

    /// Mark a stream ENDED after the publisher disconnected.
    ///
    /// The event keeps its status; other streams may still be live.
    pub async fn end_stream(&self, stream: &Stream) -> AppResult<()> {
        self.streams.mark_stream_ended(stream.id, Utc::now()).await?;
        info!(stream_id = %stream.id, "Stream ended");
        Ok(())
    }

    /// Change an event's status and apply the consequences to its streams
    pub async fn set_event_status(&self, event_id: Uuid, status: EventStatus) -> AppResult<Event> {
        let event = self
            .streams
            .find_event(event_id)
            .await?
            .ok_or_else(|| AppError::not_found("event", event_id.to_string()))?;

        if !event.status.accepts_publish() {
            if event.status == status {
                return Ok(event);
            }
            return Err(AppError::validation(format!(
                "event is {} and cannot change status",
                event.status
            )));
        }

        match status {
            EventStatus::Ended | EventStatus::Cancelled => self.close_event(event_id, status).await?,
            EventStatus::Draft | EventStatus::Scheduled => {
                let live_streams = self
                    .streams
                    .list_streams_for_event(event_id)
                    .await?
                    .into_iter()
                    .filter(|s| s.status == StreamStatus::Live)
                    .count();
                if live_streams > 0 {
                    return Err(AppError::validation(format!(
                        "event has {} live stream(s); end it instead",
                        live_streams
                    )));
                }
                self.update_open_event(event_id, status).await?;
            }
            EventStatus::Live => self.update_open_event(event_id, status).await?,
        }

        self.streams
            .find_event(event_id)
            .await?
            .ok_or_else(|| AppError::not_found("event", event_id.to_string()))
    }

    async fn update_open_event(&self, event_id: Uuid, status: EventStatus) -> AppResult<()> {
        // The write rechecks closure and live streams; a publish may have landed
        if !self.streams.set_event_status(event_id, status).await? {
            return Err(AppError::validation(format!(
                "event was closed or went live concurrently; cannot move to {}",
                status
            )));
        }
        info!(event_id = %event_id, status = %status, "Event status changed");
        Ok(())
    }

    async fn close_event(&self, event_id: Uuid, status: EventStatus) -> AppResult<()> {
        let Some(ended_streams) = self.streams.close_event(event_id, status).await? else {
            return Err(AppError::validation("event was closed concurrently"));
        };

        info!(
            event_id = %event_id,
            status = %status,
            streams_ended = ended_streams.len(),
            "Event closed"
        );

        for stream_id in ended_streams {
            if let Err(e) = self.supervisor.stop_stream_jobs(stream_id).await {
                warn!(stream_id = %stream_id, "Failed to stop transcoding jobs: {}", e);
            }
        }
        Ok(())
    }
}
