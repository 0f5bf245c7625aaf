use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod transcoding;

pub use transcoding::*;

/// Lifecycle of an event; the gatekeeper checks it before authorizing ingest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Draft,
    Scheduled,
    Live,
    Ended,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Scheduled => "scheduled",
            EventStatus::Live => "live",
            EventStatus::Ended => "ended",
            EventStatus::Cancelled => "cancelled",
        }
    }

    /// Ended and cancelled events reject every publish attempt
    pub fn accepts_publish(&self) -> bool {
        !matches!(self, EventStatus::Ended | EventStatus::Cancelled)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EventStatus::Draft),
            "scheduled" => Ok(EventStatus::Scheduled),
            "live" => Ok(EventStatus::Live),
            "ended" => Ok(EventStatus::Ended),
            "cancelled" => Ok(EventStatus::Cancelled),
            _ => Err(format!("Unknown event status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Idle,
    Live,
    Ended,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Idle => "idle",
            StreamStatus::Live => "live",
            StreamStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(StreamStatus::Idle),
            "live" => Ok(StreamStatus::Live),
            "ended" => Ok(StreamStatus::Ended),
            _ => Err(format!("Unknown stream status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ingest/broadcast instance bound 1:1 to a stream key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: Uuid,
    pub event_id: Uuid,
    pub stream_key: String,
    pub status: StreamStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub peak_viewers: i64,
    pub total_views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCreateRequest {
    pub name: String,
    #[serde(default)]
    pub status: Option<EventStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStatusUpdateRequest {
    pub status: EventStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerReport {
    pub current: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip_through_storage_form() {
        for status in [
            EventStatus::Draft,
            EventStatus::Scheduled,
            EventStatus::Live,
            EventStatus::Ended,
            EventStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<EventStatus>().unwrap(), status);
        }
        assert!("paused".parse::<StreamStatus>().is_err());
    }

    #[test]
    fn only_open_events_accept_publish() {
        assert!(EventStatus::Draft.accepts_publish());
        assert!(EventStatus::Scheduled.accepts_publish());
        assert!(EventStatus::Live.accepts_publish());
        assert!(!EventStatus::Ended.accepts_publish());
        assert!(!EventStatus::Cancelled.accepts_publish());
    }

    #[test]
    fn statuses_serialize_in_upper_case() {
        assert_eq!(serde_json::to_string(&StreamStatus::Live).unwrap(), "\"LIVE\"");
        assert_eq!(
            serde_json::to_string(&EventStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }
}
