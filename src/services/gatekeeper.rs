//! Ingest gatekeeper
//!
//! Answers the media server's publish hooks. Authorization fails closed: an
//! empty, unknown or retired key, or a closed event, is denied. Publish-done
//! is accepted unconditionally.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job_supervisor::JobSupervisor;
use super::profile_registry::ProfileRegistry;
use super::stream_state::{GoLive, StreamStateSynchronizer};
use crate::config::Config;
use crate::errors::{AppResult, TranscodingError};
use crate::repositories::StreamRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoKey,
    UnknownKey,
    EventInactive,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NoKey => "no key",
            DenyReason::UnknownKey => "unknown key",
            DenyReason::EventInactive => "event inactive",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDecision {
    Allow { stream_id: Uuid, event_id: Uuid },
    Deny(DenyReason),
}

impl PublishDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PublishDecision::Allow { .. })
    }
}

/// Starts the default profile set for a stream once its publish is authorized
#[derive(Clone)]
pub struct AutoTranscoder {
    supervisor: JobSupervisor,
    profiles: ProfileRegistry,
    config: Arc<Config>,
}

impl AutoTranscoder {
    pub fn new(supervisor: JobSupervisor, profiles: ProfileRegistry, config: Arc<Config>) -> Self {
        Self {
            supervisor,
            profiles,
            config,
        }
    }

    /// Fire and forget; the hook response never waits on encoders
    fn trigger(&self, stream_id: Uuid, app: &str, stream_key: &str) {
        let input_url = self.config.ingest_url(app, stream_key);
        let supervisor = self.supervisor.clone();
        let profiles = self.profiles.clone();

        tokio::spawn(async move {
            let defaults = match profiles.default_profiles().await {
                Ok(defaults) => defaults,
                Err(e) => {
                    error!(stream_id = %stream_id, "Failed to load default profiles: {}", e);
                    return;
                }
            };
            if defaults.is_empty() {
                debug!(stream_id = %stream_id, "No default profiles, skipping auto-transcode");
                return;
            }

            match supervisor
                .start_profile_set(stream_id, &input_url, &defaults)
                .await
            {
                Ok(jobs) => info!(stream_id = %stream_id, jobs = jobs.len(), "Auto-transcode started"),
                Err(e @ TranscodingError::AlreadyRunning { .. }) => {
                    info!(stream_id = %stream_id, "Auto-transcode skipped: {}", e)
                }
                Err(e) => error!(stream_id = %stream_id, "Auto-transcode failed to start: {}", e),
            }
        });
    }
}

#[derive(Clone)]
pub struct IngestGatekeeper {
    streams: StreamRepository,
    state: StreamStateSynchronizer,
    auto_transcoder: Option<AutoTranscoder>,
}

impl IngestGatekeeper {
    pub fn new(
        streams: StreamRepository,
        state: StreamStateSynchronizer,
        auto_transcoder: Option<AutoTranscoder>,
    ) -> Self {
        Self {
            streams,
            state,
            auto_transcoder,
        }
    }

    /// Decide whether a publish on `app` with `stream_key` may proceed.
    ///
    /// On allow the stream is LIVE and its event promoted before this returns.
    pub async fn authorize_publish(&self, app: &str, stream_key: &str) -> AppResult<PublishDecision> {
        let decision = self.decide(app, stream_key.trim()).await?;
        match decision {
            PublishDecision::Allow {
                stream_id,
                event_id,
            } => info!(
                app = %app,
                stream_id = %stream_id,
                event_id = %event_id,
                "Publish authorized"
            ),
            PublishDecision::Deny(reason) => warn!(app = %app, reason = %reason, "Publish denied"),
        }
        Ok(decision)
    }

    async fn decide(&self, app: &str, stream_key: &str) -> AppResult<PublishDecision> {
        if stream_key.is_empty() {
            return Ok(PublishDecision::Deny(DenyReason::NoKey));
        }

        // Retired keys no longer match any stream
        let Some(stream) = self.streams.find_stream_by_key(stream_key).await? else {
            return Ok(PublishDecision::Deny(DenyReason::UnknownKey));
        };

        match self.streams.find_event(stream.event_id).await? {
            Some(event) if event.status.accepts_publish() => {}
            _ => return Ok(PublishDecision::Deny(DenyReason::EventInactive)),
        }

        if self.state.go_live(&stream).await? == GoLive::EventInactive {
            return Ok(PublishDecision::Deny(DenyReason::EventInactive));
        }

        if let Some(auto) = &self.auto_transcoder {
            auto.trigger(stream.id, app, stream_key);
        }

        Ok(PublishDecision::Allow {
            stream_id: stream.id,
            event_id: stream.event_id,
        })
    }

    /// Record the end of a publish. Never fails towards the media server.
    pub async fn notify_publish_done(&self, stream_key: &str) {
        let stream_key = stream_key.trim();
        if stream_key.is_empty() {
            debug!("Publish-done without a key");
            return;
        }

        match self.streams.find_stream_by_key(stream_key).await {
            Ok(Some(stream)) => {
                if let Err(e) = self.state.end_stream(&stream).await {
                    error!(stream_id = %stream.id, "Failed to end stream: {}", e);
                }
            }
            Ok(None) => debug!("Publish-done for unknown key"),
            Err(e) => error!("Failed to look up stream for publish-done: {}", e),
        }
    }
}
