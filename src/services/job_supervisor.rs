//! Transcoding job supervisor
//!
//! Owns every encoder process started by this instance. The registry maps job
//! ids to a control entry for the running process; the job table stays the
//! durable record that callers poll.
//!
//! Whoever takes an entry's stop sender owns the job's terminal write: the
//! monitor task when the process exits on its own, `stop_job` otherwise.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::encoder::{EncodeCommand, EncoderLauncher};
use super::manifest::OutputLayout;
use crate::config::TranscodingConfig;
use crate::errors::{RepositoryError, TranscodingError, TranscodingResult};
use crate::models::{JobHandle, TranscodingJob, TranscodingProfile};
use crate::repositories::{JobRepository, StreamRepository};

pub const STOPPED_BY_OPERATOR: &str = "stopped by operator";
pub const ORPHANED_ON_RESTART: &str = "orphaned: supervisor restarted";

const SUPPORTED_INPUT_SCHEMES: &[&str] = &["rtmp", "rtmps", "rtsp", "srt", "http", "https", "udp", "file"];

fn already_running(stream_id: Uuid, profile: &TranscodingProfile) -> TranscodingError {
    TranscodingError::AlreadyRunning {
        stream_id,
        profile: profile.name.clone(),
    }
}

/// Monotonic sequence source for one job's state writes
#[derive(Debug, Default)]
struct JobTicket(AtomicI64);

impl JobTicket {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPhase {
    Spawning,
    Running,
    Finishing,
}

/// Sent to a monitor task; answered once the process is gone
type StopRequest = oneshot::Sender<()>;

struct JobEntry {
    stream_id: Uuid,
    phase: JobPhase,
    ticket: Arc<JobTicket>,
    stop_tx: Option<oneshot::Sender<StopRequest>>,
}

/// What `stop_job` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A live process was stopped, or a dangling row was closed out
    Stopped,
    /// The job had already reached a terminal state
    AlreadyFinished,
    NotFound,
}

/// Starts, monitors and stops transcoding jobs
#[derive(Clone)]
pub struct JobSupervisor {
    active_jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
    jobs: JobRepository,
    streams: StreamRepository,
    launcher: Arc<dyn EncoderLauncher>,
    layout: OutputLayout,
    stop_grace_period: Duration,
    segment_duration_secs: u32,
}

impl JobSupervisor {
    pub fn new(
        jobs: JobRepository,
        streams: StreamRepository,
        launcher: Arc<dyn EncoderLauncher>,
        config: &TranscodingConfig,
    ) -> Self {
        Self {
            active_jobs: Arc::new(RwLock::new(HashMap::new())),
            jobs,
            streams,
            launcher,
            layout: OutputLayout::from_config(config),
            stop_grace_period: Duration::from_secs(config.stop_grace_period_secs),
            segment_duration_secs: config.segment_duration_secs.max(1),
        }
    }

    /// Start one job per profile against the same input.
    ///
    /// Rows are created PENDING before this returns; processes start in the
    /// background and each job fails or completes on its own.
    pub async fn start_profile_set(
        &self,
        stream_id: Uuid,
        input_url: &str,
        profiles: &[TranscodingProfile],
    ) -> TranscodingResult<Vec<JobHandle>> {
        if profiles.is_empty() {
            return Err(TranscodingError::NoProfiles);
        }
        self.validate_request(stream_id, input_url).await?;

        let mut seen = HashSet::new();
        let requested: Vec<&TranscodingProfile> =
            profiles.iter().filter(|p| seen.insert(p.id)).collect();

        // One encoder per rendition directory
        for profile in &requested {
            if let Some(existing) = self.jobs.find_unfinished(stream_id, profile.id).await? {
                warn!(
                    stream_id = %stream_id,
                    profile = %profile.name,
                    job_id = %existing.id,
                    "Rendition already has an unfinished job"
                );
                return Err(already_running(stream_id, profile));
            }
        }

        let mut created: Vec<TranscodingJob> = Vec::with_capacity(requested.len());
        for profile in requested {
            match self
                .jobs
                .create_pending(stream_id, input_url, &profile.snapshot())
                .await
            {
                Ok(job) => created.push(job),
                Err(e) => {
                    // Nothing has been launched yet; close out what was created
                    for job in &created {
                        if let Err(rollback) = self
                            .jobs
                            .mark_failed(job.id, i64::MAX, &format!("aborted: {}", e))
                            .await
                        {
                            error!(
                                job_id = %job.id,
                                "Failed to abort pending job after start failure: {}", rollback
                            );
                        }
                    }
                    return Err(match e {
                        // A concurrent start won the race for this rendition
                        RepositoryError::ConstraintViolation { .. } => {
                            already_running(stream_id, profile)
                        }
                        other => other.into(),
                    });
                }
            }
        }

        let handles: Vec<JobHandle> = created.iter().map(JobHandle::from).collect();
        for job in created {
            self.launch(job).await;
        }

        info!(
            stream_id = %stream_id,
            jobs = handles.len(),
            "Started transcoding profile set"
        );
        Ok(handles)
    }

    /// Start a single job; same semantics as a one-element profile set
    pub async fn start_single_job(
        &self,
        stream_id: Uuid,
        input_url: &str,
        profile: &TranscodingProfile,
    ) -> TranscodingResult<JobHandle> {
        self.start_profile_set(stream_id, input_url, std::slice::from_ref(profile))
            .await?
            .into_iter()
            .next()
            .ok_or(TranscodingError::NoProfiles)
    }

    /// Stop a job. Safe to call repeatedly and on jobs that already finished.
    pub async fn stop_job(&self, job_id: Uuid) -> TranscodingResult<StopOutcome> {
        let claimed = {
            let mut active = self.active_jobs.write().await;
            active.get_mut(&job_id).and_then(|entry| {
                let stop_tx = entry.stop_tx.take()?;
                entry.phase = JobPhase::Finishing;
                Some((stop_tx, entry.ticket.clone()))
            })
        };

        if let Some((stop_tx, ticket)) = claimed {
            let (ack_tx, ack_rx) = oneshot::channel();
            if stop_tx.send(ack_tx).is_ok() {
                // Err means the monitor exited without acknowledging; the process is gone either way
                let _ = ack_rx.await;
            }

            let recorded = self
                .jobs
                .mark_failed(job_id, ticket.next(), STOPPED_BY_OPERATOR)
                .await;
            self.active_jobs.write().await.remove(&job_id);
            recorded?;

            info!(job_id = %job_id, "Transcoding job stopped");
            return Ok(StopOutcome::Stopped);
        }

        // Entry without a stop sender: finishing on its own or already being stopped
        if self.active_jobs.read().await.contains_key(&job_id) {
            return Ok(StopOutcome::AlreadyFinished);
        }

        match self.jobs.status_of(job_id).await? {
            None => Ok(StopOutcome::NotFound),
            Some(status) if status.is_terminal() => Ok(StopOutcome::AlreadyFinished),
            Some(status) => {
                // No process behind this row in this instance
                warn!(job_id = %job_id, status = %status, "Closing out job with no live process");
                self.jobs
                    .mark_failed(job_id, i64::MAX, STOPPED_BY_OPERATOR)
                    .await?;
                Ok(StopOutcome::Stopped)
            }
        }
    }

    /// Stop a job if needed, then remove its row. Returns false for unknown jobs.
    pub async fn delete_job(&self, job_id: Uuid) -> TranscodingResult<bool> {
        if self.stop_job(job_id).await? == StopOutcome::NotFound {
            return Ok(false);
        }
        let deleted = self.jobs.delete(job_id).await?;
        if deleted {
            info!(job_id = %job_id, "Transcoding job deleted");
        }
        Ok(deleted)
    }

    /// Stop every job this instance runs for a stream
    pub async fn stop_stream_jobs(&self, stream_id: Uuid) -> TranscodingResult<usize> {
        let job_ids: Vec<Uuid> = self
            .active_jobs
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.stream_id == stream_id)
            .map(|(id, _)| *id)
            .collect();

        let mut stopped = 0;
        for job_id in job_ids {
            if self.stop_job(job_id).await? == StopOutcome::Stopped {
                stopped += 1;
            }
        }

        if stopped > 0 {
            info!(stream_id = %stream_id, stopped, "Stopped transcoding jobs for stream");
        }
        Ok(stopped)
    }

    /// Stop everything; used on process shutdown
    pub async fn shutdown(&self) {
        let job_ids: Vec<Uuid> = self.active_jobs.read().await.keys().copied().collect();
        if job_ids.is_empty() {
            return;
        }

        info!("Stopping {} active transcoding jobs", job_ids.len());
        for job_id in job_ids {
            if let Err(e) = self.stop_job(job_id).await {
                error!(job_id = %job_id, "Failed to stop job during shutdown: {}", e);
            }
        }
    }

    /// Number of jobs with a running encoder process
    pub async fn active_job_count(&self) -> usize {
        self.active_jobs
            .read()
            .await
            .values()
            .filter(|entry| entry.phase == JobPhase::Running)
            .count()
    }

    /// Fail every PENDING or PROCESSING row left by a previous instance.
    ///
    /// Must run before this instance starts any job.
    pub async fn reconcile_orphans(&self) -> TranscodingResult<usize> {
        let orphaned = self.jobs.fail_unfinished(ORPHANED_ON_RESTART).await?;
        for job_id in &orphaned {
            warn!(job_id = %job_id, "Marked orphaned transcoding job as failed");
        }
        if !orphaned.is_empty() {
            info!("Reconciled {} orphaned transcoding jobs", orphaned.len());
        }
        Ok(orphaned.len())
    }

    pub async fn get_job(&self, job_id: Uuid) -> TranscodingResult<Option<TranscodingJob>> {
        Ok(self.jobs.find_by_id(job_id).await?)
    }

    pub async fn list_jobs_for_stream(
        &self,
        stream_id: Uuid,
    ) -> TranscodingResult<Vec<TranscodingJob>> {
        Ok(self.jobs.list_for_stream(stream_id).await?)
    }

    async fn validate_request(&self, stream_id: Uuid, input_url: &str) -> TranscodingResult<()> {
        let url = Url::parse(input_url.trim()).map_err(|e| {
            TranscodingError::InvalidInput(format!("input url '{}': {}", input_url, e))
        })?;
        if !SUPPORTED_INPUT_SCHEMES.contains(&url.scheme()) {
            return Err(TranscodingError::InvalidInput(format!(
                "unsupported input scheme '{}'",
                url.scheme()
            )));
        }

        if self.streams.find_stream(stream_id).await?.is_none() {
            return Err(TranscodingError::StreamNotFound(stream_id));
        }
        Ok(())
    }

    async fn launch(&self, job: TranscodingJob) {
        let ticket = Arc::new(JobTicket::default());
        let (stop_tx, stop_rx) = oneshot::channel();

        self.active_jobs.write().await.insert(
            job.id,
            JobEntry {
                stream_id: job.stream_id,
                phase: JobPhase::Spawning,
                ticket: ticket.clone(),
                stop_tx: Some(stop_tx),
            },
        );

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.run_job(job, ticket, stop_rx).await;
        });
    }

    async fn run_job(
        self,
        job: TranscodingJob,
        ticket: Arc<JobTicket>,
        mut stop_rx: oneshot::Receiver<StopRequest>,
    ) {
        let job_id = job.id;
        let slug = job.encode.rendition_slug();
        let output_dir = self.layout.rendition_dir(job.stream_id, &slug);
        let playlist_url = self.layout.rendition_playlist_url(job.stream_id, &slug);
        let command = EncodeCommand {
            job_id,
            input_url: job.input_url.clone(),
            playlist_path: self.layout.rendition_playlist_path(job.stream_id, &slug),
            output_dir: output_dir.clone(),
            encode: job.encode.clone(),
            segment_duration_secs: self.segment_duration_secs,
        };

        let started = tokio::select! {
            biased;
            request = &mut stop_rx => {
                debug!(job_id = %job_id, "Stop requested before encoder started");
                if let Ok(ack) = request {
                    let _ = ack.send(());
                }
                return;
            }
            result = self.launcher.start(command) => result,
        };

        let mut handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                error!(job_id = %job_id, "Failed to start encoder: {}", e);
                if self.claim_terminal_write(job_id).await {
                    self.record_failure(job_id, &ticket, &e.to_string()).await;
                    self.active_jobs.write().await.remove(&job_id);
                }
                return;
            }
        };

        match self
            .jobs
            .mark_processing(
                job_id,
                ticket.next(),
                &output_dir.to_string_lossy(),
                &playlist_url,
                Utc::now(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %job_id, "Job left PENDING before its encoder started"),
            Err(e) => error!(job_id = %job_id, "Failed to mark job processing: {}", e),
        }
        self.mark_running(job_id).await;

        info!(
            job_id = %job_id,
            pid = ?handle.pid(),
            profile = %job.encode.profile_name,
            "Transcoding job processing"
        );

        let mut progress = handle.take_progress();
        let exit = loop {
            tokio::select! {
                request = &mut stop_rx => {
                    handle.terminate(self.stop_grace_period).await;
                    if let Ok(ack) = request {
                        let _ = ack.send(());
                    }
                    return;
                }
                exit = handle.wait() => break exit,
                percent = next_progress(&mut progress) => {
                    if let Err(e) = self.jobs.update_progress(job_id, ticket.next(), percent).await {
                        warn!(job_id = %job_id, "Failed to record progress: {}", e);
                    }
                }
            }
        };

        if !self.claim_terminal_write(job_id).await {
            // stop_job got there first and records the outcome
            return;
        }

        if exit.success {
            match self.jobs.mark_completed(job_id, ticket.next()).await {
                Ok(_) => info!(job_id = %job_id, "Transcoding job completed"),
                Err(e) => error!(job_id = %job_id, "Failed to mark job completed: {}", e),
            }
        } else {
            let message = exit.error_message();
            warn!(job_id = %job_id, code = ?exit.code, "Encoder failed: {}", message);
            self.record_failure(job_id, &ticket, &message).await;
        }

        self.active_jobs.write().await.remove(&job_id);
    }

    async fn mark_running(&self, job_id: Uuid) {
        if let Some(entry) = self.active_jobs.write().await.get_mut(&job_id) {
            if entry.phase == JobPhase::Spawning {
                entry.phase = JobPhase::Running;
            }
        }
    }

    /// Take the stop sender so no stop can race the exit write
    async fn claim_terminal_write(&self, job_id: Uuid) -> bool {
        let mut active = self.active_jobs.write().await;
        match active.get_mut(&job_id) {
            Some(entry) if entry.stop_tx.is_some() => {
                entry.stop_tx = None;
                entry.phase = JobPhase::Finishing;
                true
            }
            _ => false,
        }
    }

    async fn record_failure(&self, job_id: Uuid, ticket: &JobTicket, message: &str) {
        if let Err(e) = self.jobs.mark_failed(job_id, ticket.next(), message).await {
            error!(job_id = %job_id, "Failed to mark job failed: {}", e);
        }
    }
}

/// Next progress sample; pends forever once the encoder stops reporting
async fn next_progress(progress: &mut Option<mpsc::Receiver<u8>>) -> u8 {
    loop {
        let Some(rx) = progress.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Some(percent) => return percent,
            None => *progress = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_is_strictly_increasing() {
        let ticket = JobTicket::default();
        let first = ticket.next();
        let second = ticket.next();
        assert_eq!(first, 1);
        assert!(second > first);
    }

    #[tokio::test]
    async fn closed_progress_channel_pends() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(42).await.unwrap();
        drop(tx);

        let mut progress = Some(rx);
        assert_eq!(next_progress(&mut progress).await, 42);

        let pending = tokio::time::timeout(
            Duration::from_millis(20),
            next_progress(&mut progress),
        )
        .await;
        assert!(pending.is_err());
        assert!(progress.is_none());
    }
}
