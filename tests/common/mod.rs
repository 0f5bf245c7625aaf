//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot, Notify};
use uuid::Uuid;

use ingest_orchestrator::{
    config::Config,
    database::Database,
    errors::{TranscodingError, TranscodingResult},
    models::{
        Event, EventCreateRequest, EventStatus, JobStatus, ProfileCreateRequest, Stream,
        TranscodingJob, TranscodingProfile,
    },
    services::{EncodeCommand, EncoderHandle, EncoderLauncher, ExitInfo},
    web::AppState,
};

/// How the fake encoder behaves for a given profile name
#[derive(Clone)]
pub enum FakeBehavior {
    /// Start and run until told to exit or terminated
    Run,
    /// Fail before a process exists
    FailToSpawn(String),
    /// Block inside `start` until the notify fires
    Gate(Arc<Notify>),
}

struct FakeControl {
    exit_tx: Option<oneshot::Sender<ExitInfo>>,
    progress_tx: mpsc::Sender<u8>,
    terminated: Arc<AtomicBool>,
    command: EncodeCommand,
}

/// Scripted stand-in for the external encoder
#[derive(Default)]
pub struct FakeLauncher {
    behaviors: Mutex<HashMap<String, FakeBehavior>>,
    processes: Mutex<HashMap<Uuid, FakeControl>>,
    starts: AtomicUsize,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_behavior(&self, profile_name: &str, behavior: FakeBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(profile_name.to_string(), behavior);
    }

    /// Number of processes that actually started
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn has_started(&self, job_id: Uuid) -> bool {
        self.processes.lock().unwrap().contains_key(&job_id)
    }

    pub fn command(&self, job_id: Uuid) -> Option<EncodeCommand> {
        self.processes
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|control| control.command.clone())
    }

    pub fn was_terminated(&self, job_id: Uuid) -> bool {
        self.processes
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|control| control.terminated.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn exit(&self, job_id: Uuid, info: ExitInfo) {
        let sender = self
            .processes
            .lock()
            .unwrap()
            .get_mut(&job_id)
            .and_then(|control| control.exit_tx.take())
            .expect("fake process not running");
        let _ = sender.send(info);
    }

    pub fn progress(&self, job_id: Uuid, percent: u8) {
        let sender = self
            .processes
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|control| control.progress_tx.clone())
            .expect("fake process not running");
        sender.try_send(percent).unwrap();
    }
}

#[async_trait]
impl EncoderLauncher for FakeLauncher {
    async fn start(&self, command: EncodeCommand) -> TranscodingResult<Box<dyn EncoderHandle>> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&command.encode.profile_name)
            .cloned()
            .unwrap_or(FakeBehavior::Run);

        match behavior {
            FakeBehavior::Run => {}
            FakeBehavior::FailToSpawn(message) => {
                return Err(TranscodingError::SpawnFailure(message));
            }
            FakeBehavior::Gate(gate) => gate.notified().await,
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::channel(16);
        let terminated = Arc::new(AtomicBool::new(false));

        self.processes.lock().unwrap().insert(
            command.job_id,
            FakeControl {
                exit_tx: Some(exit_tx),
                progress_tx,
                terminated: terminated.clone(),
                command,
            },
        );
        self.starts.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeHandle {
            exit_rx,
            progress: Some(progress_rx),
            terminated,
        }))
    }
}

struct FakeHandle {
    exit_rx: oneshot::Receiver<ExitInfo>,
    progress: Option<mpsc::Receiver<u8>>,
    terminated: Arc<AtomicBool>,
}

#[async_trait]
impl EncoderHandle for FakeHandle {
    async fn wait(&mut self) -> ExitInfo {
        match (&mut self.exit_rx).await {
            Ok(info) => info,
            Err(_) => ExitInfo::failure(None, "fake encoder vanished"),
        }
    }

    fn take_progress(&mut self) -> Option<mpsc::Receiver<u8>> {
        self.progress.take()
    }

    async fn terminate(&mut self, _grace: Duration) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Application state over an in-memory database and the fake encoder
pub struct TestContext {
    pub state: AppState,
    pub launcher: Arc<FakeLauncher>,
    pub database: Database,
    pub output_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config<F: FnOnce(&mut Config)>(customize: F) -> Self {
        let output_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.transcoding.output_dir = output_dir.path().to_path_buf();
        config.transcoding.public_base_url = "http://cdn.test/hls".to_string();
        config.transcoding.stop_grace_period_secs = 1;
        customize(&mut config);

        let database = Database::in_memory().await.unwrap();
        let launcher = FakeLauncher::new();
        let state = AppState::new(config, database.clone(), launcher.clone());

        Self {
            state,
            launcher,
            database,
            output_dir,
        }
    }

    pub async fn event(&self, status: EventStatus) -> Event {
        self.state
            .streams
            .create_event(EventCreateRequest {
                name: "Product launch".to_string(),
                status: Some(status),
            })
            .await
            .unwrap()
    }

    pub async fn stream(&self, status: EventStatus) -> (Event, Stream) {
        let event = self.event(status).await;
        let stream = self.state.streams.create_stream(event.id).await.unwrap();
        (event, stream)
    }

    pub async fn profile(&self, name: &str, height: u32, is_default: bool) -> TranscodingProfile {
        self.state
            .profiles
            .create(ProfileCreateRequest {
                name: name.to_string(),
                width: height * 16 / 9 / 2 * 2,
                height,
                video_bitrate: height * 4,
                audio_bitrate: 128,
                framerate: 30,
                preset: "veryfast".to_string(),
                is_default,
            })
            .await
            .unwrap()
    }

    pub async fn job(&self, job_id: Uuid) -> TranscodingJob {
        self.state.supervisor.get_job(job_id).await.unwrap().unwrap()
    }

    pub async fn wait_for_status(&self, job_id: Uuid, status: JobStatus) -> TranscodingJob {
        let mut last = None;
        for _ in 0..200 {
            let job = self.job(job_id).await;
            if job.status == status {
                return job;
            }
            last = Some(job.status);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {:?}, last {:?}", job_id, status, last);
    }

    pub async fn wait_for_active(&self, expected: usize) {
        for _ in 0..200 {
            if self.state.supervisor.active_job_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "active job count never reached {}, is {}",
            expected,
            self.state.supervisor.active_job_count().await
        );
    }

    pub async fn wait_until<F, Fut>(&self, mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }
}

pub const INPUT_URL: &str = "rtmp://localhost:1935/live/live_test";
