//! Encoder process boundary
//!
//! The external encoder is a black box: it can be started, observed (progress,
//! exit) and stopped. [`EncoderLauncher`] and [`EncoderHandle`] are the only
//! things the supervisor knows about it, so tests swap in scripted fakes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{TranscodingError, TranscodingResult};
use crate::models::EncodeParameters;

const STDERR_TAIL_LINES: usize = 20;

/// Everything an encoder needs to produce one rendition
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeCommand {
    pub job_id: Uuid,
    pub input_url: String,
    pub output_dir: PathBuf,
    pub playlist_path: PathBuf,
    pub encode: EncodeParameters,
    pub segment_duration_secs: u32,
}

/// How an encoder process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub success: bool,
    pub code: Option<i32>,
    pub message: Option<String>,
}

impl ExitInfo {
    pub fn success() -> Self {
        Self {
            success: true,
            code: Some(0),
            message: None,
        }
    }

    pub fn failure<S: Into<String>>(code: Option<i32>, message: S) -> Self {
        Self {
            success: false,
            code,
            message: Some(message.into()),
        }
    }

    /// Text recorded on a failed job row
    pub fn error_message(&self) -> String {
        match (&self.message, self.code) {
            (Some(message), _) if !message.trim().is_empty() => message.clone(),
            (_, Some(code)) => format!("encoder exited with status {}", code),
            _ => "encoder terminated by signal".to_string(),
        }
    }
}

/// Starts encoder processes
#[async_trait]
pub trait EncoderLauncher: Send + Sync {
    /// Start a process. An `Err` means no process exists.
    async fn start(&self, command: EncodeCommand) -> TranscodingResult<Box<dyn EncoderHandle>>;
}

/// A started encoder process
#[async_trait]
pub trait EncoderHandle: Send {
    /// Wait for the process to exit. Must be cancel safe.
    async fn wait(&mut self) -> ExitInfo;

    /// Progress samples (0-100), available once
    fn take_progress(&mut self) -> Option<mpsc::Receiver<u8>>;

    /// Ask the process to stop, force it after `grace`
    async fn terminate(&mut self, grace: Duration);

    fn pid(&self) -> Option<u32>;
}

/// Launches FFmpeg producing an HLS rendition
pub struct FfmpegLauncher {
    ffmpeg_command: String,
}

impl FfmpegLauncher {
    pub fn new<S: Into<String>>(ffmpeg_command: S) -> Self {
        Self {
            ffmpeg_command: ffmpeg_command.into(),
        }
    }

    /// Check if FFmpeg is available and get its version
    pub async fn probe_version(&self) -> Option<String> {
        match TokioCommand::new(&self.ffmpeg_command)
            .arg("-version")
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                let version_output = String::from_utf8_lossy(&output.stdout);
                // e.g. "ffmpeg version 6.1.1-3ubuntu5"
                let version = version_output.lines().next().and_then(|line| {
                    line.strip_prefix("ffmpeg version ")
                        .and_then(|rest| rest.split_whitespace().next())
                        .map(|v| v.to_string())
                });
                info!(
                    "FFmpeg: available=true, version={:?}, command={}",
                    version, self.ffmpeg_command
                );
                version
            }
            Ok(output) => {
                warn!(
                    "FFmpeg command '{}' failed with status: {}",
                    self.ffmpeg_command, output.status
                );
                None
            }
            Err(e) => {
                warn!(
                    "Failed to execute FFmpeg command '{}': {}",
                    self.ffmpeg_command, e
                );
                None
            }
        }
    }
}

/// FFmpeg arguments for one HLS rendition
pub fn build_ffmpeg_args(command: &EncodeCommand) -> Vec<String> {
    let encode = &command.encode;
    let segment_pattern = command.output_dir.join("segment_%05d.ts");

    let args: Vec<String> = vec![
        "-hide_banner".into(),
        "-y".into(),
        "-i".into(),
        command.input_url.clone(),
        "-vf".into(),
        format!("scale={}:{}", encode.width, encode.height),
        "-r".into(),
        encode.framerate.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        encode.preset.clone(),
        "-b:v".into(),
        format!("{}k", encode.video_bitrate),
        "-maxrate".into(),
        format!("{}k", encode.video_bitrate),
        "-bufsize".into(),
        format!("{}k", u64::from(encode.video_bitrate) * 2),
        "-g".into(),
        (u64::from(encode.framerate) * u64::from(command.segment_duration_secs)).to_string(),
        "-sc_threshold".into(),
        "0".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", encode.audio_bitrate),
        "-ac".into(),
        "2".into(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        command.segment_duration_secs.to_string(),
        "-hls_playlist_type".into(),
        "event".into(),
        "-hls_segment_filename".into(),
        segment_pattern.to_string_lossy().into_owned(),
        command.playlist_path.to_string_lossy().into_owned(),
    ];
    args
}

/// Parse an FFmpeg `HH:MM:SS.cc` timestamp into seconds
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Turns FFmpeg stderr into percentages.
///
/// Live inputs report `Duration: N/A`, in which case no progress is emitted.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    duration: Option<f64>,
    last: Option<u8>,
}

impl ProgressTracker {
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        if let Some(rest) = line.trim_start().strip_prefix("Duration:") {
            let value = rest.split(',').next().unwrap_or("").trim();
            self.duration = parse_timestamp(value).filter(|d| *d > 0.0);
            return None;
        }

        let duration = self.duration?;
        let time = line
            .split_whitespace()
            .find_map(|token| token.strip_prefix("time="))
            .and_then(parse_timestamp)?;

        let percent = ((time / duration) * 100.0).clamp(0.0, 99.0) as u8;
        if self.last == Some(percent) {
            return None;
        }
        self.last = Some(percent);
        Some(percent)
    }
}

#[async_trait]
impl EncoderLauncher for FfmpegLauncher {
    async fn start(&self, command: EncodeCommand) -> TranscodingResult<Box<dyn EncoderHandle>> {
        tokio::fs::create_dir_all(&command.output_dir)
            .await
            .map_err(|e| {
                TranscodingError::SpawnFailure(format!(
                    "cannot create output directory {}: {}",
                    command.output_dir.display(),
                    e
                ))
            })?;

        let args = build_ffmpeg_args(&command);
        debug!(job_id = %command.job_id, "Starting FFmpeg with args: {:?}", args);

        let mut cmd = TokioCommand::new(&self.ffmpeg_command);
        cmd.args(&args);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            TranscodingError::SpawnFailure(format!(
                "Failed to spawn {}: {}",
                self.ffmpeg_command, e
            ))
        })?;

        let stdin = child.stdin.take();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let (progress_tx, progress_rx) = mpsc::channel(16);

        // Monitor stderr for progress and keep the tail for error reporting
        let stderr_task = child.stderr.take().map(|stderr| {
            let job_id = command.job_id;
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut tracker = ProgressTracker::default();

                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(job_id = %job_id, "ffmpeg: {}", line);

                    // `time=` lines are frequent status updates, not diagnostics
                    if !line.contains("time=") {
                        if let Ok(mut tail) = tail.lock() {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line.clone());
                        }
                    }

                    if let Some(percent) = tracker.observe(&line) {
                        // Drop samples when the supervisor is behind
                        let _ = progress_tx.try_send(percent);
                    }
                }
            })
        });

        info!(
            job_id = %command.job_id,
            pid = ?child.id(),
            profile = %command.encode.profile_name,
            "FFmpeg process started"
        );

        Ok(Box::new(FfmpegHandle {
            child,
            stdin,
            stderr_tail,
            stderr_task,
            progress: Some(progress_rx),
        }))
    }
}

struct FfmpegHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
    progress: Option<mpsc::Receiver<u8>>,
}

impl FfmpegHandle {
    fn failure_detail(&self) -> Option<String> {
        let tail = self.stderr_tail.lock().ok()?;
        let errors: Vec<&str> = tail
            .iter()
            .map(String::as_str)
            .filter(|line| {
                let lower = line.to_lowercase();
                lower.contains("error") || lower.contains("failed") || lower.contains("invalid")
            })
            .collect();

        if !errors.is_empty() {
            Some(errors.join("\n"))
        } else {
            tail.back().cloned()
        }
    }
}

#[async_trait]
impl EncoderHandle for FfmpegHandle {
    async fn wait(&mut self) -> ExitInfo {
        let status = self.child.wait().await;

        // Let the reader drain the last stderr lines
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }

        match status {
            Ok(status) if status.success() => ExitInfo::success(),
            Ok(status) => ExitInfo {
                success: false,
                code: status.code(),
                message: self.failure_detail(),
            },
            Err(e) => ExitInfo::failure(None, format!("failed to wait for encoder: {}", e)),
        }
    }

    fn take_progress(&mut self) -> Option<mpsc::Receiver<u8>> {
        self.progress.take()
    }

    async fn terminate(&mut self, grace: Duration) {
        // 'q' on stdin makes FFmpeg finalize the playlist and exit cleanly
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => debug!(pid = ?self.child.id(), "FFmpeg exited after quit request"),
            Err(_) => {
                warn!(pid = ?self.child.id(), "FFmpeg ignored quit request, killing");
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill FFmpeg process: {}", e);
                }
            }
        }
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}
