//! Service layer
//!
//! Services sit between the web handlers and the repositories. They own
//! validation, cross-entity status rules and the encoder processes.

pub mod encoder;
pub mod gatekeeper;
pub mod job_supervisor;
pub mod manifest;
pub mod profile_registry;
pub mod stream_state;

pub use encoder::{EncodeCommand, EncoderHandle, EncoderLauncher, ExitInfo, FfmpegLauncher};
pub use gatekeeper::{AutoTranscoder, DenyReason, IngestGatekeeper, PublishDecision};
pub use job_supervisor::{JobSupervisor, StopOutcome};
pub use manifest::{ManifestGenerator, MasterManifest, OutputLayout};
pub use profile_registry::ProfileRegistry;
pub use stream_state::{GoLive, StreamStateSynchronizer};
