//! Ingest authorization and transcoding orchestration for live events
//!
//! The media server asks [`services::IngestGatekeeper`] whether a publish may
//! start; authorized streams can be fanned out into several HLS renditions by
//! [`services::JobSupervisor`], and [`services::ManifestGenerator`] ties the
//! renditions together into a master playlist.

pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod repositories;
pub mod services;
pub mod web;
