//! HTTP handlers organized by domain
//!
//! Handlers only map requests and responses; the services hold the rules.

pub mod auth;
pub mod events;
pub mod health;
pub mod jobs;
pub mod profiles;
