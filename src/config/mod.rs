use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub media_server: MediaServerConfig,
    pub transcoding: TranscodingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on profile administration routes. Unset means open.
    pub admin_token: Option<String>,
}

/// Where the media server accepts ingest, used to build encoder input URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaServerConfig {
    pub host: String,
    pub rtmp_port: u16,
    pub app: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodingConfig {
    /// Platform tier flag: start the default profile set when a publish is authorized
    pub auto_transcode: bool,
    pub ffmpeg_command: String,
    pub output_dir: PathBuf,
    pub public_base_url: String,
    pub stop_grace_period_secs: u64,
    pub segment_duration_secs: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./ingest-orchestrator.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                admin_token: None,
            },
            media_server: MediaServerConfig {
                host: "localhost".to_string(),
                rtmp_port: 1935,
                app: "live".to_string(),
            },
            transcoding: TranscodingConfig {
                auto_transcode: false,
                ffmpeg_command: "ffmpeg".to_string(),
                output_dir: PathBuf::from("./data/hls"),
                public_base_url: "http://localhost:8080/hls".to_string(),
                stop_grace_period_secs: 5,
                segment_duration_secs: 4,
            },
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and `INGEST_*` environment variables
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(&config_file)
    }

    pub fn load_from(config_file: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::with_name(config_file).required(false))
            .add_source(
                config::Environment::with_prefix("INGEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Ingest URL the encoder reads from for a given stream key.
    ///
    /// `app` is the application name reported by the media server; when empty
    /// the configured one is used.
    pub fn ingest_url(&self, app: &str, stream_key: &str) -> String {
        let app = if app.trim().is_empty() {
            self.media_server.app.as_str()
        } else {
            app.trim()
        };
        format!(
            "rtmp://{}:{}/{}/{}",
            self.media_server.host, self.media_server.rtmp_port, app, stream_key
        )
    }
}
