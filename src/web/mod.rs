//! Web layer
//!
//! HTTP surface for the media server hooks, transcoding control and event
//! provisioning. Handlers are thin and delegate to the service layer.

use anyhow::Result;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::Config,
    database::Database,
    repositories::{JobRepository, ProfileRepository, StreamRepository},
    services::{
        AutoTranscoder, EncoderLauncher, IngestGatekeeper, JobSupervisor, ManifestGenerator,
        OutputLayout, ProfileRegistry, StreamStateSynchronizer,
    },
};

pub mod handlers;
pub mod middleware;
pub mod responses;

pub use responses::{handle_error, handle_result};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Database,
    pub streams: StreamRepository,
    pub profiles: ProfileRegistry,
    pub supervisor: JobSupervisor,
    pub manifests: ManifestGenerator,
    pub stream_state: StreamStateSynchronizer,
    pub gatekeeper: IngestGatekeeper,
}

impl AppState {
    /// Wire repositories and services around one database and encoder launcher
    pub fn new(config: Config, database: Database, launcher: Arc<dyn EncoderLauncher>) -> Self {
        let config = Arc::new(config);
        let streams = StreamRepository::new(database.pool());
        let jobs = JobRepository::new(database.pool());
        let profiles = ProfileRegistry::new(ProfileRepository::new(database.pool()));

        let supervisor =
            JobSupervisor::new(jobs.clone(), streams.clone(), launcher, &config.transcoding);
        let manifests =
            ManifestGenerator::new(jobs, OutputLayout::from_config(&config.transcoding));
        let stream_state = StreamStateSynchronizer::new(streams.clone(), supervisor.clone());

        let auto_transcoder = config.transcoding.auto_transcode.then(|| {
            AutoTranscoder::new(supervisor.clone(), profiles.clone(), config.clone())
        });
        let gatekeeper =
            IngestGatekeeper::new(streams.clone(), stream_state.clone(), auto_transcoder);

        Self {
            config,
            database,
            streams,
            profiles,
            supervisor,
            manifests,
            stream_state,
            gatekeeper,
        }
    }
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        Ok(Self {
            app: router(state),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Web server listening on http://{}", self.addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Create the router with all routes and middleware
pub fn router(state: AppState) -> Router {
    let admin = from_fn_with_state(state.clone(), middleware::require_admin);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        // Media server hooks
        .route(
            "/auth/publish",
            get(handlers::auth::publish).post(handlers::auth::publish_form),
        )
        .route(
            "/auth/publish-done",
            get(handlers::auth::publish_done).post(handlers::auth::publish_done_form),
        )
        // Profiles; writes are administrative
        .route(
            "/transcoding/profiles",
            get(handlers::profiles::list_profiles)
                .merge(post(handlers::profiles::create_profile).route_layer(admin.clone())),
        )
        .route(
            "/transcoding/profiles/:id",
            get(handlers::profiles::get_profile).merge(
                put(handlers::profiles::update_profile)
                    .delete(handlers::profiles::delete_profile)
                    .route_layer(admin),
            ),
        )
        // Jobs
        .route("/transcoding/jobs", post(handlers::jobs::start_jobs))
        .route("/transcoding/jobs/single", post(handlers::jobs::start_single_job))
        .route(
            "/transcoding/jobs/stream/:stream_id",
            get(handlers::jobs::list_stream_jobs),
        )
        .route(
            "/transcoding/jobs/:id",
            get(handlers::jobs::get_job).delete(handlers::jobs::delete_job),
        )
        .route("/transcoding/jobs/:id/stop", post(handlers::jobs::stop_job))
        .route(
            "/transcoding/master-playlist/:stream_id",
            post(handlers::jobs::generate_master_playlist),
        )
        .route("/transcoding/status", get(handlers::jobs::transcoding_status))
        // Provisioning
        .route("/events", post(handlers::events::create_event))
        .route("/events/:id", get(handlers::events::get_event))
        .route("/events/:id/status", put(handlers::events::update_event_status))
        .route(
            "/events/:id/streams",
            get(handlers::events::list_event_streams).post(handlers::events::create_stream),
        )
        .route("/streams/:id", get(handlers::events::get_stream))
        .route("/streams/:id/rotate-key", post(handlers::events::rotate_stream_key))
        .route("/streams/:id/viewers", post(handlers::events::report_viewers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
