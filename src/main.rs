mod api;
mod db;
mod display;
mod errors;
mod system;
mod vimeo;

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use axum_prometheus::PrometheusMetricLayer;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::api::v1::displays::PlaybackSessions;
use crate::db::init_db;
use crate::vimeo::VimeoClient;

#[derive(Clone)]
pub struct InnerState {
    pub db: PgPool,
    pub vimeo: VimeoClient,
    pub playback_sessions: PlaybackSessions,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_signage=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = init_db().await?;

    let vimeo = VimeoClient::new(
        std::env::var("VIMEO_BASE_URL").unwrap_or_else(|_| "https://api.vimeo.com".to_string()),
        std::env::var("VIMEO_TOKEN")?,
    );

    let playback_sessions: PlaybackSessions = Arc::new(RwLock::new(HashMap::new()));

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app_state = InnerState {
        db,
        vimeo,
        playback_sessions,
    };

    let app = Router::new()
        .nest("/api", api::create_api_router(app_state))
        .merge(system::create_system_router())
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(prometheus_layer);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3001")
        .await
        .expect("Could not initialize TcpListener");

    tracing::debug!(
        "listening on {}",
        listener
            .local_addr()
            .expect("Could not convert listener address to local address")
    );

    axum::serve(listener, app)
        .await
        .expect("Could not successfully connect");

    Ok(())
}
