//! V1 API route definitions
//!
//! Everything under here requires a valid token; the auth middleware puts
//! the decoded claims on the request for handlers to consume.

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::api::common::middleware::auth_middleware;
use crate::api::v1::displays::{
    create_session, delete_session, get_manifest, signal_session, stream_display,
};
use crate::api::v1::overrides::{batch_delete_overrides, list_overrides, upsert_overrides};
use crate::api::v1::playlist_items::{add_item, delete_item, reorder};
use crate::api::v1::playlists::get_playlist_items;
use crate::api::v1::videos::{create_video, sync_video};
use crate::InnerState;

#[tracing::instrument(name = "create_v1_routes", skip(state))]
pub fn create_v1_routes(state: InnerState) -> Router {
    tracing::info!("Setting up V1 API routes");

    Router::new()
        // Playlist item routes
        .route("/playlists/:playlist_id/items", get(get_playlist_items))
        .route("/playlists/:playlist_id/items", post(add_item))
        .route(
            "/playlists/:playlist_id/items/:video_id",
            delete(delete_item),
        )
        .route("/playlists/:playlist_id/items/order", put(reorder))
        // Schedule override routes
        .route("/schedule-overrides", get(list_overrides))
        .route("/schedule-overrides", post(upsert_overrides))
        .route(
            "/schedule-overrides/batch-delete",
            post(batch_delete_overrides),
        )
        // Display routes
        .route("/displays/:center_id/manifest", get(get_manifest))
        .route("/displays/:center_id/stream", get(stream_display))
        .route("/displays/sessions", post(create_session))
        .route("/displays/sessions/:session_id/signal", post(signal_session))
        .route("/displays/sessions/:session_id", delete(delete_session))
        // Video host routes
        .route("/videos", post(create_video))
        .route("/videos/:video_id/sync", post(sync_video))
        .layer(middleware::from_fn(auth_middleware))
        .with_state(state)
}
