//! What a booted display asks for: the manifest (today's resolved playlist,
//! its playable items and the still-frame fallback) and a playback session
//! whose end/error signals drive the sequencer server-side.

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Extension, Json};
use chrono::{NaiveDate, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::api::common::middleware::Claims;
use crate::api::common::ApiResponse;
use crate::api::v1::overrides::{parse_calendar_date, resolve_active_playlist};
use crate::api::v1::playlists::{fetch_playlist_items, ItemWithVideo, Playlist};
use crate::display::frames::{build_frame_sequence, FrameSource, DEFAULT_ROTATION_INTERVAL};
use crate::display::sequencer::{
    run_display_loop, Directive, DisplayEvent, PlayableItem, PlaybackSequencer, PlaybackSignal,
};
use crate::errors::AppError;
use crate::InnerState;

/// A session whose display stops signalling is reclaimed after this long.
const SESSION_IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// One display session: its sequencer plus the last moment the display was
/// heard from, so abandoned sessions can be reclaimed.
pub struct SessionEntry {
    pub sequencer: PlaybackSequencer,
    last_touched: tokio::time::Instant,
}

impl SessionEntry {
    fn new(sequencer: PlaybackSequencer) -> Self {
        Self {
            sequencer,
            last_touched: tokio::time::Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_touched = tokio::time::Instant::now();
    }
}

/// Server-tracked sequencers, one per active display session.
pub type PlaybackSessions = Arc<RwLock<HashMap<Uuid, SessionEntry>>>;

/// Drops sessions whose display has been silent past the idle timeout.
/// Runs opportunistically under the write lock on session creation; there
/// is no background reaper task to coordinate with.
fn sweep_expired(sessions: &mut HashMap<Uuid, SessionEntry>) {
    let before = sessions.len();
    sessions.retain(|_, entry| entry.last_touched.elapsed() < SESSION_IDLE_TIMEOUT);
    let swept = before - sessions.len();
    if swept > 0 {
        tracing::info!("Reclaimed {} abandoned playback session(s)", swept);
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayManifest {
    pub center_id: String,
    pub date: NaiveDate,
    pub playlist: Playlist,
    pub items: Vec<PlayableItem>,
    pub fallback_frames: Vec<String>,
    pub rotation_interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestParams {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub center_id: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub directive: Directive,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    pub signal: PlaybackSignal,
}

fn parse_date_or_today(raw: Option<String>) -> Result<NaiveDate, AppError> {
    match raw {
        Some(raw) => parse_calendar_date(&raw),
        None => Ok(Utc::now().date_naive()),
    }
}

/// Projects a joined item row into what the sequencer runs on. Items whose
/// video is not published are excluded outright (data-quality filter, not
/// an error); published videos without a host identifier survive with their
/// frames as the only source and will render as a rotation.
fn to_playable(items: Vec<ItemWithVideo>) -> Vec<PlayableItem> {
    items
        .into_iter()
        .filter(|item| item.status == "published")
        .map(|item| {
            let frames = if !item.frames_urls.is_empty() {
                item.frames_urls
            } else {
                item.thumbnail_url.into_iter().collect()
            };
            PlayableItem {
                video_id: item.video_id,
                title: item.title,
                position: item.position,
                vimeo_id: item.vimeo_id,
                vimeo_hash: item.vimeo_hash,
                frames,
                duration_seconds: item.duration_seconds,
            }
        })
        .collect()
}

async fn build_manifest(
    pool: &PgPool,
    center_id: &str,
    date: NaiveDate,
) -> Result<DisplayManifest, AppError> {
    let playlist_id = resolve_active_playlist(pool, center_id, date).await?;

    let playlist = sqlx::query_as::<_, Playlist>(r#"SELECT * FROM playlists WHERE id = $1"#)
        .bind(&playlist_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Resolved playlist '{}' no longer exists",
                playlist_id
            ))
        })?;

    let rows = fetch_playlist_items(pool, &playlist_id).await?;

    let frame_sources: Vec<FrameSource> = rows
        .iter()
        .filter(|item| item.status == "published")
        .map(|item| FrameSource {
            frames_urls: item.frames_urls.clone(),
            thumbnail_url: item.thumbnail_url.clone(),
        })
        .collect();
    let fallback_frames = build_frame_sequence(&frame_sources);

    let items = to_playable(rows);

    Ok(DisplayManifest {
        center_id: center_id.to_string(),
        date,
        playlist,
        items,
        fallback_frames,
        rotation_interval_seconds: DEFAULT_ROTATION_INTERVAL.as_secs(),
    })
}

#[tracing::instrument(name = "Get display manifest", skip(inner, claims))]
pub async fn get_manifest(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Path(center_id): Path<String>,
    Query(params): Query<ManifestParams>,
) -> Result<Json<ApiResponse<DisplayManifest>>, AppError> {
    let InnerState { db, .. } = inner;

    claims.authorize_center(&center_id)?;
    let date = parse_date_or_today(params.date)?;

    let manifest = build_manifest(&db, &center_id, date).await?;

    tracing::info!(
        "Manifest for center {} on {}: playlist {} with {} playable item(s)",
        center_id,
        date,
        manifest.playlist.id,
        manifest.items.len()
    );

    Ok(Json(ApiResponse::success(manifest)))
}

/// Server-sent event stream for signage screens that only rotate frames: one
/// `directive` event up front, then a `frame` event per rotation tick.
#[tracing::instrument(name = "Stream display events", skip(inner, claims))]
pub async fn stream_display(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Path(center_id): Path<String>,
    Query(params): Query<ManifestParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let InnerState { db, .. } = inner;

    claims.authorize_center(&center_id)?;
    let date = parse_date_or_today(params.date)?;
    let manifest = build_manifest(&db, &center_id, date).await?;

    let sequencer = PlaybackSequencer::new(manifest.items);
    let (signal_tx, signal_rx) = mpsc::channel::<PlaybackSignal>(1);
    let (event_tx, event_rx) = mpsc::channel::<DisplayEvent>(16);
    tokio::spawn(run_display_loop(
        sequencer,
        signal_rx,
        event_tx,
        DEFAULT_ROTATION_INTERVAL,
    ));

    tracing::info!("Streaming display events for center {} on {}", center_id, date);

    // The signal sender rides along in the stream state, so a client
    // disconnect closes both channels and the loop winds down on its own.
    let stream = futures::stream::unfold(
        (event_rx, signal_tx),
        |(mut event_rx, signal_tx)| async move {
            let event = event_rx.recv().await?;
            let sse = match event {
                DisplayEvent::Directive(directive) => Event::default()
                    .event("directive")
                    .json_data(&directive)
                    .unwrap_or_default(),
                DisplayEvent::Frame(url) => Event::default().event("frame").data(url),
            };
            Some((Ok(sse), (event_rx, signal_tx)))
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[tracing::instrument(name = "Create playback session", skip(inner, claims, payload))]
pub async fn create_session(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, AppError> {
    let InnerState {
        db,
        playback_sessions,
        ..
    } = inner;

    let center_id = payload
        .center_id
        .or_else(|| claims.center_id.clone())
        .ok_or_else(|| AppError::Validation("No center specified".to_string()))?;
    claims.authorize_center(&center_id)?;
    let date = parse_date_or_today(payload.date)?;

    let manifest = build_manifest(&db, &center_id, date).await?;
    let mut sequencer = PlaybackSequencer::new(manifest.items);
    let directive = sequencer.start();

    let session_id = Uuid::new_v4();
    {
        let mut sessions = playback_sessions.write().await;
        sweep_expired(&mut sessions);
        sessions.insert(session_id, SessionEntry::new(sequencer));
    }

    tracing::info!(
        "Started playback session {} for center {} on {}",
        session_id,
        center_id,
        date
    );

    Ok(Json(ApiResponse::success(SessionResponse {
        session_id,
        directive,
    })))
}

#[tracing::instrument(name = "Signal playback session", skip(inner, _claims, payload))]
pub async fn signal_session(
    State(inner): State<InnerState>,
    Extension(_claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SignalRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, AppError> {
    let InnerState {
        playback_sessions, ..
    } = inner;

    let mut sessions = playback_sessions.write().await;
    let entry = sessions.get_mut(&session_id).ok_or_else(|| {
        AppError::NotFound(format!("Playback session '{}' not found", session_id))
    })?;

    entry.touch();
    let directive = entry.sequencer.signal(payload.signal);

    if matches!(directive, Directive::Stop) {
        sessions.remove(&session_id);
        tracing::info!("Playback session {} stopped", session_id);
    }

    Ok(Json(ApiResponse::success(SessionResponse {
        session_id,
        directive,
    })))
}

#[tracing::instrument(name = "Delete playback session", skip(inner, _claims))]
pub async fn delete_session(
    State(inner): State<InnerState>,
    Extension(_claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let InnerState {
        playback_sessions, ..
    } = inner;

    let removed = playback_sessions.write().await.remove(&session_id);
    if removed.is_none() {
        return Err(AppError::NotFound(format!(
            "Playback session '{}' not found",
            session_id
        )));
    }

    tracing::info!("Playback session {} torn down", session_id);

    Ok(Json(ApiResponse::success_with_message(
        serde_json::json!({ "sessionId": session_id }),
        "Session removed",
    )))
}
