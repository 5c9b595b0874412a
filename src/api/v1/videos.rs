use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::api::common::middleware::Claims;
use crate::api::common::ApiResponse;
use crate::errors::AppError;
use crate::vimeo::UploadTicket;
use crate::InnerState;

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub title: String,
    pub status: String,
    pub vimeo_id: Option<String>,
    pub vimeo_hash: Option<String>,
    pub duration_seconds: Option<i32>,
    pub thumbnail_url: Option<String>,
    pub frames_urls: Vec<String>,
    pub video_type: String,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl Video {
    /// Eligibility for live playback: published on the host and carrying a
    /// resolvable host identifier. Everything else is silently excluded
    /// from a playlist's playable set.
    pub fn is_playable(&self) -> bool {
        self.status == "published" && self.vimeo_id.is_some()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideoRequest {
    pub title: String,
    pub size_bytes: i64,
    pub video_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideoResponse {
    pub video: Video,
    pub upload: UploadTicket,
}

/// Requests an upload slot from the video host, then creates the local
/// `pending` row. The host call goes first: if it fails, no local row is
/// created, so a half-created item can never appear in a playlist.
#[tracing::instrument(name = "Create video with upload ticket", skip(inner, claims, payload))]
pub async fn create_video(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateVideoRequest>,
) -> Result<Json<ApiResponse<CreateVideoResponse>>, AppError> {
    let InnerState { db, vimeo, .. } = inner;

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Video title must not be empty".to_string()));
    }
    if payload.size_bytes <= 0 {
        return Err(AppError::Validation(
            "Video size must be a positive number of bytes".to_string(),
        ));
    }
    let video_type = payload.video_type.unwrap_or_else(|| "content".to_string());
    if video_type != "content" && video_type != "announcement" {
        return Err(AppError::Validation(format!(
            "Unknown video type '{}'",
            video_type
        )));
    }

    let ticket = vimeo.create_upload(title, payload.size_bytes).await?;

    let video_id = Uuid::new_v4().to_string();
    let video = sqlx::query_as::<_, Video>(
        r#"
        INSERT INTO videos (id, title, status, vimeo_id, vimeo_hash, video_type)
        VALUES ($1, $2, 'pending', $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(&video_id)
    .bind(title)
    .bind(&ticket.video_id)
    .bind(&ticket.privacy_hash)
    .bind(&video_type)
    .fetch_one(&db)
    .await?;

    tracing::info!(
        "Created video {} with host id {} for user {}",
        video.id,
        ticket.video_id,
        claims.user_id
    );

    Ok(Json(ApiResponse::success(CreateVideoResponse {
        video,
        upload: ticket,
    })))
}

/// Refreshes status, privacy hash, duration and thumbnail from the video
/// host. A failed host call changes nothing locally.
#[tracing::instrument(name = "Sync video from host", skip(inner, claims))]
pub async fn sync_video(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Path(video_id): Path<String>,
) -> Result<Json<ApiResponse<Video>>, AppError> {
    let InnerState { db, vimeo, .. } = inner;

    let fetch_timeout = tokio::time::Duration::from_millis(5000);

    let video = tokio::time::timeout(
        fetch_timeout,
        sqlx::query_as::<_, Video>(r#"SELECT * FROM videos WHERE id = $1"#)
            .bind(&video_id)
            .fetch_optional(&db),
    )
    .await??
    .ok_or_else(|| AppError::NotFound(format!("Video '{}' not found", video_id)))?;

    let host_id = video.vimeo_id.as_deref().ok_or_else(|| {
        AppError::Validation(format!(
            "Video '{}' has no host identifier to sync from",
            video_id
        ))
    })?;

    let info = vimeo.get_video(host_id).await?;

    let status = if info.is_published() {
        "published"
    } else {
        "processing"
    };

    let updated = sqlx::query_as::<_, Video>(
        r#"
        UPDATE videos
        SET status = $2,
            vimeo_hash = COALESCE($3, vimeo_hash),
            duration_seconds = COALESCE($4, duration_seconds),
            thumbnail_url = COALESCE($5, thumbnail_url),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(&video_id)
    .bind(status)
    .bind(&info.privacy_hash)
    .bind(info.duration_seconds)
    .bind(&info.thumbnail_url)
    .fetch_one(&db)
    .await?;

    tracing::info!(
        "Synced video {} from host (status {}, playable {}) for user {}",
        video_id,
        updated.status,
        updated.is_playable(),
        claims.user_id
    );

    Ok(Json(ApiResponse::success(updated)))
}
