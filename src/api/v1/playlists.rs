use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::api::common::middleware::Claims;
use crate::api::common::ApiResponse;
use crate::errors::AppError;
use crate::InnerState;

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub center_id: Option<String>,
    pub is_active: bool,
    pub is_student_editable: bool,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

/// A playlist item joined with the video fields a display needs.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ItemWithVideo {
    pub id: String,
    pub playlist_id: String,
    pub video_id: String,
    pub position: i32,
    pub title: String,
    pub status: String,
    pub vimeo_id: Option<String>,
    pub vimeo_hash: Option<String>,
    pub duration_seconds: Option<i32>,
    pub thumbnail_url: Option<String>,
    pub frames_urls: Vec<String>,
    pub video_type: String,
}

impl ItemWithVideo {
    pub fn is_playable(&self) -> bool {
        self.status == "published" && self.vimeo_id.is_some()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemsResponse {
    pub playlist: Playlist,
    pub items: Vec<ItemWithVideo>,
}

/// Fetches a playlist that is present AND active; anything else is a 404 to
/// the caller (inactive playlists are invisible, not forbidden).
pub async fn get_active_playlist(pool: &PgPool, playlist_id: &str) -> Result<Playlist, AppError> {
    sqlx::query_as::<_, Playlist>(r#"SELECT * FROM playlists WHERE id = $1 AND is_active = TRUE"#)
        .bind(playlist_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Playlist '{}' not found", playlist_id)))
}

/// Ordered item scan: position ascending, the order displays play in.
pub async fn fetch_playlist_items(
    pool: &PgPool,
    playlist_id: &str,
) -> Result<Vec<ItemWithVideo>, AppError> {
    let items = sqlx::query_as::<_, ItemWithVideo>(
        r#"
        SELECT pi.id, pi.playlist_id, pi.video_id, pi.position,
               v.title, v.status, v.vimeo_id, v.vimeo_hash,
               v.duration_seconds, v.thumbnail_url, v.frames_urls, v.video_type
        FROM playlist_items pi
        INNER JOIN videos v ON v.id = pi.video_id
        WHERE pi.playlist_id = $1
        ORDER BY pi.position ASC
        "#,
    )
    .bind(playlist_id)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

/// Gate for item mutations: center scoping first, then the student-edit
/// flag. Checked before any mutation is attempted.
pub fn authorize_playlist_mutation(claims: &Claims, playlist: &Playlist) -> Result<(), AppError> {
    match (&playlist.kind[..], &playlist.center_id) {
        ("center", Some(center_id)) => claims.authorize_center(center_id)?,
        // Global playlists are platform content.
        _ => {
            if !claims.is_admin() {
                return Err(AppError::Forbidden(
                    "Only administrators may edit the global playlist".to_string(),
                ));
            }
        }
    }

    if claims.is_student() && !playlist.is_student_editable {
        return Err(AppError::Forbidden(format!(
            "Playlist '{}' is not open to student edits",
            playlist.id
        )));
    }

    Ok(())
}

#[tracing::instrument(name = "Get playlist items", skip(inner, _claims))]
pub async fn get_playlist_items(
    State(inner): State<InnerState>,
    Extension(_claims): Extension<Claims>,
    Path(playlist_id): Path<String>,
) -> Result<Json<ApiResponse<PlaylistItemsResponse>>, AppError> {
    let InnerState { db, .. } = inner;

    let fetch_timeout = tokio::time::Duration::from_millis(5000);

    let playlist = tokio::time::timeout(fetch_timeout, get_active_playlist(&db, &playlist_id))
        .await??;
    let items = tokio::time::timeout(fetch_timeout, fetch_playlist_items(&db, &playlist_id))
        .await??;

    let streamable = items.iter().filter(|item| item.is_playable()).count();
    tracing::debug!(
        "Returning {} items ({} streamable) for playlist {}",
        items.len(),
        streamable,
        playlist_id
    );

    Ok(Json(ApiResponse::success(PlaylistItemsResponse {
        playlist,
        items,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(kind: &str, center_id: Option<&str>, student_editable: bool) -> Playlist {
        Playlist {
            id: "p1".to_string(),
            name: "Test".to_string(),
            kind: kind.to_string(),
            center_id: center_id.map(str::to_string),
            is_active: true,
            is_student_editable: student_editable,
            created_at: None,
            updated_at: None,
        }
    }

    fn claims(role: &str, center_id: Option<&str>) -> Claims {
        Claims {
            sub: "user@example.com".to_string(),
            user_id: "u1".to_string(),
            role: role.to_string(),
            center_id: center_id.map(str::to_string),
            exp: 0,
        }
    }

    #[test]
    fn teacher_may_edit_own_center_playlist() {
        let result = authorize_playlist_mutation(
            &claims("teacher", Some("c1")),
            &playlist("center", Some("c1"), false),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn teacher_may_not_edit_other_center_playlist() {
        let result = authorize_playlist_mutation(
            &claims("teacher", Some("c1")),
            &playlist("center", Some("c2"), false),
        );
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn student_needs_the_editable_flag() {
        let center = playlist("center", Some("c1"), false);
        let result = authorize_playlist_mutation(&claims("student", Some("c1")), &center);
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let open = playlist("center", Some("c1"), true);
        assert!(authorize_playlist_mutation(&claims("student", Some("c1")), &open).is_ok());
    }

    #[test]
    fn global_playlist_is_admin_only() {
        let global = playlist("global", None, false);
        assert!(matches!(
            authorize_playlist_mutation(&claims("teacher", Some("c1")), &global),
            Err(AppError::Forbidden(_))
        ));
        assert!(authorize_playlist_mutation(&claims("admin", None), &global).is_ok());
    }
}
