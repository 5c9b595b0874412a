//! Dense zero-based ordering of playlist items.
//!
//! Positions within a playlist always form 0..N-1 with no gaps or
//! duplicates. Appends take position = current size; removals renumber the
//! tail by one conditional decrement per row, applied in ascending position
//! order so the unique (playlist_id, position) constraint never observes a
//! transient duplicate and a replayed decrement is a no-op.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::api::common::middleware::Claims;
use crate::api::common::ApiResponse;
use crate::api::v1::playlists::{authorize_playlist_mutation, Playlist};
use crate::errors::AppError;
use crate::InnerState;

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub id: String,
    pub playlist_id: String,
    pub video_id: String,
    pub position: i32,
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub video_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub video_ids: Vec<String>,
}

/// Positions form a gap-free run starting at 0.
pub fn is_contiguous(positions: &[i32]) -> bool {
    positions
        .iter()
        .enumerate()
        .all(|(i, &p)| p == i as i32)
}

/// A reorder proposal must mention every current member exactly once.
pub fn is_permutation_of(current: &[String], proposed: &[String]) -> bool {
    if current.len() != proposed.len() {
        return false;
    }
    let mut a = current.to_vec();
    let mut b = proposed.to_vec();
    a.sort();
    b.sort();
    a == b
}

#[derive(Debug, PartialEq, Eq)]
pub struct RenumberStep {
    pub id: String,
    pub from: i32,
    pub to: i32,
}

/// Appends land at position = current size. The store counts in i64 while
/// positions are i32 columns, so the conversion is checked, not cast.
pub fn next_position(size: i64) -> Result<i32, AppError> {
    i32::try_from(size).map_err(|_| {
        AppError::Unexpected(anyhow::anyhow!(
            "Playlist size {} exceeds the supported position range",
            size
        ))
    })
}

/// Decrement plan for the rows above a removed position, in ascending
/// order. Applying a step is conditioned on `from` still being the row's
/// position, so replaying an already-applied step changes nothing.
pub fn renumber_plan(affected: &[(String, i32)]) -> Vec<RenumberStep> {
    affected
        .iter()
        .map(|(id, position)| RenumberStep {
            id: id.clone(),
            from: *position,
            to: *position - 1,
        })
        .collect()
}

/// Inserts a video at the end of a playlist. Position is the current item
/// count, so the contiguous run stays contiguous.
pub async fn append_item(
    transaction: &mut Transaction<'_, Postgres>,
    playlist_id: &str,
    video_id: &str,
) -> Result<PlaylistItem, AppError> {
    let already_present = sqlx::query_scalar::<_, i32>(
        r#"SELECT 1 FROM playlist_items WHERE playlist_id = $1 AND video_id = $2"#,
    )
    .bind(playlist_id)
    .bind(video_id)
    .fetch_optional(&mut **transaction)
    .await?;

    if already_present.is_some() {
        return Err(AppError::Conflict(format!(
            "Video '{}' is already in playlist '{}'",
            video_id, playlist_id
        )));
    }

    let size = sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM playlist_items WHERE playlist_id = $1"#,
    )
    .bind(playlist_id)
    .fetch_one(&mut **transaction)
    .await?;

    let item = sqlx::query_as::<_, PlaylistItem>(
        r#"
        INSERT INTO playlist_items (id, playlist_id, video_id, position)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(playlist_id)
    .bind(video_id)
    .bind(next_position(size)?)
    .fetch_one(&mut **transaction)
    .await?;

    touch_playlist(transaction, playlist_id).await?;

    tracing::info!(
        "Appended video {} to playlist {} at position {}",
        video_id,
        playlist_id,
        item.position
    );

    Ok(item)
}

/// Removes a video from a playlist and closes the gap it leaves.
pub async fn remove_item(
    transaction: &mut Transaction<'_, Postgres>,
    playlist_id: &str,
    video_id: &str,
) -> Result<i32, AppError> {
    let removed_position = sqlx::query_scalar::<_, i32>(
        r#"SELECT position FROM playlist_items WHERE playlist_id = $1 AND video_id = $2"#,
    )
    .bind(playlist_id)
    .bind(video_id)
    .fetch_optional(&mut **transaction)
    .await?
    .ok_or_else(|| {
        AppError::NotFound(format!(
            "Video '{}' is not in playlist '{}'",
            video_id, playlist_id
        ))
    })?;

    sqlx::query(r#"DELETE FROM playlist_items WHERE playlist_id = $1 AND video_id = $2"#)
        .bind(playlist_id)
        .bind(video_id)
        .execute(&mut **transaction)
        .await?;

    let affected = sqlx::query_as::<_, (String, i32)>(
        r#"
        SELECT id, position FROM playlist_items
        WHERE playlist_id = $1 AND position > $2
        ORDER BY position ASC
        "#,
    )
    .bind(playlist_id)
    .bind(removed_position)
    .fetch_all(&mut **transaction)
    .await?;

    for step in renumber_plan(&affected) {
        sqlx::query(
            r#"UPDATE playlist_items SET position = $3 WHERE id = $1 AND position = $2"#,
        )
        .bind(&step.id)
        .bind(step.from)
        .bind(step.to)
        .execute(&mut **transaction)
        .await?;
    }

    let positions = sqlx::query_scalar::<_, i32>(
        r#"SELECT position FROM playlist_items WHERE playlist_id = $1 ORDER BY position ASC"#,
    )
    .bind(playlist_id)
    .fetch_all(&mut **transaction)
    .await?;
    if !is_contiguous(&positions) {
        return Err(AppError::Unexpected(anyhow::anyhow!(
            "Playlist '{}' positions not contiguous after removal: {:?}",
            playlist_id,
            positions
        )));
    }

    touch_playlist(transaction, playlist_id).await?;

    tracing::info!(
        "Removed video {} from playlist {} at position {}, renumbered {} item(s)",
        video_id,
        playlist_id,
        removed_position,
        affected.len()
    );

    Ok(removed_position)
}

/// Applies a full reordering of a playlist. The proposal must be a
/// permutation of the current membership. Positions are assigned in two
/// phases (shift everything past the end, then place each video) so the
/// unique constraint never sees two rows on the same position.
pub async fn reorder_items(
    transaction: &mut Transaction<'_, Postgres>,
    playlist_id: &str,
    video_ids: &[String],
) -> Result<(), AppError> {
    let current = sqlx::query_scalar::<_, String>(
        r#"SELECT video_id FROM playlist_items WHERE playlist_id = $1 ORDER BY position ASC"#,
    )
    .bind(playlist_id)
    .fetch_all(&mut **transaction)
    .await?;

    if !is_permutation_of(&current, video_ids) {
        return Err(AppError::Validation(
            "New order must be a permutation of the playlist's current videos".to_string(),
        ));
    }

    let offset = current.len() as i32;
    sqlx::query(r#"UPDATE playlist_items SET position = position + $2 WHERE playlist_id = $1"#)
        .bind(playlist_id)
        .bind(offset)
        .execute(&mut **transaction)
        .await?;

    for (index, video_id) in video_ids.iter().enumerate() {
        sqlx::query(
            r#"UPDATE playlist_items SET position = $3 WHERE playlist_id = $1 AND video_id = $2"#,
        )
        .bind(playlist_id)
        .bind(video_id)
        .bind(index as i32)
        .execute(&mut **transaction)
        .await?;
    }

    touch_playlist(transaction, playlist_id).await?;

    tracing::info!(
        "Reordered {} item(s) in playlist {}",
        video_ids.len(),
        playlist_id
    );

    Ok(())
}

/// Consumers watch `updated_at` as the change signal, so every successful
/// item mutation bumps it.
async fn touch_playlist(
    transaction: &mut Transaction<'_, Postgres>,
    playlist_id: &str,
) -> Result<(), AppError> {
    sqlx::query(r#"UPDATE playlists SET updated_at = CURRENT_TIMESTAMP WHERE id = $1"#)
        .bind(playlist_id)
        .execute(&mut **transaction)
        .await?;
    Ok(())
}

/// Editors also manage inactive playlists, so mutation handlers look the
/// playlist up without the active filter.
async fn get_playlist_for_edit(pool: &PgPool, playlist_id: &str) -> Result<Playlist, AppError> {
    sqlx::query_as::<_, Playlist>(r#"SELECT * FROM playlists WHERE id = $1"#)
        .bind(playlist_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Playlist '{}' not found", playlist_id)))
}

#[tracing::instrument(name = "Add playlist item", skip(inner, claims, payload))]
pub async fn add_item(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Path(playlist_id): Path<String>,
    Json(payload): Json<AddItemRequest>,
) -> Result<Json<ApiResponse<PlaylistItem>>, AppError> {
    let InnerState { db, .. } = inner;

    if payload.video_id.trim().is_empty() {
        return Err(AppError::Validation("videoId must not be empty".to_string()));
    }

    let playlist = get_playlist_for_edit(&db, &playlist_id).await?;
    authorize_playlist_mutation(&claims, &playlist)?;

    let mut tx = db.begin().await?;
    let item = match append_item(&mut tx, &playlist_id, &payload.video_id).await {
        Ok(item) => item,
        Err(e) => {
            tx.rollback().await?;
            return Err(e);
        }
    };
    tx.commit().await?;

    Ok(Json(ApiResponse::success(item)))
}

#[tracing::instrument(name = "Delete playlist item", skip(inner, claims))]
pub async fn delete_item(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Path((playlist_id, video_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let InnerState { db, .. } = inner;

    let playlist = get_playlist_for_edit(&db, &playlist_id).await?;
    authorize_playlist_mutation(&claims, &playlist)?;

    let mut tx = db.begin().await?;
    let removed_position = match remove_item(&mut tx, &playlist_id, &video_id).await {
        Ok(position) => position,
        Err(e) => {
            tx.rollback().await?;
            return Err(e);
        }
    };
    tx.commit().await?;

    Ok(Json(ApiResponse::success_with_message(
        serde_json::json!({ "removedPosition": removed_position }),
        "Item removed and remaining items renumbered",
    )))
}

#[tracing::instrument(name = "Reorder playlist items", skip(inner, claims, payload))]
pub async fn reorder(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Path(playlist_id): Path<String>,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<ApiResponse<Vec<PlaylistItem>>>, AppError> {
    let InnerState { db, .. } = inner;

    let playlist = get_playlist_for_edit(&db, &playlist_id).await?;
    authorize_playlist_mutation(&claims, &playlist)?;

    let mut tx = db.begin().await?;
    if let Err(e) = reorder_items(&mut tx, &playlist_id, &payload.video_ids).await {
        tx.rollback().await?;
        return Err(e);
    }
    let items = sqlx::query_as::<_, PlaylistItem>(
        r#"SELECT * FROM playlist_items WHERE playlist_id = $1 ORDER BY position ASC"#,
    )
    .bind(&playlist_id)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Json(ApiResponse::success(items)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn contiguity_holds_for_gap_free_runs() {
        assert!(is_contiguous(&[]));
        assert!(is_contiguous(&[0]));
        assert!(is_contiguous(&[0, 1, 2, 3]));
    }

    #[test]
    fn contiguity_rejects_gaps_and_duplicates() {
        assert!(!is_contiguous(&[1, 2, 3]));
        assert!(!is_contiguous(&[0, 2, 3]));
        assert!(!is_contiguous(&[0, 1, 1]));
    }

    #[test]
    fn renumber_closes_the_gap_and_keeps_order() {
        // Items at [0,1,2,3]; position 1 removed; rows above shift down.
        let affected = vec![("c".to_string(), 2), ("d".to_string(), 3)];
        let plan = renumber_plan(&affected);
        assert_eq!(
            plan,
            vec![
                RenumberStep { id: "c".to_string(), from: 2, to: 1 },
                RenumberStep { id: "d".to_string(), from: 3, to: 2 },
            ]
        );

        // Remaining positions after applying the plan: a stays at 0.
        let remaining: Vec<i32> = std::iter::once(0).chain(plan.iter().map(|s| s.to)).collect();
        assert!(is_contiguous(&remaining));
    }

    #[test]
    fn renumber_of_last_item_is_a_no_op() {
        assert!(renumber_plan(&[]).is_empty());
    }

    #[test]
    fn append_position_equals_current_size() {
        assert_eq!(next_position(0).unwrap(), 0);
        assert_eq!(next_position(41).unwrap(), 41);
    }

    #[test]
    fn oversized_playlist_count_is_an_error_not_a_wraparound() {
        assert!(matches!(
            next_position(i64::from(i32::MAX) + 1),
            Err(AppError::Unexpected(_))
        ));
    }

    #[test]
    fn permutation_accepts_any_ordering_of_the_same_set() {
        let current = ids(&["a", "b", "c"]);
        assert!(is_permutation_of(&current, &ids(&["c", "a", "b"])));
        assert!(is_permutation_of(&current, &ids(&["a", "b", "c"])));
    }

    #[test]
    fn permutation_rejects_missing_extra_or_duplicated_members() {
        let current = ids(&["a", "b", "c"]);
        assert!(!is_permutation_of(&current, &ids(&["a", "b"])));
        assert!(!is_permutation_of(&current, &ids(&["a", "b", "c", "d"])));
        assert!(!is_permutation_of(&current, &ids(&["a", "b", "b"])));
        assert!(!is_permutation_of(&current, &ids(&["a", "b", "x"])));
    }
}
