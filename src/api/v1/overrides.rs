//! Day-specific schedule overrides.
//!
//! An override row maps (center, calendar day) to the playlist that plays
//! that day instead of the center's default rotation. Resolution is total:
//! override wins unconditionally, then the center default, then the active
//! global playlist.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::api::common::middleware::Claims;
use crate::api::common::ApiResponse;
use crate::errors::AppError;
use crate::InnerState;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOverride {
    pub id: String,
    pub center_id: String,
    pub date: NaiveDate,
    pub playlist_id: String,
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOverridesParams {
    pub center: Option<String>,
    pub month: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOverridesRequest {
    pub center_id: Option<String>,
    pub playlist_id: String,
    pub dates: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteRequest {
    pub center_id: Option<String>,
    pub dates: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResponse {
    pub deleted: u64,
}

/// Digits in every position except the fixed dashes. chrono alone is too
/// lenient here: `%Y-%m-%d` also parses unpadded input like `2026-9-1`.
fn has_calendar_shape(raw: &str, dash_positions: &[usize], len: usize) -> bool {
    raw.len() == len
        && raw.bytes().enumerate().all(|(i, b)| {
            if dash_positions.contains(&i) {
                b == b'-'
            } else {
                b.is_ascii_digit()
            }
        })
}

/// Strict `YYYY-MM-DD` parse: exact shape first, then calendar validity.
pub fn parse_calendar_date(raw: &str) -> Result<NaiveDate, AppError> {
    let trimmed = raw.trim();
    if !has_calendar_shape(trimmed, &[4, 7], 10) {
        return Err(AppError::Validation(format!(
            "Invalid date '{}': expected YYYY-MM-DD",
            raw
        )));
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT).map_err(|_| {
        AppError::Validation(format!("Invalid date '{}': expected YYYY-MM-DD", raw))
    })
}

/// Strict calendar-date validation, all-or-nothing: the first malformed
/// entry rejects the whole batch before any row is touched.
pub fn parse_schedule_dates(dates: &[String]) -> Result<Vec<NaiveDate>, AppError> {
    if dates.is_empty() {
        return Err(AppError::Validation("dates must not be empty".to_string()));
    }
    dates.iter().map(|raw| parse_calendar_date(raw)).collect()
}

/// Half-open [first day, first day of next month) range for a `YYYY-MM`
/// month string.
pub fn month_bounds(month: &str) -> Result<(NaiveDate, NaiveDate), AppError> {
    let trimmed = month.trim();
    if !has_calendar_shape(trimmed, &[4], 7) {
        return Err(AppError::Validation(format!(
            "Invalid month '{}': expected YYYY-MM",
            month
        )));
    }
    let start = NaiveDate::parse_from_str(&format!("{}-01", trimmed), DATE_FORMAT)
        .map_err(|_| {
            AppError::Validation(format!("Invalid month '{}': expected YYYY-MM", month))
        })?;
    let end = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    }
    .ok_or_else(|| AppError::Validation(format!("Invalid month '{}'", month)))?;
    Ok((start, end))
}

/// Which playlist a center's displays play on a given day. Pure read; an
/// override wins outright, else the center default, else the active global
/// playlist. NotFound only when none of the three is configured.
#[tracing::instrument(name = "Resolve active playlist", skip(pool))]
pub async fn resolve_active_playlist(
    pool: &PgPool,
    center_id: &str,
    date: NaiveDate,
) -> Result<String, AppError> {
    let overridden = sqlx::query_scalar::<_, String>(
        r#"SELECT playlist_id FROM schedule_overrides WHERE center_id = $1 AND date = $2"#,
    )
    .bind(center_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    if let Some(playlist_id) = overridden {
        tracing::debug!("Override playlist {} for center {} on {}", playlist_id, center_id, date);
        return Ok(playlist_id);
    }

    let center_default = sqlx::query_scalar::<_, Option<String>>(
        r#"SELECT default_playlist_id FROM centers WHERE id = $1"#,
    )
    .bind(center_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Center '{}' not found", center_id)))?;

    if let Some(playlist_id) = center_default {
        return Ok(playlist_id);
    }

    sqlx::query_scalar::<_, String>(
        r#"
        SELECT id FROM playlists
        WHERE kind = 'global' AND is_active = TRUE
        ORDER BY updated_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| {
        AppError::NotFound(format!(
            "No playlist configured for center '{}' and no global playlist exists",
            center_id
        ))
    })
}

fn target_center(claims: &Claims, requested: Option<String>) -> Result<String, AppError> {
    let center_id = requested
        .or_else(|| claims.center_id.clone())
        .ok_or_else(|| AppError::Validation("No center specified".to_string()))?;
    claims.authorize_center(&center_id)?;
    Ok(center_id)
}

#[tracing::instrument(name = "List schedule overrides", skip(inner, claims))]
pub async fn list_overrides(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ListOverridesParams>,
) -> Result<Json<ApiResponse<Vec<ScheduleOverride>>>, AppError> {
    let InnerState { db, .. } = inner;

    let center_id = target_center(&claims, params.center)?;
    let month = params
        .month
        .ok_or_else(|| AppError::Validation("month query parameter is required".to_string()))?;
    let (start, end) = month_bounds(&month)?;

    let overrides = sqlx::query_as::<_, ScheduleOverride>(
        r#"
        SELECT * FROM schedule_overrides
        WHERE center_id = $1 AND date >= $2 AND date < $3
        ORDER BY date ASC
        "#,
    )
    .bind(&center_id)
    .bind(start)
    .bind(end)
    .fetch_all(&db)
    .await?;

    tracing::debug!(
        "Found {} override(s) for center {} in {}",
        overrides.len(),
        center_id,
        month
    );

    Ok(Json(ApiResponse::success(overrides)))
}

/// Replaces or creates one override row per date, scoped to one center.
#[tracing::instrument(name = "Upsert schedule overrides", skip(inner, claims, payload))]
pub async fn upsert_overrides(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpsertOverridesRequest>,
) -> Result<Json<ApiResponse<Vec<ScheduleOverride>>>, AppError> {
    let InnerState { db, .. } = inner;

    if claims.is_student() {
        return Err(AppError::Forbidden(
            "Students may not edit the schedule".to_string(),
        ));
    }

    let center_id = target_center(&claims, payload.center_id)?;
    // Validation pass completes before any mutation pass begins.
    let dates = parse_schedule_dates(&payload.dates)?;

    let playlist = sqlx::query_as::<_, (String, Option<String>)>(
        r#"SELECT kind, center_id FROM playlists WHERE id = $1"#,
    )
    .bind(&payload.playlist_id)
    .fetch_optional(&db)
    .await?
    .ok_or_else(|| {
        AppError::NotFound(format!("Playlist '{}' not found", payload.playlist_id))
    })?;

    // A center may schedule its own playlists or global ones, never another
    // center's.
    if let (_, Some(owner)) = &playlist {
        if owner != &center_id {
            return Err(AppError::Forbidden(format!(
                "Playlist '{}' belongs to another center",
                payload.playlist_id
            )));
        }
    }

    let mut tx = db.begin().await?;
    let mut upserted = Vec::with_capacity(dates.len());
    for date in &dates {
        let row = sqlx::query_as::<_, ScheduleOverride>(
            r#"
            INSERT INTO schedule_overrides (id, center_id, date, playlist_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (center_id, date)
            DO UPDATE SET playlist_id = EXCLUDED.playlist_id
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&center_id)
        .bind(date)
        .bind(&payload.playlist_id)
        .fetch_one(&mut *tx)
        .await;

        match row {
            Ok(row) => upserted.push(row),
            Err(e) => {
                tx.rollback().await?;
                return Err(AppError::from(e));
            }
        }
    }
    tx.commit().await?;

    tracing::info!(
        "Upserted {} override(s) for center {} onto playlist {}",
        upserted.len(),
        center_id,
        payload.playlist_id
    );

    Ok(Json(ApiResponse::success(upserted)))
}

/// Deletes the override rows matching the center and the date set. Dates
/// with no row are silent no-ops; running the same delete twice is safe.
#[tracing::instrument(name = "Batch delete schedule overrides", skip(inner, claims, payload))]
pub async fn batch_delete_overrides(
    State(inner): State<InnerState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<BatchDeleteRequest>,
) -> Result<Json<ApiResponse<BatchDeleteResponse>>, AppError> {
    let InnerState { db, .. } = inner;

    if claims.is_student() {
        return Err(AppError::Forbidden(
            "Students may not edit the schedule".to_string(),
        ));
    }

    let center_id = target_center(&claims, payload.center_id)?;
    // Reject the whole batch before deleting any row.
    let dates = parse_schedule_dates(&payload.dates)?;

    let result = sqlx::query(
        r#"DELETE FROM schedule_overrides WHERE center_id = $1 AND date = ANY($2)"#,
    )
    .bind(&center_id)
    .bind(&dates)
    .execute(&db)
    .await?;

    tracing::info!(
        "Deleted {} of {} requested override(s) for center {}",
        result.rows_affected(),
        dates.len(),
        center_id
    );

    Ok(Json(ApiResponse::success(BatchDeleteResponse {
        deleted: result.rows_affected(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(dates: &[&str]) -> Vec<String> {
        dates.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn parses_well_formed_dates() {
        let dates = parse_schedule_dates(&raw(&["2026-09-01", "2026-09-15"])).unwrap();
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2026, 9, 1).unwrap());
    }

    #[test]
    fn one_malformed_date_rejects_the_whole_batch() {
        let result = parse_schedule_dates(&raw(&["2026-09-01", "09/15/2026", "2026-09-30"]));
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn rejects_dates_with_time_components() {
        assert!(parse_schedule_dates(&raw(&["2026-09-01T00:00:00"])).is_err());
    }

    #[test]
    fn rejects_impossible_calendar_days() {
        assert!(parse_schedule_dates(&raw(&["2026-02-30"])).is_err());
    }

    #[test]
    fn rejects_unpadded_dates() {
        assert!(parse_schedule_dates(&raw(&["2026-9-1"])).is_err());
        assert!(parse_schedule_dates(&raw(&["2026-09-1"])).is_err());
        assert!(parse_schedule_dates(&raw(&["26-09-01"])).is_err());
        // The padded form still goes through.
        assert!(parse_schedule_dates(&raw(&["2026-09-01"])).is_ok());
    }

    #[test]
    fn empty_date_list_is_a_validation_error() {
        assert!(matches!(
            parse_schedule_dates(&[]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn month_bounds_cover_the_whole_month() {
        let (start, end) = month_bounds("2026-09").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 9, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 10, 1).unwrap());
    }

    #[test]
    fn month_bounds_wrap_december_into_january() {
        let (start, end) = month_bounds("2026-12").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 12, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2027, 1, 1).unwrap());
    }

    #[test]
    fn month_bounds_reject_garbage() {
        assert!(month_bounds("september").is_err());
        assert!(month_bounds("2026-13").is_err());
        assert!(month_bounds("2026-9").is_err());
    }
}
