//! API Routes

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Detection, DetectionFilter, SpeciesCount};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        // Detections
        .route("/api/detections", get(list_detections))
        .route("/api/stats", get(species_stats))
        .with_state(state)
}

/// Query parameters for the detections endpoint
#[derive(Deserialize)]
struct DetectionQuery {
    date_start: Option<String>,
    date_end: Option<String>,
    common_name: Option<String>,
    limit: Option<u32>,
}

/// Query parameters for the stats endpoint
#[derive(Deserialize)]
struct StatsQuery {
    date_start: Option<String>,
    date_end: Option<String>,
}

/// List detections, newest first, filtered and capped
async fn list_detections(
    State(state): State<AppState>,
    Query(query): Query<DetectionQuery>,
) -> Result<Json<Vec<Detection>>> {
    let filter = DetectionFilter {
        date_start: parse_date(query.date_start.as_deref())?,
        date_end: parse_date(query.date_end.as_deref())?,
        common_name: query.common_name.filter(|s| !s.is_empty()),
        limit: query.limit,
    };

    let detections = state.repository.query(&filter).await?;
    Ok(Json(detections))
}

/// Species counts for a date range, most frequent first
async fn species_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<SpeciesCount>>> {
    let date_start = parse_date(query.date_start.as_deref())?;
    let date_end = parse_date(query.date_end.as_deref())?;

    let counts = state.repository.species_counts(date_start, date_end).await?;
    Ok(Json(counts))
}

fn parse_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| Error::Validation(format!("invalid date '{s}', expected YYYY-MM-DD"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date(Some("2026-08-20")).unwrap(),
            NaiveDate::from_ymd_opt(2026, 8, 20)
        );
        assert_eq!(parse_date(None).unwrap(), None);
        assert_eq!(parse_date(Some("")).unwrap(), None);
        assert!(parse_date(Some("20/08/2026")).is_err());
    }
}
