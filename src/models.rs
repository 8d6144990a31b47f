//! Shared models and types for the bridge
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One species-identification event, independent of the physical schema.
///
/// `id` is the sole identity and ordering key. `timestamp` may be
/// non-monotonic (clock adjustments, backfilled rows) and is never used
/// to decide new-vs-seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub common_name: String,
    pub scientific_name: String,
    pub confidence: f64,
    /// Audio clip path, passed through opaquely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_path: Option<String>,
}

/// Filter set for the REST query path
#[derive(Debug, Clone, Default)]
pub struct DetectionFilter {
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub common_name: Option<String>,
    pub limit: Option<u32>,
}

/// Per-species detection count for the stats endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesCount {
    pub common_name: String,
    pub scientific_name: String,
    pub count: i64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub schema_variant: String,
    pub db_connected: bool,
    pub mqtt_enabled: bool,
}
