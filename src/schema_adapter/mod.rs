//! SchemaAdapter - Physical Schema Polymorphism
//!
//! ## Responsibilities
//!
//! - Detect which of the two known layouts the source database uses
//! - Map variant-specific rows into the logical [`Detection`] shape
//!
//! The variant is determined once at startup and is immutable for the
//! process lifetime; the producer is assumed not to migrate its schema
//! while the bridge runs.
//!
//! ## Layouts
//!
//! - **V2** (BirdNET-Go): `detections(id, label_id, detected_at, confidence,
//!   clip_name)` joined against `labels(id, scientific_name)`. `detected_at`
//!   is Unix seconds.
//! - **Legacy** (BirdNET-Pi): flat `notes(Date, Time, Sci_Name, Com_Name,
//!   Confidence, File_Name)`; `rowid` serves as the ordering key.

use crate::error::{Error, Result};
use crate::models::Detection;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Physical layout of the source database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVariant {
    /// BirdNET-Go v2: detections + labels lookup table
    V2,
    /// BirdNET-Pi: single flat notes table
    Legacy,
}

impl SchemaVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVariant::V2 => "v2",
            SchemaVariant::Legacy => "legacy",
        }
    }
}

impl std::fmt::Display for SchemaVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe the database for a known table layout.
///
/// Fails with [`Error::SchemaDetection`] when neither layout is present;
/// the bridge cannot proceed without a recognized layout.
pub async fn detect(pool: &SqlitePool) -> Result<SchemaVariant> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name IN ('detections', 'labels', 'notes')",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| Error::SchemaDetection(format!("cannot read sqlite_master: {e}")))?;

    let mut has_detections = false;
    let mut has_labels = false;
    let mut has_notes = false;
    for row in &rows {
        let name: String = row
            .try_get("name")
            .map_err(|e| Error::SchemaDetection(e.to_string()))?;
        match name.as_str() {
            "detections" => has_detections = true,
            "labels" => has_labels = true,
            "notes" => has_notes = true,
            _ => {}
        }
    }

    if has_detections && has_labels {
        tracing::info!(variant = "v2", "Source schema detected");
        return Ok(SchemaVariant::V2);
    }
    if has_notes {
        tracing::info!(variant = "legacy", "Source schema detected");
        return Ok(SchemaVariant::Legacy);
    }

    Err(Error::SchemaDetection(
        "no recognized table layout (expected detections+labels or notes)".to_string(),
    ))
}

/// Map one raw row into the logical detection shape.
///
/// Total over rows that satisfy the variant's integrity assumptions. A row
/// that violates them (unresolvable label, unparseable timestamp) yields a
/// per-row [`Error::SchemaMapping`] which callers log and skip; latent
/// corruption in the source must never crash the bridge.
pub fn row_to_detection(row: &SqliteRow, variant: SchemaVariant) -> Result<Detection> {
    match variant {
        SchemaVariant::V2 => v2_row(row),
        SchemaVariant::Legacy => legacy_row(row),
    }
}

fn v2_row(row: &SqliteRow) -> Result<Detection> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| Error::DatabaseUnavailable(e.to_string()))?;

    // LEFT JOIN: a label_id that does not resolve comes back NULL
    let scientific_name: Option<String> = row
        .try_get("scientific_name")
        .map_err(|e| mapping(id, e))?;
    let scientific_name = scientific_name.ok_or_else(|| Error::SchemaMapping {
        id,
        reason: "label_id does not resolve in labels table".to_string(),
    })?;

    let detected_at: i64 = row.try_get("detected_at").map_err(|e| mapping(id, e))?;
    let timestamp =
        DateTime::<Utc>::from_timestamp(detected_at, 0).ok_or_else(|| Error::SchemaMapping {
            id,
            reason: format!("detected_at {detected_at} out of range"),
        })?;

    let confidence: f64 = row.try_get("confidence").map_err(|e| mapping(id, e))?;
    let clip_path: Option<String> = row.try_get("clip_name").map_err(|e| mapping(id, e))?;

    // V2 stores no common name; mirror the scientific name
    Ok(Detection {
        id,
        timestamp,
        common_name: scientific_name.clone(),
        scientific_name,
        confidence,
        clip_path,
    })
}

fn legacy_row(row: &SqliteRow) -> Result<Detection> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| Error::DatabaseUnavailable(e.to_string()))?;

    let date: String = row.try_get("Date").map_err(|e| mapping(id, e))?;
    let time: String = row.try_get("Time").map_err(|e| mapping(id, e))?;
    // Legacy rows carry no zone; read as UTC (the cursor never depends on time)
    let naive = NaiveDateTime::parse_from_str(&format!("{date}T{time}"), "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| Error::SchemaMapping {
            id,
            reason: format!("unparseable Date/Time '{date} {time}': {e}"),
        })?;
    let timestamp = DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc);

    let scientific_name: String = row.try_get("Sci_Name").map_err(|e| mapping(id, e))?;
    let common_name: String = row.try_get("Com_Name").map_err(|e| mapping(id, e))?;
    let confidence: f64 = row.try_get("Confidence").map_err(|e| mapping(id, e))?;
    let clip_path: Option<String> = row.try_get("File_Name").map_err(|e| mapping(id, e))?;

    Ok(Detection {
        id,
        timestamp,
        common_name,
        scientific_name,
        confidence,
        clip_path,
    })
}

fn mapping(id: i64, e: sqlx::Error) -> Error {
    Error::SchemaMapping {
        id,
        reason: e.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;

    pub async fn memory_pool() -> SqlitePool {
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool")
    }

    pub async fn create_v2_schema(pool: &SqlitePool) {
        sqlx::query(
            "CREATE TABLE labels (id INTEGER PRIMARY KEY, scientific_name TEXT NOT NULL)",
        )
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE detections (
                id INTEGER PRIMARY KEY,
                label_id INTEGER NOT NULL,
                detected_at INTEGER NOT NULL,
                confidence REAL NOT NULL,
                clip_name TEXT
            )",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    pub async fn insert_label(pool: &SqlitePool, id: i64, scientific_name: &str) {
        sqlx::query("INSERT INTO labels (id, scientific_name) VALUES (?, ?)")
            .bind(id)
            .bind(scientific_name)
            .execute(pool)
            .await
            .unwrap();
    }

    pub async fn insert_v2_detection(
        pool: &SqlitePool,
        id: i64,
        label_id: i64,
        detected_at: i64,
        confidence: f64,
    ) {
        sqlx::query(
            "INSERT INTO detections (id, label_id, detected_at, confidence, clip_name)
             VALUES (?, ?, ?, ?, NULL)",
        )
        .bind(id)
        .bind(label_id)
        .bind(detected_at)
        .bind(confidence)
        .execute(pool)
        .await
        .unwrap();
    }

    pub async fn create_legacy_schema(pool: &SqlitePool) {
        sqlx::query(
            "CREATE TABLE notes (
                Date TEXT NOT NULL,
                Time TEXT NOT NULL,
                Sci_Name TEXT NOT NULL,
                Com_Name TEXT NOT NULL,
                Confidence REAL NOT NULL,
                File_Name TEXT
            )",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    pub async fn insert_note(
        pool: &SqlitePool,
        date: &str,
        time: &str,
        sci: &str,
        com: &str,
        confidence: f64,
    ) {
        sqlx::query(
            "INSERT INTO notes (Date, Time, Sci_Name, Com_Name, Confidence, File_Name)
             VALUES (?, ?, ?, ?, ?, NULL)",
        )
        .bind(date)
        .bind(time)
        .bind(sci)
        .bind(com)
        .bind(confidence)
        .execute(pool)
        .await
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_detect_v2() {
        let pool = memory_pool().await;
        create_v2_schema(&pool).await;

        let variant = detect(&pool).await.unwrap();
        assert_eq!(variant, SchemaVariant::V2);
    }

    #[tokio::test]
    async fn test_detect_legacy() {
        let pool = memory_pool().await;
        create_legacy_schema(&pool).await;

        let variant = detect(&pool).await.unwrap();
        assert_eq!(variant, SchemaVariant::Legacy);
    }

    #[tokio::test]
    async fn test_detect_unknown_layout_fails() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE unrelated (x INTEGER)")
            .execute(&pool)
            .await
            .unwrap();

        let err = detect(&pool).await.unwrap_err();
        assert!(matches!(err, Error::SchemaDetection(_)));
    }

    #[tokio::test]
    async fn test_detections_table_without_labels_is_not_v2() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE detections (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();

        let err = detect(&pool).await.unwrap_err();
        assert!(matches!(err, Error::SchemaDetection(_)));
    }

    #[tokio::test]
    async fn test_v2_row_mapping() {
        let pool = memory_pool().await;
        create_v2_schema(&pool).await;
        insert_label(&pool, 1, "Turdus merula").await;
        insert_v2_detection(&pool, 10, 1, 1_700_000_000, 0.91).await;

        let row = sqlx::query(
            "SELECT d.id AS id, d.detected_at AS detected_at, d.confidence AS confidence,
                    d.clip_name AS clip_name, l.scientific_name AS scientific_name
             FROM detections d LEFT JOIN labels l ON l.id = d.label_id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let det = row_to_detection(&row, SchemaVariant::V2).unwrap();
        assert_eq!(det.id, 10);
        assert_eq!(det.scientific_name, "Turdus merula");
        assert_eq!(det.common_name, "Turdus merula");
        assert!((det.confidence - 0.91).abs() < 1e-9);
        assert_eq!(det.timestamp.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_v2_unresolved_label_is_mapping_error() {
        let pool = memory_pool().await;
        create_v2_schema(&pool).await;
        insert_v2_detection(&pool, 7, 999, 1_700_000_000, 0.5).await;

        let row = sqlx::query(
            "SELECT d.id AS id, d.detected_at AS detected_at, d.confidence AS confidence,
                    d.clip_name AS clip_name, l.scientific_name AS scientific_name
             FROM detections d LEFT JOIN labels l ON l.id = d.label_id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let err = row_to_detection(&row, SchemaVariant::V2).unwrap_err();
        match err {
            Error::SchemaMapping { id, .. } => assert_eq!(id, 7),
            other => panic!("expected SchemaMapping, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_legacy_row_mapping() {
        let pool = memory_pool().await;
        create_legacy_schema(&pool).await;
        insert_note(&pool, "2026-08-20", "06:15:00", "Turdus merula", "Merle noir", 0.87).await;

        let row = sqlx::query(
            "SELECT rowid AS id, Date, Time, Sci_Name, Com_Name, Confidence, File_Name FROM notes",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let det = row_to_detection(&row, SchemaVariant::Legacy).unwrap();
        assert_eq!(det.id, 1);
        assert_eq!(det.common_name, "Merle noir");
        assert_eq!(det.scientific_name, "Turdus merula");
        assert_eq!(
            det.timestamp.to_rfc3339(),
            "2026-08-20T06:15:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_legacy_bad_timestamp_is_mapping_error() {
        let pool = memory_pool().await;
        create_legacy_schema(&pool).await;
        insert_note(&pool, "not-a-date", "06:15:00", "Turdus merula", "Merle noir", 0.87).await;

        let row = sqlx::query(
            "SELECT rowid AS id, Date, Time, Sci_Name, Com_Name, Confidence, File_Name FROM notes",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let err = row_to_detection(&row, SchemaVariant::Legacy).unwrap_err();
        assert!(matches!(err, Error::SchemaMapping { id: 1, .. }));
    }
}
