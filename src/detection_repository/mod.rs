//! DetectionRepository - Read-only Query Surface
//!
//! ## Responsibilities
//!
//! - Filtered queries for the REST surface (newest-first, capped)
//! - Cursor-based fetch for the bridge loop (ascending by id)
//! - Species counts for the stats endpoint
//!
//! All connections are opened strictly read-only with a busy timeout, since
//! the database is actively written by an external, uncoordinated process.
//! Query-path failures surface as [`Error::DatabaseUnavailable`], which is
//! always retryable.

use crate::error::{Error, Result};
use crate::models::{Detection, DetectionFilter, SpeciesCount};
use crate::schema_adapter::{self, SchemaVariant};
use chrono::{NaiveDate, NaiveTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::time::Duration;

/// Default result size for the REST query path
pub const DEFAULT_QUERY_LIMIT: u32 = 100;
/// Hard cap protecting the REST surface from unbounded scans
pub const MAX_QUERY_LIMIT: u32 = 500;

/// Result of one cursor fetch.
///
/// `max_scanned_id` covers every row the scan touched, including rows that
/// failed schema mapping, so a permanently malformed row cannot block the
/// cursor forever. `full` signals that the batch hit `batch_size` and more
/// backlog may remain.
#[derive(Debug, Clone)]
pub struct FetchBatch {
    pub detections: Vec<Detection>,
    pub max_scanned_id: Option<i64>,
    pub full: bool,
}

impl FetchBatch {
    pub fn is_empty(&self) -> bool {
        self.max_scanned_id.is_none()
    }
}

/// Open a read-only connection pool against the source database.
///
/// The pool is small on purpose: read concurrency against the foreign
/// writer is bounded to avoid exhausting its lock tolerance.
pub async fn read_only_pool(path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// DetectionRepository instance
pub struct DetectionRepository {
    pool: SqlitePool,
    variant: SchemaVariant,
}

impl DetectionRepository {
    pub fn new(pool: SqlitePool, variant: SchemaVariant) -> Self {
        Self { pool, variant }
    }

    pub fn variant(&self) -> SchemaVariant {
        self.variant
    }

    /// Cheap liveness probe for the health endpoint.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Filtered detections, newest first.
    pub async fn query(&self, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .min(MAX_QUERY_LIMIT);

        let mut qb: QueryBuilder<Sqlite> = match self.variant {
            SchemaVariant::V2 => {
                let mut qb = QueryBuilder::new(
                    "SELECT d.id AS id, d.detected_at AS detected_at, \
                            d.confidence AS confidence, d.clip_name AS clip_name, \
                            l.scientific_name AS scientific_name \
                     FROM detections d LEFT JOIN labels l ON l.id = d.label_id \
                     WHERE 1=1",
                );
                if let Some(start) = filter.date_start {
                    qb.push(" AND d.detected_at >= ").push_bind(day_start_ts(start));
                }
                if let Some(end) = filter.date_end {
                    qb.push(" AND d.detected_at <= ").push_bind(day_end_ts(end));
                }
                if let Some(ref name) = filter.common_name {
                    // V2 carries only the scientific name
                    qb.push(" AND l.scientific_name LIKE ")
                        .push_bind(format!("%{name}%"));
                }
                qb.push(" ORDER BY d.detected_at DESC LIMIT ").push_bind(limit);
                qb
            }
            SchemaVariant::Legacy => {
                let mut qb = QueryBuilder::new(
                    "SELECT rowid AS id, Date, Time, Sci_Name, Com_Name, Confidence, File_Name \
                     FROM notes WHERE 1=1",
                );
                if let Some(start) = filter.date_start {
                    qb.push(" AND Date >= ")
                        .push_bind(start.format("%Y-%m-%d").to_string());
                }
                if let Some(end) = filter.date_end {
                    qb.push(" AND Date <= ")
                        .push_bind(end.format("%Y-%m-%d").to_string());
                }
                if let Some(ref name) = filter.common_name {
                    qb.push(" AND Com_Name LIKE ").push_bind(format!("%{name}%"));
                }
                qb.push(" ORDER BY Date DESC, Time DESC LIMIT ").push_bind(limit);
                qb
            }
        };

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        let mut detections = Vec::with_capacity(rows.len());
        for row in &rows {
            match schema_adapter::row_to_detection(row, self.variant) {
                Ok(det) => detections.push(det),
                Err(e) => {
                    tracing::warn!(variant = %self.variant, error = %e, "Skipping unmappable row");
                }
            }
        }
        Ok(detections)
    }

    /// Detections with `id > cursor_id`, ascending by id, capped at
    /// `batch_size`. An empty result is not an error.
    pub async fn fetch_since(&self, cursor_id: i64, batch_size: u32) -> Result<FetchBatch> {
        let sql = match self.variant {
            SchemaVariant::V2 => {
                "SELECT d.id AS id, d.detected_at AS detected_at, \
                        d.confidence AS confidence, d.clip_name AS clip_name, \
                        l.scientific_name AS scientific_name \
                 FROM detections d LEFT JOIN labels l ON l.id = d.label_id \
                 WHERE d.id > ? ORDER BY d.id ASC LIMIT ?"
            }
            SchemaVariant::Legacy => {
                "SELECT rowid AS id, Date, Time, Sci_Name, Com_Name, Confidence, File_Name \
                 FROM notes WHERE rowid > ? ORDER BY rowid ASC LIMIT ?"
            }
        };

        let rows = sqlx::query(sql)
            .bind(cursor_id)
            .bind(batch_size)
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        let full = rows.len() == batch_size as usize;
        let mut detections = Vec::with_capacity(rows.len());
        let mut max_scanned_id = None;

        for row in &rows {
            let id: i64 = row.try_get("id").map_err(unavailable)?;
            max_scanned_id = Some(max_scanned_id.map_or(id, |m: i64| m.max(id)));

            match schema_adapter::row_to_detection(row, self.variant) {
                Ok(det) => detections.push(det),
                Err(e) => {
                    tracing::warn!(
                        row_id = id,
                        variant = %self.variant,
                        error = %e,
                        "Skipping unmappable row in cursor fetch"
                    );
                }
            }
        }

        Ok(FetchBatch {
            detections,
            max_scanned_id,
            full,
        })
    }

    /// Per-species counts for the stats endpoint, most frequent first.
    pub async fn species_counts(
        &self,
        date_start: Option<NaiveDate>,
        date_end: Option<NaiveDate>,
    ) -> Result<Vec<SpeciesCount>> {
        let mut qb: QueryBuilder<Sqlite> = match self.variant {
            SchemaVariant::V2 => {
                let mut qb = QueryBuilder::new(
                    "SELECT l.scientific_name AS scientific_name, COUNT(*) AS count \
                     FROM detections d JOIN labels l ON l.id = d.label_id \
                     WHERE 1=1",
                );
                if let Some(start) = date_start {
                    qb.push(" AND d.detected_at >= ").push_bind(day_start_ts(start));
                }
                if let Some(end) = date_end {
                    qb.push(" AND d.detected_at <= ").push_bind(day_end_ts(end));
                }
                qb.push(" GROUP BY l.scientific_name ORDER BY count DESC");
                qb
            }
            SchemaVariant::Legacy => {
                let mut qb = QueryBuilder::new(
                    "SELECT Com_Name, Sci_Name, COUNT(*) AS count FROM notes WHERE 1=1",
                );
                if let Some(start) = date_start {
                    qb.push(" AND Date >= ")
                        .push_bind(start.format("%Y-%m-%d").to_string());
                }
                if let Some(end) = date_end {
                    qb.push(" AND Date <= ")
                        .push_bind(end.format("%Y-%m-%d").to_string());
                }
                qb.push(" GROUP BY Com_Name, Sci_Name ORDER BY count DESC");
                qb
            }
        };

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let count: i64 = row.try_get("count").map_err(unavailable)?;
            let entry = match self.variant {
                SchemaVariant::V2 => {
                    let sci: String = row.try_get("scientific_name").map_err(unavailable)?;
                    SpeciesCount {
                        common_name: sci.clone(),
                        scientific_name: sci,
                        count,
                    }
                }
                SchemaVariant::Legacy => SpeciesCount {
                    common_name: row.try_get("Com_Name").map_err(unavailable)?,
                    scientific_name: row.try_get("Sci_Name").map_err(unavailable)?,
                    count,
                },
            };
            counts.push(entry);
        }
        Ok(counts)
    }

    /// Current maximum id, 0 for an empty database. Used to seed the cursor
    /// when the backlog is skipped.
    pub async fn max_id(&self) -> Result<i64> {
        let sql = match self.variant {
            SchemaVariant::V2 => "SELECT COALESCE(MAX(id), 0) AS max_id FROM detections",
            SchemaVariant::Legacy => "SELECT COALESCE(MAX(rowid), 0) AS max_id FROM notes",
        };
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        row.try_get("max_id").map_err(unavailable)
    }
}

fn unavailable(e: sqlx::Error) -> Error {
    Error::DatabaseUnavailable(e.to_string())
}

fn day_start_ts(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

fn day_end_ts(date: NaiveDate) -> i64 {
    // inclusive through 23:59:59
    day_start_ts(date) + 86_399
}
