use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::feed::ReportSource;
use crate::location::UserStore;
use crate::models::{IncidentReport, NewReport, ReportStatus, Severity, UserLocationUpdate};
use crate::stats;

const REPORT_COLUMNS: &str = "id, disaster_type, description, severity, lat, lng, contact, status, created_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let now = Utc::now();
    let reports = vec![
        (
            "seed-001",
            "flood",
            "Water entering ground floor homes near the river",
            Some(Severity::High),
            (19.0760, 72.8777),
            ReportStatus::InProgress,
            now - Duration::hours(2),
        ),
        (
            "seed-002",
            "fire",
            "Smoke from warehouse roof, crews on site",
            Some(Severity::Critical),
            (19.0896, 72.8656),
            ReportStatus::Pending,
            now - Duration::minutes(30),
        ),
        (
            "seed-003",
            "traffic",
            "Two-vehicle collision blocking one lane",
            Some(Severity::Medium),
            (19.1136, 72.8697),
            ReportStatus::Resolved,
            now - Duration::days(3),
        ),
        (
            "seed-004",
            "storm",
            "Fallen tree across footpath",
            Some(Severity::Low),
            (18.9220, 72.8347),
            ReportStatus::Resolved,
            now - Duration::days(9),
        ),
        (
            "seed-005",
            "medical",
            "Heat exhaustion cases at bus depot",
            None,
            (19.0178, 72.8478),
            ReportStatus::Pending,
            now - Duration::hours(20),
        ),
    ];

    let mut inserted = 0usize;
    for (source_key, disaster_type, description, severity, (lat, lng), status, created_at) in reports
    {
        let result = sqlx::query(
            r#"
            INSERT INTO disaster_reports.reports
            (id, disaster_type, description, severity, lat, lng, contact, status, created_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8, $9)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(disaster_type)
        .bind(description)
        .bind(severity.map(|s| s.as_str()))
        .bind(lat)
        .bind(lng)
        .bind(status.as_str())
        .bind(created_at)
        .bind(source_key)
        .execute(pool)
        .await?;

        inserted += result.rows_affected() as usize;
    }

    Ok(inserted)
}

/// Stores a submitted report with a fresh id, a `pending` status and the
/// current time.
pub async fn insert_report(pool: &PgPool, report: &NewReport) -> anyhow::Result<IncidentReport> {
    let coordinate = report.validate()?;
    let stored = IncidentReport {
        id: Uuid::new_v4(),
        disaster_type: report.disaster_type.trim().to_string(),
        description: report.description.trim().to_string(),
        severity: report.severity,
        lat: Some(coordinate.latitude),
        lng: Some(coordinate.longitude),
        contact: report
            .contact
            .as_ref()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        status: ReportStatus::Pending,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO disaster_reports.reports
        (id, disaster_type, description, severity, lat, lng, contact, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(stored.id)
    .bind(&stored.disaster_type)
    .bind(&stored.description)
    .bind(stored.severity.map(|s| s.as_str()))
    .bind(stored.lat)
    .bind(stored.lng)
    .bind(&stored.contact)
    .bind(stored.status.as_str())
    .bind(stored.created_at)
    .execute(pool)
    .await
    .context("failed to insert report")?;

    Ok(stored)
}

/// Reports newest first. A type filter keeps reports whose type contains it,
/// ignoring case; `"all"` or an empty filter keeps everything.
pub async fn fetch_reports(
    pool: &PgPool,
    type_filter: Option<&str>,
) -> anyhow::Result<Vec<IncidentReport>> {
    let needle = type_filter.and_then(stats::normalized_type_filter);

    let mut query = format!("SELECT {REPORT_COLUMNS} FROM disaster_reports.reports");
    if needle.is_some() {
        query.push_str(" WHERE strpos(lower(disaster_type), $1) > 0");
    }
    query.push_str(" ORDER BY created_at DESC");

    let mut rows = sqlx::query(&query);
    if let Some(value) = needle {
        rows = rows.bind(value);
    }

    collect_reports(rows.fetch_all(pool).await?)
}

/// Reports newest first, optionally only those created strictly after
/// `cutoff`.
pub async fn fetch_reports_since(
    pool: &PgPool,
    cutoff: Option<DateTime<Utc>>,
) -> anyhow::Result<Vec<IncidentReport>> {
    let mut query = format!("SELECT {REPORT_COLUMNS} FROM disaster_reports.reports");
    if cutoff.is_some() {
        query.push_str(" WHERE created_at > $1");
    }
    query.push_str(" ORDER BY created_at DESC");

    let mut rows = sqlx::query(&query);
    if let Some(value) = cutoff {
        rows = rows.bind(value);
    }

    collect_reports(rows.fetch_all(pool).await?)
}

fn collect_reports(records: Vec<PgRow>) -> anyhow::Result<Vec<IncidentReport>> {
    let mut reports = Vec::with_capacity(records.len());
    for row in records {
        reports.push(report_from_row(&row)?);
    }
    Ok(reports)
}

fn report_from_row(row: &PgRow) -> anyhow::Result<IncidentReport> {
    let id: Uuid = row.try_get("id")?;
    let severity: Option<String> = row.try_get("severity")?;
    let status: String = row.try_get("status")?;

    let severity = severity.as_deref().and_then(|raw| {
        let parsed = Severity::parse(raw);
        if parsed.is_none() {
            tracing::warn!(report_id = %id, severity = raw, "unknown severity stored on report");
        }
        parsed
    });

    Ok(IncidentReport {
        id,
        disaster_type: row.try_get("disaster_type")?,
        description: row.try_get("description")?,
        severity,
        lat: row.try_get("lat")?,
        lng: row.try_get("lng")?,
        contact: row.try_get("contact")?,
        status: ReportStatus::parse(&status).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
    })
}

pub async fn upsert_user_location(pool: &PgPool, update: &UserLocationUpdate) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO disaster_reports.users
        (user_id, lat, lng, geohash, last_location_update)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id) DO UPDATE
        SET lat = EXCLUDED.lat,
            lng = EXCLUDED.lng,
            geohash = EXCLUDED.geohash,
            last_location_update = EXCLUDED.last_location_update
        "#,
    )
    .bind(&update.user_id)
    .bind(update.location.latitude)
    .bind(update.location.longitude)
    .bind(&update.geohash)
    .bind(update.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_push_token(pool: &PgPool, user_id: &str, token: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO disaster_reports.users (user_id, push_token)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE
        SET push_token = EXCLUDED.push_token
        "#,
    )
    .bind(user_id)
    .bind(token)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    disaster_type: String,
    #[serde(default)]
    description: String,
    severity: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    contact: Option<String>,
    status: Option<String>,
    created_at: Option<DateTime<Utc>>,
    source_key: Option<String>,
}

/// Legacy rows may lack either half of the location, but any value that is
/// present has to be in range.
fn checked_import_location(
    lat: Option<f64>,
    lng: Option<f64>,
    line: usize,
) -> anyhow::Result<(Option<f64>, Option<f64>)> {
    if let Some(value) = lat {
        if !value.is_finite() || !(-90.0..=90.0).contains(&value) {
            bail!("latitude {value} out of range at line {line}");
        }
    }
    if let Some(value) = lng {
        if !value.is_finite() || !(-180.0..=180.0).contains(&value) {
            bail!("longitude {value} out of range at line {line}");
        }
    }
    Ok((lat, lng))
}

/// Imports reports from CSV. Rows keep whatever fields they carry, so
/// legacy rows without a location or severity are stored as-is.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("invalid CSV row at line {line}"))?;

        let severity = match row.severity.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match Severity::parse(raw) {
                Some(severity) => Some(severity),
                None => bail!("unknown severity {raw:?} at line {line}"),
            },
        };
        let status = match row.status.as_deref().map(str::trim) {
            None | Some("") => ReportStatus::Pending,
            Some(raw) => match ReportStatus::parse(raw) {
                Some(status) => status,
                None => bail!("unknown status {raw:?} at line {line}"),
            },
        };
        let (lat, lng) = checked_import_location(row.lat, row.lng, line)?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO disaster_reports.reports
            (id, disaster_type, description, severity, lat, lng, contact, status, created_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.disaster_type.trim())
        .bind(row.description.trim())
        .bind(severity.map(|s| s.as_str()))
        .bind(lat)
        .bind(lng)
        .bind(row.contact.filter(|c| !c.trim().is_empty()))
        .bind(status.as_str())
        .bind(row.created_at.unwrap_or_else(Utc::now))
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Postgres-backed handle used where the app talks through the feed and
/// user-store seams.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportSource for PgStore {
    async fn reports_since(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<IncidentReport>> {
        fetch_reports_since(&self.pool, cutoff).await
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn save_location(&self, update: &UserLocationUpdate) -> anyhow::Result<()> {
        upsert_user_location(&self.pool, update).await
    }

    async fn save_push_token(&self, user_id: &str, token: &str) -> anyhow::Result<()> {
        set_push_token(&self.pool, user_id, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_rows_tolerate_missing_optional_fields() {
        let data = "\
disaster_type,description,severity,lat,lng,contact,status,created_at,source_key
flood,Street under water,high,19.07,72.87,,in_progress,2026-10-18T09:30:00Z,legacy-1
fire,,,,,,,,
";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let rows: Vec<CsvRow> = reader
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].severity.as_deref(), Some("high"));
        assert_eq!(rows[0].lat, Some(19.07));
        assert_eq!(rows[0].source_key.as_deref(), Some("legacy-1"));
        assert!(rows[0].created_at.is_some());

        assert_eq!(rows[1].disaster_type, "fire");
        assert_eq!(rows[1].lat, None);
        assert_eq!(rows[1].created_at, None);
    }

    #[test]
    fn import_rejects_out_of_range_locations() {
        let err = checked_import_location(Some(200.0), Some(180.0), 4).unwrap_err();
        assert!(err.to_string().contains("latitude 200 out of range at line 4"));

        let err = checked_import_location(Some(10.0), Some(-181.5), 7).unwrap_err();
        assert!(err.to_string().contains("longitude"));

        assert_eq!(
            checked_import_location(Some(19.07), Some(72.87), 2).unwrap(),
            (Some(19.07), Some(72.87))
        );
        assert_eq!(checked_import_location(None, Some(72.87), 3).unwrap(), (None, Some(72.87)));
    }
}
