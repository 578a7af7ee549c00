//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::{Store, TargetRegistry};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Duplicate: {0}")]
    Duplicate(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store. One connection, one writer at a time.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// A private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, StoreError> {
        let emails = serde_json::to_string(&target.alerts.emails)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (name, url, description, check_ssl, check_security,
             alerts_enabled, alert_emails, alert_phone)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                target.name,
                target.url,
                target.description,
                target.check_ssl,
                target.check_security,
                target.alerts.enabled,
                emails,
                target.alerts.phone,
            ],
        )
        .map_err(|e| duplicate_url(e, &target.url))?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update an existing target.
    pub fn update_target(&self, target: &Target) -> Result<(), StoreError> {
        let emails = serde_json::to_string(&target.alerts.emails)?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE targets SET name=?1, url=?2, description=?3, check_ssl=?4,
                 check_security=?5, alerts_enabled=?6, alert_emails=?7, alert_phone=?8 WHERE id=?9",
                params![
                    target.name,
                    target.url,
                    target.description,
                    target.check_ssl,
                    target.check_security,
                    target.alerts.enabled,
                    emails,
                    target.alerts.phone,
                    target.id,
                ],
            )
            .map_err(|e| duplicate_url(e, &target.url))?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete a target together with its history.
    pub fn delete_target(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM check_results WHERE target_id = ?1", params![id])?;
        tx.execute("DELETE FROM incidents WHERE target_id = ?1", params![id])?;
        tx.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Targets whose name, URL or description contains `term`.
    pub fn search_targets(&self, term: &str) -> Result<Vec<Target>, StoreError> {
        let pattern = format!("%{}%", term);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE name LIKE ?1 OR url LIKE ?1 OR description LIKE ?1 ORDER BY name",
            TARGET_SELECT
        ))?;
        let targets = stmt
            .query_map(params![pattern], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }
}

impl TargetRegistry for SqliteStore {
    fn targets(&self) -> Result<Vec<Target>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", TARGET_SELECT))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    fn target(&self, id: i64) -> Result<Target, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("{} WHERE id = ?1", TARGET_SELECT),
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }
}

impl Store for SqliteStore {
    fn append_check_result(&self, r: &CheckResult) -> Result<i64, StoreError> {
        let issues = serde_json::to_string(&r.security_issues)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO check_results (
                target_id, timestamp, is_up, status_code, response_time_ms, error,
                ssl_valid, ssl_days_remaining, ssl_issuer, ssl_error,
                security_score, security_issues, ping_time_ms, redirect_url, content_size
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                r.target_id,
                format_db_time(r.timestamp),
                r.is_up,
                r.status_code.map(i64::from),
                r.response_time_ms,
                r.error,
                r.ssl_valid,
                r.ssl_days_remaining,
                r.ssl_issuer,
                r.ssl_error,
                r.security_score.map(i64::from),
                issues,
                r.ping_time_ms,
                r.redirect_url,
                r.content_size.map(|v| v as i64),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn latest_check_result(&self, target_id: i64) -> Result<Option<CheckResult>, StoreError> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!(
                    "{} WHERE target_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                    CHECK_SELECT
                ),
                params![target_id],
                check_from_row,
            )
            .optional()?;
        Ok(result)
    }

    fn check_results_in_range(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE target_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3 \
             ORDER BY timestamp ASC, id ASC",
            CHECK_SELECT
        ))?;
        let results = stmt
            .query_map(
                params![target_id, format_db_time(since), format_db_time(until)],
                check_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(results)
    }

    fn check_results(
        &self,
        target_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE target_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2 OFFSET ?3",
            CHECK_SELECT
        ))?;
        let results = stmt
            .query_map(params![target_id, limit as i64, offset as i64], check_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(results)
    }

    fn open_incident(&self, target_id: i64) -> Result<Option<Incident>, StoreError> {
        let conn = self.conn()?;
        let incident = conn
            .query_row(
                &format!("{} WHERE target_id = ?1 AND resolved = 0", INCIDENT_SELECT),
                params![target_id],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    fn append_or_update_incident(&self, incident: &mut Incident) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let start = format_db_time(incident.start_time);
        let end = incident.end_time.map(format_db_time);

        if incident.id == 0 {
            conn.execute(
                "INSERT INTO incidents (target_id, start_time, end_time, duration_seconds, resolved)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    incident.target_id,
                    start,
                    end,
                    incident.duration_seconds,
                    incident.resolved
                ],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => StoreError::Duplicate(format!(
                    "target {} already has an open incident",
                    incident.target_id
                )),
                _ => StoreError::Sqlite(e),
            })?;
            incident.id = conn.last_insert_rowid();
        } else {
            let changed = conn.execute(
                "UPDATE incidents SET start_time=?1, end_time=?2, duration_seconds=?3, resolved=?4
                 WHERE id=?5",
                params![start, end, incident.duration_seconds, incident.resolved, incident.id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
        }
        Ok(())
    }

    fn incidents(
        &self,
        target_id: Option<i64>,
        include_resolved: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Incident>, StoreError> {
        let mut sql = format!("{} WHERE (?1 IS NULL OR target_id = ?1)", INCIDENT_SELECT);
        if !include_resolved {
            sql.push_str(" AND resolved = 0");
        }
        sql.push_str(" ORDER BY start_time DESC, id DESC LIMIT ?2");

        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let incidents = stmt
            .query_map(params![target_id, limit], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }
}

const TARGET_SELECT: &str = "SELECT id, name, url, description, check_ssl, check_security, \
     alerts_enabled, alert_emails, alert_phone FROM targets";

const CHECK_SELECT: &str = "SELECT target_id, timestamp, is_up, status_code, response_time_ms, \
     error, ssl_valid, ssl_days_remaining, ssl_issuer, ssl_error, security_score, security_issues, \
     ping_time_ms, redirect_url, content_size FROM check_results";

const INCIDENT_SELECT: &str =
    "SELECT id, target_id, start_time, end_time, duration_seconds, resolved FROM incidents";

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let emails: String = row.get(7)?;
    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        description: row.get(3)?,
        check_ssl: row.get(4)?,
        check_security: row.get(5)?,
        alerts: AlertSettings {
            enabled: row.get(6)?,
            emails: serde_json::from_str(&emails).unwrap_or_default(),
            phone: row.get(8)?,
        },
    })
}

fn check_from_row(row: &Row<'_>) -> SqlResult<CheckResult> {
    let time_str: String = row.get(1)?;
    let issues: String = row.get(11)?;
    let status_code: Option<i64> = row.get(3)?;
    let security_score: Option<i64> = row.get(10)?;
    let content_size: Option<i64> = row.get(14)?;

    Ok(CheckResult {
        target_id: row.get(0)?,
        timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        is_up: row.get(2)?,
        status_code: status_code.and_then(|c| u16::try_from(c).ok()),
        response_time_ms: row.get(4)?,
        error: row.get(5)?,
        ssl_valid: row.get(6)?,
        ssl_days_remaining: row.get(7)?,
        ssl_issuer: row.get(8)?,
        ssl_error: row.get(9)?,
        security_score: security_score.and_then(|s| u8::try_from(s).ok()),
        security_issues: serde_json::from_str(&issues).unwrap_or_default(),
        ping_time_ms: row.get(12)?,
        redirect_url: row.get(13)?,
        content_size: content_size.and_then(|s| u64::try_from(s).ok()),
    })
}

fn incident_from_row(row: &Row<'_>) -> SqlResult<Incident> {
    let start: String = row.get(2)?;
    let end: Option<String> = row.get(3)?;
    Ok(Incident {
        id: row.get(0)?,
        target_id: row.get(1)?,
        start_time: parse_db_time(&start).unwrap_or_else(Utc::now),
        end_time: end.as_deref().and_then(parse_db_time),
        duration_seconds: row.get(4)?,
        resolved: row.get(5)?,
    })
}

fn duplicate_url(e: rusqlite::Error, url: &str) -> StoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => {
            StoreError::Duplicate(format!("target URL already exists: {}", url))
        }
        _ => StoreError::Sqlite(e),
    }
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
