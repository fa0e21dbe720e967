//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use super::stats::summarize_latencies;
use crate::probe::AgentKind;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Timestamps are stored as sortable UTC text.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const OUTCOME_COLUMNS: &str =
    "id, service_name, agent_type, target, timestamp, success, response_time";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
}

/// Thread-safe database store.
///
/// Owns the single connection; every operation holds it only for its own
/// duration, so concurrent writers are serialized here.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Apply pending migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;

        let report = embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        for migration in report.applied_migrations() {
            tracing::info!("Applied migration {}", migration);
        }

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // --- Writes ---

    /// Append one outcome and return its row id.
    ///
    /// A failed outcome is always stored without latency.
    pub fn append(&self, outcome: &ProbeOutcome) -> Result<i64, DbError> {
        let response_time = if outcome.success { outcome.response_time } else { None };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO service_checks (service_name, agent_type, target, timestamp, success, response_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                outcome.service_name,
                outcome.agent_type.as_str(),
                outcome.target,
                format_db_time(&outcome.timestamp),
                outcome.success,
                response_time,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Delete every outcome recorded for `service_name`.
    ///
    /// Returns the number of rows removed; unknown names remove nothing.
    pub fn delete_all_for_service(&self, service_name: &str) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM service_checks WHERE service_name = ?1",
            params![service_name],
        )?;
        Ok(deleted)
    }

    // --- Reads ---

    /// Newest outcome per service, newest first.
    ///
    /// Ties on timestamp go to the most recently inserted row.
    pub fn latest_status(&self) -> Result<Vec<ProbeOutcome>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {cols} FROM (
                 SELECT {cols}, ROW_NUMBER() OVER (
                     PARTITION BY service_name ORDER BY timestamp DESC, id DESC
                 ) AS rn
                 FROM service_checks
             )
             WHERE rn = 1
             ORDER BY timestamp DESC, service_name ASC",
            cols = OUTCOME_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], outcome_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// All outcomes, optionally restricted to one agent kind and to
    /// `timestamp >= since`, newest first.
    pub fn history(
        &self,
        agent: Option<AgentKind>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProbeOutcome>, DbError> {
        let mut filter = Filter::default();
        if let Some(agent) = agent {
            filter.push("agent_type = ?", agent.as_str().to_string());
        }
        if let Some(since) = since {
            filter.push("timestamp >= ?", format_db_time(&since));
        }
        self.select_outcomes(&filter)
    }

    /// One service's outcomes since `since`, newest first.
    pub fn service_history(
        &self,
        service_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProbeOutcome>, DbError> {
        let mut filter = Filter::default();
        filter.push("service_name = ?", service_name.to_string());
        if let Some(since) = since {
            filter.push("timestamp >= ?", format_db_time(&since));
        }
        self.select_outcomes(&filter)
    }

    /// Uptime per service since `since`, ordered by service name.
    pub fn uptime(&self, since: Option<DateTime<Utc>>) -> Result<Vec<UptimeStat>, DbError> {
        let mut filter = Filter::default();
        if let Some(since) = since {
            filter.push("timestamp >= ?", format_db_time(&since));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT service_name, COUNT(*), SUM(success) FROM service_checks{}
             GROUP BY service_name ORDER BY service_name ASC",
            filter.where_clause()
        ))?;

        let stats = stmt
            .query_map(params_from_iter(filter.params()), |row| {
                let total: i64 = row.get(1)?;
                let up: i64 = row.get(2)?;
                Ok(UptimeStat {
                    service_name: row.get(0)?,
                    total_checks: total,
                    successful_checks: up,
                    uptime_percent: if total > 0 { up as f64 * 100.0 / total as f64 } else { 0.0 },
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(stats)
    }

    /// Latency distribution of a service's successful probes since `since`.
    pub fn latency_summary(
        &self,
        service_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<LatencySummary>, DbError> {
        let mut filter = Filter::default();
        filter.push("service_name = ?", service_name.to_string());
        filter.push_static("success = 1 AND response_time IS NOT NULL");
        if let Some(since) = since {
            filter.push("timestamp >= ?", format_db_time(&since));
        }

        let samples = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT response_time FROM service_checks{}",
                filter.where_clause()
            ))?;
            let samples = stmt
                .query_map(params_from_iter(filter.params()), |row| row.get::<_, f64>(0))?
                .collect::<SqlResult<Vec<_>>>()?;
            samples
        };

        Ok(summarize_latencies(service_name, samples))
    }

    fn select_outcomes(&self, filter: &Filter) -> Result<Vec<ProbeOutcome>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM service_checks{} ORDER BY timestamp DESC, id DESC",
            OUTCOME_COLUMNS,
            filter.where_clause()
        ))?;

        let rows = stmt
            .query_map(params_from_iter(filter.params()), outcome_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }
}

/// AND-combined WHERE clauses with their positional parameters.
#[derive(Default)]
struct Filter {
    clauses: Vec<&'static str>,
    values: Vec<String>,
}

impl Filter {
    /// Add a clause with a single `?` bound to `value`.
    fn push(&mut self, clause: &'static str, value: String) {
        self.clauses.push(clause);
        self.values.push(value);
    }

    fn push_static(&mut self, clause: &'static str) {
        self.clauses.push(clause);
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn params(&self) -> &[String] {
        &self.values
    }
}

fn outcome_from_row(row: &Row) -> SqlResult<ProbeOutcome> {
    let agent: String = row.get(2)?;
    let agent_type = agent
        .parse::<AgentKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    let time_str: String = row.get(4)?;
    let timestamp = parse_db_time(&time_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("invalid timestamp {:?}", time_str).into(),
        )
    })?;

    Ok(ProbeOutcome {
        id: row.get(0)?,
        service_name: row.get(1)?,
        agent_type,
        target: row.get(3)?,
        timestamp,
        success: row.get(5)?,
        response_time: row.get(6)?,
    })
}

fn format_db_time(time: &DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    // Column default is millisecond precision; our writes carry nanoseconds
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
