//! SQLite persistence for temperature history.
//!
//! Two append-only tables: outside-temperature samples from the weather
//! fetcher and per-room samples taken from STATUS uplinks.  Timestamps are
//! RFC 3339 with offset, so range queries compare lexicographically.
//!
//! The adapter holds only the database path: every logical operation opens
//! its own short-lived connection and commits on drop.  `PRAGMA
//! user_version` gates the schema; anything other than 0 (fresh) or the
//! current version is a fatal startup error.

use std::path::{Path, PathBuf};

use chrono::{Duration, Local};
use rusqlite::{Connection, params};
use serde::Serialize;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");

pub const SCHEMA_VERSION: i32 = 1;

/// Days of history kept by the startup purge.
pub const DEFAULT_KEEP_DAYS: i64 = 730;

/// History queries default to the last 14 days when no range is given.
const DEFAULT_QUERY_DAYS: i64 = 14;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("schema version mismatch: database has {found}, expected {expected} (migration not implemented)")]
    SchemaMismatch { found: i32, expected: i32 },
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Clone, Serialize)]
pub struct OutsideSample {
    pub ts: String,
    pub temp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSample {
    pub ts: String,
    pub temp: i64,
    pub settemp: i64,
    pub heating: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    /// Open the database, creating the schema on first use.
    ///
    /// A `user_version` other than 0 or [`SCHEMA_VERSION`] is a
    /// [`DbError::SchemaMismatch`]; callers treat it as fatal.
    pub fn open(path: &Path) -> DbResult<Db> {
        let db = Db {
            path: path.to_path_buf(),
        };
        let conn = db.connect()?;
        let found: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        match found {
            0 => {
                conn.execute_batch(SCHEMA_SQL)?;
                conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            }
            SCHEMA_VERSION => {}
            other => {
                return Err(DbError::SchemaMismatch {
                    found: other,
                    expected: SCHEMA_VERSION,
                });
            }
        }
        Ok(db)
    }

    fn connect(&self) -> DbResult<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    /// Delete samples older than `days_to_keep` days from both tables.
    pub fn purge(&self, days_to_keep: i64) -> DbResult<()> {
        let limit = (Local::now() - Duration::days(days_to_keep)).to_rfc3339();
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM besim_outside_temperature WHERE ts < ?1",
            params![limit],
        )?;
        conn.execute("DELETE FROM besim_temperature WHERE ts < ?1", params![limit])?;
        Ok(())
    }

    pub fn log_outside_temperature(&self, temp: f64) -> DbResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO besim_outside_temperature (ts, temp) VALUES (?1, ?2)",
            params![Local::now().to_rfc3339(), temp],
        )?;
        Ok(())
    }

    pub fn log_temperature(
        &self,
        thermostat: &str,
        temp: i64,
        settemp: i64,
        heating: Option<i64>,
    ) -> DbResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO besim_temperature (ts, thermostat, temp, settemp, heating)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![Local::now().to_rfc3339(), thermostat, temp, settemp, heating],
        )?;
        Ok(())
    }

    pub fn outside_temperature(
        &self,
        from: Option<String>,
        to: Option<String>,
    ) -> DbResult<Vec<OutsideSample>> {
        let (from, to) = query_range(from, to);
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT ts, temp FROM besim_outside_temperature WHERE ts BETWEEN ?1 AND ?2",
        )?;
        let rows = stmt.query_map(params![from, to], |row| {
            Ok(OutsideSample {
                ts: row.get(0)?,
                temp: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn temperature(
        &self,
        thermostat: &str,
        from: Option<String>,
        to: Option<String>,
    ) -> DbResult<Vec<RoomSample>> {
        let (from, to) = query_range(from, to);
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT ts, temp, settemp, heating FROM besim_temperature
             WHERE thermostat = ?1 AND ts BETWEEN ?2 AND ?3",
        )?;
        let rows = stmt.query_map(params![thermostat, from, to], |row| {
            Ok(RoomSample {
                ts: row.get(0)?,
                temp: row.get(1)?,
                settemp: row.get(2)?,
                heating: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn query_range(from: Option<String>, to: Option<String>) -> (String, String) {
    let from =
        from.unwrap_or_else(|| (Local::now() - Duration::days(DEFAULT_QUERY_DAYS)).to_rfc3339());
    let to = to.unwrap_or_else(|| Local::now().to_rfc3339());
    (from, to)
}
