mod backfill;
mod queries;
mod schema;
mod writer;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{Result, StartupWarning, StoreError};
use crate::pricing::PricingOracle;

pub use backfill::{BackfillReport, RowFailure};

/// Default database file name inside the storage directory.
pub const DEFAULT_DB_FILE: &str = "usage.db";

/// Stored timestamp layout: UTC, second precision.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the usage database.
///
/// All operations go through one connection behind a mutex, so concurrent
/// callers are serialized per statement. After [`UsageStore::close`] every
/// operation fails with [`StoreError::NotInitialized`].
pub struct UsageStore {
    conn: Mutex<Option<Connection>>,
    oracle: Arc<dyn PricingOracle>,
    path: PathBuf,
    warnings: Vec<StartupWarning>,
}

impl UsageStore {
    /// Open or create the database in `dir`, apply the schema and recompute
    /// every stored cost with `oracle`.
    ///
    /// Migration and backfill problems do not fail the open; they are logged
    /// and kept in [`UsageStore::startup_warnings`].
    pub fn open(dir: &Path, file_name: &str, oracle: Arc<dyn PricingOracle>) -> Result<Self> {
        Self::open_with_columns(dir, file_name, oracle, schema::ADDITIVE_COLUMNS)
    }

    fn open_with_columns(
        dir: &Path,
        file_name: &str,
        oracle: Arc<dyn PricingOracle>,
        columns: &[(&str, &str)],
    ) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| unavailable(dir, e))?;
        let path = dir.join(file_name);
        info!("Opening usage database at {}", path.display());

        let mut conn = Connection::open(&path).map_err(|e| unavailable(&path, e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| unavailable(&path, e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| unavailable(&path, e))?;

        let mut warnings = schema::ensure_schema_with(&conn, columns)?;

        match backfill::recompute_all_costs(&mut conn, oracle.as_ref()) {
            Ok(report) => info!(
                "Recomputed costs for {} of {} usage rows ({} skipped)",
                report.updated,
                report.scanned,
                report.failures.len()
            ),
            Err(e) => {
                let warning = StartupWarning::Backfill {
                    message: e.to_string(),
                };
                warn!("{warning}");
                warnings.push(warning);
            }
        }

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            oracle,
            path,
            warnings,
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-fatal problems recorded while opening.
    pub fn startup_warnings(&self) -> &[StartupWarning] {
        &self.warnings
    }

    /// Re-run schema creation and additive migrations. Idempotent.
    pub fn ensure_schema(&self) -> Result<Vec<StartupWarning>> {
        self.with_conn(|conn| schema::ensure_schema(conn))
    }

    /// Recompute `cost_usd` for every row in one transaction.
    ///
    /// Rows that cannot be priced are reported and left as they were; if the
    /// commit fails nothing changes.
    pub fn recompute_all_costs(&self, oracle: &dyn PricingOracle) -> Result<BackfillReport> {
        self.with_conn(|conn| backfill::recompute_all_costs(conn, oracle))
    }

    /// Whether the connection is still held.
    pub fn is_open(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&self) {
        let Ok(mut guard) = self.conn.lock() else {
            warn!("Usage store lock poisoned during close");
            return;
        };
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                warn!("Closing usage database failed: {e}");
            }
            info!("Closed usage database at {}", self.path.display());
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let conn = guard.as_mut().ok_or(StoreError::NotInitialized)?;
        f(conn)
    }
}

fn unavailable(path: &Path, e: impl std::fmt::Display) -> StoreError {
    StoreError::StorageUnavailable {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. RFC 3339 text from older writers is accepted too.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
