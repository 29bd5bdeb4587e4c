use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{Result, StartupWarning, StoreError};

const CREATE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS usage_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp DATETIME,
        api_key TEXT,
        model TEXT,
        input_tokens INTEGER,
        output_tokens INTEGER,
        total_tokens INTEGER,
        is_failure BOOLEAN,
        source TEXT,
        duration_ms INTEGER,
        prompt_text TEXT,
        completion_text TEXT,
        cost_usd REAL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_usage_logs_timestamp ON usage_logs(timestamp DESC);";

/// Columns added after the first schema version, oldest first.
pub(super) const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("source", "TEXT"),
    ("duration_ms", "INTEGER"),
    ("prompt_text", "TEXT"),
    ("completion_text", "TEXT"),
    ("cost_usd", "REAL DEFAULT 0"),
];

/// Create the table and index, then apply additive migrations.
///
/// Base table or index failures are fatal. A migration that fails for any
/// reason other than the column already existing becomes a warning.
pub(super) fn ensure_schema(conn: &Connection) -> Result<Vec<StartupWarning>> {
    ensure_schema_with(conn, ADDITIVE_COLUMNS)
}

pub(super) fn ensure_schema_with(
    conn: &Connection,
    columns: &[(&str, &str)],
) -> Result<Vec<StartupWarning>> {
    conn.execute_batch(CREATE_SCHEMA)
        .map_err(|e| StoreError::Schema(e.to_string()))?;

    let mut warnings = Vec::new();
    for (column, decl) in columns {
        let sql = format!("ALTER TABLE usage_logs ADD COLUMN {column} {decl}");
        match conn.execute(&sql, []) {
            Ok(_) => info!("Added column usage_logs.{column}"),
            Err(e) if is_duplicate_column(&e) => {}
            Err(e) => {
                let warning = StartupWarning::Migration {
                    column: column.to_string(),
                    message: e.to_string(),
                };
                warn!("{warning}");
                warnings.push(warning);
            }
        }
    }
    Ok(warnings)
}

/// SQLite reports an existing column as a generic error; only the message
/// tells it apart.
fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.contains("duplicate column name"),
        other => other.to_string().contains("duplicate column name"),
    }
}
