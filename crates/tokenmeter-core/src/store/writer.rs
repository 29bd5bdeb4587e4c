use tracing::{debug, warn};

use super::{format_timestamp, UsageStore};
use crate::error::{Result, StoreError};
use crate::record::UsageRecord;

impl UsageStore {
    /// Append one usage record and return its assigned id.
    ///
    /// A zero `cost_usd` is priced with the store's oracle; any other value
    /// is stored as given. The timestamp is truncated to whole seconds.
    pub fn append(&self, rec: &UsageRecord) -> Result<i64> {
        let cost = if rec.cost_usd == 0.0 {
            let cost = self
                .oracle
                .cost_of(&rec.model, rec.input_tokens, rec.output_tokens);
            if cost.is_finite() {
                cost
            } else {
                warn!("Pricing for model '{}' returned {cost}; storing 0", rec.model);
                0.0
            }
        } else {
            rec.cost_usd
        };
        let timestamp = format_timestamp(&rec.timestamp);
        let input_tokens = to_sql_count("input_tokens", rec.input_tokens)?;
        let output_tokens = to_sql_count("output_tokens", rec.output_tokens)?;
        let total_tokens = to_sql_count("total_tokens", rec.total_tokens)?;
        let duration_ms = to_sql_count("duration_ms", rec.duration_ms)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO usage_logs (timestamp, api_key, model, input_tokens, output_tokens, total_tokens, is_failure, source, duration_ms, prompt_text, completion_text, cost_usd)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    timestamp,
                    rec.api_key,
                    rec.model,
                    input_tokens,
                    output_tokens,
                    total_tokens,
                    rec.is_failure,
                    rec.source,
                    duration_ms,
                    rec.prompt_text,
                    rec.completion_text,
                    cost,
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!("Recorded usage row {id} for model '{}'", rec.model);
            Ok(id)
        })
    }
}

/// SQLite integers are signed 64-bit; larger counts are rejected, not wrapped.
fn to_sql_count(column: &str, value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::Query(format!("{column} value {value} exceeds the storable range")))
}
