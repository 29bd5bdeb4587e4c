use chrono::{DateTime, Duration, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use tracing::debug;

use super::{format_timestamp, parse_timestamp, UsageStore};
use crate::error::Result;
use crate::record::{
    ActivityFilter, GlobalStats, ModelStats, PeriodCosts, StatusFilter, TrendBucket,
    TrendGranularity, UsageRecord,
};

/// Record columns with the documented defaults applied to NULLs.
const RECORD_COLUMNS: &str = "id,
    COALESCE(timestamp, ''),
    COALESCE(api_key, ''),
    COALESCE(model, ''),
    COALESCE(input_tokens, 0),
    COALESCE(output_tokens, 0),
    COALESCE(total_tokens, 0),
    COALESCE(is_failure, 0),
    COALESCE(source, 'unknown'),
    COALESCE(duration_ms, 0),
    COALESCE(prompt_text, ''),
    COALESCE(completion_text, ''),
    COALESCE(cost_usd, 0.0)";

impl UsageStore {
    /// One page of activity, newest first. An offset past the end yields an
    /// empty page.
    pub fn recent_activity(
        &self,
        limit: usize,
        offset: usize,
        filter: &ActivityFilter,
    ) -> Result<Vec<UsageRecord>> {
        let (where_clause, mut params) = build_where_clause(filter);
        params.push(Value::Integer(to_sql_int(limit)));
        let limit_idx = params.len();
        params.push(Value::Integer(to_sql_int(offset)));
        let offset_idx = params.len();

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM usage_logs
             {where_clause}
             ORDER BY timestamp DESC, id DESC
             LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        );
        self.select_records(&sql, params)
    }

    /// Every matching record, newest first.
    pub fn all_activity(&self, filter: &ActivityFilter) -> Result<Vec<UsageRecord>> {
        let (where_clause, params) = build_where_clause(filter);
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM usage_logs
             {where_clause}
             ORDER BY timestamp DESC, id DESC"
        );
        self.select_records(&sql, params)
    }

    /// Per-bucket rollups for the `limit` most recent buckets, returned in
    /// ascending chronological order.
    pub fn usage_trends(
        &self,
        granularity: TrendGranularity,
        limit: usize,
    ) -> Result<Vec<TrendBucket>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(strftime(?1, timestamp), '0') AS bucket,
                        COUNT(*) AS requests,
                        COALESCE(SUM(CASE WHEN is_failure = 1 THEN 1 ELSE 0 END), 0) AS failures,
                        COALESCE(SUM(total_tokens), 0) AS tokens,
                        COALESCE(SUM(cost_usd), 0.0) AS cost
                 FROM usage_logs
                 GROUP BY bucket
                 ORDER BY bucket DESC
                 LIMIT ?2",
            )?;
            let mut buckets = stmt
                .query_map(
                    rusqlite::params![granularity.strftime_format(), to_sql_int(limit)],
                    |row| {
                        Ok(TrendBucket {
                            bucket: row.get(0)?,
                            requests: count(row.get(1)?),
                            failures: count(row.get(2)?),
                            tokens: count(row.get(3)?),
                            cost: row.get(4)?,
                        })
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            buckets.reverse();
            debug!("usage_trends({granularity:?}, {limit}) -> {} buckets", buckets.len());
            Ok(buckets)
        })
    }

    /// All-time totals. An empty table yields zeros.
    pub fn global_stats(&self) -> Result<GlobalStats> {
        self.with_conn(|conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(total_tokens), 0),
                        COALESCE(SUM(CASE WHEN is_failure = 1 THEN 0 ELSE 1 END), 0),
                        COALESCE(SUM(CASE WHEN is_failure = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(cost_usd), 0.0)
                 FROM usage_logs",
                [],
                |row| {
                    Ok(GlobalStats {
                        total_requests: count(row.get(0)?),
                        total_tokens: count(row.get(1)?),
                        success_count: count(row.get(2)?),
                        failure_count: count(row.get(3)?),
                        total_cost: row.get(4)?,
                    })
                },
            )?;
            Ok(stats)
        })
    }

    /// Request and token totals per model, busiest first. Empty or missing
    /// model names are grouped under `"unknown"`.
    pub fn per_model_stats(&self) -> Result<Vec<ModelStats>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(NULLIF(model, ''), 'unknown') AS model_key,
                        COUNT(*) AS total_requests,
                        COALESCE(SUM(total_tokens), 0) AS total_tokens
                 FROM usage_logs
                 GROUP BY model_key
                 ORDER BY total_requests DESC, model_key ASC",
            )?;
            let stats = stmt
                .query_map([], |row| {
                    Ok(ModelStats {
                        model: row.get(0)?,
                        total_requests: count(row.get(1)?),
                        total_tokens: count(row.get(2)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(stats)
        })
    }

    /// Cost sums for the last 24 hours, the last 7 days and all time.
    pub fn period_costs(&self) -> Result<PeriodCosts> {
        self.period_costs_at(Utc::now())
    }

    /// Rolling-window cost sums relative to `now`. A row is in a window when
    /// its timestamp is at or after `now - window`.
    pub fn period_costs_at(&self, now: DateTime<Utc>) -> Result<PeriodCosts> {
        let day_ago = format_timestamp(&(now - Duration::days(1)));
        let week_ago = format_timestamp(&(now - Duration::days(7)));

        self.with_conn(|conn| {
            let costs = conn.query_row(
                "SELECT COALESCE(SUM(CASE WHEN datetime(timestamp) >= ?1 THEN cost_usd ELSE 0 END), 0.0),
                        COALESCE(SUM(CASE WHEN datetime(timestamp) >= ?2 THEN cost_usd ELSE 0 END), 0.0),
                        COALESCE(SUM(cost_usd), 0.0)
                 FROM usage_logs",
                rusqlite::params![day_ago, week_ago],
                |row| {
                    Ok(PeriodCosts {
                        last_24h: row.get(0)?,
                        last_7d: row.get(1)?,
                        all_time: row.get(2)?,
                    })
                },
            )?;
            Ok(costs)
        })
    }

    /// Distinct non-empty model names, for populating filter dropdowns.
    pub fn distinct_models(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT model FROM usage_logs
                 WHERE model IS NOT NULL AND model != ''
                 ORDER BY model",
            )?;
            let models = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(models)
        })
    }

    fn select_records(&self, sql: &str, params: Vec<Value>) -> Result<Vec<UsageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let records = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), read_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }
}

/// Build a WHERE clause from filter parameters.
/// Returns (clause_string, param_values).
fn build_where_clause(filter: &ActivityFilter) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(model) = filter.model.as_deref().filter(|m| !m.is_empty()) {
        params.push(Value::Text(model.to_string()));
        conditions.push(format!("model = ?{}", params.len()));
    }
    match filter.status {
        StatusFilter::Any => {}
        StatusFilter::Success => conditions.push("COALESCE(is_failure, 0) != 1".to_string()),
        StatusFilter::Failure => conditions.push("is_failure = 1".to_string()),
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (clause, params)
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<UsageRecord> {
    let raw_ts: String = row.get(1)?;
    let timestamp = parse_timestamp(&raw_ts).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("unrecognized timestamp '{raw_ts}'").into(),
        )
    })?;

    Ok(UsageRecord {
        id: row.get(0)?,
        timestamp,
        api_key: row.get(2)?,
        model: row.get(3)?,
        input_tokens: count(row.get(4)?),
        output_tokens: count(row.get(5)?),
        total_tokens: count(row.get(6)?),
        is_failure: row.get::<_, i64>(7)? == 1,
        source: row.get(8)?,
        duration_ms: count(row.get(9)?),
        prompt_text: row.get(10)?,
        completion_text: row.get(11)?,
        cost_usd: row.get(12)?,
    })
}

/// SQLite integers are signed; clamp stray negatives to zero.
fn count(value: i64) -> u64 {
    value.max(0) as u64
}

fn to_sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
