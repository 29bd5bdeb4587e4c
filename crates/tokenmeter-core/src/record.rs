use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed request's telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Assigned by storage; ignored on append.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub api_key: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Caller-supplied; not re-derived from input + output.
    pub total_tokens: u64,
    pub is_failure: bool,
    pub source: String,
    pub duration_ms: u64,
    pub prompt_text: String,
    pub completion_text: String,
    /// Zero means "price it on append".
    pub cost_usd: f64,
}

impl UsageRecord {
    /// A record stamped now, with empty text fields and no cost.
    pub fn new(model: &str, input_tokens: u64, output_tokens: u64, total_tokens: u64) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            api_key: String::new(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            total_tokens,
            is_failure: false,
            source: "unknown".to_string(),
            duration_ms: 0,
            prompt_text: String::new(),
            completion_text: String::new(),
            cost_usd: 0.0,
        }
    }
}

/// Outcome filter for activity queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    Any,
    Success,
    Failure,
}

impl StatusFilter {
    /// Unrecognized values mean "no filter".
    pub fn from_str(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failure" => Self::Failure,
            _ => Self::Any,
        }
    }
}

/// Filter parameters for activity queries.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub model: Option<String>,
    pub status: StatusFilter,
}

impl ActivityFilter {
    /// Build a filter from raw query-string values. Empty strings disable a filter.
    pub fn from_params(model: &str, status: &str) -> Self {
        Self {
            model: (!model.is_empty()).then(|| model.to_string()),
            status: StatusFilter::from_str(status),
        }
    }
}

/// Time bucket width for trend rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrendGranularity {
    Hour,
    #[default]
    Day,
}

impl TrendGranularity {
    /// `"hour"` selects hourly buckets; anything else is daily.
    pub fn from_str(s: &str) -> Self {
        match s {
            "hour" => Self::Hour,
            _ => Self::Day,
        }
    }

    /// SQLite `strftime` pattern producing the bucket label.
    pub(crate) fn strftime_format(&self) -> &'static str {
        match self {
            Self::Hour => "%Y-%m-%d %H:00",
            Self::Day => "%Y-%m-%d",
        }
    }
}

/// Aggregates for one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendBucket {
    pub bucket: String,
    pub requests: u64,
    pub failures: u64,
    pub tokens: u64,
    pub cost: f64,
}

/// All-time totals over the whole table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_cost: f64,
}

/// Per-model request and token totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub total_requests: u64,
    pub total_tokens: u64,
}

/// Rolling-window cost sums.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodCosts {
    pub last_24h: f64,
    pub last_7d: f64,
    pub all_time: f64,
}
