pub mod error;
pub mod lifecycle;
pub mod pricing;
pub mod record;
pub mod store;

// Re-export key types
pub use error::{StartupWarning, StoreError};
pub use lifecycle::Lifecycle;
pub use pricing::{PriceTable, PricingOracle};
pub use record::{
    ActivityFilter, GlobalStats, ModelStats, PeriodCosts, StatusFilter, TrendBucket,
    TrendGranularity, UsageRecord,
};
pub use store::{BackfillReport, RowFailure, UsageStore};
