use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::pricing::PricingOracle;
use crate::store::{UsageStore, DEFAULT_DB_FILE};

/// Owns the one-time initialization of the usage store.
///
/// Create one per process and share it. The first [`Lifecycle::initialize`]
/// call opens the database; concurrent callers block until it finishes and
/// all of them, and every later caller, see the same outcome.
pub struct Lifecycle {
    oracle: Arc<dyn PricingOracle>,
    file_name: String,
    outcome: OnceLock<Result<Arc<UsageStore>>>,
}

impl Lifecycle {
    pub fn new(oracle: Arc<dyn PricingOracle>) -> Self {
        Self {
            oracle,
            file_name: DEFAULT_DB_FILE.to_string(),
            outcome: OnceLock::new(),
        }
    }

    /// Use a database file name other than [`DEFAULT_DB_FILE`].
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Open the store in `dir` the first time; afterwards return the recorded
    /// outcome, whatever directory is passed.
    pub fn initialize(&self, dir: &Path) -> Result<Arc<UsageStore>> {
        self.outcome
            .get_or_init(|| {
                let outcome = UsageStore::open(dir, &self.file_name, self.oracle.clone());
                match &outcome {
                    Ok(store) => info!(
                        "Usage store ready ({} startup warnings)",
                        store.startup_warnings().len()
                    ),
                    Err(e) => warn!("Usage store initialization failed: {e}"),
                }
                outcome.map(Arc::new)
            })
            .clone()
    }

    /// The published store, or `NotInitialized` if initialization has not
    /// run, failed, or the store has been shut down.
    pub fn handle(&self) -> Result<Arc<UsageStore>> {
        match self.outcome.get() {
            Some(Ok(store)) if store.is_open() => Ok(store.clone()),
            _ => Err(StoreError::NotInitialized),
        }
    }

    /// Close the published store. A no-op when nothing was published.
    pub fn shutdown(&self) {
        if let Some(Ok(store)) = self.outcome.get() {
            store.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::record::UsageRecord;
    use crate::store::test_support::flat_oracle;

    #[test]
    fn handle_before_initialize_is_not_initialized() {
        let lifecycle = Lifecycle::new(flat_oracle());
        assert_eq!(lifecycle.handle().err(), Some(StoreError::NotInitialized));
        // Shutdown without initialization is harmless.
        lifecycle.shutdown();
    }

    #[test]
    fn initialize_runs_once_under_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = opens.clone();
        // The backfill prices once per row; seed one row so every open is visible.
        {
            let store = UsageStore::open(dir.path(), DEFAULT_DB_FILE, flat_oracle()).unwrap();
            store.append(&UsageRecord::new("gpt-4", 1, 1, 2)).unwrap();
            store.close();
        }
        let oracle: Arc<dyn PricingOracle> = Arc::new(move |_: &str, _: u64, _: u64| {
            counter.fetch_add(1, Ordering::SeqCst);
            0.0
        });
        let lifecycle = Lifecycle::new(oracle);

        let stores: Vec<Arc<UsageStore>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| lifecycle.initialize(dir.path()).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(stores.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(Arc::ptr_eq(&stores[0], &lifecycle.handle().unwrap()));
    }

    #[test]
    fn failed_initialization_is_recorded_for_everyone() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let lifecycle = Lifecycle::new(flat_oracle());
        let first = lifecycle.initialize(&blocker).err().unwrap();
        assert!(matches!(first, StoreError::StorageUnavailable { .. }));

        // A later call with a usable directory still sees the first outcome.
        let second = lifecycle.initialize(dir.path()).err().unwrap();
        assert_eq!(first, second);
        assert_eq!(lifecycle.handle().err(), Some(StoreError::NotInitialized));
    }

    #[test]
    fn shutdown_releases_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = Lifecycle::new(flat_oracle()).with_file_name("telemetry.db");
        let store = lifecycle.initialize(dir.path()).unwrap();
        assert!(dir.path().join("telemetry.db").exists());

        store.append(&UsageRecord::new("gpt-4", 1, 1, 2)).unwrap();
        assert!(lifecycle.handle().is_ok());
        lifecycle.shutdown();

        assert_eq!(lifecycle.handle().err(), Some(StoreError::NotInitialized));
        // Initialization does not run again after shutdown.
        assert!(!lifecycle.initialize(dir.path()).unwrap().is_open());

        assert_eq!(
            store.append(&UsageRecord::new("gpt-4", 1, 1, 2)).err(),
            Some(StoreError::NotInitialized)
        );
        assert_eq!(store.period_costs().err(), Some(StoreError::NotInitialized));
    }

    #[test]
    fn concurrent_writers_and_readers_agree() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = Lifecycle::new(flat_oracle());
        let store = lifecycle.initialize(dir.path()).unwrap();

        std::thread::scope(|s| {
            for t in 0..4 {
                let store = store.clone();
                s.spawn(move || {
                    for i in 0..25 {
                        let mut rec = UsageRecord::new("gpt-4", 10, 10, 20);
                        rec.is_failure = (t + i) % 5 == 0;
                        store.append(&rec).unwrap();
                    }
                });
            }
            let reader = store.clone();
            s.spawn(move || {
                for _ in 0..25 {
                    let stats = reader.global_stats().unwrap();
                    assert_eq!(
                        stats.success_count + stats.failure_count,
                        stats.total_requests
                    );
                }
            });
        });

        let stats = store.global_stats().unwrap();
        assert_eq!(stats.total_requests, 100);
        assert_eq!(stats.total_tokens, 2000);
        assert_eq!(stats.failure_count, 20);
    }
}
