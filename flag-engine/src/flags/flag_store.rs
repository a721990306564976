use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    api::errors::FlagError,
    database::FlagRepository,
    flags::flag_models::FeatureFlag,
    metrics_consts::{
        FLAG_CACHE_HIT_COUNTER, FLAG_CACHE_INVALIDATION_COUNTER, FLAG_CACHE_REFRESH_COUNTER,
        FLAG_CACHE_REFRESH_ERROR_COUNTER, FLAG_CACHE_REFRESH_TIME,
        FLAG_CACHE_STALE_SERVED_COUNTER, FLAG_DEFINITIONS_LOADED_GAUGE,
    },
    metrics_utils::{gauge, inc, timing_guard},
};

/// An immutable view of every flag definition, keyed by flag key.
#[derive(Debug, Default)]
pub struct FlagSnapshot {
    flags: HashMap<String, FeatureFlag>,
    pub loaded_at: DateTime<Utc>,
}

impl FlagSnapshot {
    pub fn new(flags: Vec<FeatureFlag>) -> Self {
        Self {
            flags: flags
                .into_iter()
                .map(|flag| (flag.key.clone(), flag))
                .collect(),
            loaded_at: Utc::now(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FeatureFlag> {
        self.flags.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FeatureFlag)> {
        self.flags.iter()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[derive(Clone)]
struct CacheEntry {
    snapshot: Arc<FlagSnapshot>,
    fetched_at: Instant,
    generation: u64,
}

/// Read-through cache over the whole flag table.
///
/// Readers get a shared snapshot, so a refresh never mutates a map someone is evaluating
/// against. `invalidate` bumps a generation counter instead of dropping the entry, which
/// keeps the old snapshot around as a fallback if the next read fails.
///
/// Concurrent misses each go to the repository; there is no request coalescing.
pub struct FlagStore {
    repository: Arc<dyn FlagRepository>,
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
    generation: AtomicU64,
}

impl FlagStore {
    pub fn new(repository: Arc<dyn FlagRepository>, ttl: Duration) -> Self {
        Self {
            repository,
            ttl,
            entry: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the current snapshot, reading through to the repository when it is missing,
    /// older than the TTL, or invalidated.
    ///
    /// If the read fails the previous snapshot keeps being served. Only a failure with
    /// nothing cached is an error.
    #[instrument(skip_all)]
    pub async fn load(&self) -> Result<Arc<FlagSnapshot>, FlagError> {
        let generation = self.generation.load(Ordering::Acquire);
        let current = self.current_entry();

        if let Some(entry) = &current {
            if entry.generation == generation && entry.fetched_at.elapsed() < self.ttl {
                inc(FLAG_CACHE_HIT_COUNTER, &[], 1);
                return Ok(entry.snapshot.clone());
            }
        }

        match self.refresh(generation).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                inc(
                    FLAG_CACHE_REFRESH_ERROR_COUNTER,
                    &[("reason".to_string(), e.error_code().to_string())],
                    1,
                );
                match current {
                    Some(stale) => {
                        warn!(error = %e, "Failed to refresh flag definitions, serving last known snapshot");
                        inc(FLAG_CACHE_STALE_SERVED_COUNTER, &[], 1);
                        // Re-arm the stale entry so the next retry waits a full TTL
                        self.install(CacheEntry {
                            fetched_at: Instant::now(),
                            generation,
                            ..stale.clone()
                        });
                        Ok(stale.snapshot)
                    }
                    None => {
                        error!(error = %e, "Failed to load flag definitions with nothing cached");
                        Err(FlagError::FlagsUnavailable)
                    }
                }
            }
        }
    }

    /// Marks the cached snapshot as stale so the next `load` reads through.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        inc(FLAG_CACHE_INVALIDATION_COUNTER, &[], 1);
        debug!(generation, "Invalidated flag cache");
    }

    async fn refresh(&self, generation: u64) -> Result<Arc<FlagSnapshot>, FlagError> {
        let timer = timing_guard(FLAG_CACHE_REFRESH_TIME, &[]);
        let flags = self.repository.list_all_flags().await?;
        timer.fin();

        let snapshot = Arc::new(FlagSnapshot::new(flags));
        self.install(CacheEntry {
            snapshot: snapshot.clone(),
            fetched_at: Instant::now(),
            generation,
        });

        inc(FLAG_CACHE_REFRESH_COUNTER, &[], 1);
        gauge(FLAG_DEFINITIONS_LOADED_GAUGE, &[], snapshot.len() as f64);
        info!(flag_count = snapshot.len(), "Refreshed flag definitions");

        Ok(snapshot)
    }

    fn current_entry(&self) -> Option<CacheEntry> {
        self.entry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // A refresh that started before an invalidation must not replace a newer entry
    fn install(&self, new_entry: CacheEntry) {
        let mut entry = self.entry.write().unwrap_or_else(|e| e.into_inner());
        match entry.as_ref() {
            Some(existing) if existing.generation > new_entry.generation => {}
            _ => *entry = Some(new_entry),
        }
    }
}
