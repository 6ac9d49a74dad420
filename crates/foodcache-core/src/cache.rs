//! Read-through cache orchestration.
//!
//! [`FoodCache`] ties the store, the staleness policy and an upstream
//! [`ProductSource`] together. Lookups serve fresh rows straight from SQLite
//! and fall through to the upstream otherwise. Concurrent lookups for the same
//! barcode share one upstream fetch: the first task takes a per-barcode lock,
//! later tasks wait on it and then re-read the store.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::Settings;
use crate::rate_limit::UpstreamLimiter;
use crate::record::{ProductCandidate, ProductRecord, validate_barcode};
use crate::source::{OpenFoodFacts, ProductSource, SourceError};
use crate::store::{ProductStore, StoreError};

/// Minimum search query length in characters. Whitespace counts.
pub const MIN_QUERY_LEN: usize = 2;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("product {barcode} not found")]
    NotFound { barcode: String },
    #[error("upstream lookup failed: {0}")]
    Upstream(#[from] SourceError),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error("{0}")]
    Validation(String),
}

type InFlight = DashMap<String, Arc<Mutex<()>>>;

/// A claim on one barcode's fetch lock, taken before waiting for it.
///
/// Dropping the claim, whether it was granted or the waiting future was
/// cancelled, removes the map entry once nobody else holds or awaits it.
struct FetchGuard<'a> {
    in_flight: &'a InFlight,
    barcode: String,
    lock: Option<Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.lock.take();
        self.in_flight
            .remove_if(&self.barcode, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct FoodCache {
    store: Arc<ProductStore>,
    source: Arc<dyn ProductSource>,
    client: reqwest::Client,
    settings: Settings,
    in_flight: InFlight,
}

impl FoodCache {
    pub fn new(
        store: Arc<ProductStore>,
        source: Arc<dyn ProductSource>,
        client: reqwest::Client,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            source,
            client,
            settings,
            in_flight: DashMap::new(),
        }
    }

    /// Open the configured database and wire up the Open Food Facts source.
    pub fn from_settings(settings: Settings) -> Result<Self, CacheError> {
        let store = ProductStore::open(&settings.database_path)?;
        let limiter = UpstreamLimiter::per_minute(settings.upstream_requests_per_minute);
        let source = OpenFoodFacts::new(&settings.upstream_base_url, &settings.user_agent)
            .with_limiter(limiter);
        let client = reqwest::Client::builder()
            .timeout(settings.upstream_timeout())
            .build()
            .map_err(SourceError::Http)?;
        tracing::info!(
            path = %settings.database_path.display(),
            ttl_hours = settings.cache_ttl_hours,
            upstream = %settings.upstream_base_url,
            "food cache ready"
        );
        Ok(Self::new(Arc::new(store), Arc::new(source), client, settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &ProductStore {
        &self.store
    }

    /// Read-through lookup.
    ///
    /// A fresh stored record is returned without touching the upstream. A
    /// stale or missing one is fetched; when the upstream no longer knows a
    /// barcode we still have, the stale record is served unchanged.
    pub async fn lookup(&self, barcode: &str) -> Result<ProductRecord, CacheError> {
        validate_barcode(barcode).map_err(CacheError::Validation)?;
        let ttl = self.settings.cache_ttl_hours;

        if let Some(record) = self.store.find_by_barcode(barcode)?
            && !record.is_stale(ttl, Utc::now())
        {
            tracing::debug!(barcode, "cache hit");
            return Ok(record);
        }

        let _fetch = self.lock_barcode(barcode).await;

        // Another task may have refreshed the row while we waited.
        let existing = self.store.find_by_barcode(barcode)?;
        match existing {
            Some(ref record) if !record.is_stale(ttl, Utc::now()) => {
                tracing::debug!(barcode, "refreshed by concurrent lookup");
                return Ok(record.clone());
            }
            Some(ref record) => {
                tracing::info!(
                    barcode,
                    ttl_hours = ttl,
                    age_secs = record.age(Utc::now()).num_seconds(),
                    "stale record, refreshing"
                );
            }
            None => tracing::info!(barcode, "cache miss"),
        }

        match self.fetch(barcode).await? {
            Some(candidate) => self.write_through(&candidate),
            None => match existing {
                Some(record) => {
                    tracing::warn!(barcode, "upstream no longer has product, serving stale copy");
                    Ok(record)
                }
                None => Err(CacheError::NotFound {
                    barcode: barcode.to_string(),
                }),
            },
        }
    }

    /// Always re-fetch from the upstream. Unlike [`lookup`](Self::lookup),
    /// a not-found answer is an error even if a stored record exists.
    pub async fn force_refresh(&self, barcode: &str) -> Result<ProductRecord, CacheError> {
        validate_barcode(barcode).map_err(CacheError::Validation)?;
        let _fetch = self.lock_barcode(barcode).await;
        tracing::info!(barcode, "forced refresh");

        match self.fetch(barcode).await? {
            Some(candidate) => self.write_through(&candidate),
            None => Err(CacheError::NotFound {
                barcode: barcode.to_string(),
            }),
        }
    }

    /// Upsert every candidate in input order as one unit. Nothing is written
    /// if any candidate is invalid or any write fails.
    pub fn bulk_ingest(
        &self,
        candidates: &[ProductCandidate],
    ) -> Result<Vec<ProductRecord>, CacheError> {
        for (index, candidate) in candidates.iter().enumerate() {
            candidate
                .validate()
                .map_err(|e| CacheError::Validation(format!("item {index}: {e}")))?;
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.store.upsert_batch(candidates, Utc::now())?;
        tracing::info!(count = records.len(), "bulk ingest committed");
        Ok(records)
    }

    /// Case-insensitive name search over stored records only.
    ///
    /// `limit` defaults to the configured default and must not exceed the
    /// configured maximum.
    pub fn search(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ProductRecord>, CacheError> {
        if query.chars().count() < MIN_QUERY_LEN {
            return Err(CacheError::Validation(format!(
                "query must be at least {MIN_QUERY_LEN} characters"
            )));
        }
        let max = self.settings.search_max_limit;
        let limit = limit.unwrap_or(self.settings.search_default_limit);
        if limit == 0 || limit > max {
            return Err(CacheError::Validation(format!(
                "limit must be between 1 and {max}"
            )));
        }

        Ok(self.store.search_by_name(query, limit)?)
    }

    async fn lock_barcode(&self, barcode: &str) -> FetchGuard<'_> {
        let lock = self
            .in_flight
            .entry(barcode.to_string())
            .or_default()
            .clone();
        let mut fetch = FetchGuard {
            in_flight: &self.in_flight,
            barcode: barcode.to_string(),
            lock: Some(lock.clone()),
            guard: None,
        };
        fetch.guard = Some(lock.lock_owned().await);
        fetch
    }

    async fn fetch(&self, barcode: &str) -> Result<Option<ProductCandidate>, CacheError> {
        let result = self
            .source
            .fetch(barcode, &self.client, self.settings.upstream_timeout())
            .await;
        match result {
            Ok(found) => {
                if found.is_none() {
                    tracing::info!(barcode, source = self.source.name(), "upstream has no such product");
                }
                Ok(found)
            }
            Err(e) => {
                tracing::warn!(barcode, source = self.source.name(), error = %e, "upstream fetch failed");
                Err(e.into())
            }
        }
    }

    fn write_through(&self, candidate: &ProductCandidate) -> Result<ProductRecord, CacheError> {
        candidate
            .validate()
            .map_err(|e| CacheError::Validation(format!("upstream returned {e}")))?;
        let record = self.store.upsert(candidate, Utc::now())?;
        tracing::debug!(barcode = %record.barcode, id = %record.id, "upserted");
        Ok(record)
    }
}

impl std::fmt::Debug for FoodCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FoodCache")
            .field("store", &self.store)
            .field("source", &self.source.name())
            .field("settings", &self.settings)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
