//! Schema catalog cache.
//!
//! Holds one immutable [`SchemaCatalog`] snapshot per connection id. A
//! snapshot is served while it is younger than the freshness window; after
//! that, or on explicit refresh, it is fetched again. Concurrent callers for
//! the same connection await a single shared fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::config::AppConfig;
use common::errors::SchemaFetchError;
use common::models::{ConnectionConfig, SchemaCatalog, TableInfo};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::driver::EngineDriver;

type CatalogResult = Result<Arc<SchemaCatalog>, SchemaFetchError>;
type SharedFetch = Shared<BoxFuture<'static, CatalogResult>>;

#[derive(Default)]
struct Entry {
    snapshot: Option<(Arc<SchemaCatalog>, Instant)>,
    /// Fetch in progress, tagged with its generation.
    inflight: Option<(u64, SharedFetch)>,
}

struct Inner {
    driver: Arc<dyn EngineDriver>,
    ttl: Duration,
    fetch_timeout: Duration,
    max_retries: u32,
    version: AtomicU64,
    generation: AtomicU64,
    entries: Mutex<HashMap<String, Entry>>,
}

#[derive(Clone)]
pub struct SchemaCatalogCache {
    inner: Arc<Inner>,
}

impl SchemaCatalogCache {
    pub fn new(
        driver: Arc<dyn EngineDriver>,
        ttl: Duration,
        fetch_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                ttl,
                fetch_timeout,
                max_retries,
                version: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn from_config(driver: Arc<dyn EngineDriver>, config: &AppConfig) -> Self {
        Self::new(
            driver,
            config.schema_cache_ttl(),
            config.schema_fetch_timeout(),
            config.max_retries,
        )
    }

    /// Returns the catalog for `config`, fetching it when missing, stale or
    /// when `refresh` is set.
    ///
    /// A failed fetch leaves the previous snapshot in place.
    pub async fn fetch(&self, config: &ConnectionConfig, refresh: bool) -> CatalogResult {
        let pending = {
            let mut entries = self.inner.entries.lock().await;
            let entry = entries.entry(config.id.clone()).or_default();

            if !refresh {
                if let Some((catalog, fetched)) = &entry.snapshot {
                    if fetched.elapsed() < self.inner.ttl {
                        return Ok(catalog.clone());
                    }
                }
            }

            match &entry.inflight {
                Some((_, pending)) => pending.clone(),
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let pending = load(self.inner.clone(), config.clone(), generation)
                        .boxed()
                        .shared();
                    entry.inflight = Some((generation, pending.clone()));
                    pending
                }
            }
        };
        pending.await
    }

    /// Drops the snapshot for `connection_id`. A fetch still in flight will
    /// not repopulate it.
    pub async fn invalidate(&self, connection_id: &str) {
        if self.inner.entries.lock().await.remove(connection_id).is_some() {
            tracing::debug!(id = %connection_id, "表结构缓存已失效");
        }
    }

    /// Last good snapshot, fresh or not.
    pub async fn cached(&self, connection_id: &str) -> Option<Arc<SchemaCatalog>> {
        self.inner
            .entries
            .lock()
            .await
            .get(connection_id)
            .and_then(|e| e.snapshot.as_ref())
            .map(|(catalog, _)| catalog.clone())
    }
}

async fn load(inner: Arc<Inner>, config: ConnectionConfig, generation: u64) -> CatalogResult {
    let result = fetch_tables(&inner, &config).await.map(|tables| {
        let version = inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        Arc::new(SchemaCatalog::new(&config.id, config.engine, version, tables))
    });

    let mut entries = inner.entries.lock().await;
    if let Some(entry) = entries.get_mut(&config.id) {
        if entry.inflight.as_ref().is_some_and(|(g, _)| *g == generation) {
            entry.inflight = None;
            if let Ok(catalog) = &result {
                entry.snapshot = Some((catalog.clone(), Instant::now()));
            }
        }
    }

    match &result {
        Ok(catalog) => tracing::info!(
            id = %config.id,
            version = catalog.version,
            tables = catalog.tables.len(),
            "表结构已加载"
        ),
        Err(e) => tracing::warn!(id = %config.id, kind = e.kind(), error = %e, "表结构加载失败"),
    }
    result
}

async fn fetch_tables(
    inner: &Inner,
    config: &ConnectionConfig,
) -> Result<Vec<TableInfo>, SchemaFetchError> {
    let mut attempt = 0;
    loop {
        match tokio::time::timeout(inner.fetch_timeout, inner.driver.fetch_schema(config)).await {
            Err(_) => return Err(SchemaFetchError::Timeout(inner.fetch_timeout)),
            Ok(Ok(tables)) => return Ok(tables),
            Ok(Err(e)) if e.is_transient() && attempt < inner.max_retries => {
                attempt += 1;
                tracing::warn!(id = %config.id, error = %e, attempt, "表结构加载重试");
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}
