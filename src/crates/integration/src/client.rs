//! Typed fetches and the per-account fan-out

use crate::cache::FetchCache;
use crate::error::{IntegrationError, Result};
use crate::kind::{AccountTarget, AggregateResult, DataKind, DateRange, FetchRequest, FetchResult, KindOutcome};
use crate::pool::WorkerPool;
use crate::protocol::Page;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Source of raw records for one data kind.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, target: &AccountTarget, request: &FetchRequest) -> Result<FetchResult>;
}

/// [`DataSource`] backed by account worker processes.
#[derive(Debug)]
pub struct ProcessDataSource {
    pool: Arc<WorkerPool>,
    catalog_max_items: usize,
}

impl ProcessDataSource {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        let catalog_max_items = pool.config().catalog_max_items;
        Self {
            pool,
            catalog_max_items,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    async fn fetch_catalog(
        &self,
        connection: &crate::connection::Connection,
        request: &FetchRequest,
    ) -> Result<Vec<serde_json::Value>> {
        let operation = request.kind.operation();
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        while records.len() < self.catalog_max_items {
            let mut params = request.parameters();
            if let Some(cursor) = &cursor {
                params["page_cursor"] = json!(cursor);
            }
            let page = Page::from_result(operation, connection.call(operation, params).await?)?;
            debug!(account = %request.account, page_items = page.records.len(), "Fetched catalog page");
            records.extend(page.records);

            match page.next {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        records.truncate(self.catalog_max_items);
        Ok(records)
    }
}

#[async_trait]
impl DataSource for ProcessDataSource {
    async fn fetch(&self, target: &AccountTarget, request: &FetchRequest) -> Result<FetchResult> {
        let connection = self.pool.acquire(target).await?;

        let records = if request.kind == DataKind::CatalogItems {
            self.fetch_catalog(&connection, request).await
        } else {
            let operation = request.kind.operation();
            match connection.call(operation, request.parameters()).await {
                Ok(result) => Page::from_result(operation, result).map(|page| page.records),
                Err(e) => Err(e),
            }
        };

        self.pool.release(&connection);
        Ok(FetchResult::new(request, records?))
    }
}

/// Fetches account data, optionally through a [`FetchCache`].
pub struct IntegrationClient {
    source: Arc<dyn DataSource>,
    cache: Option<Arc<FetchCache>>,
    fail_fast: bool,
}

impl IntegrationClient {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            source,
            cache: None,
            fail_fast: true,
        }
    }

    pub fn with_cache(mut self, cache: Arc<FetchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// When disabled, a failed critical kind is recorded as
    /// [`KindOutcome::Fatal`] instead of aborting the fan-out.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn cache(&self) -> Option<&Arc<FetchCache>> {
        self.cache.as_ref()
    }

    /// Fetch one data kind.
    pub async fn fetch_kind(
        &self,
        target: &AccountTarget,
        kind: DataKind,
        range: DateRange,
    ) -> Result<FetchResult> {
        let request = FetchRequest::new(target, range, kind);
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_fetch(request.clone(), || self.source.fetch(target, &request))
                    .await
            }
            None => self.source.fetch(target, &request).await,
        }
    }

    /// Fetch every data kind concurrently.
    ///
    /// A failed critical kind aborts the whole fan-out with
    /// [`IntegrationError::CriticalFetch`]; outstanding fetches are dropped.
    /// Failed non-critical kinds become [`KindOutcome::Degraded`].
    pub async fn fetch_all(&self, target: &AccountTarget, range: DateRange) -> Result<AggregateResult> {
        info!(account = %target.alias, range = %range, "Fetching account data");

        let fetches = DataKind::ALL.iter().map(|&kind| async move {
            match self.fetch_kind(target, kind, range).await {
                Ok(result) => {
                    debug!(account = %target.alias, kind = %kind, records = result.records.len(), "Fetched data kind");
                    Ok(KindOutcome::Ok(result))
                }
                Err(e) if kind.is_critical() && self.fail_fast => {
                    error!(account = %target.alias, kind = %kind, error = %e, "Critical fetch failed");
                    Err(IntegrationError::CriticalFetch {
                        kind,
                        source: Box::new(e),
                    })
                }
                Err(e) if kind.is_critical() => {
                    error!(account = %target.alias, kind = %kind, error = %e, "Critical fetch failed");
                    Ok(KindOutcome::Fatal {
                        kind,
                        error: e.to_string(),
                    })
                }
                Err(e) => {
                    warn!(account = %target.alias, kind = %kind, error = %e, "Non-critical fetch failed, degrading to empty");
                    Ok(KindOutcome::Degraded {
                        kind,
                        reason: e.to_string(),
                    })
                }
            }
        });

        let outcomes = try_join_all(fetches).await?;

        let mut aggregate = AggregateResult::new(target.alias.clone(), range);
        for outcome in outcomes {
            aggregate.insert(outcome);
        }
        Ok(aggregate)
    }
}

impl std::fmt::Debug for IntegrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationClient")
            .field("cached", &self.cache.is_some())
            .field("fail_fast", &self.fail_fast)
            .finish()
    }
}
