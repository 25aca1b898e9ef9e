//! Cache context: owns one isolated cache and its background sweeper.
//!
//! Everything a caller needs goes through a [`CacheContext`]; there is no
//! process-global cache. Tests create one context per case.

use crate::client::{DataAccessClient, MutationRequest};
use crate::invalidation::{InvalidationCoordinator, InvalidationScope, MutationRecord};
use crate::keys::{CacheKey, KeyParams};
use crate::resolution::Resolution;
use crate::resolver::{CollectionScope, DualIdResolver, ResolverSettings};
use crate::slot::{CollectionSlot, EntitySlot};
use crate::store::CacheStore;
use parking_lot::Mutex;
use scholara_config::{AppConfig, ConfigValidator};
use scholara_core::{EntityRecord, EntityType, ScholaraError, ScholaraResult};
use scholara_resilience::with_timeout;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Result of a successful write.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// The entity as returned by the server.
    pub entity: EntityRecord,
    /// Keys marked stale or evicted as a consequence.
    pub invalidated: BTreeSet<CacheKey>,
}

/// An isolated cache with explicit `create`/`dispose` lifecycle.
pub struct CacheContext {
    store: Arc<CacheStore>,
    resolver: DualIdResolver,
    coordinator: InvalidationCoordinator,
    client: Arc<dyn DataAccessClient>,
    mutate_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheContext {
    /// Creates a context and starts the sweeper if one is configured.
    ///
    /// The sweeper needs a tokio runtime; outside one it is skipped and
    /// sweeping only happens on access.
    pub fn create(config: &AppConfig, client: Arc<dyn DataAccessClient>) -> ScholaraResult<Self> {
        ConfigValidator::validate(config).map_err(|errors| {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            ScholaraError::Configuration(joined)
        })?;

        let store = Arc::new(CacheStore::new(config.cache.gc_window()));
        let resolver = DualIdResolver::new(
            Arc::clone(&store),
            Arc::clone(&client),
            ResolverSettings::from_config(config),
        );
        let coordinator = InvalidationCoordinator::new(Arc::clone(&store));
        let (shutdown_tx, _) = broadcast::channel(1);

        let sweeper = config
            .cache
            .sweep_interval()
            .and_then(|period| spawn_sweeper(Arc::clone(&store), period, shutdown_tx.subscribe()));

        info!(
            detail_ttl_secs = config.cache.detail_ttl_secs,
            collection_ttl_secs = config.cache.collection_ttl_secs,
            gc_window_secs = config.cache.gc_window_secs,
            sweeper = sweeper.is_some(),
            "Cache context created"
        );

        Ok(Self {
            store,
            resolver,
            coordinator,
            client,
            mutate_timeout: config.client.mutate_timeout(),
            shutdown_tx,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Stops the sweeper and drops every cached entry.
    pub async fn dispose(&self) {
        let _ = self.shutdown_tx.send(());
        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache sweeper ended abnormally");
            }
        }
        self.store.clear();
        info!("Cache context disposed");
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    #[must_use]
    pub fn resolver(&self) -> &DualIdResolver {
        &self.resolver
    }

    #[must_use]
    pub fn coordinator(&self) -> &InvalidationCoordinator {
        &self.coordinator
    }

    /// Returns true while the background sweeper is running.
    #[must_use]
    pub fn has_sweeper(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Resolves one entity by an identifier of either form.
    pub async fn resolve(&self, entity_type: EntityType, identifier: &str) -> Resolution<EntityRecord> {
        self.resolver.resolve(entity_type, identifier).await
    }

    /// Resolves one page/filter of a collection.
    pub async fn resolve_collection(
        &self,
        entity_type: EntityType,
        scope: &CollectionScope,
        params: &KeyParams,
    ) -> Resolution<Vec<EntityRecord>> {
        self.resolver.resolve_collection(entity_type, scope, params).await
    }

    /// Creates a slot observing one entity.
    #[must_use]
    pub fn entity_slot(&self, entity_type: EntityType) -> EntitySlot {
        EntitySlot::new(self.resolver.clone(), entity_type)
    }

    /// Creates a slot observing one collection.
    #[must_use]
    pub fn collection_slot(&self, entity_type: EntityType) -> CollectionSlot {
        CollectionSlot::new(self.resolver.clone(), entity_type)
    }

    /// Performs a write and invalidates whatever depends on it.
    ///
    /// Validation, authorization and transport errors are returned as-is and
    /// leave the cache untouched.
    pub async fn mutate(
        &self,
        entity_type: EntityType,
        request: MutationRequest,
    ) -> ScholaraResult<MutationOutcome> {
        let kind = request.kind;
        let client = &self.client;
        let response = with_timeout("mutate", self.mutate_timeout, || client.mutate(entity_type, request))
            .await
            .map_err(|e| {
                warn!(entity_type = %entity_type, kind = %kind, error = %e, "Mutation failed");
                e
            })?;

        let record = MutationRecord::from_response(entity_type, kind, &response);
        let invalidated = self.coordinator.on_mutation_success(&record);
        debug!(entity_type = %entity_type, code = %record.code, kind = %kind, "Mutation applied");

        Ok(MutationOutcome {
            entity: response.entity,
            invalidated,
        })
    }

    /// Manually invalidates a scope.
    pub fn invalidate(&self, entity_type: EntityType, scope: &InvalidationScope) -> BTreeSet<CacheKey> {
        self.coordinator.invalidate(entity_type, scope)
    }

    /// Sweeps now, regardless of the sweeper schedule.
    pub fn sweep(&self) -> usize {
        self.store.sweep(Instant::now())
    }
}

impl Drop for CacheContext {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

fn spawn_sweeper(
    store: Arc<CacheStore>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Option<JoinHandle<()>> {
    let Ok(runtime) = Handle::try_current() else {
        warn!("No tokio runtime; background cache sweeper disabled");
        return None;
    };

    Some(runtime.spawn(async move {
        let mut ticker = interval(period);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Cache sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    store.sweep(Instant::now());
                }
            }
        }
    }))
}
