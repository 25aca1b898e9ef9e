//! Dual-identifier resolver.
//!
//! An identifier handed to [`DualIdResolver::resolve`] may be a legacy id or a
//! canonical code, and the shape of the string is not a reliable tell. Both
//! lookup paths always run concurrently and the resolver waits for both before
//! merging:
//!
//! 1. canonical path `Found` wins,
//! 2. else legacy path `Found`,
//! 3. else both `NotFound` means not found,
//! 4. else the transport error, preferring the canonical path's.
//!
//! A found entity is stored under its own canonical code whichever path
//! produced it, and a legacy hit records an alias so later lookups by the
//! legacy id are redirected to that single entry.
//!
//! Collections use precedence instead of union: a non-empty canonical-scoped
//! list wins, else a non-empty legacy-scoped list, else the first error, else
//! an empty list.

use crate::client::{
    CollectionQuery, DataAccessClient, LookupOutcome, LookupPath, ScopeFilter,
};
use crate::flight::FlightGroup;
use crate::generation::Generation;
use crate::keys::{self, CacheKey, KeyParams};
use crate::metrics::CacheMetrics;
use crate::resolution::Resolution;
use crate::store::{CacheEntry, CacheStore, CacheValue};
use futures::future::FutureExt;
use scholara_config::AppConfig;
use scholara_core::{
    CanonicalCode, EntityIdentifier, EntityRecord, EntityType, LegacyId, ScholaraResult,
};
use scholara_resilience::with_timeout;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of a collection fetch.
pub type CollectionOutcome = ScholaraResult<Vec<EntityRecord>>;

/// Receives every intermediate and final state of a resolve.
pub type Publish<'a, T> = dyn Fn(Resolution<T>) + Send + Sync + 'a;

/// Scope of a collection as requested by a caller.
///
/// Owner and parent identifiers may be in either form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionScope {
    All,
    Owner(String),
    Parent(String),
}

impl CollectionScope {
    #[must_use]
    pub fn owner(identifier: impl Into<String>) -> Self {
        Self::Owner(identifier.into())
    }

    #[must_use]
    pub fn parent(identifier: impl Into<String>) -> Self {
        Self::Parent(identifier.into())
    }

    /// The canonical-form and legacy-form filters for a scoped collection.
    fn filters(&self) -> Option<(ScopeFilter, ScopeFilter)> {
        let (raw, wrap): (&str, fn(EntityIdentifier) -> ScopeFilter) = match self {
            Self::All => return None,
            Self::Owner(raw) => (raw, ScopeFilter::Owner),
            Self::Parent(raw) => (raw, ScopeFilter::Parent),
        };
        Some((
            wrap(EntityIdentifier::Canonical(CanonicalCode::new(raw))),
            wrap(EntityIdentifier::Legacy(LegacyId::new(raw))),
        ))
    }
}

/// Resolver tuning taken from configuration.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub detail_ttl: Duration,
    pub collection_ttl: Duration,
    /// Deadline for each single client call.
    pub fetch_timeout: Duration,
    /// Minimum spacing of opportunistic sweeps; `None` disables them.
    pub sweep_on_access: Option<Duration>,
}

impl ResolverSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            detail_ttl: config.cache.detail_ttl(),
            collection_ttl: config.cache.collection_ttl(),
            fetch_timeout: config.client.fetch_timeout(),
            sweep_on_access: config
                .cache
                .sweep_interval()
                .filter(|_| config.cache.sweep_on_access),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Applies the single-entity precedence rules to two settled lookups.
#[must_use]
pub fn merge_lookups(canonical: LookupOutcome, legacy: LookupOutcome) -> LookupOutcome {
    match (canonical, legacy) {
        (found @ LookupOutcome::Found { .. }, _) | (_, found @ LookupOutcome::Found { .. }) => found,
        (LookupOutcome::NotFound, LookupOutcome::NotFound) => LookupOutcome::NotFound,
        (LookupOutcome::Failed(e), _) | (_, LookupOutcome::Failed(e)) => LookupOutcome::Failed(e),
    }
}

/// Applies the collection precedence rules to two settled list fetches.
#[must_use]
pub fn merge_collections(canonical: CollectionOutcome, legacy: CollectionOutcome) -> CollectionOutcome {
    match (canonical, legacy) {
        (Ok(items), _) if !items.is_empty() => Ok(items),
        (_, Ok(items)) if !items.is_empty() => Ok(items),
        (Err(e), _) | (_, Err(e)) => Err(e),
        _ => Ok(Vec::new()),
    }
}

struct ResolverInner {
    store: Arc<CacheStore>,
    client: Arc<dyn DataAccessClient>,
    settings: ResolverSettings,
    entity_flights: FlightGroup<(EntityType, String), LookupOutcome>,
    collection_flights: FlightGroup<CacheKey, CollectionOutcome>,
}

/// Resolves entities and collections through the cache store.
#[derive(Clone)]
pub struct DualIdResolver {
    inner: Arc<ResolverInner>,
}

impl DualIdResolver {
    #[must_use]
    pub fn new(
        store: Arc<CacheStore>,
        client: Arc<dyn DataAccessClient>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                store,
                client,
                settings,
                entity_flights: FlightGroup::new(),
                collection_flights: FlightGroup::new(),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn settings(&self) -> &ResolverSettings {
        &self.inner.settings
    }

    /// Resolves one entity by an identifier of either form.
    pub async fn resolve(&self, entity_type: EntityType, identifier: &str) -> Resolution<EntityRecord> {
        self.resolve_tracked(entity_type, identifier, &Generation::detached(), &|_| {})
            .await
    }

    /// Resolves one page/filter of a collection.
    pub async fn resolve_collection(
        &self,
        entity_type: EntityType,
        scope: &CollectionScope,
        params: &KeyParams,
    ) -> Resolution<Vec<EntityRecord>> {
        self.resolve_collection_tracked(entity_type, scope, params, &Generation::detached(), &|_| {})
            .await
    }

    /// Derives the key a collection query is cached under.
    ///
    /// Owner and parent identifiers with a known alias are normalized to the
    /// canonical code.
    #[must_use]
    pub fn collection_key(
        &self,
        entity_type: EntityType,
        scope: &CollectionScope,
        params: &KeyParams,
    ) -> CacheKey {
        match scope {
            CollectionScope::All => keys::listing(entity_type, params),
            CollectionScope::Owner(raw) => {
                let owner = self.normalize(entity_type.owner_type(), raw);
                keys::owner_collection(entity_type, &owner, params)
            }
            CollectionScope::Parent(raw) => {
                let parent = self.normalize(entity_type.parent_type(), raw);
                keys::parent_collection(entity_type, &parent, params)
            }
        }
    }

    fn normalize(&self, related: Option<EntityType>, raw: &str) -> String {
        related.map_or_else(|| raw.to_string(), |t| self.inner.store.normalize(t, raw))
    }

    fn sweep_on_access(&self) {
        if let Some(interval) = self.inner.settings.sweep_on_access {
            self.inner.store.sweep_if_due(Instant::now(), interval);
        }
    }

    /// Looks up the cache and classifies the entry as a hit, a stale read or a miss.
    fn check_cache(&self, entity_type: EntityType, entry: Option<CacheEntry>) -> CacheCheck {
        match entry {
            Some(entry) if entry.is_fresh() => {
                CacheMetrics::hit(entity_type);
                debug!(entity_type = %entity_type, key = %entry.key, "Cache hit");
                CacheCheck::Fresh(entry)
            }
            Some(entry) => {
                CacheMetrics::stale_read(entity_type);
                debug!(entity_type = %entity_type, key = %entry.key, status = ?entry.status, "Serving stale entry while revalidating");
                self.inner.store.mark_fetching(&entry.key);
                CacheCheck::Stale(entry)
            }
            None => {
                CacheMetrics::miss(entity_type);
                CacheCheck::Miss
            }
        }
    }

    pub(crate) async fn resolve_tracked(
        &self,
        entity_type: EntityType,
        identifier: &str,
        generation: &Generation,
        publish: &Publish<'_, EntityRecord>,
    ) -> Resolution<EntityRecord> {
        let started = Instant::now();
        self.sweep_on_access();

        let cached = self.inner.store.lookup_entity(entity_type, identifier);
        let stale = match self.check_cache(entity_type, cached) {
            CacheCheck::Fresh(entry) => {
                if let Some(record) = entry.value.as_entity() {
                    let resolution = Resolution::ready(record.as_ref().clone());
                    publish(resolution.clone());
                    return resolution;
                }
                None
            }
            CacheCheck::Stale(entry) => Some(entry),
            CacheCheck::Miss => None,
        };
        let stale_record = stale
            .as_ref()
            .and_then(|e| e.value.as_entity())
            .map(|r| r.as_ref().clone());

        publish(Resolution::loading(stale_record.clone()));

        let epoch = self.inner.store.invalidation_epoch();
        let outcome = self.lookup(entity_type, identifier, epoch).await;
        CacheMetrics::resolve_duration(entity_type, started.elapsed());

        if !generation.is_current() {
            CacheMetrics::superseded(entity_type);
            warn!(
                entity_type = %entity_type,
                identifier = %identifier,
                generation = generation.value(),
                "Discarding result of superseded resolve"
            );
            if let Some(entry) = &stale {
                self.inner.store.restore_stale(&entry.key);
            }
            return settle_entity(outcome, stale_record);
        }

        match &outcome {
            LookupOutcome::Found { record, path } => {
                let key = keys::entity_detail(entity_type, &record.code);
                let value = CacheValue::Entity(Arc::new(record.clone()));
                if self
                    .inner
                    .store
                    .put_if_current(key, value, self.inner.settings.detail_ttl, generation, epoch)
                {
                    self.inner.store.record_aliases(record);
                    if *path == LookupPath::Legacy && identifier != record.code.as_str() {
                        self.inner.store.record_alias(
                            entity_type,
                            LegacyId::new(identifier),
                            record.code.clone(),
                        );
                    }
                }
                debug!(
                    entity_type = %entity_type,
                    identifier = %identifier,
                    code = %record.code,
                    path = path.as_str(),
                    "Resolved entity"
                );
            }
            LookupOutcome::NotFound => {
                if let Some(entry) = &stale {
                    self.inner.store.evict(&entry.key);
                }
                debug!(entity_type = %entity_type, identifier = %identifier, "Entity not found by either identifier");
            }
            LookupOutcome::Failed(error) => {
                if let Some(entry) = &stale {
                    self.inner.store.mark_error(&entry.key, error.clone());
                }
                warn!(entity_type = %entity_type, identifier = %identifier, error = %error, "Entity lookup failed");
            }
        }

        let resolution = settle_entity(outcome, stale_record);
        publish(resolution.clone());
        resolution
    }

    pub(crate) async fn resolve_collection_tracked(
        &self,
        entity_type: EntityType,
        scope: &CollectionScope,
        params: &KeyParams,
        generation: &Generation,
        publish: &Publish<'_, Vec<EntityRecord>>,
    ) -> Resolution<Vec<EntityRecord>> {
        let started = Instant::now();
        self.sweep_on_access();

        let key = self.collection_key(entity_type, scope, params);
        let stale = match self.check_cache(entity_type, self.inner.store.get(&key)) {
            CacheCheck::Fresh(entry) => {
                if let Some(items) = entry.value.as_collection() {
                    let resolution = Resolution::ready(items.as_ref().clone());
                    publish(resolution.clone());
                    return resolution;
                }
                None
            }
            CacheCheck::Stale(entry) => Some(entry),
            CacheCheck::Miss => None,
        };
        let stale_items = stale
            .as_ref()
            .and_then(|e| e.value.as_collection())
            .map(|items| items.as_ref().clone());

        publish(Resolution::loading(stale_items.clone()));

        let epoch = self.inner.store.invalidation_epoch();
        let outcome = self
            .fetch_collection(entity_type, scope, params, &key, epoch)
            .await;
        CacheMetrics::resolve_duration(entity_type, started.elapsed());

        if !generation.is_current() {
            CacheMetrics::superseded(entity_type);
            warn!(
                entity_type = %entity_type,
                key = %key,
                generation = generation.value(),
                "Discarding result of superseded collection resolve"
            );
            if stale.is_some() {
                self.inner.store.restore_stale(&key);
            }
            return settle_collection(outcome, stale_items);
        }

        match &outcome {
            Ok(items) => {
                let value = CacheValue::Collection(Arc::new(items.clone()));
                if self.inner.store.put_if_current(
                    key.clone(),
                    value,
                    self.inner.settings.collection_ttl,
                    generation,
                    epoch,
                ) {
                    for record in items {
                        self.inner.store.record_aliases(record);
                    }
                }
                debug!(key = %key, count = items.len(), "Resolved collection");
            }
            Err(error) => {
                if stale.is_some() {
                    self.inner.store.mark_error(&key, error.clone());
                }
                warn!(key = %key, error = %error, "Collection fetch failed");
            }
        }

        let resolution = settle_collection(outcome, stale_items);
        publish(resolution.clone());
        resolution
    }

    /// Runs (or joins) the pair of single-entity lookups.
    async fn lookup(&self, entity_type: EntityType, identifier: &str, epoch: u64) -> LookupOutcome {
        let client = Arc::clone(&self.inner.client);
        let timeout = self.inner.settings.fetch_timeout;
        let raw = identifier.to_string();
        self.inner
            .entity_flights
            .run((entity_type, raw.clone()), epoch, move || {
                dual_lookup(client, timeout, entity_type, raw).boxed()
            })
            .await
    }

    /// Runs (or joins) the fetches for one collection key.
    async fn fetch_collection(
        &self,
        entity_type: EntityType,
        scope: &CollectionScope,
        params: &KeyParams,
        key: &CacheKey,
        epoch: u64,
    ) -> CollectionOutcome {
        let client = Arc::clone(&self.inner.client);
        let timeout = self.inner.settings.fetch_timeout;
        let scope = scope.clone();
        let params = params.clone();
        self.inner
            .collection_flights
            .run(key.clone(), epoch, move || {
                collection_lookup(client, timeout, entity_type, scope, params).boxed()
            })
            .await
    }
}

enum CacheCheck {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Miss,
}

fn settle_entity(outcome: LookupOutcome, stale: Option<EntityRecord>) -> Resolution<EntityRecord> {
    match outcome {
        LookupOutcome::Found { record, .. } => Resolution::ready(record),
        LookupOutcome::NotFound => Resolution::not_found(),
        LookupOutcome::Failed(error) => Resolution::failed(error, stale),
    }
}

fn settle_collection(
    outcome: CollectionOutcome,
    stale: Option<Vec<EntityRecord>>,
) -> Resolution<Vec<EntityRecord>> {
    match outcome {
        Ok(items) => Resolution::ready(items),
        Err(error) => Resolution::failed(error, stale),
    }
}

async fn dual_lookup(
    client: Arc<dyn DataAccessClient>,
    timeout: Duration,
    entity_type: EntityType,
    raw: String,
) -> LookupOutcome {
    let primary = EntityIdentifier::classify(&raw);
    debug!(
        entity_type = %entity_type,
        identifier = %raw,
        canonical_shape = primary.is_canonical(),
        "Looking up by both identifier paths"
    );

    let code = primary.as_canonical();
    let legacy_id = primary.as_legacy();
    let (by_code, by_legacy) = tokio::join!(
        with_timeout("fetch_by_canonical_code", timeout, || {
            client.fetch_by_canonical_code(entity_type, &code)
        }),
        with_timeout("fetch_by_legacy_id", timeout, || {
            client.fetch_by_legacy_id(entity_type, &legacy_id)
        }),
    );

    let by_code = LookupOutcome::from_result(LookupPath::Canonical, by_code);
    let by_legacy = LookupOutcome::from_result(LookupPath::Legacy, by_legacy);
    CacheMetrics::lookup(entity_type, LookupPath::Canonical.as_str(), by_code.label());
    CacheMetrics::lookup(entity_type, LookupPath::Legacy.as_str(), by_legacy.label());

    merge_lookups(by_code, by_legacy)
}

async fn collection_lookup(
    client: Arc<dyn DataAccessClient>,
    timeout: Duration,
    entity_type: EntityType,
    scope: CollectionScope,
    params: KeyParams,
) -> CollectionOutcome {
    let Some((canonical_filter, legacy_filter)) = scope.filters() else {
        let query = CollectionQuery {
            filter: ScopeFilter::All,
            params,
        };
        return with_timeout("fetch_collection", timeout, || {
            client.fetch_collection(entity_type, &query)
        })
        .await;
    };

    let canonical = CollectionQuery {
        filter: canonical_filter,
        params: params.clone(),
    };
    let legacy = CollectionQuery {
        filter: legacy_filter,
        params,
    };
    let (by_code, by_legacy) = tokio::join!(
        with_timeout("fetch_collection", timeout, || {
            client.fetch_collection(entity_type, &canonical)
        }),
        with_timeout("fetch_collection", timeout, || {
            client.fetch_collection(entity_type, &legacy)
        }),
    );

    CacheMetrics::lookup(entity_type, LookupPath::Canonical.as_str(), collection_label(&by_code));
    CacheMetrics::lookup(entity_type, LookupPath::Legacy.as_str(), collection_label(&by_legacy));

    merge_collections(by_code, by_legacy)
}

fn collection_label(outcome: &CollectionOutcome) -> &'static str {
    match outcome {
        Ok(items) if items.is_empty() => "empty",
        Ok(_) => "found",
        Err(_) => "error",
    }
}
