//! In-memory cache store.
//!
//! Holds one entry per cache key plus an alias table that redirects
//! `(entity type, legacy id)` to the entity's canonical code. Every operation
//! takes the lock for its whole duration and never returns an error.
//!
//! The store also counts invalidations. A fetch remembers the count it
//! started at, and a value fetched before a later invalidation is stored as
//! stale rather than fresh.

use crate::generation::Generation;
use crate::keys::{self, CacheKey, KeyPattern, ParamValue};
use crate::metrics::CacheMetrics;
use parking_lot::RwLock;
use scholara_core::{CanonicalCode, EntityRecord, EntityRef, EntityType, LegacyId, ScholaraError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Within its TTL.
    Fresh,
    /// Past its TTL or invalidated; still displayable.
    Stale,
    /// Stale and being revalidated.
    Fetching,
    /// The last revalidation failed; the previous value is kept.
    Error,
}

/// A cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Entity(Arc<EntityRecord>),
    Collection(Arc<Vec<EntityRecord>>),
}

impl CacheValue {
    #[must_use]
    pub fn as_entity(&self) -> Option<&Arc<EntityRecord>> {
        match self {
            Self::Entity(record) => Some(record),
            Self::Collection(_) => None,
        }
    }

    #[must_use]
    pub fn as_collection(&self) -> Option<&Arc<Vec<EntityRecord>>> {
        match self {
            Self::Collection(records) => Some(records),
            Self::Entity(_) => None,
        }
    }
}

/// A cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: CacheValue,
    pub fetched_at: Instant,
    pub stale_at: Instant,
    pub status: EntryStatus,
    /// Error from the last failed revalidation, if any.
    pub last_error: Option<ScholaraError>,
    /// Invalidation count when the fetch that produced the value started.
    pub epoch: u64,
}

impl CacheEntry {
    fn new(key: CacheKey, value: CacheValue, ttl: Duration, epoch: u64) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            fetched_at: now,
            stale_at: deadline(now, ttl),
            status: EntryStatus::Fresh,
            last_error: None,
            epoch,
        }
    }

    /// Returns true if the entry can be served without revalidation.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.status == EntryStatus::Fresh
    }

    /// A copy with `Fresh` downgraded to `Stale` once the TTL has passed.
    fn observed_at(&self, now: Instant) -> Self {
        let mut entry = self.clone();
        if entry.status == EntryStatus::Fresh && now >= entry.stale_at {
            entry.status = EntryStatus::Stale;
        }
        entry
    }

    /// Every raw identifier this entry keeps meaningful: codes and legacy ids
    /// of the cached records, their owners and parents, and the key's scope.
    fn mentioned_ids(&self) -> Vec<&str> {
        let scope = [keys::CODE_PARAM, keys::OWNER_PARAM, keys::PARENT_PARAM]
            .into_iter()
            .filter_map(|name| self.key.params.get(name).and_then(ParamValue::as_str));
        let records: Vec<&EntityRecord> = match &self.value {
            CacheValue::Entity(record) => vec![record.as_ref()],
            CacheValue::Collection(records) => records.iter().collect(),
        };
        let mut ids: Vec<&str> = scope.collect();
        for record in records {
            ids.push(record.code.as_str());
            ids.extend(record.legacy_id.as_ref().map(LegacyId::as_str));
            for reference in record.owner.iter().chain(record.parent.iter()) {
                ids.extend(reference.raw_forms());
            }
        }
        ids
    }
}

/// Far enough ahead to never be reached by a running process.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `from + after`, clamped instead of overflowing.
fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<CacheKey, CacheEntry>,
    aliases: HashMap<(EntityType, LegacyId), CanonicalCode>,
    readers: HashMap<CacheKey, usize>,
    last_sweep: Option<Instant>,
    invalidations: u64,
}

/// Process-local cache store shared by resolvers and the invalidation coordinator.
#[derive(Debug)]
pub struct CacheStore {
    state: RwLock<StoreState>,
    gc_window: Duration,
}

impl CacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(gc_window: Duration) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            gc_window,
        }
    }

    #[must_use]
    pub const fn gc_window(&self) -> Duration {
        self.gc_window
    }

    /// Returns the entry for a key, with its status as of now.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();
        self.state.read().entries.get(key).map(|e| e.observed_at(now))
    }

    /// Stores a value as fresh for `ttl`.
    pub fn put(&self, key: CacheKey, value: CacheValue, ttl: Duration) {
        let mut state = self.state.write();
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache put");
        let epoch = state.invalidations;
        state.entries.insert(key.clone(), CacheEntry::new(key, value, ttl, epoch));
        CacheMetrics::entries(state.entries.len());
    }

    /// Number of invalidations so far. Capture it before starting a fetch.
    #[must_use]
    pub fn invalidation_epoch(&self) -> u64 {
        self.state.read().invalidations
    }

    /// Records an invalidation, so fetches already in flight store their result as stale.
    pub fn note_invalidation(&self) {
        self.state.write().invalidations += 1;
    }

    /// Stores a value fetched from `epoch`, only if `generation` is still current.
    ///
    /// The value is stored stale if an invalidation happened after `epoch`, and
    /// not at all if the entry already holds a value from a later fetch. Both
    /// checks run while holding the write lock.
    pub fn put_if_current(
        &self,
        key: CacheKey,
        value: CacheValue,
        ttl: Duration,
        generation: &Generation,
        epoch: u64,
    ) -> bool {
        let mut state = self.state.write();
        if !generation.is_current() {
            debug!(key = %key, generation = generation.value(), "Dropping write of superseded generation");
            return false;
        }
        if state.entries.get(&key).is_some_and(|existing| existing.epoch > epoch) {
            debug!(key = %key, epoch = epoch, "Dropping write older than the cached value");
            return false;
        }
        let mut entry = CacheEntry::new(key.clone(), value, ttl, epoch);
        if epoch < state.invalidations {
            debug!(key = %key, epoch = epoch, "Fetch overtaken by an invalidation; storing as stale");
            entry.status = EntryStatus::Stale;
        }
        state.entries.insert(key, entry);
        CacheMetrics::entries(state.entries.len());
        true
    }

    /// Marks an entry stale, keeping its value. Returns false if absent.
    pub fn mark_stale(&self, key: &CacheKey) -> bool {
        let mut state = self.state.write();
        state.invalidations += 1;
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.status = EntryStatus::Stale;
                debug!(key = %key, "Cache entry marked stale");
                true
            }
            None => false,
        }
    }

    /// Marks every matching entry stale and returns their keys.
    pub fn mark_stale_matching(&self, pattern: &KeyPattern) -> Vec<CacheKey> {
        let mut state = self.state.write();
        state.invalidations += 1;
        let marked: Vec<CacheKey> = state
            .entries
            .values_mut()
            .filter(|entry| pattern.matches(&entry.key))
            .map(|entry| {
                entry.status = EntryStatus::Stale;
                entry.key.clone()
            })
            .collect();
        if !marked.is_empty() {
            debug!(pattern = %pattern, count = marked.len(), "Cache entries marked stale");
        }
        marked
    }

    /// Marks an entry as being revalidated.
    pub fn mark_fetching(&self, key: &CacheKey) {
        if let Some(entry) = self.state.write().entries.get_mut(key) {
            entry.status = EntryStatus::Fetching;
        }
    }

    /// Returns an entry left `Fetching` by an abandoned revalidation to `Stale`.
    pub fn restore_stale(&self, key: &CacheKey) {
        if let Some(entry) = self.state.write().entries.get_mut(key) {
            if entry.status == EntryStatus::Fetching {
                entry.status = EntryStatus::Stale;
            }
        }
    }

    /// Records a failed revalidation, keeping the previous value.
    pub fn mark_error(&self, key: &CacheKey, error: ScholaraError) {
        if let Some(entry) = self.state.write().entries.get_mut(key) {
            entry.status = EntryStatus::Error;
            entry.last_error = Some(error);
        }
    }

    /// Removes an entry. Returns false if absent.
    pub fn evict(&self, key: &CacheKey) -> bool {
        let mut state = self.state.write();
        let removed = state.entries.remove(key).is_some();
        if removed {
            debug!(key = %key, "Cache entry evicted");
            CacheMetrics::evicted(1);
            CacheMetrics::entries(state.entries.len());
        }
        removed
    }

    /// Removes entries past `stale_at + gc_window` that have no active reader,
    /// then aliases no remaining entry mentions.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.state.write();
        let gc_window = self.gc_window;
        let StoreState {
            entries,
            aliases,
            readers,
            last_sweep,
            ..
        } = &mut *state;

        let before = entries.len();
        entries.retain(|key, entry| {
            deadline(entry.stale_at, gc_window) >= now || readers.get(key).copied().unwrap_or(0) > 0
        });
        *last_sweep = Some(now);

        let mentioned: HashSet<&str> = entries.values().flat_map(CacheEntry::mentioned_ids).collect();
        let aliases_before = aliases.len();
        aliases.retain(|(_, legacy_id), code| {
            mentioned.contains(code.as_str()) || mentioned.contains(legacy_id.as_str())
        });
        if aliases.len() < aliases_before {
            debug!(pruned = aliases_before - aliases.len(), "Cache sweep pruned aliases");
        }

        let removed = before - entries.len();
        if removed > 0 {
            info!(removed = removed, remaining = entries.len(), "Cache sweep evicted entries");
            CacheMetrics::evicted(removed);
            CacheMetrics::entries(entries.len());
        }
        removed
    }

    /// Sweeps if the last sweep was at least `interval` ago.
    pub fn sweep_if_due(&self, now: Instant, interval: Duration) -> usize {
        let due = self
            .state
            .read()
            .last_sweep
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due {
            self.sweep(now)
        } else {
            0
        }
    }

    /// Removes every entry and alias.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.aliases.clear();
        CacheMetrics::entries(0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Returns every key currently stored.
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        self.state.read().entries.keys().cloned().collect()
    }

    /// Returns every key of an entity type's detail entries.
    #[must_use]
    pub fn detail_keys(&self, entity_type: EntityType) -> Vec<CacheKey> {
        self.state
            .read()
            .entries
            .keys()
            .filter(|k| k.is_detail() && k.entity_type == entity_type)
            .cloned()
            .collect()
    }

    // ============ Alias table ============

    /// Records that `legacy_id` addresses the entity with `code`.
    pub fn record_alias(&self, entity_type: EntityType, legacy_id: LegacyId, code: CanonicalCode) {
        let mut state = self.state.write();
        let previous = state.aliases.insert((entity_type, legacy_id.clone()), code.clone());
        if previous.as_ref() != Some(&code) {
            debug!(entity_type = %entity_type, legacy_id = %legacy_id, code = %code, "Alias recorded");
        }
    }

    /// Records the aliases carried by a record and its owner and parent references.
    pub fn record_aliases(&self, record: &EntityRecord) {
        if let Some(legacy_id) = &record.legacy_id {
            self.record_alias(record.entity_type, legacy_id.clone(), record.code.clone());
        }
        if let (Some(owner_type), Some(owner)) = (record.entity_type.owner_type(), &record.owner) {
            self.record_ref_alias(owner_type, owner);
        }
        if let (Some(parent_type), Some(parent)) = (record.entity_type.parent_type(), &record.parent) {
            self.record_ref_alias(parent_type, parent);
        }
    }

    /// Records an alias for a reference that carries both forms.
    pub fn record_ref_alias(&self, entity_type: EntityType, reference: &EntityRef) {
        if let (Some(code), Some(legacy_id)) = (&reference.code, &reference.legacy_id) {
            self.record_alias(entity_type, legacy_id.clone(), code.clone());
        }
    }

    /// Returns the canonical code a legacy id redirects to.
    #[must_use]
    pub fn resolve_alias(&self, entity_type: EntityType, legacy_id: &LegacyId) -> Option<CanonicalCode> {
        self.state
            .read()
            .aliases
            .get(&(entity_type, legacy_id.clone()))
            .cloned()
    }

    /// Returns the legacy ids that redirect to `code`.
    #[must_use]
    pub fn legacy_ids_for(&self, entity_type: EntityType, code: &CanonicalCode) -> Vec<LegacyId> {
        self.state
            .read()
            .aliases
            .iter()
            .filter(|((t, _), c)| *t == entity_type && *c == code)
            .map(|((_, legacy_id), _)| legacy_id.clone())
            .collect()
    }

    /// Maps a raw identifier to the canonical code when an alias is known.
    #[must_use]
    pub fn normalize(&self, entity_type: EntityType, raw: &str) -> String {
        self.resolve_alias(entity_type, &LegacyId::new(raw))
            .map_or_else(|| raw.to_string(), |code| code.as_str().to_string())
    }

    /// Returns the detail entry an identifier of either form points at.
    ///
    /// The identifier is tried as a canonical code first, then via the alias table.
    #[must_use]
    pub fn lookup_entity(&self, entity_type: EntityType, raw: &str) -> Option<CacheEntry> {
        let direct = keys::entity_detail(entity_type, &CanonicalCode::new(raw));
        self.get(&direct).or_else(|| {
            let code = self.resolve_alias(entity_type, &LegacyId::new(raw))?;
            self.get(&keys::entity_detail(entity_type, &code))
        })
    }

    // ============ Readers ============

    /// Registers an active reader of `key`; the entry is not swept while held.
    pub fn retain(self: &Arc<Self>, key: CacheKey) -> ReaderGuard {
        *self.state.write().readers.entry(key.clone()).or_insert(0) += 1;
        ReaderGuard {
            store: Arc::clone(self),
            key,
        }
    }

    /// Returns the number of active readers of `key`.
    #[must_use]
    pub fn reader_count(&self, key: &CacheKey) -> usize {
        self.state.read().readers.get(key).copied().unwrap_or(0)
    }

    fn release(&self, key: &CacheKey) {
        let mut state = self.state.write();
        if let Some(count) = state.readers.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.readers.remove(key);
            }
        }
    }
}

/// Keeps an entry alive across sweeps until dropped.
#[derive(Debug)]
pub struct ReaderGuard {
    store: Arc<CacheStore>,
    key: CacheKey,
}

impl ReaderGuard {
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}
