//! Long-lived observers of one logical position, e.g. "the application on this page".
//!
//! Each resolve on a slot starts a new generation. Results of older
//! generations never reach the store or the slot's state, so switching the
//! identifier mid-flight cannot leak the abandoned entity.

use crate::generation::{Generation, GenerationTracker};
use crate::keys::{self, CacheKey, KeyParams};
use crate::resolution::Resolution;
use crate::resolver::{CollectionScope, DualIdResolver};
use crate::store::ReaderGuard;
use parking_lot::Mutex;
use scholara_core::{EntityRecord, EntityType};
use tokio::sync::watch;
use tracing::debug;

struct SlotState<T> {
    tracker: GenerationTracker,
    state: watch::Sender<Resolution<T>>,
    reader: Mutex<Option<ReaderGuard>>,
}

impl<T: Clone + Send + Sync + 'static> SlotState<T> {
    fn new() -> Self {
        let (state, _) = watch::channel(Resolution::idle());
        Self {
            tracker: GenerationTracker::new(),
            state,
            reader: Mutex::new(None),
        }
    }

    /// Starts a generation and releases the reader of the previous one.
    fn begin(&self) -> Generation {
        let generation = self.tracker.begin();
        self.reader.lock().take();
        generation
    }

    fn publisher<'a>(&'a self, generation: &'a Generation) -> impl Fn(Resolution<T>) + Send + Sync + 'a {
        move |resolution| {
            self.state.send_if_modified(|current| {
                if generation.is_current() {
                    *current = resolution;
                    true
                } else {
                    false
                }
            });
        }
    }

    fn hold(&self, resolver: &DualIdResolver, key: CacheKey, generation: &Generation) {
        if !generation.is_current() {
            return;
        }
        let mut reader = self.reader.lock();
        if reader.as_ref().map(ReaderGuard::key) != Some(&key) {
            *reader = Some(resolver.store().retain(key));
        }
    }

    fn clear(&self) {
        self.tracker.abandon();
        self.reader.lock().take();
        self.state.send_replace(Resolution::idle());
    }

    fn current(&self) -> Resolution<T> {
        self.state.borrow().clone()
    }
}

/// Observes one entity whose identifier may change over time.
pub struct EntitySlot {
    resolver: DualIdResolver,
    entity_type: EntityType,
    slot: SlotState<EntityRecord>,
}

impl EntitySlot {
    #[must_use]
    pub fn new(resolver: DualIdResolver, entity_type: EntityType) -> Self {
        Self {
            resolver,
            entity_type,
            slot: SlotState::new(),
        }
    }

    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Resolution<EntityRecord>> {
        self.slot.state.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> Resolution<EntityRecord> {
        self.slot.current()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.slot.tracker.current()
    }

    /// Points the slot at `identifier` and resolves it, superseding any resolve in flight.
    pub async fn resolve(&self, identifier: &str) -> Resolution<EntityRecord> {
        let generation = self.slot.begin();
        debug!(
            entity_type = %self.entity_type,
            identifier = %identifier,
            generation = generation.value(),
            "Slot resolving entity"
        );

        let publish = self.slot.publisher(&generation);
        let resolution = self
            .resolver
            .resolve_tracked(self.entity_type, identifier, &generation, &publish)
            .await;

        if let Some(record) = &resolution.data {
            let key = keys::entity_detail(self.entity_type, &record.code);
            self.slot.hold(&self.resolver, key, &generation);
        }
        resolution
    }

    /// Abandons any resolve in flight and resets to idle.
    pub fn clear(&self) {
        self.slot.clear();
    }
}

/// Observes one collection whose scope or params may change over time.
pub struct CollectionSlot {
    resolver: DualIdResolver,
    entity_type: EntityType,
    slot: SlotState<Vec<EntityRecord>>,
}

impl CollectionSlot {
    #[must_use]
    pub fn new(resolver: DualIdResolver, entity_type: EntityType) -> Self {
        Self {
            resolver,
            entity_type,
            slot: SlotState::new(),
        }
    }

    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Resolution<Vec<EntityRecord>>> {
        self.slot.state.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> Resolution<Vec<EntityRecord>> {
        self.slot.current()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.slot.tracker.current()
    }

    /// Points the slot at a scope and params and resolves them.
    pub async fn resolve(
        &self,
        scope: &CollectionScope,
        params: &KeyParams,
    ) -> Resolution<Vec<EntityRecord>> {
        let generation = self.slot.begin();
        let key = self.resolver.collection_key(self.entity_type, scope, params);
        debug!(key = %key, generation = generation.value(), "Slot resolving collection");

        let publish = self.slot.publisher(&generation);
        let resolution = self
            .resolver
            .resolve_collection_tracked(self.entity_type, scope, params, &generation, &publish)
            .await;

        if resolution.data.is_some() {
            self.slot.hold(&self.resolver, key, &generation);
        }
        resolution
    }

    pub fn clear(&self) {
        self.slot.clear();
    }
}
