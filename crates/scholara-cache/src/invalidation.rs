//! Invalidation after writes.
//!
//! The relationship graph is an exhaustive match over [`EntityType`], so a new
//! entity type does not compile until its dependents are declared.
//! Invalidation marks entries stale and never refetches; the next reader
//! revalidates through the resolver. Every invalidation also advances the
//! store's invalidation count, so reads already in flight cannot overwrite
//! the stale marks with a pre-write result.

use crate::client::{MutationKind, MutationResponse};
use crate::keys::{self, CacheKey, KeyPattern};
use crate::metrics::CacheMetrics;
use crate::store::CacheStore;
use scholara_core::{CanonicalCode, EntityRef, EntityType, LegacyId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// A cached scope that depends on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// The entity's own detail entry.
    OwnDetail,
    /// Every page of the owner's collection of this entity type.
    OwnerCollection,
    /// Every page of the parent's collection of this entity type.
    ParentCollection,
    /// The parent entity's detail entry (it embeds counts or ratings).
    ParentDetail,
    /// Every unscoped listing of this entity type.
    Listings,
}

/// Returns the scopes that must be invalidated when an entity of `entity_type` changes.
#[must_use]
pub const fn dependents(entity_type: EntityType) -> &'static [Dependency] {
    use Dependency::{Listings, OwnDetail, OwnerCollection, ParentCollection, ParentDetail};
    match entity_type {
        EntityType::Institution => &[OwnDetail, Listings],
        EntityType::Application => &[OwnDetail, OwnerCollection, ParentCollection, ParentDetail, Listings],
        EntityType::Consultation => &[OwnDetail, OwnerCollection, ParentCollection, Listings],
        EntityType::Review => &[OwnDetail, OwnerCollection, ParentCollection, ParentDetail, Listings],
        EntityType::User => &[OwnDetail, Listings],
    }
}

/// A completed write, consumed once by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub entity_type: EntityType,
    pub kind: MutationKind,
    pub code: CanonicalCode,
    pub legacy_id: Option<LegacyId>,
    pub owner: Option<EntityRef>,
    /// Owner before a reassignment.
    pub previous_owner: Option<EntityRef>,
    pub parent: Option<EntityRef>,
    /// Parent before a reassignment.
    pub previous_parent: Option<EntityRef>,
}

impl MutationRecord {
    #[must_use]
    pub fn new(entity_type: EntityType, kind: MutationKind, code: CanonicalCode) -> Self {
        Self {
            entity_type,
            kind,
            code,
            legacy_id: None,
            owner: None,
            previous_owner: None,
            parent: None,
            previous_parent: None,
        }
    }

    /// Builds the record from a successful mutate response.
    #[must_use]
    pub fn from_response(entity_type: EntityType, kind: MutationKind, response: &MutationResponse) -> Self {
        let entity = &response.entity;
        Self {
            entity_type,
            kind,
            code: entity.code.clone(),
            legacy_id: entity.legacy_id.clone(),
            owner: entity.owner.clone(),
            previous_owner: response.previous_owner.clone(),
            parent: entity.parent.clone(),
            previous_parent: response.previous_parent.clone(),
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner: EntityRef) -> Self {
        self.owner = Some(owner);
        self
    }

    #[must_use]
    pub fn with_previous_owner(mut self, owner: EntityRef) -> Self {
        self.previous_owner = Some(owner);
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: EntityRef) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_previous_parent(mut self, parent: EntityRef) -> Self {
        self.previous_parent = Some(parent);
        self
    }

    fn owners(&self) -> impl Iterator<Item = &EntityRef> {
        self.owner.iter().chain(self.previous_owner.iter())
    }

    fn parents(&self) -> impl Iterator<Item = &EntityRef> {
        self.parent.iter().chain(self.previous_parent.iter())
    }
}

/// Scope of a manual invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// One entity, by an identifier of either form.
    Detail(String),
    /// Every collection owned by the identified user.
    Owner(String),
    /// Every collection belonging to the identified parent.
    Parent(String),
    /// Every key of the entity type.
    AllOf,
}

/// Marks stale whatever a write could have affected.
#[derive(Debug, Clone)]
pub struct InvalidationCoordinator {
    store: Arc<CacheStore>,
}

impl InvalidationCoordinator {
    #[must_use]
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Invalidates every scope depending on the written entity.
    ///
    /// Returns the keys that were marked stale or evicted.
    pub fn on_mutation_success(&self, record: &MutationRecord) -> BTreeSet<CacheKey> {
        let entity_type = record.entity_type;
        let mut invalidated = BTreeSet::new();
        self.store.note_invalidation();

        if let Some(legacy_id) = &record.legacy_id {
            self.store
                .record_alias(entity_type, legacy_id.clone(), record.code.clone());
        }
        if let Some(owner_type) = entity_type.owner_type() {
            for owner in record.owners() {
                self.store.record_ref_alias(owner_type, owner);
            }
        }
        if let Some(parent_type) = entity_type.parent_type() {
            for parent in record.parents() {
                self.store.record_ref_alias(parent_type, parent);
            }
        }

        for dependency in dependents(entity_type) {
            match dependency {
                Dependency::OwnDetail => {
                    let key = keys::entity_detail(entity_type, &record.code);
                    let hit = if record.kind == MutationKind::Delete {
                        self.store.evict(&key)
                    } else {
                        self.store.mark_stale(&key)
                    };
                    if hit {
                        invalidated.insert(key);
                    }
                }
                Dependency::OwnerCollection => {
                    if let Some(owner_type) = entity_type.owner_type() {
                        for owner in record.owners() {
                            for form in self.forms(owner_type, owner) {
                                invalidated.extend(self.mark(&keys::owner_collections(entity_type, &form)));
                            }
                        }
                    }
                }
                Dependency::ParentCollection => {
                    if let Some(parent_type) = entity_type.parent_type() {
                        for parent in record.parents() {
                            for form in self.forms(parent_type, parent) {
                                invalidated.extend(self.mark(&keys::parent_collections(entity_type, &form)));
                            }
                        }
                    }
                }
                Dependency::ParentDetail => {
                    if let Some(parent_type) = entity_type.parent_type() {
                        for parent in record.parents() {
                            invalidated.extend(self.mark_detail(parent_type, parent));
                        }
                    }
                }
                Dependency::Listings => {
                    invalidated.extend(self.mark(&keys::listings(entity_type)));
                }
            }
        }

        CacheMetrics::invalidated(entity_type, invalidated.len());
        info!(
            entity_type = %entity_type,
            code = %record.code,
            kind = %record.kind,
            invalidated = invalidated.len(),
            "Invalidated cache after mutation"
        );
        invalidated
    }

    /// Manually invalidates a scope, e.g. after a write made outside this cache.
    pub fn invalidate(&self, entity_type: EntityType, scope: &InvalidationScope) -> BTreeSet<CacheKey> {
        self.store.note_invalidation();
        let invalidated: BTreeSet<CacheKey> = match scope {
            InvalidationScope::Detail(raw) => {
                self.mark_detail(entity_type, &raw_ref(raw))
            }
            InvalidationScope::Owner(raw) => {
                let related = entity_type.owner_type().unwrap_or(EntityType::User);
                self.forms(related, &raw_ref(raw))
                    .iter()
                    .flat_map(|form| self.mark(&keys::owner_collections(entity_type, form)))
                    .collect()
            }
            InvalidationScope::Parent(raw) => {
                let related = entity_type.parent_type().unwrap_or(EntityType::Institution);
                self.forms(related, &raw_ref(raw))
                    .iter()
                    .flat_map(|form| self.mark(&keys::parent_collections(entity_type, form)))
                    .collect()
            }
            InvalidationScope::AllOf => self.mark(&keys::all_of(entity_type)).into_iter().collect(),
        };

        CacheMetrics::invalidated(entity_type, invalidated.len());
        debug!(
            entity_type = %entity_type,
            scope = ?scope,
            invalidated = invalidated.len(),
            "Manual invalidation"
        );
        invalidated
    }

    fn mark(&self, pattern: &KeyPattern) -> Vec<CacheKey> {
        self.store.mark_stale_matching(pattern)
    }

    /// Marks a related entity's detail entry stale, by code or via its alias.
    fn mark_detail(&self, entity_type: EntityType, reference: &EntityRef) -> BTreeSet<CacheKey> {
        let mut codes: Vec<CanonicalCode> = reference.code.iter().cloned().collect();
        if let Some(legacy_id) = &reference.legacy_id {
            codes.extend(self.store.resolve_alias(entity_type, legacy_id));
        }

        codes
            .into_iter()
            .map(|code| keys::entity_detail(entity_type, &code))
            .filter(|key| self.store.mark_stale(key))
            .collect()
    }

    /// Every raw form a related entity's collections may be keyed under.
    ///
    /// Collections are keyed by the alias-normalized identifier when known, so
    /// the canonical code, the legacy id and its alias target are all covered.
    fn forms(&self, entity_type: EntityType, reference: &EntityRef) -> BTreeSet<String> {
        let mut forms: BTreeSet<String> = reference.raw_forms().into_iter().map(str::to_string).collect();
        if let Some(legacy_id) = &reference.legacy_id {
            if let Some(code) = self.store.resolve_alias(entity_type, legacy_id) {
                forms.insert(code.as_str().to_string());
            }
        }
        if let Some(code) = &reference.code {
            forms.extend(
                self.store
                    .legacy_ids_for(entity_type, code)
                    .into_iter()
                    .map(|id| id.as_str().to_string()),
            );
        }
        forms
    }
}

/// A reference to an identifier of unknown form.
fn raw_ref(raw: &str) -> EntityRef {
    EntityRef {
        code: Some(CanonicalCode::new(raw)),
        legacy_id: Some(LegacyId::new(raw)),
    }
}
