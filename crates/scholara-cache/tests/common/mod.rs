//! Common test infrastructure for cache integration tests.
//!
//! Provides an in-memory `DataAccessClient` that records every call and can be
//! scripted to fail, delay or hold individual lookups. Reads see the records
//! as they were when the call arrived, even if held by a gate or script.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use scholara_cache::{
    CacheContext, CollectionQuery, DataAccessClient, LookupPath, MutationKind, MutationRequest,
    MutationResponse, ScopeFilter,
};
use scholara_config::AppConfig;
use scholara_core::{
    CanonicalCode, EntityIdentifier, EntityRecord, EntityRef, EntityType, LegacyId,
    ScholaraError, ScholaraResult,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const AHMAD_APPLICATION_CODE: &str = "018f3b2a-7c4e-7a10-9b2f-3c5d6e7f8a9b";
pub const AHMAD_APPLICATION_LEGACY_ID: &str = "42";
pub const AHMAD_USER_CODE: &str = "018f3b2a-0000-7000-8000-00000000000a";
pub const AHMAD_USER_LEGACY_ID: &str = "7";
pub const INSTITUTION_CODE: &str = "018f3b2a-0000-7000-8000-0000000000b1";
pub const INSTITUTION_LEGACY_ID: &str = "3";

/// Scripted behaviour for one path and identifier.
#[derive(Debug, Clone)]
pub enum Script {
    Fail(ScholaraError),
    Delay(Duration),
    /// Never completes.
    Hang,
}

/// A call received by the fake client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ByCode(EntityType, String),
    ByLegacy(EntityType, String),
    Collection(EntityType, ScopeFilter),
    Mutate(EntityType, MutationKind),
}

/// In-memory data access client.
#[derive(Default)]
pub struct InMemoryClient {
    records: Mutex<Vec<EntityRecord>>,
    calls: Mutex<Vec<Call>>,
    scripts: Mutex<HashMap<(LookupPath, String), Script>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    mutation_error: Mutex<Option<ScholaraError>>,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<EntityRecord>) -> Self {
        let client = Self::new();
        *client.records.lock() = records;
        client
    }

    pub fn insert(&self, record: EntityRecord) {
        self.records.lock().push(record);
    }

    pub fn remove(&self, code: &str) {
        self.records.lock().retain(|r| r.code.as_str() != code);
    }

    /// Scripts every call for `identifier` on one path.
    pub fn script(&self, path: LookupPath, identifier: &str, script: Script) {
        self.scripts.lock().insert((path, identifier.to_string()), script);
    }

    /// Holds every call for `identifier` until permits are added to the returned gate.
    pub fn gate(&self, identifier: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .insert(identifier.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn fail_mutations(&self, error: ScholaraError) {
        *self.mutation_error.lock() = Some(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of single-entity lookups (either path) made for `identifier`.
    pub fn lookup_calls(&self, identifier: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::ByCode(_, id) | Call::ByLegacy(_, id) if id == identifier))
            .count()
    }

    pub fn collection_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Collection(..)))
            .count()
    }

    pub fn mutate_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Mutate(..)))
            .count()
    }

    async fn before(&self, path: LookupPath, identifier: &str) -> ScholaraResult<()> {
        let gate = self.gates.lock().get(identifier).cloned();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| ScholaraError::internal(e.to_string()))?;
        }

        let script = self.scripts.lock().get(&(path, identifier.to_string())).cloned();
        match script {
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Some(Script::Hang) => std::future::pending().await,
            None => Ok(()),
        }
    }

    fn find(&self, entity_type: EntityType, identifier: &EntityIdentifier) -> Option<EntityRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.entity_type == entity_type && matches_identifier(r, identifier))
            .cloned()
    }
}

fn matches_identifier(record: &EntityRecord, identifier: &EntityIdentifier) -> bool {
    match identifier {
        EntityIdentifier::Canonical(code) => &record.code == code,
        EntityIdentifier::Legacy(id) => record.legacy_id.as_ref() == Some(id),
    }
}

fn matches_ref(reference: Option<&EntityRef>, identifier: &EntityIdentifier) -> bool {
    reference.is_some_and(|r| match identifier {
        EntityIdentifier::Canonical(code) => r.code.as_ref() == Some(code),
        EntityIdentifier::Legacy(id) => r.legacy_id.as_ref() == Some(id),
    })
}

fn path_of(identifier: &EntityIdentifier) -> LookupPath {
    if identifier.is_canonical() {
        LookupPath::Canonical
    } else {
        LookupPath::Legacy
    }
}

fn take_ref(payload: &mut Value, name: &str) -> ScholaraResult<Option<EntityRef>> {
    match payload.as_object_mut().and_then(|o| o.remove(name)) {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl DataAccessClient for InMemoryClient {
    async fn fetch_by_canonical_code(
        &self,
        entity_type: EntityType,
        code: &CanonicalCode,
    ) -> ScholaraResult<Option<EntityRecord>> {
        self.calls
            .lock()
            .push(Call::ByCode(entity_type, code.as_str().to_string()));
        let found = self.find(entity_type, &EntityIdentifier::Canonical(code.clone()));
        self.before(LookupPath::Canonical, code.as_str()).await?;
        Ok(found)
    }

    async fn fetch_by_legacy_id(
        &self,
        entity_type: EntityType,
        legacy_id: &LegacyId,
    ) -> ScholaraResult<Option<EntityRecord>> {
        self.calls
            .lock()
            .push(Call::ByLegacy(entity_type, legacy_id.as_str().to_string()));
        let found = self.find(entity_type, &EntityIdentifier::Legacy(legacy_id.clone()));
        self.before(LookupPath::Legacy, legacy_id.as_str()).await?;
        Ok(found)
    }

    async fn fetch_collection(
        &self,
        entity_type: EntityType,
        query: &CollectionQuery,
    ) -> ScholaraResult<Vec<EntityRecord>> {
        self.calls
            .lock()
            .push(Call::Collection(entity_type, query.filter.clone()));
        let found: Vec<EntityRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.entity_type == entity_type)
            .filter(|r| match &query.filter {
                ScopeFilter::All => true,
                ScopeFilter::Owner(id) => matches_ref(r.owner.as_ref(), id),
                ScopeFilter::Parent(id) => matches_ref(r.parent.as_ref(), id),
            })
            .cloned()
            .collect();

        match &query.filter {
            ScopeFilter::All => {}
            ScopeFilter::Owner(id) | ScopeFilter::Parent(id) => {
                self.before(path_of(id), id.as_str()).await?;
            }
        }
        Ok(found)
    }

    async fn mutate(
        &self,
        entity_type: EntityType,
        request: MutationRequest,
    ) -> ScholaraResult<MutationResponse> {
        self.calls.lock().push(Call::Mutate(entity_type, request.kind));
        if let Some(error) = self.mutation_error.lock().clone() {
            return Err(error);
        }

        let mut payload = request.payload;
        let owner = take_ref(&mut payload, "owner")?;
        let parent = take_ref(&mut payload, "parent")?;
        let attributes = match payload {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let mut records = self.records.lock();
        if request.kind == MutationKind::Create {
            let mut record = EntityRecord::new(entity_type, CanonicalCode::generate());
            record.owner = owner;
            record.parent = parent;
            record.attributes = attributes;
            records.push(record.clone());
            return Ok(MutationResponse::new(record));
        }

        let target = request
            .target
            .ok_or_else(|| ScholaraError::validation("target required"))?;
        let index = records
            .iter()
            .position(|r| r.entity_type == entity_type && matches_identifier(r, &target))
            .ok_or_else(|| ScholaraError::not_found(entity_type, target.as_str()))?;

        match request.kind {
            MutationKind::Delete => Ok(MutationResponse::new(records.remove(index))),
            MutationKind::Reassign => {
                let record = &mut records[index];
                let mut response = MutationResponse::new(record.clone());
                if let Some(owner) = owner {
                    response.previous_owner = record.owner.replace(owner);
                }
                if let Some(parent) = parent {
                    response.previous_parent = record.parent.replace(parent);
                }
                response.entity = record.clone();
                Ok(response)
            }
            MutationKind::Update | MutationKind::Create => {
                let record = &mut records[index];
                record.attributes.extend(attributes);
                Ok(MutationResponse::new(record.clone()))
            }
        }
    }
}

/// Ahmad's application: legacy id 42, owned by user 7, at institution 3.
pub fn ahmad_application() -> EntityRecord {
    EntityRecord::new(
        EntityType::Application,
        CanonicalCode::new(AHMAD_APPLICATION_CODE),
    )
    .with_legacy_id(AHMAD_APPLICATION_LEGACY_ID)
    .with_owner(EntityRef::both(AHMAD_USER_CODE, AHMAD_USER_LEGACY_ID))
    .with_parent(EntityRef::both(INSTITUTION_CODE, INSTITUTION_LEGACY_ID))
    .with_attribute("studentName", "Ahmad")
    .with_attribute("program", "Computer Science")
}

/// An institution with only a legacy id known to callers.
pub fn institution() -> EntityRecord {
    EntityRecord::new(EntityType::Institution, CanonicalCode::new(INSTITUTION_CODE))
        .with_legacy_id(INSTITUTION_LEGACY_ID)
        .with_attribute("name", "Northfield College")
}

/// Config with the background sweeper disabled and a short lookup timeout.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.cache.sweep_interval_secs = 0;
    config.client.fetch_timeout_ms = 200;
    config
}

pub fn test_context(client: Arc<InMemoryClient>) -> CacheContext {
    CacheContext::create(&test_config(), client).expect("valid test config")
}

/// Like [`test_context`], with a lookup timeout long enough to hold calls at a gate.
pub fn patient_context(client: Arc<InMemoryClient>) -> CacheContext {
    let mut config = test_config();
    config.client.fetch_timeout_ms = 5_000;
    CacheContext::create(&config, client).expect("valid test config")
}

/// Polls `condition` until it holds, failing the test after half a second.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
