//! Data access client seam.
//!
//! The transport that actually talks to the portal API lives outside this
//! crate; the cache consumes it through [`DataAccessClient`].

use crate::keys::KeyParams;
use async_trait::async_trait;
use scholara_core::{
    CanonicalCode, EntityIdentifier, EntityRecord, EntityRef, EntityType, Interface, LegacyId,
    ScholaraError, ScholaraResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};

/// Scope of a collection query sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeFilter {
    /// Every entity of the type.
    All,
    /// Entities owned by the identified user.
    Owner(EntityIdentifier),
    /// Entities belonging to the identified parent.
    Parent(EntityIdentifier),
}

/// A collection query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    pub filter: ScopeFilter,
    pub params: KeyParams,
}

/// Kind of write performed by [`DataAccessClient::mutate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    /// Moves the entity to another owner or parent.
    Reassign,
}

impl MutationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Reassign => "reassign",
        }
    }
}

impl Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write request.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub kind: MutationKind,
    /// The entity written to; `None` for creates.
    pub target: Option<EntityIdentifier>,
    pub payload: Value,
}

impl MutationRequest {
    #[must_use]
    pub const fn create(payload: Value) -> Self {
        Self {
            kind: MutationKind::Create,
            target: None,
            payload,
        }
    }

    #[must_use]
    pub fn update(target: impl Into<EntityIdentifier>, payload: Value) -> Self {
        Self {
            kind: MutationKind::Update,
            target: Some(target.into()),
            payload,
        }
    }

    #[must_use]
    pub fn delete(target: impl Into<EntityIdentifier>) -> Self {
        Self {
            kind: MutationKind::Delete,
            target: Some(target.into()),
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn reassign(target: impl Into<EntityIdentifier>, payload: Value) -> Self {
        Self {
            kind: MutationKind::Reassign,
            target: Some(target.into()),
            payload,
        }
    }
}

/// The server's answer to a successful write.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResponse {
    /// The entity as it is after the write (as it was, for deletes).
    pub entity: EntityRecord,
    /// Owner before the write, when it changed.
    pub previous_owner: Option<EntityRef>,
    /// Parent before the write, when it changed.
    pub previous_parent: Option<EntityRef>,
}

impl MutationResponse {
    #[must_use]
    pub const fn new(entity: EntityRecord) -> Self {
        Self {
            entity,
            previous_owner: None,
            previous_parent: None,
        }
    }
}

/// Performs the actual entity fetch and mutate calls.
///
/// Implementations map HTTP statuses onto [`ScholaraError`]: 404 becomes
/// `Ok(None)` for single lookups, 401/403 become authorization errors, 422 a
/// validation error and anything else a transport error.
#[async_trait]
pub trait DataAccessClient: Interface {
    /// Fetches an entity by canonical code.
    async fn fetch_by_canonical_code(
        &self,
        entity_type: EntityType,
        code: &CanonicalCode,
    ) -> ScholaraResult<Option<EntityRecord>>;

    /// Fetches an entity by legacy id.
    async fn fetch_by_legacy_id(
        &self,
        entity_type: EntityType,
        legacy_id: &LegacyId,
    ) -> ScholaraResult<Option<EntityRecord>>;

    /// Fetches a collection.
    async fn fetch_collection(
        &self,
        entity_type: EntityType,
        query: &CollectionQuery,
    ) -> ScholaraResult<Vec<EntityRecord>>;

    /// Performs a write.
    async fn mutate(
        &self,
        entity_type: EntityType,
        request: MutationRequest,
    ) -> ScholaraResult<MutationResponse>;
}

/// Which identifier path a single lookup went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupPath {
    Canonical,
    Legacy,
}

impl LookupPath {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Canonical => "canonical",
            Self::Legacy => "legacy",
        }
    }
}

/// Settled outcome of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found {
        record: EntityRecord,
        path: LookupPath,
    },
    NotFound,
    Failed(ScholaraError),
}

impl LookupOutcome {
    /// Converts a client result for one path.
    ///
    /// A `NotFound` error is treated the same as `Ok(None)`.
    #[must_use]
    pub fn from_result(path: LookupPath, result: ScholaraResult<Option<EntityRecord>>) -> Self {
        match result {
            Ok(Some(record)) => Self::Found { record, path },
            Ok(None) => Self::NotFound,
            Err(e) if e.is_not_found() => Self::NotFound,
            Err(e) => Self::Failed(e),
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Found { .. } => "found",
            Self::NotFound => "not_found",
            Self::Failed(_) => "error",
        }
    }

    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_outcome_from_result() {
        let record = EntityRecord::new(EntityType::Review, CanonicalCode::new("r"));
        assert!(LookupOutcome::from_result(LookupPath::Legacy, Ok(Some(record))).is_found());
        assert_eq!(
            LookupOutcome::from_result(LookupPath::Legacy, Ok(None)),
            LookupOutcome::NotFound
        );
        assert_eq!(
            LookupOutcome::from_result(
                LookupPath::Canonical,
                Err(ScholaraError::not_found(EntityType::Review, "r"))
            ),
            LookupOutcome::NotFound
        );
        assert_eq!(
            LookupOutcome::from_result(LookupPath::Canonical, Err(ScholaraError::transport("reset")))
                .label(),
            "error"
        );
    }

    #[test]
    fn test_mutation_request_builders() {
        let create = MutationRequest::create(serde_json::json!({"studentName": "Ahmad"}));
        assert_eq!(create.kind, MutationKind::Create);
        assert!(create.target.is_none());

        let delete = MutationRequest::delete(EntityIdentifier::from("42"));
        assert_eq!(delete.kind, MutationKind::Delete);
        assert_eq!(delete.target.map(|t| t.as_str().to_string()), Some("42".to_string()));
        assert_eq!(MutationKind::Reassign.to_string(), "reassign");
    }
}
