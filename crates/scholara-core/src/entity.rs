//! Portal entity types and the record shape shared by every resource.

use crate::{CanonicalCode, LegacyId, ScholaraError, ScholaraResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display};
use std::str::FromStr;

/// The closed set of resource types served by the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// An educational institution listed in the directory.
    Institution,
    /// A student's application to an institution.
    Application,
    /// A consultation request addressed to an institution.
    Consultation,
    /// A review left on an institution.
    Review,
    /// A portal user; owns applications, consultations and reviews.
    User,
}

impl EntityType {
    /// Every entity type.
    pub const ALL: [Self; 5] = [
        Self::Institution,
        Self::Application,
        Self::Consultation,
        Self::Review,
        Self::User,
    ];

    /// Returns the stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Institution => "institution",
            Self::Application => "application",
            Self::Consultation => "consultation",
            Self::Review => "review",
            Self::User => "user",
        }
    }

    /// The type of entity that owns records of this type.
    #[must_use]
    pub const fn owner_type(&self) -> Option<Self> {
        match self {
            Self::Application | Self::Consultation | Self::Review => Some(Self::User),
            Self::Institution | Self::User => None,
        }
    }

    /// The type of entity records of this type belong to.
    #[must_use]
    pub const fn parent_type(&self) -> Option<Self> {
        match self {
            Self::Application | Self::Consultation | Self::Review => Some(Self::Institution),
            Self::Institution | Self::User => None,
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ScholaraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ScholaraError::validation(format!("Unknown entity type: {}", s)))
    }
}

/// A reference to a related entity, in whichever identifier forms are known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Canonical code, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CanonicalCode>,
    /// Legacy id, if the related entity predates canonical codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<LegacyId>,
}

impl EntityRef {
    /// A reference known only by canonical code.
    #[must_use]
    pub fn canonical(code: impl Into<String>) -> Self {
        Self {
            code: Some(CanonicalCode::new(code)),
            legacy_id: None,
        }
    }

    /// A reference known only by legacy id.
    #[must_use]
    pub fn legacy(id: impl Into<String>) -> Self {
        Self {
            code: None,
            legacy_id: Some(LegacyId::new(id)),
        }
    }

    /// A reference known by both forms.
    #[must_use]
    pub fn both(code: impl Into<String>, legacy_id: impl Into<String>) -> Self {
        Self {
            code: Some(CanonicalCode::new(code)),
            legacy_id: Some(LegacyId::new(legacy_id)),
        }
    }

    /// Returns true if no identifier is known.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.code.is_none() && self.legacy_id.is_none()
    }

    /// Returns the raw identifier strings, canonical first.
    #[must_use]
    pub fn raw_forms(&self) -> Vec<&str> {
        self.code
            .as_ref()
            .map(CanonicalCode::as_str)
            .into_iter()
            .chain(self.legacy_id.as_ref().map(LegacyId::as_str))
            .collect()
    }
}

/// An entity as returned by the data access client.
///
/// Resource-specific fields live in `attributes`; use [`EntityRecord::decode`]
/// for a typed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Resource type.
    pub entity_type: EntityType,
    /// The entity's own canonical code.
    pub code: CanonicalCode,
    /// Legacy alias, for records created before canonical codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<LegacyId>,
    /// Owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<EntityRef>,
    /// Parent entity (the institution for applications, consultations and reviews).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityRef>,
    /// Last modification time reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Resource-specific fields.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityRecord {
    /// Creates a record with no relations or attributes.
    #[must_use]
    pub fn new(entity_type: EntityType, code: CanonicalCode) -> Self {
        Self {
            entity_type,
            code,
            legacy_id: None,
            owner: None,
            parent: None,
            updated_at: None,
            attributes: Map::new(),
        }
    }

    /// Sets the legacy alias.
    #[must_use]
    pub fn with_legacy_id(mut self, legacy_id: impl Into<String>) -> Self {
        self.legacy_id = Some(LegacyId::new(legacy_id));
        self
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: EntityRef) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the parent.
    #[must_use]
    pub fn with_parent(mut self, parent: EntityRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns a string attribute.
    #[must_use]
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    /// Decodes the attributes into a typed view.
    pub fn decode<T: DeserializeOwned>(&self) -> ScholaraResult<T> {
        Ok(serde_json::from_value(Value::Object(self.attributes.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ApplicationView {
        student_name: String,
        program: Option<String>,
    }

    #[test]
    fn test_entity_type_round_trips_through_str() {
        for entity_type in EntityType::ALL {
            assert_eq!(entity_type.as_str().parse::<EntityType>().unwrap(), entity_type);
        }
        assert!("campus".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_relations() {
        assert_eq!(EntityType::Application.owner_type(), Some(EntityType::User));
        assert_eq!(EntityType::Review.parent_type(), Some(EntityType::Institution));
        assert_eq!(EntityType::Institution.owner_type(), None);
        assert_eq!(EntityType::User.parent_type(), None);
    }

    #[test]
    fn test_record_fields() {
        let record = EntityRecord::new(EntityType::Application, CanonicalCode::new("018f3b2a"))
            .with_legacy_id("42")
            .with_attribute("studentName", "Ahmad");

        assert_eq!(record.field_str("studentName"), Some("Ahmad"));
        assert_eq!(record.legacy_id, Some(LegacyId::new("42")));
        assert!(record.field("missing").is_none());
    }

    #[test]
    fn test_record_decode() {
        let record = EntityRecord::new(EntityType::Application, CanonicalCode::new("018f3b2a"))
            .with_attribute("studentName", "Ahmad");

        let view: ApplicationView = record.decode().unwrap();
        assert_eq!(view.student_name, "Ahmad");
        assert!(view.program.is_none());
    }

    #[test]
    fn test_entity_ref_raw_forms() {
        assert_eq!(EntityRef::both("018f", "7").raw_forms(), vec!["018f", "7"]);
        assert_eq!(EntityRef::legacy("7").raw_forms(), vec!["7"]);
        assert!(EntityRef::default().is_empty());
    }
}
