//! Identifier types for portal entities.
//!
//! Every entity has exactly one [`CanonicalCode`]. Records created before the
//! migration to canonical codes may also carry a [`LegacyId`], which remains a
//! valid alias for addressing them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use uuid::Uuid;

/// Length of a hyphenated UUID string.
const HYPHENATED_LEN: usize = 36;

/// The long-term, globally unique, time-ordered identifier of an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalCode(String);

impl CanonicalCode {
    /// Wraps an existing code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Issues a fresh time-ordered code.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns true if `raw` has the shape of a canonical code.
    ///
    /// Shape is only a hint: some call sites hand legacy ids around in the
    /// same string slots, so callers must not rely on this alone.
    #[must_use]
    pub fn looks_canonical(raw: &str) -> bool {
        raw.len() == HYPHENATED_LEN && Uuid::try_parse(raw).is_ok()
    }

    /// Decodes the creation time embedded in a v7 code.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let uuid = Uuid::try_parse(&self.0).ok()?;
        let (secs, nanos) = uuid.get_timestamp()?.to_unix();
        DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CanonicalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CanonicalCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A deprecated, previously-issued sequential identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegacyId(String);

impl LegacyId {
    /// Wraps an existing legacy id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LegacyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LegacyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for LegacyId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// An identifier whose form is known (or assumed) by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntityIdentifier {
    /// Addressed by a legacy sequential id.
    Legacy(LegacyId),
    /// Addressed by a canonical code.
    Canonical(CanonicalCode),
}

impl EntityIdentifier {
    /// Classifies a raw identifier by shape.
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        if CanonicalCode::looks_canonical(raw) {
            Self::Canonical(CanonicalCode::new(raw))
        } else {
            Self::Legacy(LegacyId::new(raw))
        }
    }

    /// Returns the raw identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Legacy(id) => id.as_str(),
            Self::Canonical(code) => code.as_str(),
        }
    }

    /// Returns true if this identifier is in canonical form.
    #[must_use]
    pub const fn is_canonical(&self) -> bool {
        matches!(self, Self::Canonical(_))
    }

    /// Reinterprets the raw string as a canonical code.
    #[must_use]
    pub fn as_canonical(&self) -> CanonicalCode {
        CanonicalCode::new(self.as_str())
    }

    /// Reinterprets the raw string as a legacy id.
    #[must_use]
    pub fn as_legacy(&self) -> LegacyId {
        LegacyId::new(self.as_str())
    }
}

impl Display for EntityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CanonicalCode> for EntityIdentifier {
    fn from(code: CanonicalCode) -> Self {
        Self::Canonical(code)
    }
}

impl From<LegacyId> for EntityIdentifier {
    fn from(id: LegacyId) -> Self {
        Self::Legacy(id)
    }
}

impl From<&str> for EntityIdentifier {
    fn from(raw: &str) -> Self {
        Self::classify(raw)
    }
}
