//! Cache key derivation.
//!
//! A [`CacheKey`] is `(entity type, operation, normalized params)`. Params are
//! held in a sorted map and absent values are never inserted, so equivalent
//! queries produce equal keys regardless of call-site ordering.

use scholara_core::{CanonicalCode, EntityType, PageRequest};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// Prefix for all cache keys to namespace them.
const CACHE_PREFIX: &str = "scholara:cache";

/// Param holding an entity's canonical code on detail keys.
pub const CODE_PARAM: &str = "code";
/// Param holding the owner identifier on owner-scoped collection keys.
pub const OWNER_PARAM: &str = "owner";
/// Param holding the parent identifier on parent-scoped collection keys.
pub const PARENT_PARAM: &str = "parent";

/// The closed set of cached operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A single entity.
    Detail,
    /// Entities owned by one user.
    ByOwner,
    /// Entities belonging to one parent.
    ByParent,
    /// Unscoped listing, e.g. the institution directory.
    Listing,
}

impl Operation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Detail => "detail",
            Self::ByOwner => "by_owner",
            Self::ByParent => "by_parent",
            Self::Listing => "listing",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single scalar parameter value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<usize> for Scalar {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A parameter value: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

impl ParamValue {
    /// The value as a string, when it is a single string scalar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Str(s)) => Some(s),
            _ => None,
        }
    }
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => Display::fmt(s, f),
            Self::List(items) => {
                let joined = items.iter().map(ToString::to_string).collect::<Vec<_>>();
                write!(f, "[{}]", joined.join(","))
            }
        }
    }
}

macro_rules! scalar_param {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ParamValue {
                fn from(value: $t) -> Self {
                    Self::Scalar(value.into())
                }
            }
        )*
    };
}

scalar_param!(&str, String, i64, i32, usize, bool);

impl From<Scalar> for ParamValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl<T: Into<Scalar>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// A normalized parameter set.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct KeyParams(BTreeMap<String, ParamValue>);

impl KeyParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Adds a parameter only when a value is present.
    #[must_use]
    pub fn with_opt<V: Into<ParamValue>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(name, v),
            None => self,
        }
    }

    /// Adds a parameter only when it differs from its default.
    #[must_use]
    pub fn with_non_default<V>(self, name: impl Into<String>, value: V, default: V) -> Self
    where
        V: Into<ParamValue> + PartialEq,
    {
        if value == default {
            self
        } else {
            self.with(name, value)
        }
    }

    /// Adds pagination, omitting the first page and the default size.
    #[must_use]
    pub fn with_page(self, page: PageRequest) -> Self {
        self.with_non_default("page", page.page, 0)
            .with_non_default("size", page.size, PageRequest::DEFAULT_SIZE)
    }

    /// Builds params from a JSON object, omitting nulls.
    ///
    /// Nested objects are kept as their JSON text.
    #[must_use]
    pub fn from_json(object: &Map<String, Value>) -> Self {
        let params = object
            .iter()
            .filter_map(|(name, value)| json_param(value).map(|v| (name.clone(), v)))
            .collect();
        Self(params)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if every param of `subset` is present here with the same value.
    #[must_use]
    pub fn contains_all(&self, subset: &Self) -> bool {
        subset
            .iter()
            .all(|(name, value)| self.0.get(name) == Some(value))
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for KeyParams
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .filter_map(|(k, v)| v.map(|v| (k.into(), v.into())))
                .collect(),
        )
    }
}

fn json_scalar(value: &Value) -> Option<Scalar> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Scalar::Bool(*b)),
        Value::Number(n) => Some(n.as_i64().map_or_else(|| Scalar::Str(n.to_string()), Scalar::Int)),
        Value::String(s) => Some(Scalar::Str(s.clone())),
        other => Some(Scalar::Str(other.to_string())),
    }
}

fn json_param(value: &Value) -> Option<ParamValue> {
    match value {
        Value::Array(items) => Some(ParamValue::List(items.iter().filter_map(json_scalar).collect())),
        other => json_scalar(other).map(ParamValue::Scalar),
    }
}

/// A deterministic, order-independent cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CacheKey {
    pub entity_type: EntityType,
    pub operation: Operation,
    pub params: KeyParams,
}

impl CacheKey {
    /// Returns true if this key is an entity detail key.
    #[must_use]
    pub fn is_detail(&self) -> bool {
        self.operation == Operation::Detail
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", CACHE_PREFIX, self.entity_type, self.operation)?;
        let mut separator = '?';
        for (name, value) in self.params.iter() {
            write!(f, "{}{}={}", separator, name, value)?;
            separator = '&';
        }
        Ok(())
    }
}

/// Derives the key for a query.
#[must_use]
pub fn derive_key(entity_type: EntityType, operation: Operation, params: &KeyParams) -> CacheKey {
    CacheKey {
        entity_type,
        operation,
        params: params.clone(),
    }
}

/// Key of a single entity, addressed by its canonical code.
#[must_use]
pub fn entity_detail(entity_type: EntityType, code: &CanonicalCode) -> CacheKey {
    derive_key(
        entity_type,
        Operation::Detail,
        &KeyParams::new().with(CODE_PARAM, code.as_str()),
    )
}

/// Key of one page/filter of the collection owned by `owner`.
#[must_use]
pub fn owner_collection(entity_type: EntityType, owner: &str, params: &KeyParams) -> CacheKey {
    derive_key(
        entity_type,
        Operation::ByOwner,
        &params.clone().with(OWNER_PARAM, owner),
    )
}

/// Key of one page/filter of the collection belonging to `parent`.
#[must_use]
pub fn parent_collection(entity_type: EntityType, parent: &str, params: &KeyParams) -> CacheKey {
    derive_key(
        entity_type,
        Operation::ByParent,
        &params.clone().with(PARENT_PARAM, parent),
    )
}

/// Key of one page/filter of an unscoped listing.
#[must_use]
pub fn listing(entity_type: EntityType, params: &KeyParams) -> CacheKey {
    derive_key(entity_type, Operation::Listing, params)
}

/// Matches every key sharing an entity type, optionally an operation, and a fixed param subset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern {
    pub entity_type: EntityType,
    pub operation: Option<Operation>,
    pub fixed: KeyParams,
}

impl KeyPattern {
    #[must_use]
    pub fn matches(&self, key: &CacheKey) -> bool {
        key.entity_type == self.entity_type
            && self.operation.map_or(true, |op| op == key.operation)
            && key.params.contains_all(&self.fixed)
    }
}

impl Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operation = self.operation.map_or("*", |op| op.as_str());
        write!(f, "{}:{}:{}", CACHE_PREFIX, self.entity_type, operation)?;
        for (name, value) in self.fixed.iter() {
            write!(f, ":{}={}", name, value)?;
        }
        f.write_str("*")
    }
}

/// Every page and filter of the collection owned by `owner`.
#[must_use]
pub fn owner_collections(entity_type: EntityType, owner: &str) -> KeyPattern {
    KeyPattern {
        entity_type,
        operation: Some(Operation::ByOwner),
        fixed: KeyParams::new().with(OWNER_PARAM, owner),
    }
}

/// Every page and filter of the collection belonging to `parent`.
#[must_use]
pub fn parent_collections(entity_type: EntityType, parent: &str) -> KeyPattern {
    KeyPattern {
        entity_type,
        operation: Some(Operation::ByParent),
        fixed: KeyParams::new().with(PARENT_PARAM, parent),
    }
}

/// Every unscoped listing of an entity type.
#[must_use]
pub fn listings(entity_type: EntityType) -> KeyPattern {
    KeyPattern {
        entity_type,
        operation: Some(Operation::Listing),
        fixed: KeyParams::new(),
    }
}

/// Every key of an entity type.
#[must_use]
pub fn all_of(entity_type: EntityType) -> KeyPattern {
    KeyPattern {
        entity_type,
        operation: None,
        fixed: KeyParams::new(),
    }
}
