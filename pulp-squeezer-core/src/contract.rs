//! # contract: the entity-context interface and the data it moves around
//!
//! Every entity type a module manages (a repository of some plugin, a content unit) gets one
//! implementation of [`EntityContext`]. The reconciler only ever sees this trait, so the
//! create/update/delete decision is written once and shared.
//!
//! ## Data
//! - [`Entity`]: a server-held record, kept as the raw JSON object the API returned.
//! - [`NaturalKey`]: the identifying fields used for lookup. Null values mean "not supplied".
//! - [`Attributes`]: desired or default field values. A JSON `null` clears a field.
//!
//! ## Mocking & Testing
//! - The trait is annotated for `mockall`; `MockEntityContext` is exported behind the
//!   `test-export-mocks` feature so dependent crates can use it in their tests.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SqueezerError;

/// A server-side record as returned by the API.
pub type Entity = Map<String, Value>;

/// Field values to apply; used for both desired and default attributes.
pub type Attributes = Map<String, Value>;

/// The state a module should drive its entity into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    Present,
    Absent,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Present => f.write_str("present"),
            TargetState::Absent => f.write_str("absent"),
        }
    }
}

impl FromStr for TargetState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(TargetState::Present),
            "absent" => Ok(TargetState::Absent),
            other => Err(format!("state must be 'present' or 'absent', got '{other}'")),
        }
    }
}

/// Identifying fields of an entity, ordered by field name.
///
/// Fields may be registered with a null value; they then take no part in lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NaturalKey {
    fields: BTreeMap<String, Value>,
}

impl NaturalKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field; `None` registers it as unspecified.
    pub fn field<V: Into<Value>>(mut self, name: &str, value: Option<V>) -> Self {
        let value = value.map(Into::into).unwrap_or(Value::Null);
        self.fields.insert(name.to_string(), value);
        self
    }

    /// True when no field carries a value (read-all mode).
    pub fn is_unspecified(&self) -> bool {
        self.fields.values().all(Value::is_null)
    }

    /// True when some fields carry a value and others do not.
    pub fn is_partial(&self) -> bool {
        !self.is_unspecified() && self.fields.values().any(Value::is_null)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn specified(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Query-string filters for the specified fields.
    pub fn to_filters(&self) -> Vec<(String, String)> {
        self.specified()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.to_string(), rendered)
            })
            .collect()
    }

    /// The specified fields as an attribute map, for merging into a create payload.
    pub fn to_attributes(&self) -> Attributes {
        self.specified()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .to_filters()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{rendered}}}")
    }
}

/// Returns the `pulp_href` of an entity.
pub fn entity_href(entity: &Entity) -> Result<&str, SqueezerError> {
    entity
        .get("pulp_href")
        .and_then(Value::as_str)
        .ok_or_else(|| SqueezerError::MalformedResponse("entity has no pulp_href".into()))
}

/// Type-specific bridge between the reconciler and the remote API.
///
/// Implementations are bound to one entity type and own whatever client they need.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait EntityContext: Send + Sync {
    /// Result key for a single entity, e.g. `repository`.
    fn entity_singular(&self) -> &'static str;

    /// Result key for a listing, e.g. `repositories`.
    fn entity_plural(&self) -> &'static str;

    /// All entities of this type visible to the caller, narrowed by the specified fields of
    /// `filter`. An unspecified filter lists everything.
    async fn list(&self, filter: &NaturalKey) -> Result<Vec<Entity>, SqueezerError>;

    /// Resolves a natural key to at most one entity.
    ///
    /// Fails with [`SqueezerError::AmbiguousKey`] when the server returns more than one match.
    async fn find(&self, key: &NaturalKey) -> Result<Option<Entity>, SqueezerError>;

    /// Creates an entity from the merged key, desired and default attributes.
    async fn create(&self, attributes: &Attributes) -> Result<Entity, SqueezerError>;

    /// Applies a partial diff and returns the entity as it is afterwards.
    async fn update(&self, entity: &Entity, diff: &Attributes)
        -> Result<Entity, SqueezerError>;

    /// Removes the entity.
    async fn delete(&self, entity: &Entity) -> Result<(), SqueezerError>;
}
