//! Cache key building blocks.
//!
//! `KeyContext` carries the per-call values a key template interpolates,
//! `ResolvedKey` is the concrete string the store is addressed by, and
//! `canonical_query` gives composite query objects a single spelling.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of the principal a call is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PrincipalId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A single value available to key interpolation.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    /// Embedded verbatim.
    Text(String),
    /// Embedded in canonical form, see [`canonical_query`].
    Query(Value),
}

impl ContextValue {
    pub fn render(&self) -> String {
        match self {
            ContextValue::Text(text) => text.clone(),
            ContextValue::Query(query) => canonical_query(query),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<&PrincipalId> for ContextValue {
    fn from(value: &PrincipalId) -> Self {
        ContextValue::Text(value.0.clone())
    }
}

impl From<Uuid> for ContextValue {
    fn from(value: Uuid) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        ContextValue::Query(value)
    }
}

/// Named values assembled per call from arguments, route values and the
/// calling principal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyContext {
    fields: BTreeMap<String, ContextValue>,
}

impl KeyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn with_query(self, name: impl Into<String>, query: Value) -> Self {
        self.with(name, ContextValue::Query(query))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ContextValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Overlay `other` on top of this context; its values win on conflict.
    pub fn extend(&mut self, other: KeyContext) {
        self.fields.extend(other.fields);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A fully interpolated key. Equal keys address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedKey(String);

impl ResolvedKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Argument (or result) types that feed key interpolation.
///
/// `FIELDS` lists every name `key_context` is guaranteed to supply. Wrappers
/// check their templates against it when they are built, so a template that
/// names an unknown field is rejected before any request is served.
pub trait KeyFields {
    const FIELDS: &'static [&'static str];

    fn key_context(&self) -> KeyContext;

    /// Principal the call acts for, when there is one.
    fn principal(&self) -> Option<&PrincipalId> {
        None
    }
}

impl KeyFields for () {
    const FIELDS: &'static [&'static str] = &[];

    fn key_context(&self) -> KeyContext {
        KeyContext::new()
    }
}

/// Cached values that belong to a principal.
pub trait Owned {
    fn is_owned_by(&self, principal: &PrincipalId) -> bool;
}

impl<T: Owned> Owned for Vec<T> {
    fn is_owned_by(&self, principal: &PrincipalId) -> bool {
        self.iter().all(|item| item.is_owned_by(principal))
    }
}

/// Serialize a query value with object keys sorted at every depth.
///
/// Arrays keep their order. The output is compact JSON, so an empty object
/// renders as `{}`.
pub fn canonical_query(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            out.push('{');
            for (index, (name, inner)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(inner, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, inner) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(inner, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
