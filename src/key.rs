//! Cache key derivation
//!
//! A [`KeyCodec`] is declared once per cache with the names of its
//! key-bearing fields. Deriving a key from call parameters picks out exactly
//! those fields and ignores every other parameter, so a write call carrying
//! `(id, message)` and a read call carrying only `(id)` land on the same key.

use serde::Serialize;
use std::{fmt, hash::Hash, sync::Arc};

use crate::CacheError;

/// Bound for anything usable as a key in the cache tiers
pub trait Key: fmt::Display + Hash + Eq + Clone + Send + Sync + 'static {}
impl<T> Key for T where T: fmt::Display + Hash + Eq + Clone + Send + Sync + 'static {}

/// A single named parameter value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Ordered list of named call parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    fields: Vec<(&'static str, FieldValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named parameter
    pub fn with(mut self, name: &'static str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name, value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Opaque key derived by a [`KeyCodec`]
///
/// Equality and hashing cover the namespace and the key-field values
/// themselves rather than a hash of them, so distinct entities never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: &'static str,
    fields: &'static [&'static str],
    values: Arc<[FieldValue]>,
}

impl CacheKey {
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Value of one key-bearing field
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .position(|f| *f == name)
            .map(|idx| &self.values[idx])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.namespace)?;
        for (idx, (name, value)) in self.fields.iter().zip(self.values.iter()).enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Derives [`CacheKey`]s from the designated key-bearing fields of a call
#[derive(Debug, Clone, Copy)]
pub struct KeyCodec {
    namespace: &'static str,
    key_fields: &'static [&'static str],
}

impl KeyCodec {
    /// `key_fields` must be non-empty; its order fixes the key layout.
    pub const fn new(namespace: &'static str, key_fields: &'static [&'static str]) -> Self {
        assert!(!key_fields.is_empty(), "KeyCodec needs at least one key field");
        Self {
            namespace,
            key_fields,
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn key_fields(&self) -> &'static [&'static str] {
        self.key_fields
    }

    /// Derive the key for `params`, ignoring every non-key field.
    ///
    /// A key field that is absent or given twice is a programming error at
    /// the call site and is reported as such, never retried.
    pub fn derive(&self, params: &Params) -> Result<CacheKey, CacheError> {
        let mut values = Vec::with_capacity(self.key_fields.len());
        for &field in self.key_fields {
            let mut found = params.iter().filter(|(name, _)| *name == field);
            let Some((_, value)) = found.next() else {
                return Err(CacheError::MissingKeyField {
                    namespace: self.namespace,
                    field,
                });
            };
            if found.next().is_some() {
                return Err(CacheError::DuplicateKeyField {
                    namespace: self.namespace,
                    field: field.to_owned(),
                });
            }
            values.push(value.clone());
        }

        Ok(CacheKey {
            namespace: self.namespace,
            fields: self.key_fields,
            values: values.into(),
        })
    }
}
