// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Immutable document values shared between the store, the buffer and callers.

use std::{fmt, sync::Arc};

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Identity field used when none is configured.
pub const DEFAULT_ID_FIELD: &str = "_id";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document must be a JSON object")]
    NotAnObject,
    #[error("document is missing string identifier field `{field}`")]
    MissingId { field: String },
}

/// A structured record with a unique string identifier.
///
/// Documents are never mutated once built: an update from the store produces a
/// new `Document` that replaces the old one. Clones share the underlying body.
#[derive(Clone)]
pub struct Document {
    id: Arc<str>,
    body: Arc<Value>,
}

impl Document {
    /// Builds a document identified by [`DEFAULT_ID_FIELD`].
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        Self::with_id_field(value, DEFAULT_ID_FIELD)
    }

    /// Builds a document identified by the string at `id_field`.
    pub fn with_id_field(value: Value, id_field: &str) -> Result<Self, DocumentError> {
        if !value.is_object() {
            return Err(DocumentError::NotAnObject);
        }
        let id = match lookup(&value, id_field) {
            Some(Value::String(id)) => Arc::<str>::from(id.as_str()),
            _ => {
                return Err(DocumentError::MissingId {
                    field: id_field.to_string(),
                })
            }
        };
        Ok(Self {
            id,
            body: Arc::new(value),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reads a dotted path such as `author.name` or `tags.0`.
    ///
    /// Returns `None` when any segment is absent.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        lookup(&self.body, path)
    }

    fn ptr_eq(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && (self.ptr_eq(other) || self.body == other.body)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("body", &self.body)
            .finish()
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}
