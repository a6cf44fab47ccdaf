//! Record storage.
//!
//! The API treats storage as a thin collaborator: a set of named collections
//! of JSON documents, each with a store-assigned surrogate key and an optional
//! business identifier covered by a sparse unique index. Two backends exist:
//!
//! - [`memory::MemoryStore`] with document-store semantics (24-hex object ids)
//! - [`postgres::PgStore`] with relational semantics (auto-increment ids)
//!
//! Which of the two keys a client-supplied id refers to is decided by
//! [`Backend::probe_order`].

mod error;
pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::catalog::contract::{format_timestamp, Document};
use crate::catalog::{Entity, OrderSpec};

pub use error::StoreError;

/// Store-assigned primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SurrogateId {
    /// Document store object id: 24 lowercase hex characters.
    Object(String),
    /// Relational auto-increment id.
    Serial(i64),
}

impl SurrogateId {
    /// Field name the key is exposed under in responses.
    pub fn field_name(&self) -> &'static str {
        match self {
            SurrogateId::Object(_) => "_id",
            SurrogateId::Serial(_) => "id",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SurrogateId::Object(hex) => Value::String(hex.clone()),
            SurrogateId::Serial(n) => Value::from(*n),
        }
    }
}

impl fmt::Display for SurrogateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurrogateId::Object(hex) => f.write_str(hex),
            SurrogateId::Serial(n) => write!(f, "{n}"),
        }
    }
}

/// A resolved lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Surrogate(SurrogateId),
    Business(String),
}

/// Storage flavour, which decides how raw ids are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Document,
    Relational,
}

impl Backend {
    /// Classifies a client-supplied id into the keys to try, in order.
    ///
    /// Document stores try the object id first when the input looks like one;
    /// relational stores try the business key first and fall back to the
    /// numeric primary key.
    pub fn probe_order(self, raw: &str) -> Vec<Key> {
        match self {
            Backend::Document => {
                let mut keys = Vec::with_capacity(2);
                if is_object_id(raw) {
                    keys.push(Key::Surrogate(SurrogateId::Object(
                        raw.to_ascii_lowercase(),
                    )));
                }
                keys.push(Key::Business(raw.to_string()));
                keys
            }
            Backend::Relational => {
                let mut keys = vec![Key::Business(raw.to_string())];
                if let Some(n) = parse_serial(raw) {
                    keys.push(Key::Surrogate(SurrogateId::Serial(n)));
                }
                keys
            }
        }
    }
}

fn is_object_id(raw: &str) -> bool {
    raw.len() == 24 && raw.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_serial(raw: &str) -> Option<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<i64>().ok().filter(|n| *n > 0)
}

/// A persisted record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub surrogate_id: SurrogateId,
    pub business_id: Option<String>,
    /// Field values, including the business key.
    pub data: Document,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Renders the record for an API response, hiding secret fields.
    pub fn into_json(self, entity: &Entity) -> Value {
        let mut data = self.data;
        for secret in entity.secret_fields() {
            data.remove(secret);
        }
        data.insert(
            self.surrogate_id.field_name().to_string(),
            self.surrogate_id.to_json(),
        );
        data.insert(
            "createdAt".to_string(),
            Value::String(format_timestamp(self.created_at)),
        );
        data.insert(
            "updatedAt".to_string(),
            Value::String(format_timestamp(self.updated_at)),
        );
        Value::Object(data)
    }
}

/// Case-insensitive substring search across several fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    pub term: String,
    pub fields: Vec<String>,
}

/// Inclusive range over a date field, bounds in canonical stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub field: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// A filtered, ordered, paginated listing request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub search: Option<Search>,
    /// Field equality filters, compared on their text rendering.
    pub equals: Vec<(String, Value)>,
    pub date_range: Option<DateRange>,
    /// Applied before the default newest-first order.
    pub order: Vec<OrderSpec>,
    pub offset: u64,
    pub limit: u64,
}

/// One page of a listing plus the total number of matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub total: u64,
}

/// Storage operations needed by the record facade.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend(&self) -> Backend;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Business ids in `entity` that start with `prefix`, ignoring case.
    async fn business_ids(&self, entity: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn find(&self, entity: &str, key: &Key) -> Result<Option<Record>, StoreError>;

    /// First record whose `field` (dotted path) renders as `value`.
    async fn find_by_field(
        &self,
        entity: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Record>, StoreError>;

    /// Inserts a record, failing with [`StoreError::DuplicateKey`] if
    /// `business_id` is already taken.
    async fn insert(
        &self,
        entity: &str,
        business_id: Option<&str>,
        data: Document,
    ) -> Result<Record, StoreError>;

    /// Replaces a record's data. Returns `None` if the record no longer exists.
    async fn update(
        &self,
        entity: &str,
        id: &SurrogateId,
        data: Document,
    ) -> Result<Option<Record>, StoreError>;

    /// Removes a record. Returns false if it did not exist.
    async fn delete(&self, entity: &str, id: &SurrogateId) -> Result<bool, StoreError>;

    async fn list(&self, entity: &str, query: &ListQuery) -> Result<Page, StoreError>;
}

/// Resolves a dotted path inside a document.
pub(crate) fn value_at<'a>(data: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Text rendering used for equality and substring matching.
///
/// Mirrors Postgres `#>>`: strings render without quotes, scalars as JSON,
/// null as absent.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
