//! In-process record store with document-store semantics.
//!
//! Records get 24-hex object ids (4 bytes of creation seconds followed by
//! 8 random bytes). Used by the test suites and when no database is
//! configured.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    value_at, value_text, Backend, Document, Key, ListQuery, Page, Record, RecordStore,
    StoreError, SurrogateId,
};
use crate::catalog::{Direction, OrderSpec};

struct Row {
    /// Insertion order, the final tiebreak when sorting.
    seq: u64,
    record: Record,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Row>>,
    next_seq: u64,
}

/// Record store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_object_id() -> String {
    let secs = Utc::now().timestamp() as u32;
    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&secs.to_be_bytes());
    bytes[4..].copy_from_slice(&rand::random::<[u8; 8]>());
    hex::encode(bytes)
}

fn matches_key(record: &Record, key: &Key) -> bool {
    match key {
        Key::Surrogate(id) => &record.surrogate_id == id,
        Key::Business(id) => record.business_id.as_deref() == Some(id.as_str()),
    }
}

fn field_text(data: &Document, path: &str) -> Option<String> {
    value_at(data, path).and_then(value_text)
}

fn matches_query(data: &Document, query: &ListQuery) -> bool {
    if let Some(search) = &query.search {
        let needle = search.term.to_lowercase();
        let hit = search.fields.iter().any(|field| {
            field_text(data, field).is_some_and(|text| text.to_lowercase().contains(&needle))
        });
        if !hit {
            return false;
        }
    }

    for (field, expected) in &query.equals {
        match (field_text(data, field), value_text(expected)) {
            (Some(actual), Some(expected)) if actual == expected => {}
            _ => return false,
        }
    }

    if let Some(range) = &query.date_range {
        let Some(stored) = value_at(data, &range.field).and_then(Value::as_str) else {
            return false;
        };
        if range.start.as_deref().is_some_and(|start| stored < start) {
            return false;
        }
        if range.end.as_deref().is_some_and(|end| stored > end) {
            return false;
        }
    }

    true
}

/// Rank of a JSON type in Postgres `jsonb` ordering.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_rows(a: &Row, b: &Row, order: &[OrderSpec]) -> Ordering {
    for spec in order {
        let left = value_at(&a.record.data, &spec.field);
        let right = value_at(&b.record.data, &spec.field);
        // missing values sort last in either direction
        let ord = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(l), Some(r)) => match spec.direction {
                Direction::Asc => compare_values(l, r),
                Direction::Desc => compare_values(r, l),
            },
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    b.record
        .created_at
        .cmp(&a.record.created_at)
        .then_with(|| b.seq.cmp(&a.seq))
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::Document
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn business_ids(&self, entity: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let prefix = prefix.to_ascii_lowercase();
        Ok(inner
            .collections
            .get(entity)
            .into_iter()
            .flatten()
            .filter_map(|row| row.record.business_id.as_ref())
            .filter(|id| id.to_ascii_lowercase().starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn find(&self, entity: &str, key: &Key) -> Result<Option<Record>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(entity)
            .and_then(|rows| rows.iter().find(|row| matches_key(&row.record, key)))
            .map(|row| row.record.clone()))
    }

    async fn find_by_field(
        &self,
        entity: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Record>, StoreError> {
        let Some(expected) = value_text(value) else {
            return Ok(None);
        };
        let inner = self.inner.read().await;
        Ok(inner
            .collections
            .get(entity)
            .and_then(|rows| {
                rows.iter()
                    .find(|row| field_text(&row.record.data, field).as_ref() == Some(&expected))
            })
            .map(|row| row.record.clone()))
    }

    async fn insert(
        &self,
        entity: &str,
        business_id: Option<&str>,
        data: Document,
    ) -> Result<Record, StoreError> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        let rows = inner.collections.entry(entity.to_string()).or_default();

        if let Some(id) = business_id {
            if rows
                .iter()
                .any(|row| row.record.business_id.as_deref() == Some(id))
            {
                return Err(StoreError::DuplicateKey {
                    entity: entity.to_string(),
                    business_id: id.to_string(),
                });
            }
        }

        let now = Utc::now();
        let record = Record {
            surrogate_id: SurrogateId::Object(new_object_id()),
            business_id: business_id.map(str::to_string),
            data,
            created_at: now,
            updated_at: now,
        };
        rows.push(Row {
            seq,
            record: record.clone(),
        });
        inner.next_seq += 1;
        Ok(record)
    }

    async fn update(
        &self,
        entity: &str,
        id: &SurrogateId,
        data: Document,
    ) -> Result<Option<Record>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(row) = inner
            .collections
            .get_mut(entity)
            .and_then(|rows| rows.iter_mut().find(|row| &row.record.surrogate_id == id))
        else {
            return Ok(None);
        };
        row.record.data = data;
        row.record.updated_at = Utc::now();
        Ok(Some(row.record.clone()))
    }

    async fn delete(&self, entity: &str, id: &SurrogateId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(rows) = inner.collections.get_mut(entity) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|row| &row.record.surrogate_id != id);
        Ok(rows.len() != before)
    }

    async fn list(&self, entity: &str, query: &ListQuery) -> Result<Page, StoreError> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&Row> = inner
            .collections
            .get(entity)
            .into_iter()
            .flatten()
            .filter(|row| matches_query(&row.record.data, query))
            .collect();
        matched.sort_by(|a, b| compare_rows(a, b, &query.order));

        let total = matched.len() as u64;
        let records = matched
            .into_iter()
            .skip(usize::try_from(query.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(query.limit).unwrap_or(usize::MAX))
            .map(|row| row.record.clone())
            .collect();

        Ok(Page { records, total })
    }
}
