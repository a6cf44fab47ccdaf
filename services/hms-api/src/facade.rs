//! Record access facade.
//!
//! One generic implementation of create/read/update/delete/list, parameterized
//! by a catalog [`Entity`]. Handlers call into this; it talks to the store and
//! the allocator and reports outcomes as [`FacadeError`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::allocator::{AllocError, IdAllocator};
use crate::catalog::contract::{self, format_timestamp, parse_day, Document};
use crate::catalog::{Entity, LookupSpec, OrderSpec, RelationSpec, ViewSpec};
use crate::store::{
    value_text, DateRange, Key, ListQuery, Record, RecordStore, Search, StoreError, SurrogateId,
};

pub const DEFAULT_PAGE_SIZE: u64 = 25;
pub const MAX_PAGE_SIZE: u64 = 200;

/// Outcome of a failed facade operation.
#[derive(Debug, Error)]
pub enum FacadeError {
    /// The request failed validation. One message per violated field.
    #[error("validation failed: {}", .0.join("; "))]
    InvalidInput(Vec<String>),

    /// A business key or unique field collides with an existing record.
    #[error("{0}")]
    Conflict(String),

    /// No record resolves for the given id under either key.
    #[error("{label} not found")]
    NotFound { label: String },

    /// The backing store is unreachable or failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl FacadeError {
    fn invalid(message: impl Into<String>) -> Self {
        FacadeError::InvalidInput(vec![message.into()])
    }

    fn not_found(entity: &Entity) -> Self {
        FacadeError::NotFound {
            label: entity.label.clone(),
        }
    }
}

impl From<StoreError> for FacadeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateKey {
                entity,
                business_id,
            } => FacadeError::Conflict(format!("'{business_id}' already exists in {entity}")),
            StoreError::Corrupt { .. } => FacadeError::Unexpected(e.to_string()),
            other => FacadeError::StorageUnavailable(other),
        }
    }
}

impl From<AllocError> for FacadeError {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::Storage(e) => e.into(),
            AllocError::Sequence(e) => FacadeError::Unexpected(e.to_string()),
        }
    }
}

/// Raw listing parameters as they arrive on the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub q: Option<String>,
    /// Exact-day filter, named after the entity's date field.
    pub day: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ListRequest {
    /// Picks the listing parameters out of a query string map. The exact-day
    /// filter is read from the parameter named after `entity.date_field`.
    pub fn from_params(entity: &Entity, params: &HashMap<String, String>) -> Self {
        let get = |name: &str| params.get(name).cloned();
        Self {
            page: get("page"),
            limit: get("limit"),
            q: get("q"),
            day: entity.date_field.as_deref().and_then(get),
            start_date: get("startDate"),
            end_date: get("endDate"),
        }
    }
}

/// One page of records.
#[derive(Debug, Clone, PartialEq)]
pub struct ListResult {
    pub records: Vec<Record>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

/// Extra constraints a sub-route adds on top of a listing request.
struct Scope<'a> {
    equals: Vec<(String, Value)>,
    order: &'a [OrderSpec],
}

pub struct RecordFacade {
    store: Arc<dyn RecordStore>,
    allocator: Arc<dyn IdAllocator>,
    allocation_retries: u32,
}

impl RecordFacade {
    pub fn new(
        store: Arc<dyn RecordStore>,
        allocator: Arc<dyn IdAllocator>,
        allocation_retries: u32,
    ) -> Self {
        Self {
            store,
            allocator,
            allocation_retries,
        }
    }

    /// Computes the id the next create would get, without reserving it.
    pub async fn next_id(&self, entity: &Entity) -> Result<String, FacadeError> {
        Ok(self.allocator.allocate_next(entity).await?)
    }

    /// Creates a record, allocating a business id when none is supplied.
    ///
    /// An explicit id that is already taken is a conflict. An allocated id
    /// that loses a race with a concurrent create is re-allocated up to
    /// `allocation_retries` times.
    pub async fn create(&self, entity: &Entity, mut payload: Document) -> Result<Record, FacadeError> {
        let explicit = explicit_business_id(entity, payload.remove(&entity.business_key))?;

        if let Some(id) = &explicit {
            self.ensure_business_id_free(entity, id).await?;
        }

        let data = contract::validate_create(entity, payload).map_err(FacadeError::InvalidInput)?;
        self.ensure_unique_fields(entity, &data, None).await?;

        if let Some(id) = explicit {
            return self.insert_with_id(entity, &id, data).await;
        }

        for attempt in 0..=self.allocation_retries {
            let id = self.allocator.allocate_next(entity).await?;
            if self
                .store
                .find(&entity.name, &Key::Business(id.clone()))
                .await?
                .is_some()
            {
                warn!(entity = %entity.name, id = %id, attempt, "allocated id already taken, retrying");
                continue;
            }
            match self.insert_with_id(entity, &id, data.clone()).await {
                Err(FacadeError::Conflict(_)) => {
                    warn!(entity = %entity.name, id = %id, attempt, "lost allocation race, retrying");
                }
                other => return other,
            }
        }

        Err(FacadeError::Conflict(format!(
            "could not allocate a unique {} after {} attempts",
            entity.business_key,
            self.allocation_retries + 1
        )))
    }

    /// Fetches a record by surrogate key or business key.
    pub async fn get(&self, entity: &Entity, raw_id: &str) -> Result<Record, FacadeError> {
        self.resolve(entity, raw_id)
            .await?
            .ok_or_else(|| FacadeError::not_found(entity))
    }

    /// Merges `patch` onto an existing record. The business key is immutable
    /// and silently ignored if present in the patch.
    pub async fn update(
        &self,
        entity: &Entity,
        raw_id: &str,
        mut patch: Document,
    ) -> Result<Record, FacadeError> {
        let existing = self.get(entity, raw_id).await?;

        patch.remove(&entity.business_key);
        let patch = contract::validate_patch(entity, patch).map_err(FacadeError::InvalidInput)?;
        self.ensure_unique_fields(entity, &patch, Some(&existing.surrogate_id))
            .await?;

        let mut data = existing.data;
        data.extend(patch);

        self.store
            .update(&entity.name, &existing.surrogate_id, data)
            .await?
            .ok_or_else(|| FacadeError::not_found(entity))
    }

    /// Deletes a record, returning its surrogate key.
    pub async fn delete(&self, entity: &Entity, raw_id: &str) -> Result<SurrogateId, FacadeError> {
        let existing = self.get(entity, raw_id).await?;
        if !self
            .store
            .delete(&entity.name, &existing.surrogate_id)
            .await?
        {
            return Err(FacadeError::not_found(entity));
        }
        debug!(entity = %entity.name, id = %existing.surrogate_id, "record deleted");
        Ok(existing.surrogate_id)
    }

    pub async fn list(&self, entity: &Entity, request: &ListRequest) -> Result<ListResult, FacadeError> {
        self.list_scoped(
            entity,
            request,
            Scope {
                equals: Vec::new(),
                order: &entity.order,
            },
        )
        .await
    }

    /// Lists the records whose foreign-key field equals `value`.
    pub async fn list_related(
        &self,
        entity: &Entity,
        relation: &RelationSpec,
        value: &str,
        request: &ListRequest,
    ) -> Result<ListResult, FacadeError> {
        let mut equals = vec![(relation.field.clone(), Value::String(value.to_string()))];
        equals.extend(relation.filter.iter().map(|(k, v)| (k.clone(), v.clone())));
        let order = if relation.order.is_empty() {
            &entity.order
        } else {
            &relation.order
        };
        self.list_scoped(entity, request, Scope { equals, order })
            .await
    }

    /// Lists the records matching a view's fixed filter.
    pub async fn list_view(
        &self,
        entity: &Entity,
        view: &ViewSpec,
        request: &ListRequest,
    ) -> Result<ListResult, FacadeError> {
        let equals = view
            .filter
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let order = if view.order.is_empty() {
            &entity.order
        } else {
            &view.order
        };
        self.list_scoped(entity, request, Scope { equals, order })
            .await
    }

    /// Fetches the single record whose lookup field equals `value`.
    pub async fn lookup(
        &self,
        entity: &Entity,
        lookup: &LookupSpec,
        value: &str,
    ) -> Result<Record, FacadeError> {
        self.store
            .find_by_field(&entity.name, &lookup.field, &Value::String(value.to_string()))
            .await?
            .ok_or_else(|| FacadeError::not_found(entity))
    }

    async fn resolve(&self, entity: &Entity, raw_id: &str) -> Result<Option<Record>, FacadeError> {
        for key in self.store.backend().probe_order(raw_id) {
            if let Some(record) = self.store.find(&entity.name, &key).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn ensure_business_id_free(&self, entity: &Entity, id: &str) -> Result<(), FacadeError> {
        let taken = self
            .store
            .find(&entity.name, &Key::Business(id.to_string()))
            .await?
            .is_some();
        if taken {
            return Err(FacadeError::Conflict(format!(
                "{} with {} '{}' already exists",
                entity.label, entity.business_key, id
            )));
        }
        Ok(())
    }

    async fn ensure_unique_fields(
        &self,
        entity: &Entity,
        data: &Document,
        owner: Option<&SurrogateId>,
    ) -> Result<(), FacadeError> {
        for field in &entity.unique_fields {
            let Some(value) = data.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let holder = self
                .store
                .find_by_field(&entity.name, field, value)
                .await?;
            if let Some(holder) = holder {
                if Some(&holder.surrogate_id) != owner {
                    return Err(FacadeError::Conflict(format!(
                        "{} with {} '{}' already exists",
                        entity.label,
                        field,
                        value_text(value).unwrap_or_default()
                    )));
                }
            }
        }
        Ok(())
    }

    async fn insert_with_id(
        &self,
        entity: &Entity,
        id: &str,
        mut data: Document,
    ) -> Result<Record, FacadeError> {
        data.insert(entity.business_key.clone(), Value::String(id.to_string()));
        let record = self.store.insert(&entity.name, Some(id), data).await?;
        debug!(entity = %entity.name, id = %id, "record created");
        Ok(record)
    }

    async fn list_scoped(
        &self,
        entity: &Entity,
        request: &ListRequest,
        scope: Scope<'_>,
    ) -> Result<ListResult, FacadeError> {
        let page = parse_positive("page", request.page.as_deref(), 1)?;
        let limit = parse_positive("limit", request.limit.as_deref(), DEFAULT_PAGE_SIZE)?
            .min(MAX_PAGE_SIZE);

        let search = request
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|term| Search {
                term: term.to_string(),
                fields: if entity.search_fields.is_empty() {
                    vec![entity.business_key.clone()]
                } else {
                    entity.search_fields.clone()
                },
            });

        let query = ListQuery {
            search,
            equals: scope.equals,
            date_range: date_range(entity, request)?,
            order: scope.order.to_vec(),
            offset: (page - 1).saturating_mul(limit),
            limit,
        };

        let found = self.store.list(&entity.name, &query).await?;
        Ok(ListResult {
            records: found.records,
            total: found.total,
            page,
            limit,
        })
    }
}

/// Reads the business id a client supplied on create, if any.
fn explicit_business_id(entity: &Entity, value: Option<Value>) -> Result<Option<String>, FacadeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(FacadeError::invalid(format!(
            "`{}` must be a string",
            entity.business_key
        ))),
    }
}

/// Parses a 1-based page number or page size. Zero is raised to one.
fn parse_positive(name: &str, raw: Option<&str>, default: u64) -> Result<u64, FacadeError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(s) => s
            .parse::<u64>()
            .map(|n| n.max(1))
            .map_err(|_| FacadeError::invalid(format!("Invalid {name}"))),
    }
}

fn start_of_day(day: NaiveDate) -> String {
    format_timestamp(day.and_time(NaiveTime::MIN).and_utc())
}

fn end_of_day(day: NaiveDate) -> String {
    let last = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    format_timestamp(day.and_time(last).and_utc())
}

fn parse_day_param(name: &str, raw: &str) -> Result<NaiveDate, FacadeError> {
    parse_day(raw.trim()).ok_or_else(|| FacadeError::invalid(format!("Invalid {name}")))
}

/// Builds the date filter. An exact day takes precedence over
/// `startDate`/`endDate`; entities without a date field ignore all three.
fn date_range(entity: &Entity, request: &ListRequest) -> Result<Option<DateRange>, FacadeError> {
    let Some(field) = &entity.date_field else {
        return Ok(None);
    };
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

    if let Some(day) = non_empty(&request.day) {
        let day = parse_day_param(field, &day)?;
        return Ok(Some(DateRange {
            field: field.clone(),
            start: Some(start_of_day(day)),
            end: Some(end_of_day(day)),
        }));
    }

    let start = non_empty(&request.start_date)
        .map(|raw| parse_day_param("startDate", &raw).map(start_of_day))
        .transpose()?;
    let end = non_empty(&request.end_date)
        .map(|raw| parse_day_param("endDate", &raw).map(end_of_day))
        .transpose()?;

    if start.is_none() && end.is_none() {
        return Ok(None);
    }
    Ok(Some(DateRange {
        field: field.clone(),
        start,
        end,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ScanAllocator;
    use crate::catalog::Catalog;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    const CATALOG: &str = r#"
        [[entity]]
        name = "patients"
        label = "Patient"
        base_path = "/api/patients"
        business_key = "patientId"
        prefix = "P"
        search_fields = ["patientId", "name"]
        fields = [
            { name = "name", kind = "text", required = true },
            { name = "age", kind = "integer" },
        ]

        [[entity]]
        name = "opdvisits"
        label = "OPD visit"
        base_path = "/api/opdvisits"
        business_key = "visitId"
        prefix = "VIS"
        date_field = "visitDate"
        fields = [
            { name = "patientId", kind = "text" },
            { name = "visitDate", kind = "date" },
        ]
        relations = [{ path = "patient", field = "patientId" }]

        [[entity]]
        name = "usermasters"
        label = "User"
        base_path = "/api/usermasters"
        business_key = "UserId"
        prefix = "USR"
        unique_fields = ["LoginName"]
        fields = [
            { name = "LoginName", kind = "text", required = true },
            { name = "IsActive", kind = "boolean", default = true },
        ]
        lookups = [{ path = "by-login-name", field = "LoginName" }]
        views = [{ path = "active", where = { IsActive = true } }]
    "#;

    struct Fixture {
        catalog: Catalog,
        store: Arc<MemoryStore>,
        facade: RecordFacade,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let allocator = Arc::new(ScanAllocator::new(store.clone()));
            Self::with_allocator(store, allocator)
        }

        fn with_allocator(store: Arc<MemoryStore>, allocator: Arc<dyn IdAllocator>) -> Self {
            Self {
                catalog: Catalog::from_toml_str(CATALOG).unwrap(),
                facade: RecordFacade::new(store.clone(), allocator, 3),
                store,
            }
        }

        fn entity(&self, name: &str) -> Arc<Entity> {
            self.catalog.get(name).unwrap().clone()
        }
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn page(page: &str, limit: &str) -> ListRequest {
        ListRequest {
            page: Some(page.to_string()),
            limit: Some(limit.to_string()),
            ..Default::default()
        }
    }

    /// Hands out a fixed list of ids, then repeats the last one.
    struct ScriptedAllocator {
        ids: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl IdAllocator for ScriptedAllocator {
        async fn allocate_next(&self, _entity: &Entity) -> Result<String, AllocError> {
            let mut ids = self.ids.lock().unwrap();
            let id = if ids.len() > 1 { ids.remove(0) } else { ids[0] };
            Ok(id.to_string())
        }
    }

    #[tokio::test]
    async fn test_create_allocates_business_id() {
        let fx = Fixture::new();
        let patients = fx.entity("patients");

        let first = fx
            .facade
            .create(&patients, doc(json!({ "name": "X" })))
            .await
            .unwrap();
        let second = fx
            .facade
            .create(&patients, doc(json!({ "name": "Y" })))
            .await
            .unwrap();

        assert_eq!(first.business_id.as_deref(), Some("P0001"));
        assert_eq!(first.data["patientId"], "P0001");
        assert_eq!(second.business_id.as_deref(), Some("P0002"));
        assert_eq!(fx.facade.next_id(&patients).await.unwrap(), "P0003");
    }

    #[tokio::test]
    async fn test_explicit_duplicate_is_conflict_without_write() {
        let fx = Fixture::new();
        let patients = fx.entity("patients");
        fx.facade
            .create(&patients, doc(json!({ "patientId": "P0042", "name": "A" })))
            .await
            .unwrap();

        let err = fx
            .facade
            .create(&patients, doc(json!({ "patientId": "P0042", "name": "B" })))
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Conflict(_)));

        let all = fx.facade.list(&patients, &ListRequest::default()).await.unwrap();
        assert_eq!(all.total, 1);
        assert_eq!(all.records[0].data["name"], "A");
    }

    #[tokio::test]
    async fn test_invalid_input_collects_messages_and_writes_nothing() {
        let fx = Fixture::new();
        let patients = fx.entity("patients");

        let err = fx
            .facade
            .create(&patients, doc(json!({ "age": "old" })))
            .await
            .unwrap_err();
        let FacadeError::InvalidInput(messages) = err else {
            panic!("expected InvalidInput, got {err:?}");
        };
        assert_eq!(messages.len(), 2);

        let all = fx.facade.list(&patients, &ListRequest::default()).await.unwrap();
        assert_eq!(all.total, 0);
    }

    #[tokio::test]
    async fn test_retries_when_allocated_id_is_taken() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("patients", Some("P0001"), doc(json!({ "patientId": "P0001" })))
            .await
            .unwrap();
        let allocator = Arc::new(ScriptedAllocator {
            ids: Mutex::new(vec!["P0001", "P0002"]),
        });
        let fx = Fixture::with_allocator(store, allocator);
        let patients = fx.entity("patients");

        let record = fx
            .facade
            .create(&patients, doc(json!({ "name": "X" })))
            .await
            .unwrap();
        assert_eq!(record.business_id.as_deref(), Some("P0002"));
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("patients", Some("P0001"), Document::new())
            .await
            .unwrap();
        let allocator = Arc::new(ScriptedAllocator {
            ids: Mutex::new(vec!["P0001"]),
        });
        let fx = Fixture::with_allocator(store, allocator);
        let patients = fx.entity("patients");

        let err = fx
            .facade
            .create(&patients, doc(json!({ "name": "X" })))
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Conflict(_)));
        assert_eq!(
            fx.store.business_ids("patients", "P").await.unwrap(),
            vec!["P0001"]
        );
    }

    #[tokio::test]
    async fn test_paging_returns_distinct_slices() {
        let fx = Fixture::new();
        let patients = fx.entity("patients");
        for name in ["A", "B", "C"] {
            fx.facade
                .create(&patients, doc(json!({ "name": name })))
                .await
                .unwrap();
        }

        let first = fx.facade.list(&patients, &page("1", "1")).await.unwrap();
        let second = fx.facade.list(&patients, &page("2", "1")).await.unwrap();
        assert_eq!(second.total, 3);
        assert_eq!(second.records.len(), 1);
        assert_ne!(first.records[0].surrogate_id, second.records[0].surrogate_id);
    }

    #[tokio::test]
    async fn test_page_parameters() {
        let fx = Fixture::new();
        let patients = fx.entity("patients");

        let clamped = fx.facade.list(&patients, &page("0", "5000")).await.unwrap();
        assert_eq!((clamped.page, clamped.limit), (1, MAX_PAGE_SIZE));

        let defaults = fx.facade.list(&patients, &ListRequest::default()).await.unwrap();
        assert_eq!((defaults.page, defaults.limit), (1, DEFAULT_PAGE_SIZE));

        let err = fx.facade.list(&patients, &page("two", "1")).await.unwrap_err();
        assert!(matches!(err, FacadeError::InvalidInput(m) if m == vec!["Invalid page"]));
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_substring() {
        let fx = Fixture::new();
        let patients = fx.entity("patients");
        for name in ["Asha Rao", "Ravi Kumar"] {
            fx.facade
                .create(&patients, doc(json!({ "name": name })))
                .await
                .unwrap();
        }

        let request = ListRequest {
            q: Some("RAO".to_string()),
            ..Default::default()
        };
        let found = fx.facade.list(&patients, &request).await.unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.records[0].data["name"], "Asha Rao");

        let by_id = ListRequest {
            q: Some("p0002".to_string()),
            ..Default::default()
        };
        assert_eq!(fx.facade.list(&patients, &by_id).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_get_by_either_key_and_deleted_is_not_found() {
        let fx = Fixture::new();
        let patients = fx.entity("patients");
        let record = fx
            .facade
            .create(&patients, doc(json!({ "name": "X" })))
            .await
            .unwrap();
        let surrogate = record.surrogate_id.to_string();

        assert_eq!(fx.facade.get(&patients, &surrogate).await.unwrap(), record);
        assert_eq!(fx.facade.get(&patients, "P0001").await.unwrap(), record);

        let deleted = fx.facade.delete(&patients, "P0001").await.unwrap();
        assert_eq!(deleted, record.surrogate_id);

        let err = fx.facade.get(&patients, &surrogate).await.unwrap_err();
        assert!(matches!(err, FacadeError::NotFound { .. }));
        let err = fx.facade.delete(&patients, &surrogate).await.unwrap_err();
        assert!(matches!(err, FacadeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_merges_and_keeps_business_id() {
        let fx = Fixture::new();
        let patients = fx.entity("patients");
        fx.facade
            .create(&patients, doc(json!({ "name": "X", "age": 30 })))
            .await
            .unwrap();

        let updated = fx
            .facade
            .update(
                &patients,
                "P0001",
                doc(json!({ "patientId": "P9999", "age": "31" })),
            )
            .await
            .unwrap();
        assert_eq!(updated.data["patientId"], "P0001");
        assert_eq!(updated.data["name"], "X");
        assert_eq!(updated.data["age"], 31);

        let err = fx
            .facade
            .update(&patients, "P0404", doc(json!({ "age": 1 })))
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_relation_and_day_filters() {
        let fx = Fixture::new();
        let visits = fx.entity("opdvisits");
        for (patient, date) in [
            ("P0001", "2024-03-01T09:30:00Z"),
            ("P0001", "2024-03-02T10:00:00Z"),
            ("P0002", "2024-03-01T11:00:00Z"),
        ] {
            fx.facade
                .create(&visits, doc(json!({ "patientId": patient, "visitDate": date })))
                .await
                .unwrap();
        }

        let relation = &visits.relations[0];
        let related = fx
            .facade
            .list_related(&visits, relation, "P0001", &ListRequest::default())
            .await
            .unwrap();
        assert_eq!(related.total, 2);

        let day = ListRequest {
            day: Some("2024-03-01".to_string()),
            ..Default::default()
        };
        assert_eq!(fx.facade.list(&visits, &day).await.unwrap().total, 2);

        let range = ListRequest {
            start_date: Some("2024-03-02".to_string()),
            ..Default::default()
        };
        assert_eq!(fx.facade.list(&visits, &range).await.unwrap().total, 1);

        let bad = ListRequest {
            start_date: Some("yesterday".to_string()),
            ..Default::default()
        };
        let err = fx.facade.list(&visits, &bad).await.unwrap_err();
        assert!(matches!(err, FacadeError::InvalidInput(m) if m == vec!["Invalid startDate"]));
    }

    #[tokio::test]
    async fn test_unique_fields_lookups_and_views() {
        let fx = Fixture::new();
        let users = fx.entity("usermasters");
        fx.facade
            .create(&users, doc(json!({ "LoginName": "admin" })))
            .await
            .unwrap();
        let other = fx
            .facade
            .create(&users, doc(json!({ "LoginName": "nurse", "IsActive": false })))
            .await
            .unwrap();

        let err = fx
            .facade
            .create(&users, doc(json!({ "LoginName": "admin" })))
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Conflict(_)));

        let err = fx
            .facade
            .update(&users, "USR0002", doc(json!({ "LoginName": "admin" })))
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Conflict(_)));
        // re-saving your own login name is fine
        fx.facade
            .update(&users, "USR0002", doc(json!({ "LoginName": "nurse" })))
            .await
            .unwrap();

        let found = fx
            .facade
            .lookup(&users, &users.lookups[0], "nurse")
            .await
            .unwrap();
        assert_eq!(found.surrogate_id, other.surrogate_id);

        let active = fx
            .facade
            .list_view(&users, &users.views[0], &ListRequest::default())
            .await
            .unwrap();
        assert_eq!(active.total, 1);
        assert_eq!(active.records[0].data["LoginName"], "admin");
    }

    #[test]
    fn test_list_request_reads_date_field_param() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        let visits = catalog.get("opdvisits").unwrap();
        let params: HashMap<String, String> = [
            ("visitDate".to_string(), "2024-03-01".to_string()),
            ("q".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect();

        let request = ListRequest::from_params(visits, &params);
        assert_eq!(request.day.as_deref(), Some("2024-03-01"));
        assert_eq!(request.q.as_deref(), Some("x"));
        assert_eq!(request.page, None);
    }
}
