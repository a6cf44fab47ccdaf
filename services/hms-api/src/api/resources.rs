//! Generic record endpoints.
//!
//! One router per catalog entity, nested under its base path:
//!
//! - `POST   <base>` and `<base>/` create
//! - `GET    <base>` and `<base>/` list (`q`, `page`, `limit`, date filters)
//! - `GET    <base>/next-id` preview the next business id
//! - `GET    <base>/{id}` fetch by surrogate or business key
//! - `PUT    <base>/{id}` merge update
//! - `DELETE <base>/{id}` delete
//! - `GET    <base>/<relation>/{value}`, `<base>/<lookup>/{value}`, `<base>/<view>`

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, MethodRouter},
    Extension, Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::catalog::contract::Document;
use crate::catalog::{Entity, LookupSpec, RelationSpec, ViewSpec};
use crate::facade::{ListRequest, ListResult};
use crate::state::AppState;

/// Create the routes for one entity.
pub fn routes(entity: Arc<Entity>) -> Router<AppState> {
    let mut router = Router::new()
        .route("/", get(list_records).post(create_record))
        .route("/next-id", get(next_id))
        .route(
            "/{id}",
            get(get_record).put(update_record).delete(delete_record),
        );

    for relation in &entity.relations {
        router = router.route(
            &format!("/{}/{{value}}", relation.path),
            get(list_related).layer(Extension(Arc::new(relation.clone()))),
        );
    }
    for lookup in &entity.lookups {
        router = router.route(
            &format!("/{}/{{value}}", lookup.path),
            get(lookup_record).layer(Extension(Arc::new(lookup.clone()))),
        );
    }
    for view in &entity.views {
        router = router.route(
            &format!("/{}", view.path),
            get(list_view).layer(Extension(Arc::new(view.clone()))),
        );
    }

    router.layer(Extension(entity))
}

/// List and create at `<base>/`. A nested `/` route only answers the bare
/// base path, so the trailing-slash form is registered on the parent router.
pub fn collection_route(entity: Arc<Entity>) -> MethodRouter<AppState> {
    get(list_records)
        .post(create_record)
        .layer(Extension(entity))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response for listing records.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub data: Vec<Value>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    /// Relation routes echo the filter, e.g. `"FK_BillId": "B0001"`.
    #[serde(flatten)]
    pub scope: Map<String, Value>,
}

impl ListResponse {
    fn new(entity: &Entity, result: ListResult) -> Self {
        Self {
            data: result
                .records
                .into_iter()
                .map(|record| record.into_json(entity))
                .collect(),
            total: result.total,
            page: result.page,
            limit: result.limit,
            scope: Map::new(),
        }
    }
}

/// Response for deleting a record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub message: String,
    pub deleted_id: Value,
}

fn object_body(
    payload: Result<Json<Value>, JsonRejection>,
    request_id: &str,
) -> Result<Document, ApiError> {
    let Json(value) = payload.map_err(|rejection| {
        ApiError::bad_request("invalid_body", rejection.body_text())
            .with_request_id(request_id.to_string())
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(
            ApiError::bad_request("invalid_body", "Request body must be a JSON object")
                .with_request_id(request_id.to_string()),
        ),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a record, allocating its business id if none is given.
///
/// POST <base>
async fn create_record(
    State(state): State<AppState>,
    Extension(entity): Extension<Arc<Entity>>,
    ctx: RequestContext,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    let payload = object_body(payload, &request_id)?;

    let record = state
        .facade()
        .create(&entity, payload)
        .await
        .map_err(|e| ApiError::from_facade(e, &entity.name, &request_id))?;

    tracing::info!(
        entity = %entity.name,
        business_id = record.business_id.as_deref().unwrap_or_default(),
        request_id = %request_id,
        "Record created"
    );

    Ok((StatusCode::CREATED, Json(record.into_json(&entity))))
}

/// List records.
///
/// GET <base>
async fn list_records(
    State(state): State<AppState>,
    Extension(entity): Extension<Arc<Entity>>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse>, ApiError> {
    let request = ListRequest::from_params(&entity, &params);
    let result = state
        .facade()
        .list(&entity, &request)
        .await
        .map_err(|e| ApiError::from_facade(e, &entity.name, &ctx.request_id))?;

    Ok(Json(ListResponse::new(&entity, result)))
}

/// Preview the next business id without reserving it.
///
/// GET <base>/next-id
async fn next_id(
    State(state): State<AppState>,
    Extension(entity): Extension<Arc<Entity>>,
    ctx: RequestContext,
) -> Result<Json<Value>, ApiError> {
    let id = state
        .facade()
        .next_id(&entity)
        .await
        .map_err(|e| ApiError::from_facade(e, &entity.name, &ctx.request_id))?;

    let mut body = Map::new();
    body.insert(entity.business_key.clone(), Value::String(id));
    Ok(Json(Value::Object(body)))
}

/// GET <base>/{id}
async fn get_record(
    State(state): State<AppState>,
    Extension(entity): Extension<Arc<Entity>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .facade()
        .get(&entity, &id)
        .await
        .map_err(|e| ApiError::from_facade(e, &entity.name, &ctx.request_id))?;

    Ok(Json(record.into_json(&entity)))
}

/// Merge fields onto a record. The business id cannot be changed.
///
/// PUT <base>/{id}
async fn update_record(
    State(state): State<AppState>,
    Extension(entity): Extension<Arc<Entity>>,
    ctx: RequestContext,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request_id = ctx.request_id;
    let patch = object_body(payload, &request_id)?;

    let record = state
        .facade()
        .update(&entity, &id, patch)
        .await
        .map_err(|e| ApiError::from_facade(e, &entity.name, &request_id))?;

    tracing::info!(entity = %entity.name, id = %record.surrogate_id, request_id = %request_id, "Record updated");

    Ok(Json(record.into_json(&entity)))
}

/// DELETE <base>/{id}
async fn delete_record(
    State(state): State<AppState>,
    Extension(entity): Extension<Arc<Entity>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let request_id = ctx.request_id;
    let deleted = state
        .facade()
        .delete(&entity, &id)
        .await
        .map_err(|e| ApiError::from_facade(e, &entity.name, &request_id))?;

    tracing::info!(entity = %entity.name, id = %deleted, request_id = %request_id, "Record deleted");

    Ok(Json(DeleteResponse {
        message: "Deleted".to_string(),
        deleted_id: deleted.to_json(),
    }))
}

/// List the records belonging to a parent record.
///
/// GET <base>/<relation>/{value}
async fn list_related(
    State(state): State<AppState>,
    Extension(entity): Extension<Arc<Entity>>,
    Extension(relation): Extension<Arc<RelationSpec>>,
    ctx: RequestContext,
    Path(value): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse>, ApiError> {
    let request = ListRequest::from_params(&entity, &params);
    let result = state
        .facade()
        .list_related(&entity, &relation, &value, &request)
        .await
        .map_err(|e| ApiError::from_facade(e, &entity.name, &ctx.request_id))?;

    let mut response = ListResponse::new(&entity, result);
    response
        .scope
        .insert(relation.field.clone(), Value::String(value));
    Ok(Json(response))
}

/// Fetch the record holding a unique field value.
///
/// GET <base>/<lookup>/{value}
async fn lookup_record(
    State(state): State<AppState>,
    Extension(entity): Extension<Arc<Entity>>,
    Extension(lookup): Extension<Arc<LookupSpec>>,
    ctx: RequestContext,
    Path(value): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .facade()
        .lookup(&entity, &lookup, &value)
        .await
        .map_err(|e| ApiError::from_facade(e, &entity.name, &ctx.request_id))?;

    Ok(Json(record.into_json(&entity)))
}

/// GET <base>/<view>
async fn list_view(
    State(state): State<AppState>,
    Extension(entity): Extension<Arc<Entity>>,
    Extension(view): Extension<Arc<ViewSpec>>,
    ctx: RequestContext,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ListResponse>, ApiError> {
    let request = ListRequest::from_params(&entity, &params);
    let result = state
        .facade()
        .list_view(&entity, &view, &request)
        .await
        .map_err(|e| ApiError::from_facade(e, &entity.name, &ctx.request_id))?;

    Ok(Json(ListResponse::new(&entity, result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use crate::catalog::Catalog;
    use crate::store::memory::MemoryStore;

    const CATALOG: &str = r#"
        [[entity]]
        name = "billmasters"
        label = "Bill"
        base_path = "/api/billmasters"
        business_key = "billId"
        prefix = "B"
        fields = [{ name = "PatientName", kind = "text", required = true }]

        [[entity]]
        name = "billdetails"
        label = "Bill detail"
        base_path = "/api/billdetails"
        business_key = "billDetailId"
        prefix = "BLD"
        fields = [
            { name = "FK_BillId", kind = "text", required = true },
            { name = "Amount", kind = "number" },
        ]
        relations = [{ path = "bill", field = "FK_BillId" }]
    "#;

    fn app() -> Router {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        let state = AppState::new(catalog, Arc::new(MemoryStore::new()), 3);
        crate::api::create_router(state)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_create_and_fetch() {
        let app = app();
        let (status, created) = call(
            &app,
            "POST",
            "/api/billmasters",
            Some(serde_json::json!({ "PatientName": "Asha" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["billId"], "B0001");
        assert!(created["_id"].is_string());
        assert!(created["createdAt"].is_string());

        let (status, fetched) = call(&app, "GET", "/api/billmasters/B0001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["_id"], created["_id"]);
    }

    #[tokio::test]
    async fn test_collection_answers_with_trailing_slash() {
        let app = app();
        let (status, created) = call(
            &app,
            "POST",
            "/api/billmasters/",
            Some(serde_json::json!({ "PatientName": "Asha" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["billId"], "B0001");

        let (status, listed) = call(&app, "GET", "/api/billmasters/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["total"], 1);

        let (status, listed) = call(&app, "GET", "/api/billmasters", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["data"][0]["billId"], "B0001");
    }

    #[tokio::test]
    async fn test_non_object_body_is_rejected() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/billmasters",
            Some(serde_json::json!(["not", "an", "object"])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_body");
    }

    #[tokio::test]
    async fn test_relation_route_echoes_filter() {
        let app = app();
        for bill in ["B0001", "B0001", "B0002"] {
            let (status, _) = call(
                &app,
                "POST",
                "/api/billdetails",
                Some(serde_json::json!({ "FK_BillId": bill, "Amount": "12.5" })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = call(&app, "GET", "/api/billdetails/bill/B0001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["FK_BillId"], "B0001");
        assert_eq!(body["data"][0]["Amount"], 12.5);
    }

    #[tokio::test]
    async fn test_delete_response_and_not_found() {
        let app = app();
        let (_, created) = call(
            &app,
            "POST",
            "/api/billmasters",
            Some(serde_json::json!({ "PatientName": "Asha" })),
        )
        .await;

        let (status, body) = call(&app, "DELETE", "/api/billmasters/B0001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Deleted");
        assert_eq!(body["deletedId"], created["_id"]);

        let (status, body) = call(&app, "GET", "/api/billmasters/B0001", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Bill not found");
    }
}
