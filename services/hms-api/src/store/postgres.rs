//! Postgres record store.
//!
//! All entities share one `records` table: the entity name, an optional
//! business id under a partial unique index, and the field values as JSONB.
//! Field paths are bound as `text[]` and read with `#>>` / `#>`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::info;

use super::{
    value_text, Backend, Document, Key, ListQuery, Page, Record, RecordStore, StoreError,
    SurrogateId,
};
use crate::catalog::Direction;

const RECORD_COLUMNS: &str = "id, business_id, data, created_at, updated_at";

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/hms".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/hms".to_string());

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..Default::default()
        }
    }
}

struct RecordRow {
    id: i64,
    business_id: Option<String>,
    data: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for RecordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            business_id: row.try_get("business_id")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl RecordRow {
    fn into_record(self, entity: &str) -> Result<Record, StoreError> {
        let Value::Object(data) = self.data else {
            return Err(StoreError::Corrupt {
                entity: entity.to_string(),
                message: format!("row {} data is not a JSON object", self.id),
            });
        };
        Ok(Record {
            surrogate_id: SurrogateId::Serial(self.id),
            business_id: self.business_id,
            data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Splits a dotted field path into a `text[]` path for `#>` / `#>>`.
fn json_path(field: &str) -> Vec<String> {
    field.split('.').map(str::to_string).collect()
}

/// Escapes `LIKE` metacharacters so `term` matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

/// Appends the `WHERE` clause shared by the page and count queries.
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, entity: &str, query: &ListQuery) {
    builder.push(" WHERE entity = ");
    builder.push_bind(entity.to_string());

    if let Some(search) = query.search.as_ref().filter(|s| !s.fields.is_empty()) {
        let pattern = format!("%{}%", escape_like(&search.term));
        builder.push(" AND (");
        for (i, field) in search.fields.iter().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            builder.push("data #>> ");
            builder.push_bind(json_path(field));
            builder.push(" ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\'");
        }
        builder.push(")");
    }

    for (field, expected) in &query.equals {
        builder.push(" AND data #>> ");
        builder.push_bind(json_path(field));
        match value_text(expected) {
            Some(text) => {
                builder.push(" = ");
                builder.push_bind(text);
            }
            None => {
                builder.push(" IS NULL");
            }
        }
    }

    if let Some(range) = &query.date_range {
        if let Some(start) = &range.start {
            builder.push(" AND data #>> ");
            builder.push_bind(json_path(&range.field));
            builder.push(" >= ");
            builder.push_bind(start.clone());
        }
        if let Some(end) = &range.end {
            builder.push(" AND data #>> ");
            builder.push_bind(json_path(&range.field));
            builder.push(" <= ");
            builder.push_bind(end.clone());
        }
    }
}

/// Record store backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Wraps an existing pool. Connections are opened on first use.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check if the database is reachable.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Run pending migrations, loaded at runtime from the first candidate
    /// directory that exists.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/hms-api/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator
                        .run(&self.pool)
                        .await
                        .map_err(StoreError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(StoreError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    async fn fetch_one_record(
        &self,
        entity: &str,
        builder: &mut QueryBuilder<'_, Postgres>,
    ) -> Result<Option<Record>, StoreError> {
        let row = builder
            .build_query_as::<RecordRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        row.map(|r| r.into_record(entity)).transpose()
    }
}

#[async_trait]
impl RecordStore for PgStore {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.health_check().await
    }

    async fn business_ids(&self, entity: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT business_id
            FROM records
            WHERE entity = $1 AND business_id ILIKE $2 ESCAPE '\'
            "#,
        )
        .bind(entity)
        .bind(format!("{}%", escape_like(prefix)))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("business_id"))
            .collect::<Result<_, _>>()
            .map_err(StoreError::Query)
    }

    async fn find(&self, entity: &str, key: &Key) -> Result<Option<Record>, StoreError> {
        let mut builder = QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM records"));
        builder.push(" WHERE entity = ");
        builder.push_bind(entity.to_string());
        match key {
            Key::Business(id) => {
                builder.push(" AND business_id = ");
                builder.push_bind(id.clone());
            }
            Key::Surrogate(SurrogateId::Serial(id)) => {
                builder.push(" AND id = ");
                builder.push_bind(*id);
            }
            // object ids never exist in a relational store
            Key::Surrogate(SurrogateId::Object(_)) => return Ok(None),
        }
        self.fetch_one_record(entity, &mut builder).await
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
        let mut builder = QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM records"));
        builder.push(" WHERE entity = ");
        builder.push_bind(entity.to_string());
        builder.push(" AND data #>> ");
        builder.push_bind(json_path(field));
        builder.push(" = ");
        builder.push_bind(expected);
        builder.push(" ORDER BY id LIMIT 1");
        self.fetch_one_record(entity, &mut builder).await
    }

    async fn insert(
        &self,
        entity: &str,
        business_id: Option<&str>,
        data: Document,
    ) -> Result<Record, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "INSERT INTO records (entity, business_id, data) VALUES ($1, $2, $3) RETURNING {RECORD_COLUMNS}"
        ))
        .bind(entity)
        .bind(business_id)
        .bind(Value::Object(data))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StoreError::DuplicateKey {
                    entity: entity.to_string(),
                    business_id: business_id.unwrap_or_default().to_string(),
                };
            }
            StoreError::Query(e)
        })?;

        row.into_record(entity)
    }

    async fn update(
        &self,
        entity: &str,
        id: &SurrogateId,
        data: Document,
    ) -> Result<Option<Record>, StoreError> {
        let SurrogateId::Serial(id) = id else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "UPDATE records SET data = $3, updated_at = now() WHERE entity = $1 AND id = $2 RETURNING {RECORD_COLUMNS}"
        ))
        .bind(entity)
        .bind(*id)
        .bind(Value::Object(data))
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.map(|r| r.into_record(entity)).transpose()
    }

    async fn delete(&self, entity: &str, id: &SurrogateId) -> Result<bool, StoreError> {
        let SurrogateId::Serial(id) = id else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM records WHERE entity = $1 AND id = $2")
            .bind(entity)
            .bind(*id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, entity: &str, query: &ListQuery) -> Result<Page, StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM records");
        push_filters(&mut count, entity, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Query)?;

        let mut builder = QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM records"));
        push_filters(&mut builder, entity, query);
        builder.push(" ORDER BY ");
        for spec in &query.order {
            builder.push("data #> ");
            builder.push_bind(json_path(&spec.field));
            builder.push(match spec.direction {
                Direction::Asc => " ASC NULLS LAST, ",
                Direction::Desc => " DESC NULLS LAST, ",
            });
        }
        builder.push("created_at DESC, id DESC LIMIT ");
        builder.push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX));
        builder.push(" OFFSET ");
        builder.push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));

        let rows = builder
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Query)?;

        let records = rows
            .into_iter()
            .map(|r| r.into_record(entity))
            .collect::<Result<_, _>>()?;

        Ok(Page {
            records,
            total: u64::try_from(total).unwrap_or(0),
        })
    }
}
