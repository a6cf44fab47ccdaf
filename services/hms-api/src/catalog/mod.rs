//! Entity catalog.
//!
//! Every resource the API exposes is one entry in a TOML catalog: its route,
//! business key and sequence codec, the fields searched by `q`, the date field
//! used for range filters, foreign-key routes, and the field contract applied
//! to request bodies. The built-in catalog is embedded in the binary and can
//! be replaced at runtime with `HMS_CATALOG_PATH`.

pub mod contract;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use hms_seqid::{IdError, SequenceCodec};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

const BUILTIN_CATALOG: &str = include_str!("../../catalog/entities.toml");

/// Route segments reserved by the generic resource router.
const RESERVED_SEGMENTS: &[&str] = &["next-id"];

/// Catalog loading errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The catalog is not valid TOML or does not match the schema.
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    /// An entity's prefix or width is unusable.
    #[error("entity '{entity}': {source}")]
    Codec {
        entity: String,
        #[source]
        source: IdError,
    },

    /// An entity definition is inconsistent.
    #[error("entity '{entity}': {message}")]
    InvalidEntity { entity: String, message: String },
}

impl CatalogError {
    fn invalid(entity: &str, message: impl Into<String>) -> Self {
        CatalogError::InvalidEntity {
            entity: entity.to_string(),
            message: message.into(),
        }
    }
}

/// How a field's incoming value is coerced and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Integer,
    Number,
    Boolean,
    Date,
    Object,
    /// Stored as a SHA-256 digest and never echoed back.
    Secret,
}

/// One field of an entity's contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default, rename = "enum")]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub max_len: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// An explicit sort key, applied before the default newest-first order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderSpec {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

/// `GET <base>/<path>/{value}`: records whose `field` equals `value`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationSpec {
    pub path: String,
    pub field: String,
    #[serde(default, rename = "where")]
    pub filter: BTreeMap<String, Value>,
    #[serde(default)]
    pub order: Vec<OrderSpec>,
}

/// `GET <base>/<path>/{value}`: the single record whose unique `field` equals `value`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupSpec {
    pub path: String,
    pub field: String,
}

/// `GET <base>/<path>`: a fixed-filter listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewSpec {
    pub path: String,
    #[serde(default, rename = "where")]
    pub filter: BTreeMap<String, Value>,
    #[serde(default)]
    pub order: Vec<OrderSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(rename = "entity", default)]
    entities: Vec<EntityDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityDef {
    name: String,
    label: String,
    base_path: String,
    business_key: String,
    prefix: String,
    #[serde(default = "default_width")]
    width: usize,
    #[serde(default)]
    search_fields: Vec<String>,
    #[serde(default)]
    date_field: Option<String>,
    #[serde(default)]
    order: Vec<OrderSpec>,
    #[serde(default)]
    unique_fields: Vec<String>,
    #[serde(default)]
    relations: Vec<RelationSpec>,
    #[serde(default)]
    lookups: Vec<LookupSpec>,
    #[serde(default)]
    views: Vec<ViewSpec>,
    #[serde(default)]
    fields: Vec<FieldSpec>,
}

fn default_width() -> usize {
    4
}

/// A validated entity definition.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Collection / table discriminator, e.g. `patients`.
    pub name: String,
    /// Human label used in messages, e.g. `Patient`.
    pub label: String,
    pub base_path: String,
    pub business_key: String,
    pub codec: SequenceCodec,
    pub search_fields: Vec<String>,
    pub date_field: Option<String>,
    pub order: Vec<OrderSpec>,
    pub unique_fields: Vec<String>,
    pub relations: Vec<RelationSpec>,
    pub lookups: Vec<LookupSpec>,
    pub views: Vec<ViewSpec>,
    pub fields: Vec<FieldSpec>,
}

impl Entity {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of fields that must never appear in responses.
    pub fn secret_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Secret)
            .map(|f| f.name.as_str())
    }

    /// True if `path` names the business key, a contract field, or a key
    /// nested inside an object field (`permanentAddress.mobileNo`).
    fn knows_path(&self, path: &str) -> bool {
        let mut segments = path.split('.');
        let Some(head) = segments.next() else {
            return false;
        };
        let nested = segments.next().is_some();
        if head == self.business_key {
            return !nested;
        }
        match self.field(head) {
            Some(field) if nested => field.kind == FieldKind::Object,
            Some(field) => field.kind != FieldKind::Secret,
            None => false,
        }
    }

    fn try_from_def(def: EntityDef) -> Result<Self, CatalogError> {
        let name = def.name;
        let codec = SequenceCodec::new(def.prefix, def.width).map_err(|source| {
            CatalogError::Codec {
                entity: name.clone(),
                source,
            }
        })?;

        let entity = Self {
            name,
            label: def.label,
            base_path: def.base_path,
            business_key: def.business_key,
            codec,
            search_fields: def.search_fields,
            date_field: def.date_field,
            order: def.order,
            unique_fields: def.unique_fields,
            relations: def.relations,
            lookups: def.lookups,
            views: def.views,
            fields: def.fields,
        };
        entity.validate()?;
        Ok(entity)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let name = self.name.as_str();

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
            return Err(CatalogError::invalid(
                name,
                "name must be lowercase ASCII letters or '_'",
            ));
        }
        if !self.base_path.starts_with("/api/") || self.base_path.ends_with('/') {
            return Err(CatalogError::invalid(
                name,
                "base_path must start with '/api/' and not end with '/'",
            ));
        }
        if self.business_key.is_empty() || self.field(&self.business_key).is_some() {
            return Err(CatalogError::invalid(
                name,
                "business_key must be set and must not also be listed in fields",
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(CatalogError::invalid(
                    name,
                    format!("field '{}' is defined twice", field.name),
                ));
            }
            if field.name.contains('.') {
                return Err(CatalogError::invalid(
                    name,
                    format!("field '{}' must not contain '.'", field.name),
                ));
            }
            if field.kind == FieldKind::Secret && field.default.is_some() {
                return Err(CatalogError::invalid(
                    name,
                    format!("secret field '{}' cannot have a default", field.name),
                ));
            }
        }

        let referenced = self
            .search_fields
            .iter()
            .chain(self.date_field.iter())
            .chain(self.unique_fields.iter())
            .chain(self.order.iter().map(|o| &o.field))
            .chain(self.relations.iter().map(|r| &r.field))
            .chain(self.relations.iter().flat_map(|r| r.filter.keys()))
            .chain(self.relations.iter().flat_map(|r| r.order.iter().map(|o| &o.field)))
            .chain(self.lookups.iter().map(|l| &l.field))
            .chain(self.views.iter().flat_map(|v| v.filter.keys()))
            .chain(self.views.iter().flat_map(|v| v.order.iter().map(|o| &o.field)));
        for path in referenced {
            if !self.knows_path(path) {
                return Err(CatalogError::invalid(
                    name,
                    format!("'{path}' is not a field of this entity"),
                ));
            }
        }

        if let Some(date_field) = &self.date_field {
            if self.field(date_field).map(|f| f.kind) != Some(FieldKind::Date) {
                return Err(CatalogError::invalid(
                    name,
                    format!("date_field '{date_field}' must be a date field"),
                ));
            }
        }

        let mut routes = HashSet::new();
        let paths = self
            .relations
            .iter()
            .map(|r| &r.path)
            .chain(self.lookups.iter().map(|l| &l.path))
            .chain(self.views.iter().map(|v| &v.path));
        for path in paths {
            let valid = !path.is_empty()
                && path
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid || RESERVED_SEGMENTS.contains(&path.as_str()) {
                return Err(CatalogError::invalid(
                    name,
                    format!("route segment '{path}' is not allowed"),
                ));
            }
            if !routes.insert(path.as_str()) {
                return Err(CatalogError::invalid(
                    name,
                    format!("route segment '{path}' is used twice"),
                ));
            }
        }

        Ok(())
    }
}

/// The set of entities served by the API.
#[derive(Debug, Clone)]
pub struct Catalog {
    entities: Vec<Arc<Entity>>,
}

impl Catalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    /// Loads the catalog from `path`, or the built-in one when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw)?;

        let mut names = HashSet::new();
        let mut base_paths = HashSet::new();
        let mut entities = Vec::with_capacity(file.entities.len());

        for def in file.entities {
            let entity = Entity::try_from_def(def)?;
            if !names.insert(entity.name.clone()) {
                return Err(CatalogError::invalid(&entity.name, "entity is defined twice"));
            }
            if !base_paths.insert(entity.base_path.clone()) {
                return Err(CatalogError::invalid(
                    &entity.name,
                    format!("base_path '{}' is already in use", entity.base_path),
                ));
            }
            entities.push(Arc::new(entity));
        }

        Ok(Self { entities })
    }

    pub fn entities(&self) -> &[Arc<Entity>] {
        &self.entities
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Entity>> {
        self.entities.iter().find(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[entity]]
        name = "patients"
        label = "Patient"
        base_path = "/api/patients"
        business_key = "patientId"
        prefix = "P"
        search_fields = ["patientId", "firstName", "permanentAddress.mobileNo"]
        fields = [
            { name = "firstName", kind = "text" },
            { name = "permanentAddress", kind = "object", default = {} },
        ]
    "#;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.entities().len() >= 26);

        let patients = catalog.get("patients").unwrap();
        assert_eq!(patients.base_path, "/api/patients");
        assert_eq!(patients.business_key, "patientId");
        assert_eq!(patients.codec.format(1), "P0001");

        let bill_details = catalog.get("billdetails").unwrap();
        assert_eq!(bill_details.codec.prefix(), "BLD");
        assert!(bill_details.relations.iter().any(|r| r.path == "bill"));

        let slots = catalog.get("doctoropdscheduletimedetails").unwrap();
        assert_eq!(slots.date_field.as_deref(), Some("scheduleDate"));

        let adjustments = catalog.get("receiptadjustmentdetails").unwrap();
        assert_eq!(adjustments.base_path, "/api/receiptadjustmentdetail");

        let departments = catalog.get("servicedepartmentmasters").unwrap();
        assert_eq!(departments.order[0].field, "SeqNo");

        let users = catalog.get("usermasters").unwrap();
        assert_eq!(users.secret_fields().collect::<Vec<_>>(), vec!["Password"]);
    }

    #[test]
    fn test_builtin_prefixes_are_distinct() {
        let catalog = Catalog::builtin().unwrap();
        let mut prefixes = HashSet::new();
        for entity in catalog.entities() {
            assert!(
                prefixes.insert(entity.codec.prefix().to_string()),
                "duplicate prefix {}",
                entity.codec.prefix()
            );
        }
    }

    #[test]
    fn test_minimal_catalog() {
        let catalog = Catalog::from_toml_str(MINIMAL).unwrap();
        let patients = catalog.get("patients").unwrap();
        assert_eq!(patients.codec.width(), 4);
        assert!(patients.knows_path("permanentAddress.mobileNo"));
        assert!(!patients.knows_path("firstName.nested"));
    }

    #[test]
    fn test_unknown_search_field_is_rejected() {
        let raw = MINIMAL.replace("\"firstName\", \"perm", "\"middleName\", \"perm");
        let err = Catalog::from_toml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("middleName"));
    }

    #[test]
    fn test_duplicate_base_path_is_rejected() {
        let raw = format!(
            "{MINIMAL}\n{}",
            MINIMAL.replace("name = \"patients\"", "name = \"others\"")
        );
        let err = Catalog::from_toml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn test_bad_prefix_is_rejected() {
        let raw = MINIMAL.replace("prefix = \"P\"", "prefix = \"P1\"");
        assert!(matches!(
            Catalog::from_toml_str(&raw),
            Err(CatalogError::Codec { .. })
        ));
    }

    #[test]
    fn test_reserved_route_segment_is_rejected() {
        let raw = format!(
            "{MINIMAL}\nviews = [{{ path = \"next-id\" }}]\n"
        );
        let err = Catalog::from_toml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("next-id"));
    }
}
