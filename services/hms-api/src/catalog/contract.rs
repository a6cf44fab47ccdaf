//! Field contract enforcement for request bodies.
//!
//! Incoming payloads are coerced field by field according to the entity's
//! catalog entry. Every violated field contributes one message, and any
//! violation rejects the whole payload.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use super::{Entity, FieldKind, FieldSpec};

/// A JSON object as stored for one record.
pub type Document = Map<String, Value>;

/// Default value that resolves to the current time for date fields.
const NOW_DEFAULT: &str = "now";

/// Validates a creation payload.
///
/// Unknown fields (including the business key, which the caller handles) are
/// dropped, defaults are applied to absent fields, and required fields must
/// end up non-empty.
pub fn validate_create(entity: &Entity, mut payload: Document) -> Result<Document, Vec<String>> {
    let mut out = Document::new();
    let mut errors = Vec::new();

    for field in &entity.fields {
        let value = match payload.remove(&field.name) {
            Some(value) => value,
            None => match &field.default {
                Some(default) => resolve_default(field, default),
                None => Value::Null,
            },
        };

        match coerce(field, value) {
            Ok(value) => {
                if field.required && is_blank(&value) {
                    errors.push(format!("`{}` is required", field.name));
                    continue;
                }
                if !value.is_null() {
                    out.insert(field.name.clone(), value);
                }
            }
            Err(message) => errors.push(message),
        }
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

/// Validates an update patch.
///
/// Only fields present in the patch are coerced. A required field may not be
/// cleared. Fields set to null are kept as explicit nulls so the merge clears
/// them.
pub fn validate_patch(entity: &Entity, patch: Document) -> Result<Document, Vec<String>> {
    let mut out = Document::new();
    let mut errors = Vec::new();

    for (name, value) in patch {
        let Some(field) = entity.field(&name) else {
            continue;
        };
        match coerce(field, value) {
            Ok(value) => {
                if field.required && is_blank(&value) {
                    errors.push(format!("`{}` is required", field.name));
                    continue;
                }
                out.insert(name, value);
            }
            Err(message) => errors.push(message),
        }
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

fn resolve_default(field: &FieldSpec, default: &Value) -> Value {
    match (field.kind, default) {
        (FieldKind::Date, Value::String(s)) if s == NOW_DEFAULT => {
            Value::String(format_timestamp(Utc::now()))
        }
        _ => default.clone(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn coerce(field: &FieldSpec, value: Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let name = &field.name;

    let value = match field.kind {
        FieldKind::Text => match value {
            Value::String(s) => Value::String(s),
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            _ => return Err(format!("`{name}` must be a string")),
        },
        FieldKind::Integer => match value {
            Value::String(s) if s.trim().is_empty() => Value::Null,
            Value::String(s) => Value::from(
                parse_integer(s.trim()).ok_or_else(|| format!("`{name}` must be an integer"))?,
            ),
            Value::Number(n) => Value::from(
                number_to_integer(&n).ok_or_else(|| format!("`{name}` must be an integer"))?,
            ),
            _ => return Err(format!("`{name}` must be an integer")),
        },
        FieldKind::Number => match value {
            Value::String(s) if s.trim().is_empty() => Value::Null,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("`{name}` must be a number"))?,
            Value::Number(n) => Value::Number(n),
            _ => return Err(format!("`{name}` must be a number")),
        },
        FieldKind::Boolean => match value {
            Value::Bool(b) => Value::Bool(b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => return Err(format!("`{name}` must be a boolean")),
        },
        FieldKind::Date => match value {
            Value::String(s) if s.trim().is_empty() => Value::Null,
            Value::String(s) => Value::String(
                parse_timestamp(s.trim())
                    .map(format_timestamp)
                    .ok_or_else(|| format!("`{name}` must be an ISO-8601 date"))?,
            ),
            _ => return Err(format!("`{name}` must be an ISO-8601 date")),
        },
        FieldKind::Object => match value {
            Value::Object(map) => Value::Object(map),
            _ => return Err(format!("`{name}` must be an object")),
        },
        FieldKind::Secret => match value {
            Value::String(s) if s.is_empty() => Value::Null,
            Value::String(s) => Value::String(hash_secret(&s)),
            _ => return Err(format!("`{name}` must be a string")),
        },
    };

    if let Some(max_len) = field.max_len {
        if let Value::String(s) = &value {
            if s.chars().count() > max_len {
                return Err(format!("`{name}` must be at most {max_len} characters"));
            }
        }
    }

    if !field.allowed.is_empty() {
        if let Value::String(s) = &value {
            if !field.allowed.iter().any(|allowed| allowed == s) {
                return Err(format!(
                    "`{name}` must be one of: {}",
                    field.allowed.join(", ")
                ));
            }
        }
    }

    Ok(value)
}

fn parse_integer(s: &str) -> Option<i64> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    let f = s.parse::<f64>().ok()?;
    float_to_integer(f)
}

fn number_to_integer(n: &Number) -> Option<i64> {
    n.as_i64().or_else(|| n.as_f64().and_then(float_to_integer))
}

fn float_to_integer(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    format!("{:x}", digest)
}

/// Parses an ISO-8601 timestamp or calendar date.
///
/// Accepts RFC 3339 (`2024-03-01T10:00:00+05:30`), a naive date-time taken as
/// UTC (`2024-03-01T10:00:00`), or a bare date taken as UTC midnight.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    parse_day(s).map(|day| day.and_time(NaiveTime::MIN).and_utc())
}

/// Parses the calendar day of an ISO-8601 date or timestamp.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(day);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.date())
}

/// Canonical stored form of a timestamp.
///
/// Fixed width with millisecond precision and a `Z` suffix, so stored dates
/// order correctly as plain strings.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use rstest::rstest;
    use serde_json::json;

    fn field(kind: FieldKind) -> FieldSpec {
        FieldSpec {
            name: "f".to_string(),
            kind,
            required: false,
            default: None,
            allowed: Vec::new(),
            max_len: None,
        }
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[rstest]
    #[case(FieldKind::Integer, json!(""), json!(null))]
    #[case(FieldKind::Integer, json!("42"), json!(42))]
    #[case(FieldKind::Integer, json!(" 7 "), json!(7))]
    #[case(FieldKind::Integer, json!("3.0"), json!(3))]
    #[case(FieldKind::Integer, json!(5), json!(5))]
    #[case(FieldKind::Number, json!("12.5"), json!(12.5))]
    #[case(FieldKind::Number, json!(""), json!(null))]
    #[case(FieldKind::Boolean, json!("TRUE"), json!(true))]
    #[case(FieldKind::Boolean, json!(false), json!(false))]
    #[case(FieldKind::Text, json!(12), json!("12"))]
    #[case(FieldKind::Date, json!("2024-03-01"), json!("2024-03-01T00:00:00.000Z"))]
    #[case(
        FieldKind::Date,
        json!("2024-03-01T10:30:00+05:30"),
        json!("2024-03-01T05:00:00.000Z")
    )]
    #[case(FieldKind::Date, json!("2024-03-01T10:30:00"), json!("2024-03-01T10:30:00.000Z"))]
    #[case(FieldKind::Object, json!({"a": 1}), json!({"a": 1}))]
    fn test_coercions(#[case] kind: FieldKind, #[case] input: Value, #[case] expected: Value) {
        assert_eq!(coerce(&field(kind), input).unwrap(), expected);
    }

    #[rstest]
    #[case(FieldKind::Integer, json!("abc"))]
    #[case(FieldKind::Integer, json!(2.5))]
    #[case(FieldKind::Number, json!("1,5"))]
    #[case(FieldKind::Boolean, json!("yes"))]
    #[case(FieldKind::Date, json!("01/03/2024"))]
    #[case(FieldKind::Object, json!("{}"))]
    #[case(FieldKind::Text, json!({"nested": true}))]
    fn test_coercion_failures(#[case] kind: FieldKind, #[case] input: Value) {
        assert!(coerce(&field(kind), input).is_err());
    }

    #[test]
    fn test_secret_is_hashed() {
        let hashed = coerce(&field(FieldKind::Secret), json!("hunter2")).unwrap();
        let hashed = hashed.as_str().unwrap();
        assert_eq!(hashed.len(), 64);
        assert_ne!(hashed, "hunter2");
    }

    #[test]
    fn test_create_reports_every_violation() {
        let catalog = Catalog::builtin().unwrap();
        let users = catalog.get("usermasters").unwrap();

        let errors = validate_create(
            users,
            doc(json!({ "Gender": "Unknown", "Discount": "lots" })),
        )
        .unwrap_err();

        assert!(errors.contains(&"`LoginName` is required".to_string()));
        assert!(errors.contains(&"`UserName` is required".to_string()));
        assert!(errors.contains(&"`Password` is required".to_string()));
        assert!(errors.iter().any(|e| e.starts_with("`Gender` must be one of")));
        assert!(errors.contains(&"`Discount` must be a number".to_string()));
    }

    #[test]
    fn test_create_applies_defaults_and_drops_unknown_fields() {
        let catalog = Catalog::builtin().unwrap();
        let patients = catalog.get("patients").unwrap();

        let out = validate_create(
            patients,
            doc(json!({ "firstName": "Asha", "name": "ignored", "sex": "F" })),
        )
        .unwrap();

        assert_eq!(out["firstName"], "Asha");
        assert_eq!(out["permanentAddress"], json!({}));
        assert!(!out.contains_key("name"));
        assert!(!out.contains_key("lastName"));
    }

    #[test]
    fn test_now_default_for_dates() {
        let catalog = Catalog::builtin().unwrap();
        let details = catalog.get("ipdregdetails").unwrap();

        let out = validate_create(details, doc(json!({ "FK_IPDID": "IPD0001" }))).unwrap();
        let entry = out["EntryDateTime"].as_str().unwrap();
        assert!(parse_timestamp(entry).is_some());
        assert!(entry.ends_with('Z'));
    }

    #[test]
    fn test_patch_cannot_clear_required_field() {
        let catalog = Catalog::builtin().unwrap();
        let parties = catalog.get("partymasters").unwrap();

        let errors =
            validate_patch(parties, doc(json!({ "PartyName": "", "Remarks": "x" }))).unwrap_err();
        assert_eq!(errors, vec!["`PartyName` is required".to_string()]);

        let out = validate_patch(parties, doc(json!({ "Remarks": null, "FreeDays": "3" }))).unwrap();
        assert_eq!(out["Remarks"], Value::Null);
        assert_eq!(out["FreeDays"], json!(3));
    }

    #[test]
    fn test_max_len() {
        let mut spec = field(FieldKind::Text);
        spec.max_len = Some(3);
        assert!(coerce(&spec, json!("abc")).is_ok());
        assert!(coerce(&spec, json!("abcd")).is_err());
    }

    #[test]
    fn test_parse_day_accepts_timestamps() {
        assert_eq!(
            parse_day("2024-05-06T23:00:00Z"),
            NaiveDate::from_ymd_opt(2024, 5, 6)
        );
        assert_eq!(parse_day("2024-05-06"), NaiveDate::from_ymd_opt(2024, 5, 6));
        assert_eq!(parse_day("yesterday"), None);
    }
}
