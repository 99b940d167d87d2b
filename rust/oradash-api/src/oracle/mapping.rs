//! Declared row reshaping.
//!
//! Each endpoint owns a static [`FieldMap`] that names the driver columns it
//! reads and the API fields it emits. Output objects contain exactly the
//! declared fields, with `null` for anything the row lacks.

use serde_json::{Map, Value};

use super::executor::Row;

/// Target JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Bool,
}

/// One `(driver_column, api_field, kind)` entry.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub column: &'static str,
    pub field: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    #[must_use]
    pub const fn text(column: &'static str, field: &'static str) -> Self {
        Self { column, field, kind: FieldKind::Text }
    }

    #[must_use]
    pub const fn int(column: &'static str, field: &'static str) -> Self {
        Self { column, field, kind: FieldKind::Integer }
    }

    #[must_use]
    pub const fn float(column: &'static str, field: &'static str) -> Self {
        Self { column, field, kind: FieldKind::Float }
    }

    #[must_use]
    pub const fn flag(column: &'static str, field: &'static str) -> Self {
        Self { column, field, kind: FieldKind::Bool }
    }
}

/// Static column-to-field table.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap(&'static [FieldSpec]);

impl FieldMap {
    #[must_use]
    pub const fn new(fields: &'static [FieldSpec]) -> Self {
        Self(fields)
    }

    /// Reshape one row.
    #[must_use]
    pub fn apply(&self, row: &Row) -> Map<String, Value> {
        self.0
            .iter()
            .map(|spec| {
                let value = row.get(spec.column).map_or(Value::Null, |v| coerce(v, spec.kind));
                (spec.field.to_string(), value)
            })
            .collect()
    }

    /// Reshape every row.
    #[must_use]
    pub fn apply_all(&self, rows: &[Row]) -> Vec<Map<String, Value>> {
        rows.iter().map(|row| self.apply(row)).collect()
    }

    /// API field names in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &'static str> {
        self.0.iter().map(|spec| spec.field)
    }
}

#[allow(clippy::cast_possible_truncation, reason = "integer fields hold whole Oracle NUMBERs")]
fn coerce(value: &Value, kind: FieldKind) -> Value {
    match (kind, value) {
        (_, Value::Null) => Value::Null,

        (FieldKind::Text, Value::String(_)) => value.clone(),
        (FieldKind::Text, other) => Value::String(other.to_string()),

        (FieldKind::Integer, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .map_or(Value::Null, Value::from),
        (FieldKind::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.round() as i64))
            .map_or(Value::Null, Value::from),
        (FieldKind::Integer, Value::Bool(b)) => Value::from(i64::from(*b)),

        (FieldKind::Float, Value::Number(n)) => n.as_f64().map_or(Value::Null, Value::from),
        (FieldKind::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),

        (FieldKind::Bool, Value::Bool(_)) => value.clone(),
        (FieldKind::Bool, Value::Number(n)) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        (FieldKind::Bool, Value::String(s)) => match s.trim().to_ascii_uppercase().as_str() {
            "YES" | "Y" | "TRUE" | "1" | "ENABLED" => Value::Bool(true),
            "NO" | "N" | "FALSE" | "0" | "DISABLED" => Value::Bool(false),
            _ => Value::Null,
        },

        _ => Value::Null,
    }
}

/// Lower-case every column name; used by the ad hoc SQL console.
#[must_use]
pub fn lowercase_keys(row: &Row) -> Map<String, Value> {
    row.iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: FieldMap = FieldMap::new(&[
        FieldSpec::text("EVENT", "event"),
        FieldSpec::int("TOTAL_WAITS", "total_waits"),
        FieldSpec::float("AVG_MS", "avg_ms"),
        FieldSpec::flag("ENABLED", "enabled"),
        FieldSpec::text("MISSING", "missing"),
    ]);

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_apply_declared_fields_only() {
        let mapped = SAMPLE.apply(&row(json!({
            "EVENT": "log file sync",
            "TOTAL_WAITS": "1200",
            "AVG_MS": 1.25,
            "ENABLED": "YES",
            "EXTRA": "ignored"
        })));

        assert_eq!(mapped.len(), 5);
        assert_eq!(mapped["event"], "log file sync");
        assert_eq!(mapped["total_waits"], 1200);
        assert_eq!(mapped["avg_ms"], 1.25);
        assert_eq!(mapped["enabled"], true);
        assert_eq!(mapped["missing"], Value::Null);
        assert!(!mapped.contains_key("EXTRA"));
        assert_eq!(SAMPLE.fields().collect::<Vec<_>>()[0], "event");
    }

    #[test]
    fn test_coercions() {
        assert_eq!(coerce(&json!(12.6), FieldKind::Integer), json!(13));
        assert_eq!(coerce(&json!("abc"), FieldKind::Integer), Value::Null);
        assert_eq!(coerce(&json!(7), FieldKind::Text), json!("7"));
        assert_eq!(coerce(&json!("0"), FieldKind::Bool), json!(false));
        assert_eq!(coerce(&json!(0), FieldKind::Bool), json!(false));
        assert_eq!(coerce(&json!(" 3.5 "), FieldKind::Float), json!(3.5));
    }

    #[test]
    fn test_lowercase_keys() {
        let mapped = lowercase_keys(&row(json!({"SQL_ID": "abc", "Elapsed": 1})));
        assert_eq!(mapped["sql_id"], "abc");
        assert_eq!(mapped["elapsed"], 1);
    }
}
