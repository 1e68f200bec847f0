//! Declared field types and their output coercions.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Declared type of a collection field.
///
/// Names follow the platform's field type identifiers (`bigInt`,
/// `belongsToMany`, ...). Unknown names are kept verbatim in [`FieldType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    BigInt,
    Integer,
    Float,
    Double,
    Decimal,
    String,
    Text,
    Boolean,
    /// Timestamp with time zone.
    Date,
    DatetimeNoTz,
    DateOnly,
    Time,
    UnixTimestamp,
    Json,
    Array,
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
    BelongsToArray,
    Other(String),
}

/// Converts a post-processed value into its transport form.
pub type Coercion = fn(&Value) -> Value;

impl FieldType {
    pub fn parse(name: &str) -> Self {
        match name {
            "bigInt" => FieldType::BigInt,
            "integer" => FieldType::Integer,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "decimal" => FieldType::Decimal,
            "string" => FieldType::String,
            "text" => FieldType::Text,
            "boolean" => FieldType::Boolean,
            "date" | "datetime" | "datetimeTz" => FieldType::Date,
            "datetimeNoTz" => FieldType::DatetimeNoTz,
            "dateOnly" => FieldType::DateOnly,
            "time" => FieldType::Time,
            "unixTimestamp" => FieldType::UnixTimestamp,
            "json" | "jsonb" => FieldType::Json,
            "array" => FieldType::Array,
            "belongsTo" => FieldType::BelongsTo,
            "hasOne" => FieldType::HasOne,
            "hasMany" => FieldType::HasMany,
            "belongsToMany" => FieldType::BelongsToMany,
            "belongsToArray" => FieldType::BelongsToArray,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::BigInt => "bigInt",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Decimal => "decimal",
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DatetimeNoTz => "datetimeNoTz",
            FieldType::DateOnly => "dateOnly",
            FieldType::Time => "time",
            FieldType::UnixTimestamp => "unixTimestamp",
            FieldType::Json => "json",
            FieldType::Array => "array",
            FieldType::BelongsTo => "belongsTo",
            FieldType::HasOne => "hasOne",
            FieldType::HasMany => "hasMany",
            FieldType::BelongsToMany => "belongsToMany",
            FieldType::BelongsToArray => "belongsToArray",
            FieldType::Other(name) => name,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::BigInt
                | FieldType::Integer
                | FieldType::Float
                | FieldType::Double
                | FieldType::Decimal
        )
    }

    /// Coercion applied to values of this type before they leave the pipeline.
    ///
    /// Drivers hand back `bigInt` and `decimal` columns as strings; all
    /// numeric types are normalized to JSON numbers.
    pub fn coercion(&self) -> Option<Coercion> {
        if self.is_numeric() {
            Some(to_number)
        } else {
            None
        }
    }
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        FieldType::parse(&name)
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric conversion with `Number(x)` semantics: unparsable input becomes `null`.
pub fn to_number(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => n.as_f64().map_or(Value::Null, number_from_f64),
        Value::Number(_) => value.clone(),
        Value::Bool(b) => Value::from(*b as i64),
        Value::String(s) => parse_number(s),
        Value::Null => Value::from(0),
        Value::Array(_) | Value::Object(_) => Value::Null,
    }
}

fn parse_number(s: &str) -> Value {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Value::from(0);
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => number_from_f64(f),
        _ => Value::Null,
    }
}

/// Integral floats within the i64 range are emitted as integers (`"42.00"` and `42.0` -> `42`).
fn number_from_f64(f: f64) -> Value {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_round_trips_names() {
        for name in ["bigInt", "decimal", "belongsToMany", "unixTimestamp", "dateOnly"] {
            assert_eq!(FieldType::parse(name).as_str(), name);
        }
        assert_eq!(FieldType::parse("datetimeTz"), FieldType::Date);
        assert_eq!(
            FieldType::parse("uuid"),
            FieldType::Other("uuid".to_string())
        );
    }

    #[test]
    fn test_deserialize_from_string() {
        let t: FieldType = serde_json::from_value(json!("double")).unwrap();
        assert_eq!(t, FieldType::Double);
        assert_eq!(serde_json::to_value(&t).unwrap(), json!("double"));
    }

    #[test]
    fn test_coercion_only_for_numeric_types() {
        assert!(FieldType::BigInt.coercion().is_some());
        assert!(FieldType::Decimal.coercion().is_some());
        assert!(FieldType::String.coercion().is_none());
        assert!(FieldType::Date.coercion().is_none());
    }

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(&json!("123")), json!(123));
        assert_eq!(to_number(&json!("42.00")), json!(42));
        assert_eq!(to_number(&json!("3.5")), json!(3.5));
        assert_eq!(to_number(&json!(" 7 ")), json!(7));
        assert_eq!(to_number(&json!("abc")), Value::Null);
        assert_eq!(to_number(&json!(true)), json!(1));
        assert_eq!(to_number(&json!(9.25)), json!(9.25));
        assert_eq!(to_number(&json!([1])), Value::Null);
    }

    #[test]
    fn test_to_number_big_values_fall_back_to_float() {
        let v = to_number(&json!("123456789012345678901234"));
        assert!(v.is_f64());
    }

    #[test]
    fn test_integral_values_share_one_shape() {
        assert_eq!(to_number(&json!("15.00")), json!(15));
        assert_eq!(to_number(&json!(15.0)), json!(15));
        assert_eq!(to_number(&json!(15)), json!(15));
        assert_eq!(to_number(&json!(7.5)), json!(7.5));
    }
}
