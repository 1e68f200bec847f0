//! The chart query request and the caller state it runs under.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QueryError, QueryResult};

/// A field reference: `"amount"`, or `["customer", "name"]` for a field of an association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldRef {
    Name(String),
    Path(Vec<String>),
}

impl FieldRef {
    /// Split into `(association, field)`.
    ///
    /// A one-element path is a plain field; longer paths use the first two segments.
    pub fn split(&self) -> QueryResult<(Option<&str>, &str)> {
        match self {
            FieldRef::Name(name) if !name.is_empty() => Ok((None, name)),
            FieldRef::Path(path) => match path.as_slice() {
                [name] if !name.is_empty() => Ok((None, name)),
                [association, name, ..] if !association.is_empty() && !name.is_empty() => {
                    Ok((Some(association), name))
                }
                _ => Err(QueryError::InvalidField(format!("{:?}", path))),
            },
            FieldRef::Name(_) => Err(QueryError::InvalidField("empty field name".to_string())),
        }
    }
}

impl From<&str> for FieldRef {
    fn from(name: &str) -> Self {
        FieldRef::Name(name.to_string())
    }
}

impl From<[&str; 2]> for FieldRef {
    fn from(path: [&str; 2]) -> Self {
        FieldRef::Path(path.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureSpec {
    pub field: FieldRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
    #[serde(default)]
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionSpec {
    pub field: FieldRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    /// Display format for date-like dimensions, e.g. `YYYY-MM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSpec {
    pub field: FieldRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// `asc` or `desc`; ascending when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

impl Default for FieldRef {
    fn default() -> Self {
        FieldRef::Name(String::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheOptions {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// A declarative chart query as posted by the client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Chart id; the cache key when caching is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    pub collection: String,
    #[serde(default)]
    pub measures: Vec<MeasureSpec>,
    #[serde(default)]
    pub dimensions: Vec<DimensionSpec>,
    #[serde(default)]
    pub orders: Vec<OrderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheOptions>,
    /// Skip the cache read; the fresh result is still written.
    #[serde(default)]
    pub refresh: bool,
}

impl QueryRequest {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            ..Self::default()
        }
    }

    /// Cache key, present only when caching is enabled and the chart has a uid.
    pub fn cache_key(&self) -> Option<&str> {
        match (&self.cache, &self.uid) {
            (Some(cache), Some(uid)) if cache.enabled && !uid.is_empty() => Some(uid),
            _ => None,
        }
    }
}

/// Caller state a request runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestState {
    pub role: Option<String>,
    pub user: Option<Value>,
    /// UTC offset such as `+08:00`.
    pub timezone: String,
    pub now: DateTime<Utc>,
}

impl Default for RequestState {
    fn default() -> Self {
        Self {
            role: None,
            user: None,
            timezone: "+00:00".to_string(),
            now: Utc::now(),
        }
    }
}

impl RequestState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.timezone = timezone.to_string();
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// The request timezone as a fixed offset; UTC when it does not parse.
    pub fn offset(&self) -> FixedOffset {
        utc_offset(&self.timezone).unwrap_or_else(|| Utc.fix())
    }
}

/// Parse `+08:00`, `-0530`, `+8`, `Z` or `UTC` into a fixed offset.
pub fn utc_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz == "Z" {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => (rest.get(..2)?, rest.get(2..)?),
        None => (rest, "0"),
    };
    if !(hours.bytes().all(|b| b.is_ascii_digit()) && minutes.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_camel_case() {
        let request: QueryRequest = serde_json::from_value(json!({
            "uid": "chart-1",
            "dataSource": "main",
            "collection": "orders",
            "measures": [{"field": ["amount"], "aggregation": "sum", "alias": "total"}],
            "dimensions": [{"field": ["customer", "name"], "type": "string"}],
            "orders": [{"field": "createdAt", "order": "desc"}],
            "filter": {"status": "paid"},
            "limit": 10,
            "cache": {"enabled": true, "ttl": 30},
            "refresh": true
        }))
        .unwrap();

        assert_eq!(request.data_source.as_deref(), Some("main"));
        assert_eq!(request.measures[0].field, FieldRef::Path(vec!["amount".into()]));
        assert_eq!(request.dimensions[0].field_type.as_deref(), Some("string"));
        assert_eq!(request.orders[0].field, FieldRef::from("createdAt"));
        assert_eq!(request.cache, Some(CacheOptions { enabled: true, ttl: Some(30) }));
        assert!(request.refresh);
        assert_eq!(request.cache_key(), Some("chart-1"));
    }

    #[test]
    fn test_minimal_request() {
        let request: QueryRequest = serde_json::from_value(json!({"collection": "orders"})).unwrap();
        assert!(request.measures.is_empty());
        assert!(!request.refresh);
        assert_eq!(request.cache_key(), None);
    }

    #[test]
    fn test_cache_key_requires_enabled_and_uid() {
        let mut request = QueryRequest::new("orders");
        request.uid = Some("c".into());
        assert_eq!(request.cache_key(), None);
        request.cache = Some(CacheOptions { enabled: false, ttl: Some(5) });
        assert_eq!(request.cache_key(), None);
        request.cache = Some(CacheOptions { enabled: true, ttl: None });
        assert_eq!(request.cache_key(), Some("c"));
        request.uid = None;
        assert_eq!(request.cache_key(), None);
    }

    #[test]
    fn test_field_ref_split() {
        assert_eq!(FieldRef::from("amount").split().unwrap(), (None, "amount"));
        assert_eq!(
            FieldRef::from(["customer", "name"]).split().unwrap(),
            (Some("customer"), "name")
        );
        assert_eq!(
            FieldRef::Path(vec!["amount".into()]).split().unwrap(),
            (None, "amount")
        );
        assert!(FieldRef::Path(vec![]).split().is_err());
        assert!(FieldRef::from("").split().is_err());
    }

    #[test]
    fn test_utc_offset() {
        assert_eq!(utc_offset("+08:00").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(utc_offset("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(utc_offset("+8").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(utc_offset("UTC").unwrap().local_minus_utc(), 0);
        assert!(utc_offset("Asia/Shanghai").is_none());
    }

    #[test]
    fn test_utc_offset_rejects_non_digits() {
        assert!(utc_offset("+aé1").is_none());
        assert!(utc_offset("+é:00").is_none());
        assert!(utc_offset("+-5").is_none());
        let state = RequestState::new().with_timezone("+aé1");
        assert_eq!(state.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_state_offset_falls_back_to_utc() {
        let state = RequestState::new().with_timezone("bogus");
        assert_eq!(state.offset().local_minus_utc(), 0);
    }
}
