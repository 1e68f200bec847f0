//! Context variables in filters.
//!
//! Filter values may reference the caller through `{{ ... }}` placeholders:
//!
//! ```text
//! {"ownerId": {"$eq": "{{$user.id}}"}}          current user's id, kept numeric
//! {"title": {"$includes": "{{$user.name}}-"}}   spliced into a longer string
//! {"createdAt": {"$gte": "{{$date.today}}"}}    today in the request timezone
//! ```
//!
//! | Placeholder | Value |
//! |---|---|
//! | `$user.<path>`, `currentUser.<path>` | dot path into the current user |
//! | `$nRole`, `currentRole` | current role name |
//! | `$date.now`, `$nDate.now` | RFC 3339 timestamp with the request offset |
//! | `$date.today` / `yesterday` / `tomorrow` (and `$nDate.*`) | `YYYY-MM-DD` in the request timezone |
//!
//! Unknown placeholders resolve to `null`.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::QueryResult;
use crate::request::RequestState;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("placeholder pattern"));

/// Substitutes request-scoped variables into a filter tree.
#[async_trait]
pub trait VariableResolver: Send + Sync {
    async fn resolve(&self, filter: &Value, state: &RequestState) -> QueryResult<Value>;
}

/// Resolves the user, role and date variables from [`RequestState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextVariables;

impl ContextVariables {
    pub fn new() -> Self {
        Self
    }

    fn substitute(&self, value: &Value, state: &RequestState) -> Value {
        match value {
            Value::String(s) => self.substitute_str(s, state),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.substitute(item, state))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute(v, state)))
                    .collect::<Map<String, Value>>(),
            ),
            other => other.clone(),
        }
    }

    fn substitute_str(&self, s: &str, state: &RequestState) -> Value {
        if let Some(caps) = PLACEHOLDER.captures(s) {
            if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
                return lookup(&caps[1], state);
            }
        } else {
            return Value::String(s.to_string());
        }

        let spliced = PLACEHOLDER.replace_all(s, |caps: &Captures<'_>| {
            match lookup(&caps[1], state) {
                Value::Null => String::new(),
                Value::String(text) => text,
                other => other.to_string(),
            }
        });
        Value::String(spliced.into_owned())
    }
}

#[async_trait]
impl VariableResolver for ContextVariables {
    async fn resolve(&self, filter: &Value, state: &RequestState) -> QueryResult<Value> {
        Ok(self.substitute(filter, state))
    }
}

/// Value of one placeholder name.
fn lookup(name: &str, state: &RequestState) -> Value {
    let (scope, path) = match name.split_once('.') {
        Some((scope, path)) => (scope, Some(path)),
        None => (name, None),
    };

    match (scope, path) {
        ("$user" | "currentUser", path) => {
            let user = state.user.as_ref().unwrap_or(&Value::Null);
            match path {
                Some(path) => user_path(user, path),
                None => user.clone(),
            }
        }
        ("$nRole" | "currentRole", None) => state
            .role
            .as_ref()
            .map(|role| Value::String(role.clone()))
            .unwrap_or(Value::Null),
        ("$date" | "$nDate", Some(which)) => date_variable(which, state),
        _ => {
            tracing::debug!(variable = name, "unknown filter variable");
            Value::Null
        }
    }
}

fn user_path(user: &Value, path: &str) -> Value {
    path.split('.')
        .try_fold(user, |value, segment| match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
        .cloned()
        .unwrap_or(Value::Null)
}

fn date_variable(which: &str, state: &RequestState) -> Value {
    let local = state.now.with_timezone(&state.offset());
    let day = |days: i64| {
        let date = local.date_naive() + Duration::days(days);
        Value::String(date.format("%Y-%m-%d").to_string())
    };
    match which {
        "now" => Value::String(local.to_rfc3339_opts(SecondsFormat::Millis, false)),
        "today" => day(0),
        "yesterday" => day(-1),
        "tomorrow" => day(1),
        _ => Value::Null,
    }
}
