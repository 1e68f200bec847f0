//! End-to-end tests: chart requests through the full pipeline against an
//! in-memory SQLite database.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use vizquery::acl::StaticAcl;
use vizquery::cache::MemoryCache;
use vizquery::datasource::{DataSource, DataSourceRegistry};
use vizquery::executor::SqliteDatabase;
use vizquery::pipeline::{Collaborators, QueryOptions, QueryPipeline};
use vizquery::request::{QueryRequest, RequestState};
use vizquery::schema::{Collection, FieldDef, FieldType, SchemaCatalog};
use vizquery::sql::Dialect;
use vizquery::variables::ContextVariables;

const SETUP: &str = r#"
CREATE TABLE customers (id INTEGER PRIMARY KEY, full_name TEXT);
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    status TEXT,
    total_amount TEXT,
    created_at TEXT,
    customer_id INTEGER
);
INSERT INTO customers (id, full_name) VALUES (1, 'Ann'), (2, 'Bob');
INSERT INTO orders (status, total_amount, created_at, customer_id) VALUES
    ('paid', '10.5', '2024-01-15 10:00:00', 1),
    ('paid', '4.5',  '2024-01-31 20:00:00', 2),
    ('new',  '1',    '2024-02-01 03:00:00', 1);
"#;

struct Fixture {
    db: Arc<SqliteDatabase>,
    pipeline: QueryPipeline,
    cache: Arc<MemoryCache>,
}

fn fixture() -> Fixture {
    let catalog = SchemaCatalog::from_collections(vec![
        Collection::new("orders")
            .with_field(FieldDef::new("status", FieldType::String))
            .with_field(FieldDef::new("amount", FieldType::Decimal).with_column("total_amount"))
            .with_field(FieldDef::new("createdAt", FieldType::Date).with_column("created_at"))
            .with_field(FieldDef::belongs_to("customer", "customers").with_foreign_key("customer_id")),
        Collection::new("customers")
            .with_field(FieldDef::new("name", FieldType::String).with_column("full_name")),
    ])
    .unwrap();

    let db = Arc::new(SqliteDatabase::open_in_memory(catalog).unwrap());
    db.execute_batch(SETUP).unwrap();

    let acl = StaticAcl::new()
        .grant("member", "orders:list")
        .grant("auditor", "customers:list");
    let registry = DataSourceRegistry::new(Arc::new(acl)).register(DataSource::new(
        "main",
        Dialect::Sqlite,
        db.clone(),
    ));

    let cache = Arc::new(MemoryCache::new());
    let pipeline = QueryPipeline::standard(&Collaborators {
        registry: Arc::new(registry),
        cache: cache.clone(),
        variables: Arc::new(ContextVariables::new()),
        options: QueryOptions::default(),
    });

    Fixture {
        db,
        pipeline,
        cache,
    }
}

fn request(value: Value) -> QueryRequest {
    serde_json::from_value(value).unwrap()
}

fn member() -> RequestState {
    RequestState::new().with_role("member")
}

#[tokio::test]
async fn test_sum_by_status() {
    let f = fixture();
    let body = f
        .pipeline
        .query(
            request(json!({
                "collection": "orders",
                "measures": [{"field": "amount", "aggregation": "sum", "alias": "total"}],
                "dimensions": [{"field": "status"}],
                "orders": [{"field": "amount", "alias": "total", "order": "desc"}]
            })),
            member(),
        )
        .await
        .unwrap();

    assert_eq!(
        body,
        json!([
            {"total": 15, "status": "paid"},
            {"total": 1, "status": "new"}
        ])
    );
}

#[tokio::test]
async fn test_raw_rows_are_coerced_to_numbers() {
    let f = fixture();
    let body = f
        .pipeline
        .query(
            request(json!({
                "collection": "orders",
                "measures": [{"field": "amount"}],
                "orders": [{"field": "amount", "order": "asc"}],
                "limit": 2
            })),
            member(),
        )
        .await
        .unwrap();

    // Text storage sorts lexically; the output is numeric.
    assert_eq!(body, json!([{"amount": 1}, {"amount": 10.5}]));
}

#[tokio::test]
async fn test_month_buckets_follow_request_timezone() {
    let f = fixture();
    let query = json!({
        "collection": "orders",
        "measures": [{"field": "id", "aggregation": "count", "alias": "orders"}],
        "dimensions": [{"field": "createdAt", "format": "YYYY-MM", "alias": "month"}],
        "orders": [{"field": "createdAt", "alias": "month", "order": "asc"}]
    });

    let utc = f.pipeline.query(request(query.clone()), member()).await.unwrap();
    assert_eq!(
        utc,
        json!([{"orders": 2, "month": "2024-01"}, {"orders": 1, "month": "2024-02"}])
    );

    let shanghai = f
        .pipeline
        .query(request(query), member().with_timezone("+08:00"))
        .await
        .unwrap();
    assert_eq!(
        shanghai,
        json!([{"orders": 1, "month": "2024-01"}, {"orders": 2, "month": "2024-02"}])
    );
}

#[tokio::test]
async fn test_association_dimension_joins_target() {
    let f = fixture();
    let body = f
        .pipeline
        .query(
            request(json!({
                "collection": "orders",
                "measures": [{"field": "amount", "aggregation": "sum", "alias": "total"}],
                "dimensions": [{"field": ["customer", "name"], "alias": "customer"}],
                "orders": [{"field": ["customer", "name"], "alias": "customer"}]
            })),
            member(),
        )
        .await
        .unwrap();

    assert_eq!(
        body,
        json!([
            {"total": 11.5, "customer": "Ann"},
            {"total": 4.5, "customer": "Bob"}
        ])
    );
}

#[tokio::test]
async fn test_filter_with_user_variable() {
    let f = fixture();
    let state = member().with_user(json!({"id": 1, "nickname": "Bob"}));
    let body = f
        .pipeline
        .query(
            request(json!({
                "collection": "orders",
                "measures": [{"field": "id", "aggregation": "count", "alias": "n"}],
                "filter": {"$and": [
                    {"customer": {"name": {"$eq": "{{ $user.nickname }}"}}},
                    {"status": "paid"}
                ]}
            })),
            state,
        )
        .await
        .unwrap();

    assert_eq!(body, json!([{"n": 1}]));
}

#[tokio::test]
async fn test_date_variable_in_filter() {
    let f = fixture();
    let state = member()
        .with_timezone("+08:00")
        .with_now(Utc.with_ymd_and_hms(2024, 1, 31, 17, 0, 0).unwrap());
    let body = f
        .pipeline
        .query(
            request(json!({
                "collection": "orders",
                "measures": [{"field": "id", "aggregation": "count", "alias": "n"}],
                "filter": {"createdAt": {"$lt": "{{$date.today}}"}}
            })),
            state,
        )
        .await
        .unwrap();

    // Local today is 2024-02-01; only rows stored before that string count.
    assert_eq!(body, json!([{"n": 2}]));
}

#[tokio::test]
async fn test_unparsable_timezone_falls_back_to_utc() {
    let f = fixture();
    let state = member()
        .with_timezone("+aé1")
        .with_now(Utc.with_ymd_and_hms(2024, 1, 31, 17, 0, 0).unwrap());
    let body = f
        .pipeline
        .query(
            request(json!({
                "collection": "orders",
                "measures": [{"field": "id", "aggregation": "count", "alias": "n"}],
                "dimensions": [{"field": "createdAt", "format": "YYYY-MM", "alias": "month"}],
                "filter": {"createdAt": {"$lt": "{{$date.today}}"}}
            })),
            state,
        )
        .await
        .unwrap();

    assert_eq!(body, json!([{"n": 1, "month": "2024-01"}]));
}

#[tokio::test]
async fn test_role_without_grant_is_forbidden() {
    let f = fixture();
    let failure = f
        .pipeline
        .query(
            request(json!({"collection": "orders", "measures": [{"field": "amount"}]})),
            RequestState::new().with_role("auditor"),
        )
        .await
        .unwrap_err();
    assert_eq!(failure.status, 403);
    assert_eq!(failure.message, "No permissions");
}

#[tokio::test]
async fn test_root_bypasses_acl() {
    let f = fixture();
    let body = f
        .pipeline
        .query(
            request(json!({
                "collection": "customers",
                "dimensions": [{"field": "name"}],
                "orders": [{"field": "name"}]
            })),
            RequestState::new().with_role("root"),
        )
        .await
        .unwrap();
    assert_eq!(body, json!([{"name": "Ann"}, {"name": "Bob"}]));
}

#[tokio::test]
async fn test_invalid_aggregation_fails_with_500() {
    let f = fixture();
    let failure = f
        .pipeline
        .query(
            request(json!({
                "collection": "orders",
                "measures": [{"field": "amount", "aggregation": "median"}]
            })),
            member(),
        )
        .await
        .unwrap_err();
    assert_eq!(failure.status, 500);
    assert_eq!(failure.message, "Invalid aggregation function: median");
}

#[tokio::test]
async fn test_cached_result_served_until_refresh() {
    let f = fixture();
    let query = json!({
        "uid": "orders-per-status",
        "collection": "orders",
        "measures": [{"field": "id", "aggregation": "count", "alias": "n"}],
        "cache": {"enabled": true, "ttl": 300}
    });

    let first = f.pipeline.query(request(query.clone()), member()).await.unwrap();
    assert_eq!(first, json!([{"n": 3}]));
    assert_eq!(f.cache.len(), 1);

    f.db
        .execute_batch("INSERT INTO orders (status, total_amount) VALUES ('new', '2');")
        .unwrap();

    let cached = f.pipeline.query(request(query.clone()), member()).await.unwrap();
    assert_eq!(cached, json!([{"n": 3}]));

    let mut refresh = query;
    refresh["refresh"] = json!(true);
    let fresh = f.pipeline.query(request(refresh), member()).await.unwrap();
    assert_eq!(fresh, json!([{"n": 4}]));
}

#[tokio::test]
async fn test_cache_is_checked_after_permission() {
    let f = fixture();
    let query = json!({
        "uid": "chart-1",
        "collection": "orders",
        "measures": [{"field": "id", "aggregation": "count", "alias": "n"}],
        "cache": {"enabled": true}
    });
    f.pipeline.query(request(query.clone()), member()).await.unwrap();

    let failure = f
        .pipeline
        .query(request(query), RequestState::new())
        .await
        .unwrap_err();
    assert_eq!(failure.status, 403);
}
