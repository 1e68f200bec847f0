//! Integration tests for building a query service from a config file.

use std::fs;
use std::path::PathBuf;

use serde_json::json;
use vizquery::config::{CacheBackend, Settings};
use vizquery::executor::SqliteDatabase;
use vizquery::request::{QueryRequest, RequestState};
use vizquery::schema::SchemaCatalog;
use vizquery::service::{BootstrapError, QueryService};

const SCHEMA: &str = r#"
[[collections]]
name = "orders"

[[collections.fields]]
name = "amount"
type = "decimal"

[[collections.fields]]
name = "customer"
type = "belongsTo"
target = "customers"
foreign_key = "customer_id"

[[collections]]
name = "customers"

[[collections.fields]]
name = "name"
type = "string"
"#;

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS customers (id INTEGER PRIMARY KEY, name TEXT);
CREATE TABLE IF NOT EXISTS orders (id INTEGER PRIMARY KEY, amount REAL, customer_id INTEGER);
DELETE FROM orders;
DELETE FROM customers;
INSERT INTO customers (id, name) VALUES (1, 'Ann'), (2, 'Bob');
INSERT INTO orders (amount, customer_id) VALUES (10, 1), (5, 2), (2.5, 2);
"#;

struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("vizquery-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("schema.toml"), SCHEMA).unwrap();
        fs::write(dir.join("init.sql"), INIT_SQL).unwrap();
        Self { dir }
    }

    fn path(&self, file: &str) -> String {
        self.dir.join(file).display().to_string()
    }

    fn write_config(&self, cache_backend: &str) -> PathBuf {
        let config = format!(
            r#"
[cache]
backend = "{backend}"
path = "{cache}"

[query]
max_limit = 100

[data_sources.shop]
driver = "sqlite"
path = "{db}"
schema = "{schema}"
init_sql = "{init}"

[data_sources.shop.roles]
member = ["orders:list"]
"#,
            backend = cache_backend,
            cache = self.path("cache.db"),
            db = self.path("shop.db"),
            schema = self.path("schema.toml"),
            init = self.path("init.sql"),
        );
        let path = self.dir.join("vizquery.toml");
        fs::write(&path, config).unwrap();
        path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn totals_by_customer() -> QueryRequest {
    serde_json::from_value(json!({
        "uid": "totals",
        "collection": "orders",
        "measures": [{"field": "amount", "aggregation": "sum", "alias": "total"}],
        "dimensions": [{"field": ["customer", "name"], "alias": "customer"}],
        "orders": [{"field": ["customer", "name"], "alias": "customer"}],
        "cache": {"enabled": true, "ttl": 60}
    }))
    .unwrap()
}

#[tokio::test]
async fn test_service_from_config_file() {
    let ws = Workspace::new("service");
    let settings = Settings::from_file(ws.write_config("memory")).unwrap();
    assert_eq!(settings.cache.backend, CacheBackend::Memory);
    assert_eq!(settings.default_data_source(), Some("shop"));

    let service = QueryService::from_settings(&settings).unwrap();
    assert_eq!(service.registry().default_id(), "shop");

    let body = service
        .query(totals_by_customer(), RequestState::new().with_role("member"))
        .await
        .unwrap();
    assert_eq!(
        body,
        json!([
            {"customer": "Ann", "total": 10},
            {"customer": "Bob", "total": 7.5}
        ])
    );
}

#[tokio::test]
async fn test_per_source_acl_applies() {
    let ws = Workspace::new("acl");
    let settings = Settings::from_file(ws.write_config("memory")).unwrap();
    let service = QueryService::from_settings(&settings).unwrap();

    let failure = service
        .query(totals_by_customer(), RequestState::new().with_role("guest"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, 403);
}

#[tokio::test]
async fn test_sqlite_cache_survives_restart() {
    let ws = Workspace::new("sqlite-cache");
    let config = ws.write_config("sqlite");
    let member = RequestState::new().with_role("member");

    {
        let service = QueryService::from_settings(&Settings::from_file(&config).unwrap()).unwrap();
        service.query(totals_by_customer(), member.clone()).await.unwrap();
    }

    // A new service re-runs init_sql; a cache hit still returns the first result.
    let settings = Settings::from_file(&config).unwrap();
    let service = QueryService::from_settings(&settings).unwrap();
    {
        let writer = SqliteDatabase::open(&ws.dir.join("shop.db"), SchemaCatalog::new()).unwrap();
        writer
            .execute_batch("INSERT INTO orders (amount, customer_id) VALUES (100, 1);")
            .unwrap();
    }

    let body = service.query(totals_by_customer(), member.clone()).await.unwrap();
    assert_eq!(body[0]["total"], json!(10));

    let mut refresh = totals_by_customer();
    refresh.refresh = true;
    let body = service.query(refresh, member).await.unwrap();
    assert_eq!(body[0]["total"], json!(110));
}

#[tokio::test]
async fn test_explain_caps_limit() {
    let ws = Workspace::new("explain");
    let service =
        QueryService::from_settings(&Settings::from_file(ws.write_config("memory")).unwrap())
            .unwrap();

    let mut request = totals_by_customer();
    request.limit = Some(5000);
    let sql = service
        .explain(request, RequestState::new().with_role("member"))
        .await
        .unwrap();
    assert!(sql.contains("LEFT JOIN \"customers\" AS \"customer\""), "{}", sql);
    assert!(sql.contains("LIMIT 100"), "{}", sql);
}

#[test]
fn test_bad_init_sql_is_reported() {
    let ws = Workspace::new("bad-init");
    fs::write(ws.dir.join("init.sql"), "CREATE TABLE (").unwrap();
    let settings = Settings::from_file(ws.write_config("memory")).unwrap();
    let err = QueryService::from_settings(&settings).unwrap_err();
    assert!(matches!(err, BootstrapError::Database { ref id, .. } if id == "shop"), "{}", err);
}
