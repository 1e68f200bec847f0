//! SQLite data source: a schema catalog plus a rusqlite connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Number, Value};

use super::render_query;
use crate::datasource::{CollectionManager, CollectionModel};
use crate::error::{QueryError, QueryResult};
use crate::params::{QueryParams, Row};
use crate::schema::{Collection, SchemaCatalog};
use crate::sql::Dialect;

/// A SQLite database whose tables are described by a [`SchemaCatalog`].
pub struct SqliteDatabase {
    catalog: SchemaCatalog,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    pub fn open(path: &Path, catalog: SchemaCatalog) -> QueryResult<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn, catalog))
    }

    pub fn open_in_memory(catalog: SchemaCatalog) -> QueryResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::with_connection(conn, catalog))
    }

    fn with_connection(conn: Connection, catalog: SchemaCatalog) -> Self {
        Self {
            catalog,
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a batch of statements, e.g. table setup from configuration.
    pub fn execute_batch(&self, sql: &str) -> QueryResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| QueryError::Execution("SQLite connection lock poisoned".into()))?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }
}

impl CollectionManager for SqliteDatabase {
    fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.catalog.get(name)
    }

    fn get_model(&self, name: &str) -> Option<Arc<dyn CollectionModel>> {
        let collection = self.catalog.get(name)?;
        Some(Arc::new(SqliteModel {
            collection,
            conn: self.conn.clone(),
        }))
    }
}

/// Model for one collection of a [`SqliteDatabase`].
pub struct SqliteModel {
    collection: Arc<Collection>,
    conn: Arc<Mutex<Connection>>,
}

#[async_trait]
impl CollectionModel for SqliteModel {
    async fn find_all(&self, params: &QueryParams) -> QueryResult<Vec<Row>> {
        let sql = self.render_sql(params);
        tracing::debug!(collection = %self.collection.name, %sql, "running query");

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> QueryResult<Vec<Row>> {
            let conn = conn
                .lock()
                .map_err(|_| QueryError::Execution("SQLite connection lock poisoned".into()))?;
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Map::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    record.insert(name.clone(), json_value(row.get_ref(i)?));
                }
                out.push(record);
            }
            Ok(out)
        })
        .await
        .map_err(|e| QueryError::Execution(format!("query task failed: {}", e)))?
    }
}

impl SqliteModel {
    pub fn render_sql(&self, params: &QueryParams) -> String {
        render_query(&self.collection, params, Dialect::Sqlite).to_sql(Dialect::Sqlite)
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}
