//! Query execution against concrete databases.
//!
//! [`render_query`] turns the builder's [`QueryParams`] into a SELECT over
//! the collection's table, joining every included association:
//!
//! ```text
//! SELECT <attributes>
//! FROM <table> AS <collection>
//! LEFT JOIN <target> AS <association> ON ...     one per include (two for many-to-many)
//! WHERE <filter> GROUP BY <group> ORDER BY <order> LIMIT <limit>
//! ```

mod sqlite;

pub use sqlite::{SqliteDatabase, SqliteModel};

use crate::params::QueryParams;
use crate::schema::Collection;
use crate::sql::{Dialect, Query, TableRef};

/// The SELECT a model runs for `params` on `collection`.
pub fn render_query(collection: &Collection, params: &QueryParams, dialect: Dialect) -> Query {
    let mut query = Query::new()
        .select(params.attributes.clone())
        .from(TableRef::new(collection.table_name()).with_alias(&collection.name));

    for include in &params.include {
        for join in include.joins(&collection.name, dialect) {
            query = query.join(join);
        }
    }
    if let Some(predicate) = &params.where_clause {
        query = query.filter(predicate.clone());
    }

    query
        .group_by(params.group.clone())
        .order_by(params.order.clone())
        .limit(params.limit)
}
