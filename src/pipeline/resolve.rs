//! Field and association resolution.
//!
//! Every measure, dimension and order names a field either directly
//! (`"amount"`) or through an association (`["customer", "name"]`). This
//! stage maps each one onto a table alias and storage column, picks up the
//! declared type and options, and collects the associations the query must
//! join. The working filter is translated here as well; associations it
//! references are appended to the include list unless already present.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{
    Middleware, Next, QueryContext, ResolvedDimension, ResolvedMeasure, ResolvedOrder,
    ResolvedQuery,
};
use crate::datasource::{CollectionManager, DataSourceRegistry};
use crate::error::{QueryError, QueryResult};
use crate::filter::FilterParser;
use crate::params::ResolvedField;
use crate::request::FieldRef;
use crate::schema::{Collection, FieldType, IncludeOptions, RelationKind};
use crate::sql::{Dialect, SortDir};

pub struct ParseFieldAndAssociations {
    registry: Arc<DataSourceRegistry>,
}

impl ParseFieldAndAssociations {
    pub fn new(registry: Arc<DataSourceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Middleware for ParseFieldAndAssociations {
    fn name(&self) -> &'static str {
        "parseFieldAndAssociations"
    }

    async fn handle(&self, ctx: &mut QueryContext, next: Next<'_>) -> QueryResult<()> {
        let resolved = {
            let request = ctx.request();
            let source = self.registry.resolve(request.data_source.as_deref())?;
            let collections = source.collections();
            let collection = collections
                .get_collection(&request.collection)
                .ok_or_else(|| QueryError::UnknownCollection(request.collection.clone()))?;

            let mut resolver = FieldResolver::new(&collection, collections, source.dialect());

            let measures = request
                .measures
                .iter()
                .map(|m| -> QueryResult<ResolvedMeasure> {
                    Ok(ResolvedMeasure {
                        field: resolver.resolve(
                            &m.field,
                            m.alias.as_deref(),
                            m.field_type.as_deref(),
                            None,
                        )?,
                        aggregation: m.aggregation.clone().filter(|a| !a.is_empty()),
                        distinct: m.distinct,
                    })
                })
                .collect::<QueryResult<Vec<_>>>()?;

            let dimensions = request
                .dimensions
                .iter()
                .map(|d| -> QueryResult<ResolvedDimension> {
                    Ok(ResolvedDimension {
                        field: resolver.resolve(
                            &d.field,
                            d.alias.as_deref(),
                            d.field_type.as_deref(),
                            d.options.as_ref(),
                        )?,
                        format: d.format.clone().filter(|f| !f.is_empty()),
                    })
                })
                .collect::<QueryResult<Vec<_>>>()?;

            let orders = request
                .orders
                .iter()
                .map(|o| -> QueryResult<ResolvedOrder> {
                    Ok(ResolvedOrder {
                        field: resolver.resolve(&o.field, o.alias.as_deref(), None, None)?,
                        direction: SortDir::parse(o.order.as_deref()),
                    })
                })
                .collect::<QueryResult<Vec<_>>>()?;

            let parsed = FilterParser::new(&collection, collections)
                .parse(ctx.filter.as_ref().unwrap_or(&Value::Null))?;
            for association in &parsed.associations {
                resolver.require(association)?;
            }

            ResolvedQuery {
                measures,
                dimensions,
                orders,
                include: resolver.includes,
                where_clause: parsed.where_clause,
                collection,
            }
        };

        tracing::debug!(
            includes = resolved.include.len(),
            filtered = resolved.where_clause.is_some(),
            "fields resolved"
        );
        ctx.resolved = Some(resolved);
        next.run(ctx).await
    }
}

/// Resolves field references against one collection, collecting includes.
struct FieldResolver<'a> {
    collection: &'a Collection,
    collections: &'a dyn CollectionManager,
    dialect: Dialect,
    includes: Vec<IncludeOptions>,
}

impl<'a> FieldResolver<'a> {
    fn new(collection: &'a Collection, collections: &'a dyn CollectionManager, dialect: Dialect) -> Self {
        Self {
            collection,
            collections,
            dialect,
            includes: vec![],
        }
    }

    fn resolve(
        &mut self,
        field: &FieldRef,
        alias: Option<&str>,
        declared_type: Option<&str>,
        declared_options: Option<&Map<String, Value>>,
    ) -> QueryResult<ResolvedField> {
        let (association, name) = field.split()?;

        let (table, owner, logical) = match association {
            None => (self.collection.name.clone(), None, name.to_string()),
            Some(association) => {
                let target = self.require(association)?;
                (association.to_string(), Some(target), format!("{}.{}", association, name))
            }
        };
        let owner: &Collection = owner.as_deref().unwrap_or(self.collection);
        let def = owner.get_field(name);

        let field_type = def
            .map(|f| f.field_type.clone())
            .or_else(|| declared_type.map(FieldType::parse));
        let options = match def {
            Some(f) if !f.options.is_empty() => f.options.clone(),
            _ => declared_options.cloned().unwrap_or_default(),
        };
        let alias = alias
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| logical.clone());

        Ok(ResolvedField {
            column: owner.storage_column(name).to_string(),
            name: logical,
            table,
            field_type,
            options,
            alias,
        })
    }

    /// Include `association` (once) and return its target collection.
    fn require(&mut self, association: &str) -> QueryResult<Arc<Collection>> {
        let relation = self.relation(association)?;
        let target = self
            .collections
            .get_collection(relation.target())
            .ok_or_else(|| QueryError::UnknownCollection(relation.target().to_string()))?;

        if !self.includes.iter().any(|i| i.association == association) {
            let through_table = match &relation {
                RelationKind::BelongsToMany { through, .. } => self
                    .collections
                    .get_collection(through)
                    .map(|c| c.table_name().to_string()),
                _ => None,
            };
            self.includes.push(relation.include(
                association,
                &self.collection.name,
                target.table_name(),
                through_table.as_deref(),
                self.dialect,
            ));
        }
        Ok(target)
    }

    fn relation(&self, association: &str) -> QueryResult<RelationKind> {
        self.collection
            .relation(association)
            .ok_or_else(|| QueryError::UnknownAssociation {
                collection: self.collection.name.clone(),
                association: association.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::StaticAcl;
    use crate::datasource::DataSource;
    use crate::pipeline::QueryPipeline;
    use crate::request::{DimensionSpec, MeasureSpec, OrderSpec, QueryRequest, RequestState};
    use crate::schema::{FieldDef, SchemaCatalog};
    use serde_json::json;

    fn registry() -> Arc<DataSourceRegistry> {
        let catalog = SchemaCatalog::from_collections(vec![
            Collection::new("orders")
                .with_field(FieldDef::new("amount", FieldType::Decimal).with_column("total_amount"))
                .with_field(
                    FieldDef::new("createdAt", FieldType::Date)
                        .with_option("precision", json!(3)),
                )
                .with_field(FieldDef::belongs_to("customer", "customers"))
                .with_field(FieldDef::belongs_to_many("tags", "tags", "order_tags"))
                .with_field(FieldDef::belongs_to_array("labels", "labels")),
            Collection::new("customers")
                .with_field(FieldDef::new("name", FieldType::String).with_column("full_name")),
            Collection::new("tags").with_field(FieldDef::new("title", FieldType::String)),
            Collection::new("labels").with_field(FieldDef::new("text", FieldType::String)),
        ])
        .unwrap();
        Arc::new(
            DataSourceRegistry::new(Arc::new(StaticAcl::new()))
                .register(DataSource::new("main", Dialect::Postgres, Arc::new(catalog))),
        )
    }

    async fn resolve(request: QueryRequest) -> QueryResult<ResolvedQuery> {
        let mut ctx = QueryContext::new(request, RequestState::new());
        QueryPipeline::new()
            .with(ParseFieldAndAssociations::new(registry()))
            .run(&mut ctx)
            .await?;
        Ok(ctx.resolved.take().unwrap())
    }

    fn measure(field: FieldRef) -> MeasureSpec {
        MeasureSpec {
            field,
            ..MeasureSpec::default()
        }
    }

    #[tokio::test]
    async fn test_plain_field_uses_storage_column_and_schema_type() {
        let mut request = QueryRequest::new("orders");
        request.measures = vec![measure("amount".into())];
        let resolved = resolve(request).await.unwrap();

        let field = &resolved.measures[0].field;
        assert_eq!(field.table, "orders");
        assert_eq!(field.column, "total_amount");
        assert_eq!(field.name, "amount");
        assert_eq!(field.alias, "amount");
        assert_eq!(field.field_type, Some(FieldType::Decimal));
        assert!(resolved.include.is_empty());
    }

    #[tokio::test]
    async fn test_association_field_resolves_on_target() {
        let mut request = QueryRequest::new("orders");
        request.dimensions = vec![DimensionSpec {
            field: ["customer", "name"].into(),
            ..DimensionSpec::default()
        }];
        let resolved = resolve(request).await.unwrap();

        let field = &resolved.dimensions[0].field;
        assert_eq!(field.table, "customer");
        assert_eq!(field.column, "full_name");
        assert_eq!(field.name, "customer.name");
        assert_eq!(field.alias, "customer.name");
        assert_eq!(field.field_type, Some(FieldType::String));
        assert_eq!(resolved.include.len(), 1);
        assert_eq!(resolved.include[0].association, "customer");
        assert!(resolved.include[0].through.is_none());
    }

    #[tokio::test]
    async fn test_includes_are_deduplicated_across_fields_and_filter() {
        let mut request = QueryRequest::new("orders");
        request.measures = vec![measure(["tags", "title"].into())];
        request.dimensions = vec![DimensionSpec {
            field: ["tags", "title"].into(),
            alias: Some("tag".into()),
            ..DimensionSpec::default()
        }];
        request.orders = vec![OrderSpec {
            field: ["customer", "name"].into(),
            order: Some("desc".into()),
            ..OrderSpec::default()
        }];
        request.filter = Some(json!({"tags.title": "vip", "labels.text": {"$ne": "x"}}));
        let resolved = resolve(request).await.unwrap();

        let names: Vec<&str> = resolved.include.iter().map(|i| i.association.as_str()).collect();
        assert_eq!(names, vec!["tags", "customer", "labels"]);

        let tags = &resolved.include[0];
        assert_eq!(tags.through.as_ref().unwrap().attributes, Vec::<String>::new());
        assert_eq!(tags.through.as_ref().unwrap().table, "order_tags");
        assert!(resolved.include[2].on.is_some());
        assert_eq!(resolved.orders[0].direction, SortDir::Desc);
        assert!(resolved.where_clause.is_some());
    }

    #[tokio::test]
    async fn test_unknown_field_falls_back_to_request_type() {
        let mut request = QueryRequest::new("orders");
        request.measures = vec![MeasureSpec {
            field: "score".into(),
            field_type: Some("double".into()),
            alias: Some("s".into()),
            ..MeasureSpec::default()
        }];
        let resolved = resolve(request).await.unwrap();
        let field = &resolved.measures[0].field;
        assert_eq!(field.column, "score");
        assert_eq!(field.alias, "s");
        assert_eq!(field.field_type, Some(FieldType::Double));
    }

    #[tokio::test]
    async fn test_schema_options_win_over_request_options() {
        let mut request = QueryRequest::new("orders");
        let mut options = Map::new();
        options.insert("precision".into(), json!(0));
        request.dimensions = vec![DimensionSpec {
            field: "createdAt".into(),
            options: Some(options.clone()),
            ..DimensionSpec::default()
        }, DimensionSpec {
            field: "amount".into(),
            options: Some(options),
            ..DimensionSpec::default()
        }];
        let resolved = resolve(request).await.unwrap();
        assert_eq!(resolved.dimensions[0].field.options["precision"], json!(3));
        assert_eq!(resolved.dimensions[1].field.options["precision"], json!(0));
    }

    #[tokio::test]
    async fn test_errors() {
        let err = resolve(QueryRequest::new("invoices")).await.unwrap_err();
        assert!(matches!(err, QueryError::UnknownCollection(name) if name == "invoices"));

        let mut request = QueryRequest::new("orders");
        request.measures = vec![measure(["vendor", "name"].into())];
        let err = resolve(request).await.unwrap_err();
        assert!(matches!(err, QueryError::UnknownAssociation { association, .. } if association == "vendor"));

        let mut request = QueryRequest::new("orders");
        request.filter = Some(json!({"amount": {"$near": 1}}));
        assert!(matches!(resolve(request).await.unwrap_err(), QueryError::Filter(_)));
    }
}
