//! Per-request state threaded through the stages.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::params::{FieldMap, QueryParams, ResolvedField, Row};
use crate::request::{QueryRequest, RequestState};
use crate::schema::{Collection, IncludeOptions};
use crate::sql::{Expr, SortDir};

/// A measure after field resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMeasure {
    pub field: ResolvedField,
    /// Aggregation name as requested; validated by the builder.
    pub aggregation: Option<String>,
    pub distinct: bool,
}

/// A dimension after field resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDimension {
    pub field: ResolvedField,
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOrder {
    pub field: ResolvedField,
    pub direction: SortDir,
}

/// Output of field and association resolution.
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub collection: Arc<Collection>,
    pub measures: Vec<ResolvedMeasure>,
    pub dimensions: Vec<ResolvedDimension>,
    pub orders: Vec<ResolvedOrder>,
    /// Associations to join, each at most once.
    pub include: Vec<IncludeOptions>,
    pub where_clause: Option<Expr>,
}

/// Output of the query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub params: QueryParams,
    pub field_map: FieldMap,
}

/// Rows returned by the model, with the field map needed to post-process them.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryData {
    pub rows: Vec<Row>,
    pub field_map: FieldMap,
}

/// Everything one request accumulates on its way through the pipeline.
///
/// The request itself is read-only; each stage fills the slot it produces.
#[derive(Debug, Clone)]
pub struct QueryContext {
    request: QueryRequest,
    pub state: RequestState,
    /// Working filter, replaced by variable substitution.
    pub filter: Option<Value>,
    pub resolved: Option<ResolvedQuery>,
    pub built: Option<BuiltQuery>,
    pub data: Option<QueryData>,
    /// Response body: set by post-processing or by a cache hit.
    pub body: Option<Value>,
}

impl QueryContext {
    pub fn new(request: QueryRequest, state: RequestState) -> Self {
        Self {
            filter: request.filter.clone(),
            request,
            state,
            resolved: None,
            built: None,
            data: None,
            body: None,
        }
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn resolved(&self) -> QueryResult<&ResolvedQuery> {
        self.resolved
            .as_ref()
            .ok_or(QueryError::MissingStage("parseFieldAndAssociations"))
    }

    pub fn built(&self) -> QueryResult<&BuiltQuery> {
        self.built.as_ref().ok_or(QueryError::MissingStage("parseBuilder"))
    }

    pub fn take_data(&mut self) -> QueryResult<QueryData> {
        self.data.take().ok_or(QueryError::MissingStage("queryData"))
    }
}
