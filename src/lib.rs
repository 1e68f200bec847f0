//! # vizquery
//!
//! Declarative chart queries compiled to SQL and run through a middleware
//! pipeline.
//!
//! ## Architecture
//!
//! A chart posts a [`request::QueryRequest`]: a collection, the measures to
//! aggregate, the dimensions to group by, orders, a filter and a limit.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 QueryRequest + RequestState              │
//! │        (measures, dimensions, filter / role, tz)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [pipeline]
//! ┌─────────────────────────────────────────────────────────┐
//! │  checkPermission → cacheMiddleware → parseVariables →    │
//! │  parseFieldAndAssociations → parseBuilder → queryData →  │
//! │  postProcess                                             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [executor]
//! ┌─────────────────────────────────────────────────────────┐
//! │           SQL per dialect, run by the data source        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//!                [ {alias: value, ...}, ... ]
//! ```

pub mod acl;
pub mod cache;
pub mod config;
pub mod datasource;
pub mod error;
pub mod executor;
pub mod filter;
pub mod formatter;
pub mod params;
pub mod pipeline;
pub mod request;
pub mod schema;
pub mod service;
pub mod sql;
pub mod variables;

#[cfg(feature = "server")]
pub mod web;

pub use error::{QueryError, QueryResult};
pub use pipeline::{QueryFailure, QueryPipeline};
pub use request::{QueryRequest, RequestState};
pub use service::QueryService;
pub use sql::Dialect;
