//! Error types for the chart query pipeline.

use thiserror::Error;

use crate::cache::CacheError;
use crate::filter::FilterError;

/// Errors raised by pipeline stages and their collaborators.
///
/// No stage recovers from another stage's error: the orchestrator maps it
/// once into a [`crate::pipeline::QueryFailure`].
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("No permissions")]
    Forbidden,

    #[error("Invalid aggregation function: {0}")]
    InvalidAggregation(String),

    #[error("Invalid field reference: {0}")]
    InvalidField(String),

    #[error("Collection not found: {0}")]
    UnknownCollection(String),

    #[error("Association '{association}' not found on collection '{collection}'")]
    UnknownAssociation {
        collection: String,
        association: String,
    },

    #[error("Data source not found: {0}")]
    UnknownDataSource(String),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Variable error: {0}")]
    Variable(String),

    #[error("{0}")]
    Execution(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A stage ran before the stage that produces its input.
    #[error("Pipeline stage '{0}' has not run")]
    MissingStage(&'static str),
}

impl QueryError {
    /// HTTP-style status for this error: 403 for permission denials, 500 otherwise.
    pub fn status(&self) -> u16 {
        match self {
            QueryError::Forbidden => 403,
            _ => 500,
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Execution(err.to_string())
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
