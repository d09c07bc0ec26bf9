use thiserror::Error;

use crate::ancestry::{Ancestry, Comparison};

/// Errors returned by the closure-table APIs.
#[derive(Debug, Error)]
pub enum ClosureTreeError {
    #[error("closure-table supports PostgreSQL and SQLite connections only")]
    UnsupportedBackend,

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("statement error: {0}")]
    Query(#[from] sea_orm::sea_query::error::Error),

    #[error("path cannot be empty")]
    EmptyPath,

    #[error("closure-table invariant violation: {0}")]
    Invariant(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown column `{0}`")]
    ColumnNotFound(String),

    #[error("{ancestry} only supports equality, got {comparison}")]
    UnsupportedCondition {
        ancestry: Ancestry,
        comparison: Comparison,
    },

    #[error("moving node {node} under {parent} would make it its own ancestor")]
    Cycle { node: String, parent: String },

    #[error("node {0} has no closure entry")]
    NotFound(String),
}

impl ClosureTreeError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::InvalidArgument(detail.into())
    }

    pub(crate) fn not_found(id: &impl std::fmt::Debug) -> Self {
        Self::NotFound(format!("{id:?}"))
    }

    pub(crate) fn cycle(node: &impl std::fmt::Debug, parent: &impl std::fmt::Debug) -> Self {
        Self::Cycle {
            node: format!("{node:?}"),
            parent: format!("{parent:?}"),
        }
    }
}
