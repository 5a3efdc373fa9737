//! Catalog error types.

use thiserror::Error;

use crate::catalog::store::StoreError;
use crate::observability::ReportableError;

/// Failure of a catalog operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    /// Input rejected before reaching the store.
    #[error("{0}")]
    Validation(String),

    /// Operation refused in the current state.
    #[error("{0}")]
    InvalidOperation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReportableError for CatalogError {
    fn error_type(&self) -> &'static str {
        match self {
            CatalogError::Validation(_) => "ValidationError",
            CatalogError::InvalidOperation(_) => "InvalidOperationException",
            CatalogError::Store(e) => e.error_type(),
        }
    }
}
