//! Error responses.
//!
//! # Responsibilities
//! - Map catalog errors to HTTP status codes
//! - Render errors as `{error, type}` JSON
//! - Attach the exception for 5xx responses so the inbound span records it
//! - Turn a handler panic into a 500 carrying the panic message
//!
//! # Design Decisions
//! - Absence maps to 404 with no exception attached
//! - Validation failures are 400; everything else is 500

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::any::Any;

use crate::catalog::CatalogError;
use crate::instrumentation::RecordedException;
use crate::observability::ReportableError;

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    NotFound(String),
    BadRequest {
        error_type: &'static str,
        message: String,
    },
    Internal {
        error_type: &'static str,
        message: String,
    },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let (error_type, message) = match self {
            ApiError::NotFound(message) => ("NotFound", message.as_str()),
            ApiError::BadRequest {
                error_type,
                message,
            }
            | ApiError::Internal {
                error_type,
                message,
            } => (*error_type, message.as_str()),
        };
        ErrorBody {
            error: message.to_string(),
            error_type: error_type.to_string(),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        let error_type = err.error_type();
        match err {
            CatalogError::Validation(message) => ApiError::BadRequest {
                error_type,
                message,
            },
            other => ApiError::Internal {
                error_type,
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.body();
        let exception = matches!(self, ApiError::Internal { .. }).then(|| RecordedException {
            error_type: body.error_type.clone(),
            message: body.error.clone(),
        });

        let mut response = (self.status(), Json(body)).into_response();
        if let Some(exception) = exception {
            response.extensions_mut().insert(exception);
        }
        response
    }
}

/// `CatchPanicLayer` handler.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    };
    tracing::error!(panic = %message, "Request handler panicked");

    ApiError::Internal {
        error_type: "panic",
        message,
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_mapping() {
        let err = ApiError::from(CatalogError::Validation("Product name is required".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(CatalogError::InvalidOperation(
            "Simulated error for testing".into(),
        ));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.body(),
            ErrorBody {
                error: "Simulated error for testing".into(),
                error_type: "InvalidOperationException".into(),
            }
        );
    }

    #[test]
    fn test_only_server_errors_carry_exception() {
        let response = ApiError::NotFound("Product 3 not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<RecordedException>().is_none());

        let response = ApiError::Internal {
            error_type: "StoreUnavailable",
            message: "product store unavailable".into(),
        }
        .into_response();
        let exception = response.extensions().get::<RecordedException>().unwrap();
        assert_eq!(exception.error_type, "StoreUnavailable");
    }

    #[test]
    fn test_panic_payload_becomes_exception() {
        let response = panic_response(Box::new("inventory lookup failed"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let exception = response.extensions().get::<RecordedException>().unwrap();
        assert_eq!(exception.error_type, "panic");
        assert_eq!(exception.message, "inventory lookup failed");

        let response = panic_response(Box::new(format!("product {} corrupt", 3)));
        let exception = response.extensions().get::<RecordedException>().unwrap();
        assert_eq!(exception.message, "product 3 corrupt");

        let response = panic_response(Box::new(42_u8));
        let exception = response.extensions().get::<RecordedException>().unwrap();
        assert_eq!(exception.message, "handler panicked");
    }
}
