//! API error types with HTTP status code mapping.
//!
//! [`ApiError`] is the central error type of the HTTP layer. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::service::{IngestError, PaymentError};

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: body of 70000 bytes exceeds the 65536 byte limit",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server          | 500 / 502                    |
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Order with the given ID was not found.
    #[error("order not found: {0}")]
    OrderNotFound(uuid::Uuid),

    /// The order is not in a state that allows the operation.
    #[error("order state conflict: {0}")]
    OrderConflict(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The payment gateway failed.
    #[error("payment gateway error: {0}")]
    UpstreamError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::OrderNotFound(_) => 2001,
            Self::OrderConflict(_) => 2002,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::UpstreamError(_) => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::OrderConflict(_) => StatusCode::CONFLICT,
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamError(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Malformed(e) => Self::InvalidRequest(e.to_string()),
            IngestError::NotRecorded(e) => Self::PersistenceError(e.to_string()),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::OrderNotFound(id) => Self::OrderNotFound(id.into()),
            PaymentError::NotAwaitingPayment(_) => Self::OrderConflict(err.to_string()),
            PaymentError::NoItems
            | PaymentError::InvalidDocument(_)
            | PaymentError::InvalidAmount(_)
            | PaymentError::TotalMismatch { .. }
            | PaymentError::MissingTicketType(_) => Self::InvalidRequest(err.to_string()),
            PaymentError::Store(e) => Self::PersistenceError(e.to_string()),
            PaymentError::Gateway(e) => Self::UpstreamError(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderId;
    use crate::persistence::StoreError;

    #[test]
    fn malformed_webhook_is_bad_request() {
        let err: ApiError = IngestError::Malformed(
            crate::domain::notification::MalformedNotification::EmptyField("id"),
        )
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), 1001);
    }

    #[test]
    fn unrecorded_webhook_is_server_error() {
        let err: ApiError =
            IngestError::NotRecorded(StoreError::Unavailable("down".to_string())).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn payment_errors_map_to_statuses() {
        let not_found: ApiError = PaymentError::OrderNotFound(OrderId::new()).into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let conflict: ApiError =
            PaymentError::NotAwaitingPayment(crate::domain::OrderStatus::Paid).into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let document: ApiError = PaymentError::InvalidDocument(9).into();
        assert_eq!(document.status_code(), StatusCode::BAD_REQUEST);
    }
}
