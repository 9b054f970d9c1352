//! Domain errors for payment collection and reconciliation.

use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// Missing or malformed required input.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// An order with the gateway-assigned identifier already exists.
    #[error("Order {0} already exists")]
    Duplicate(String),

    /// The payment gateway could not be reached or answered with an error.
    #[error("Payment gateway error: {0}")]
    Upstream(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl PaymentError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<mongodb::error::Error> for PaymentError {
    fn from(err: mongodb::error::Error) -> Self {
        PaymentError::Persistence(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for PaymentError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        PaymentError::Persistence(format!("failed to encode document: {}", err))
    }
}

impl From<mongodb::bson::de::Error> for PaymentError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        PaymentError::Persistence(format!("failed to decode document: {}", err))
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            PaymentError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            PaymentError::Duplicate(id) => {
                AppError::Conflict(anyhow::anyhow!("Order {} already exists", id))
            }
            PaymentError::Upstream(msg) => AppError::BadGateway(anyhow::anyhow!(msg)),
            PaymentError::Persistence(msg) => AppError::DatabaseError(anyhow::anyhow!(msg)),
        }
    }
}

pub type Result<T, E = PaymentError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn maps_taxonomy_onto_http_status() {
        let cases = [
            (PaymentError::validation("missing"), StatusCode::BAD_REQUEST),
            (PaymentError::not_found("gone"), StatusCode::NOT_FOUND),
            (PaymentError::Duplicate("abc".into()), StatusCode::CONFLICT),
            (PaymentError::Upstream("timeout".into()), StatusCode::BAD_GATEWAY),
            (
                PaymentError::Persistence("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status_code(), expected);
        }
    }
}
