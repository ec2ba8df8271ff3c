//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: msg.into(),
        }
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "code": self.status.as_u16()
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<lector_core::Error> for ApiError {
    fn from(err: lector_core::Error) -> Self {
        use lector_core::Error;

        match &err {
            Error::EmptyInput | Error::ExtractionError(_) => ApiError::unprocessable(err.to_string()),
            Error::UnknownJob(_) => ApiError::not_found(err.to_string()),
            Error::JobNotReady(_) => ApiError::conflict(err.to_string()),
            Error::CapacityExceeded(_) => ApiError::service_unavailable(err.to_string()),
            Error::ConfigError(_) => ApiError::bad_request(err.to_string()),
            _ => ApiError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lector_core::Error;

    #[test]
    fn test_core_error_mapping() {
        let cases = [
            (Error::EmptyInput, StatusCode::UNPROCESSABLE_ENTITY),
            (
                Error::ExtractionError("scanned pdf".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (Error::UnknownJob("x".into()), StatusCode::NOT_FOUND),
            (Error::JobNotReady("x".into()), StatusCode::CONFLICT),
            (Error::CapacityExceeded(8), StatusCode::SERVICE_UNAVAILABLE),
            (Error::ConfigError("bad".into()), StatusCode::BAD_REQUEST),
            (
                Error::SynthesisError("500".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }
}
