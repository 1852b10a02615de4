//! Consistent response envelope for all API endpoints.
//!
//! Every response is wrapped in either [`ApiResponse`] (success) or
//! [`ApiErrorResponse`] (error), ensuring a uniform JSON shape. Engine
//! errors convert directly into responses, so handlers just use `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::error::EngineError;

/// Metadata included in every response.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: "1",
        }
    }
}

/// Successful response: `{ "data": T, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Response {
        Self::with_status(StatusCode::CREATED, data)
    }

    fn with_status(status: StatusCode, data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Error detail inside [`ApiErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Error response: `{ "error": { "code": "...", "message": "..." }, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    pub fn build(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
        let body = Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
            },
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// HTTP status for each error kind.
fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Validation(_)
        | EngineError::VolunteerBusy
        | EngineError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        EngineError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyActive { .. }
        | EngineError::AlreadyTaken
        | EngineError::DuplicateEmail(_) => StatusCode::CONFLICT,
        EngineError::Provider(_) => StatusCode::BAD_GATEWAY,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Do not leak storage internals to callers.
            tracing::error!(error = %self, "internal error");
            return ApiErrorResponse::build(status, self.code(), "Internal error");
        }
        ApiErrorResponse::build(status, self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertStatus;

    #[tokio::test]
    async fn test_ok_response_shape() {
        let resp = ApiResponse::ok(serde_json::json!({"hello": "world"}));
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(v.get("data").is_some());
        assert!(v.get("meta").is_some());
        assert_eq!(v["meta"]["version"], "1");
    }

    #[tokio::test]
    async fn test_engine_error_mapping() {
        let cases: Vec<(EngineError, StatusCode, &str)> = vec![
            (
                EngineError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
                "VALIDATION",
            ),
            (
                EngineError::Unauthenticated("no token".into()),
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
            ),
            (
                EngineError::AlreadyTaken,
                StatusCode::CONFLICT,
                "ALREADY_TAKEN",
            ),
            (
                EngineError::VolunteerBusy,
                StatusCode::BAD_REQUEST,
                "VOLUNTEER_BUSY",
            ),
            (
                EngineError::InvalidTransition {
                    action: "resolve",
                    status: AlertStatus::Searching,
                },
                StatusCode::BAD_REQUEST,
                "INVALID_TRANSITION",
            ),
            (
                EngineError::Provider("down".into()),
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let resp = err.into_response();
            assert_eq!(resp.status(), status);
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(v["error"]["code"], code);
        }
    }

    #[tokio::test]
    async fn test_internal_errors_are_opaque() {
        let resp = EngineError::Storage("sled exploded at /secret/path".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["error"]["message"], "Internal error");
    }
}
