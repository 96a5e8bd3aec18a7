//! Success envelope shared by every endpoint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::error::ErrorBody;

/// `{ "code", "status", "result", "error" }`
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub status: String,
    pub result: Option<T>,
    pub error: Option<ErrorBody>,
}

/// A successful response. `result` is null when there is nothing to return.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            status: StatusCode::OK,
            result: Some(result),
        }
    }

    /// 200 with a null result when there is no row
    pub fn from_option(result: Option<T>) -> Self {
        Self {
            status: StatusCode::OK,
            result,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            code: self.status.as_u16(),
            status: self
                .status
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            result: self.result,
            error: None,
        };
        (self.status, Json(body)).into_response()
    }
}
