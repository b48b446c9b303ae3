//! HTTP surface.
//!
//! Thin axum routes over the engine, the coordinator and the agency; all
//! error responses share the canonical body
//! `{error, code, errorNum, errorMessage}`.

mod agency_routes;
mod cluster_routes;
mod cursor_routes;
mod server;

pub use server::{AppState, HttpServer};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::errors::{ErrorBody, ErrorCode};

/// Canonical error response.
pub(crate) fn error_response(
    status: StatusCode,
    code: ErrorCode,
    message: impl Into<String>,
) -> Response {
    let body = ErrorBody::new(status.as_u16(), code, message);
    (status, Json(body)).into_response()
}

/// HTTP status a query error maps to.
pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::QueryParse
        | ErrorCode::QueryBindParameterMissing
        | ErrorCode::QueryBindParameterUnused
        | ErrorCode::QueryForcedIndexHintUnusable
        | ErrorCode::QueryInvalidOptionsAttribute
        | ErrorCode::ClusterMustNotSpecifyKey
        | ErrorCode::ClusterMustNotChangeShardingAttributes
        | ErrorCode::DocumentKeyBad
        | ErrorCode::HttpBadParameter => StatusCode::BAD_REQUEST,
        ErrorCode::DataSourceNotFound | ErrorCode::DocumentNotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict | ErrorCode::UniqueConstraintViolated => StatusCode::CONFLICT,
        ErrorCode::QueryKilled => StatusCode::GONE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
