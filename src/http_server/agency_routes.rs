//! Agency routes under `/_api/agency`.
//!
//! A node that is not the current leader answers 307 with the leader's
//! endpoint in the Location header; callers (our `AgencyClient` included)
//! follow it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::agency::AgencyError;
use crate::errors::ErrorCode;

use super::server::AppState;
use super::error_response;

pub fn agency_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/read", post(read))
        .route("/write", post(write))
        .route("/transact", post(transact))
        .with_state(state)
}

fn handle(state: &AppState, action: &str, body: &Value) -> Response {
    if !state.agency.is_leader(&state.node_endpoint) {
        return (
            StatusCode::TEMPORARY_REDIRECT,
            [(header::LOCATION, state.agency.leader())],
        )
            .into_response();
    }
    match state.agency.handle(action, body) {
        Ok(result) => Json(result).into_response(),
        Err(AgencyError::PreconditionFailed) => error_response(
            StatusCode::PRECONDITION_FAILED,
            ErrorCode::Conflict,
            "precondition failed",
        ),
        Err(AgencyError::Malformed(message)) => {
            error_response(StatusCode::BAD_REQUEST, ErrorCode::HttpBadParameter, message)
        }
        Err(other) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            other.to_string(),
        ),
    }
}

async fn read(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    handle(&state, "read", &body)
}

async fn write(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    handle(&state, "write", &body)
}

async fn transact(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    handle(&state, "transact", &body)
}
