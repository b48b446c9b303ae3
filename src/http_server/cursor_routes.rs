//! Query execution and explain routes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Map, Value};

use crate::exec::QueryOptions;

use super::server::AppState;
use super::{error_response, status_for};

pub fn cursor_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/_api/cursor", post(execute))
        .route("/_api/explain", post(explain))
        .with_state(state)
}

fn request_parts(body: &Value) -> (Option<&str>, Map<String, Value>, QueryOptions) {
    let query = body.get("query").and_then(Value::as_str);
    let bind_vars = body
        .get("bindVars")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let options = body
        .get("options")
        .map(QueryOptions::from_value)
        .unwrap_or_default();
    (query, bind_vars, options)
}

async fn execute(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let (query, bind_vars, options) = request_parts(&body);
    let Some(query) = query else {
        return error_response(
            StatusCode::BAD_REQUEST,
            crate::errors::ErrorCode::QueryParse,
            "query attribute is required",
        );
    };
    match state.engine.execute(query, &bind_vars, &options) {
        Ok(result) => {
            let mut out = result.to_value();
            out["error"] = Value::from(false);
            out["code"] = Value::from(201);
            (StatusCode::CREATED, Json(out)).into_response()
        }
        Err(e) => error_response(status_for(e.code), e.code, e.message),
    }
}

async fn explain(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let (query, bind_vars, options) = request_parts(&body);
    let Some(query) = query else {
        return error_response(
            StatusCode::BAD_REQUEST,
            crate::errors::ErrorCode::QueryParse,
            "query attribute is required",
        );
    };
    match state.engine.explain(query, &bind_vars, &options) {
        Ok(mut out) => {
            out["error"] = Value::from(false);
            out["code"] = Value::from(200);
            Json(out).into_response()
        }
        Err(e) => error_response(status_for(e.code), e.code, e.message),
    }
}
