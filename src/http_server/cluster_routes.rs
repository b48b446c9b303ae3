//! Cluster administration routes under `/_admin/cluster`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::cluster::{MoveShardJob, RebalanceOptions};
use crate::errors::ErrorCode;

use super::server::AppState;
use super::{error_response, status_for};

pub fn cluster_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/shardDistribution", get(shard_distribution))
        .route("/rebalance", get(rebalance_status).post(rebalance_compute))
        .route("/rebalance/execute", post(rebalance_execute))
        .route("/cleanOutServer", post(clean_out_server))
        .route("/queryAgencyJob", get(query_agency_job))
        .route("/health", get(health))
        .with_state(state)
}

fn cluster_error(e: crate::cluster::ClusterError) -> Response {
    error_response(status_for(e.code()), e.code(), e.to_string())
}

async fn shard_distribution(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let database = params
        .get("database")
        .map(String::as_str)
        .unwrap_or("_system");
    match state.coordinator.shard_distribution(database) {
        Ok(results) => Json(results).into_response(),
        Err(e) => cluster_error(e),
    }
}

async fn rebalance_status(State(state): State<Arc<AppState>>) -> Response {
    match state.coordinator.job_counts() {
        Ok((todo, pending)) => Json(json!({
            "error": false,
            "code": 200,
            "result": {
                "pendingMoveShards": pending,
                "todoMoveShards": todo,
            },
        }))
        .into_response(),
        Err(e) => cluster_error(e),
    }
}

async fn rebalance_compute(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let options: RebalanceOptions = match serde_json::from_value(body) {
        Ok(options) => options,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorCode::HttpBadParameter,
                e.to_string(),
            )
        }
    };
    if options.version != 1 {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::HttpBadParameter,
            "rebalance version must be 1",
        );
    }
    match state.coordinator.compute_rebalance(&options) {
        Ok(plan) => Json(json!({
            "error": false,
            "code": 200,
            "result": {
                "moves": plan.moves.iter().map(MoveShardJob::to_value).collect::<Vec<_>>(),
                "pendingMoveShards": plan.pending_move_shards,
                "todoMoveShards": plan.todo_move_shards,
            },
        }))
        .into_response(),
        Err(e) => cluster_error(e),
    }
}

async fn rebalance_execute(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    if body.get("version").and_then(Value::as_u64) != Some(1) {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::HttpBadParameter,
            "rebalance version must be 1",
        );
    }
    let moves: Vec<MoveShardJob> = body
        .get("moves")
        .and_then(Value::as_array)
        .map(|moves| moves.iter().filter_map(MoveShardJob::from_value).collect())
        .unwrap_or_default();

    if moves.is_empty() {
        // nothing to do
        return (
            StatusCode::OK,
            Json(json!({"error": false, "code": 200})),
        )
            .into_response();
    }
    match state.coordinator.execute_moves(moves) {
        // work queued; poll /rebalance for convergence
        Ok(ids) => (
            StatusCode::ACCEPTED,
            Json(json!({"error": false, "code": 202, "ids": ids})),
        )
            .into_response(),
        Err(e) => cluster_error(e),
    }
}

async fn clean_out_server(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(server) = body.get("server").and_then(Value::as_str) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::HttpBadParameter,
            "body must carry a server id",
        );
    };
    match state.coordinator.clean_out_server(server) {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(json!({"error": false, "code": 202, "id": id})),
        )
            .into_response(),
        Err(e) => cluster_error(e),
    }
}

async fn query_agency_job(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(id) = params.get("id") else {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::HttpBadParameter,
            "id query parameter is required",
        );
    };
    match state.coordinator.query_agency_job(id) {
        Ok(job) => Json(job).into_response(),
        Err(e) => cluster_error(e),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.coordinator.health_value() {
        Ok(mut health) => {
            health["error"] = json!(false);
            health["code"] = json!(200);
            Json(health).into_response()
        }
        Err(e) => cluster_error(e),
    }
}
