//! Router assembly and server startup.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agency::LocalAgency;
use crate::catalog::Database;
use crate::cluster::ClusterCoordinator;
use crate::config::ServerConfig;
use crate::exec::QueryEngine;
use crate::observability::Logger;
use crate::replication::ApplierRegistry;

use super::agency_routes::agency_routes;
use super::cluster_routes::cluster_routes;
use super::cursor_routes::cursor_routes;

/// Shared state behind every route.
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub coordinator: Arc<ClusterCoordinator>,
    pub agency: Arc<LocalAgency>,
    /// The agency endpoint this process answers as; requests landing here
    /// while another node leads are redirected.
    pub node_endpoint: String,
    pub appliers: Arc<ApplierRegistry>,
}

impl AppState {
    /// One-process deployment: a single agency node that also serves
    /// queries.
    pub fn single_node(config: &ServerConfig, database: Arc<Database>) -> Arc<Self> {
        let agency = Arc::new(LocalAgency::single());
        let node_endpoint = agency.leader();
        let coordinator = ClusterCoordinator::new(agency.client());
        coordinator
            .register_server(&config.server_id, &config.short_name)
            .expect("registering the local server cannot fail on a fresh agency");
        Arc::new(Self {
            engine: Arc::new(QueryEngine::new(database)),
            coordinator,
            agency,
            node_endpoint,
            appliers: Arc::new(ApplierRegistry::new()),
        })
    }
}

pub struct HttpServer {
    bind: String,
    router: Router,
}

impl HttpServer {
    pub fn new(bind: impl Into<String>, state: Arc<AppState>) -> Self {
        Self {
            bind: bind.into(),
            router: build_router(state),
        }
    }

    /// The router alone, for in-process tests.
    pub fn router(self) -> Router {
        self.router
    }

    pub async fn serve(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.bind).await?;
        Logger::info("http.listening", &[("bind", &self.bind)]);
        axum::serve(listener, self.router).await
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/_admin/cluster", cluster_routes(Arc::clone(&state)))
        .nest("/_api/agency", agency_routes(Arc::clone(&state)))
        .merge(cursor_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
