//! Micro-benchmark service comparing mapped (sea-orm) and direct (tokio-postgres)
//! data access against one PostgreSQL table.
//!
//! Every endpoint under `/api/Benchmark` performs exactly one operation with
//! one strategy. Reads return the rows as JSON; deletes and inserts return
//! `Execution time: {ms}ms` as plain text.

pub mod benchmarks;
pub mod bulk;
pub mod context;
pub mod error;
pub mod helpers;
pub mod routes;
pub mod sql;
pub mod types;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sea_orm::DatabaseConnection;

pub const ROUTE_PREFIX: &str = "/api/Benchmark";

/// Handles shared by all requests: the sea-orm pool for mapped access and the
/// driver configuration used to open one direct connection per request.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub sql: tokio_postgres::Config,
}

impl AppState {
    pub fn new(db: impl Into<Arc<DatabaseConnection>>, sql: tokio_postgres::Config) -> Self {
        Self { db: db.into(), sql }
    }
}

pub fn app(state: AppState) -> Router {
    let benchmark = Router::new()
        .route("/GetAll", get(routes::get_all))
        .route("/GetAllv2", get(routes::get_all_v2))
        .route("/GetAllADO", get(routes::get_all_ado))
        .route("/RemoveAllEF", post(routes::remove_all_ef))
        .route("/RemoveAllADO", post(routes::remove_all_ado))
        .route("/EF", post(routes::insert_ef))
        .route("/ADO", post(routes::insert_ado))
        .route("/ADOBulk", post(routes::insert_ado_bulk));

    Router::new()
        .nest(ROUTE_PREFIX, benchmark)
        .with_state(state)
}
