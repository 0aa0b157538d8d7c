use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use thiserror::Error;

/// Everything a benchmark endpoint can fail with.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("mapped query failed: {0}")]
    Orm(#[from] sea_orm::DbErr),

    #[error("sql command failed: {0}")]
    Sql(#[from] tokio_postgres::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("bulk copy rejected: {0}")]
    BulkCopy(String),

    #[error("bulk copy did not finish within {}s", .0.as_secs())]
    BulkCopyTimeout(Duration),
}

impl IntoResponse for BenchError {
    /// Logs the failure and answers with a bare 500; callers get no error body.
    fn into_response(self) -> Response {
        error!("Benchmark request failed: {}", self);
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}
