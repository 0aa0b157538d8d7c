use axum::{extract::State, Json};
use bench_core::Stopwatch;
use log::info;

use crate::benchmarks;
use crate::context::EntityContext;
use crate::error::BenchError;
use crate::types::MyEntity;
use crate::AppState;

/// Returns every entity, read through the mapped context.
///
/// # Returns
/// * `200` with a JSON array of `{id, name}` objects.
/// * `500` when the query fails.
pub(crate) async fn get_all(
    State(state): State<AppState>,
) -> Result<Json<Vec<MyEntity>>, BenchError> {
    let records = benchmarks::mapped_read_all(&state.db).await?;
    Ok(Json(records))
}

/// Same read as [`get_all`], but the query runs on a spawned task while this
/// handler blocks its worker thread waiting for it.
pub(crate) async fn get_all_v2(
    State(state): State<AppState>,
) -> Result<Json<Vec<MyEntity>>, BenchError> {
    let records = benchmarks::mapped_read_all_blocking(state.db.clone())?;
    Ok(Json(records))
}

/// Returns every entity, read with a hand-written `SELECT *` over a fresh
/// driver connection.
pub(crate) async fn get_all_ado(
    State(state): State<AppState>,
) -> Result<Json<Vec<MyEntity>>, BenchError> {
    let records = benchmarks::raw_read_all(&state.sql).await?;
    Ok(Json(records))
}

/// Deletes every row through the mapped context (load, remove, save).
///
/// # Returns
/// * `200` with `Execution time: {ms}ms`.
/// * `500` when loading or saving fails.
pub(crate) async fn remove_all_ef(State(state): State<AppState>) -> Result<String, BenchError> {
    let stopwatch = Stopwatch::start_new();

    let deleted = benchmarks::mapped_remove_all(&state.db).await?;

    info!(
        "Mapped delete removed {} rows in {}ms",
        deleted,
        stopwatch.elapsed_millis()
    );
    Ok(stopwatch.execution_time_message())
}

/// Deletes every row with one unconditional `DELETE`.
pub(crate) async fn remove_all_ado(State(state): State<AppState>) -> Result<String, BenchError> {
    let stopwatch = Stopwatch::start_new();

    let deleted = benchmarks::raw_remove_all(&state.sql).await?;

    info!(
        "Direct delete removed {} rows in {}ms",
        deleted,
        stopwatch.elapsed_millis()
    );
    Ok(stopwatch.execution_time_message())
}

/// Inserts 500 generated rows through the mapped context in batches of 100.
///
/// # Returns
/// * `200` with `Execution time: {ms}ms`.
/// * `500` when any batch fails; batches saved before the failure remain.
pub(crate) async fn insert_ef(State(state): State<AppState>) -> Result<String, BenchError> {
    let stopwatch = Stopwatch::start_new();

    let mut context = EntityContext::new(state.db.clone());
    let saves = benchmarks::mapped_insert(
        &mut context,
        benchmarks::INSERT_COUNT,
        benchmarks::MAPPED_BATCH_SIZE,
    )
    .await?;

    info!(
        "Mapped insert of {} rows ({} saves) took {}ms",
        benchmarks::INSERT_COUNT,
        saves,
        stopwatch.elapsed_millis()
    );
    Ok(stopwatch.execution_time_message())
}

/// Inserts 500 generated rows, one prepared `INSERT` execution per row.
pub(crate) async fn insert_ado(State(state): State<AppState>) -> Result<String, BenchError> {
    let stopwatch = Stopwatch::start_new();

    let inserted = benchmarks::raw_insert(&state.sql, benchmarks::INSERT_COUNT).await?;

    info!(
        "Direct insert of {} rows took {}ms",
        inserted,
        stopwatch.elapsed_millis()
    );
    Ok(stopwatch.execution_time_message())
}

/// Inserts 500 generated rows with binary `COPY` in batches of 120.
///
/// # Returns
/// * `200` with `Execution time: {ms}ms`.
/// * `500` when a batch fails or the load exceeds 60 seconds; batches copied
///   before that remain.
pub(crate) async fn insert_ado_bulk(State(state): State<AppState>) -> Result<String, BenchError> {
    let stopwatch = Stopwatch::start_new();

    let copied = benchmarks::raw_bulk_insert(&state.sql, benchmarks::INSERT_COUNT).await?;

    info!(
        "Bulk copy of {} rows took {}ms",
        copied,
        stopwatch.elapsed_millis()
    );
    Ok(stopwatch.execution_time_message())
}
