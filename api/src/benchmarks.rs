//! The benchmark operations, one function per endpoint. Handlers time these;
//! the functions themselves only move data.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{DatabaseConnection, DbErr};
use tokio::runtime::Handle;
use tokio_postgres::Config;

use crate::bulk::{BulkCopy, DataTable};
use crate::context::EntityContext;
use crate::error::BenchError;
use crate::sql::{self, SqlConnection};
use crate::types::{generate_entities, MyEntity, TABLE_NAME};

/// Rows generated by every insert benchmark.
pub const INSERT_COUNT: usize = 500;
/// Rows added to the context between two `save_changes` calls.
pub const MAPPED_BATCH_SIZE: usize = 100;
pub const BULK_COPY_BATCH_SIZE: usize = 120;
pub const BULK_COPY_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn mapped_read_all(db: &Arc<DatabaseConnection>) -> Result<Vec<MyEntity>, DbErr> {
    EntityContext::new(Arc::clone(db)).to_list().await
}

/// Runs the mapped read on another task and parks the current worker thread
/// until it finishes. Must be called from a multi-threaded runtime.
pub fn mapped_read_all_blocking(db: Arc<DatabaseConnection>) -> Result<Vec<MyEntity>, BenchError> {
    let task = tokio::spawn(async move { EntityContext::new(db).to_list().await });
    let records = tokio::task::block_in_place(|| Handle::current().block_on(task))??;
    Ok(records)
}

pub async fn raw_read_all(config: &Config) -> Result<Vec<MyEntity>, BenchError> {
    let connection = SqlConnection::open(config).await?;
    let records = sql::read_all(&connection).await;
    connection.close().await;
    Ok(records?)
}

/// Loads the whole table into a context, removes every entity and flushes once.
pub async fn mapped_remove_all(db: &Arc<DatabaseConnection>) -> Result<u64, DbErr> {
    let mut context = EntityContext::new(Arc::clone(db));
    let all = context.to_list().await?;
    context.remove_range(&all);
    context.save_changes().await
}

pub async fn raw_remove_all(config: &Config) -> Result<u64, BenchError> {
    let connection = SqlConnection::open(config).await?;
    let deleted = sql::delete_all(&connection).await;
    connection.close().await;
    Ok(deleted?)
}

/// Adds `count` generated entities in batches of `batch_size`, saving after
/// each batch, and returns the number of saves. There is no surrounding
/// transaction: when a save fails, earlier batches stay committed.
pub async fn mapped_insert(
    context: &mut EntityContext,
    count: usize,
    batch_size: usize,
) -> Result<usize, DbErr> {
    let entities = generate_entities(count);
    context.set_auto_detect_changes(false);

    let mut saves = 0;
    for batch in entities.chunks(batch_size.max(1)) {
        context.add_range(batch.iter().cloned());
        context.save_changes().await?;
        saves += 1;
    }
    Ok(saves)
}

pub async fn raw_insert(config: &Config, count: usize) -> Result<u64, BenchError> {
    let connection = SqlConnection::open(config).await?;
    let inserted = sql::insert_each(&connection, count).await;
    connection.close().await;
    Ok(inserted?)
}

pub async fn raw_bulk_insert(config: &Config, count: usize) -> Result<u64, BenchError> {
    let entities = generate_entities(count);
    let connection = SqlConnection::open(config).await?;

    let table = DataTable::from_entities(&entities);
    let bulk_copy = BulkCopy::new(TABLE_NAME)
        .column_mapping("Id", "Id")
        .column_mapping("Name", "Name")
        .batch_size(BULK_COPY_BATCH_SIZE)
        .timeout(BULK_COPY_TIMEOUT);
    let copied = bulk_copy.write_to_server(&connection, &table).await;

    connection.close().await;
    copied
}
