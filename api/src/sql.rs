//! Direct SQL access over a single tokio-postgres connection per operation.

use std::pin::pin;

use futures::TryStreamExt;
use log::{debug, error};
use tokio::task::JoinHandle;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};

use uuid::Uuid;

use crate::types::MyEntity;

pub const SELECT_ALL: &str = r#"SELECT * FROM "MyEntities""#;
pub const DELETE_ALL: &str = r#"DELETE FROM "MyEntities""#;
pub const INSERT_ONE: &str = r#"INSERT INTO "MyEntities" ("Id", "Name") VALUES ($1, $2)"#;

/// An open driver connection. Dropping it ends the session as well; [`SqlConnection::close`]
/// additionally waits for the background connection task to finish.
pub struct SqlConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl SqlConnection {
    pub async fn open(config: &Config) -> Result<Self, tokio_postgres::Error> {
        let (client, connection) = config.connect(NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("Postgres connection closed with error: {}", err);
            }
        });
        debug!("Opened direct connection");
        Ok(Self { client, driver })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Drops the client, which terminates the session, then waits for the
    /// connection task to wind down.
    pub async fn close(self) {
        let Self { client, driver } = self;
        drop(client);
        if let Err(err) = driver.await {
            error!("Postgres connection task failed: {}", err);
        }
        debug!("Closed direct connection");
    }
}

/// Maps one result row by column name. A missing `Id` or `Name` column, or a
/// non-text value in either, is an error.
pub fn entity_from_row(row: &Row) -> Result<MyEntity, tokio_postgres::Error> {
    Ok(MyEntity {
        id: row.try_get("Id")?,
        name: row.try_get("Name")?,
    })
}

/// Streams `SELECT *` and builds the entities one row at a time.
pub async fn read_all(connection: &SqlConnection) -> Result<Vec<MyEntity>, tokio_postgres::Error> {
    let no_params: [&(dyn ToSql + Sync); 0] = [];
    let rows = connection.client().query_raw(SELECT_ALL, no_params).await?;
    let mut rows = pin!(rows);

    let mut records = Vec::new();
    while let Some(row) = rows.try_next().await? {
        records.push(entity_from_row(&row)?);
    }
    Ok(records)
}

pub async fn delete_all(connection: &SqlConnection) -> Result<u64, tokio_postgres::Error> {
    connection.client().execute(DELETE_ALL, &[]).await
}

/// Inserts `count` generated rows one statement at a time. The statement is
/// prepared once; the two parameter buffers are overwritten for every row.
pub async fn insert_each(
    connection: &SqlConnection,
    count: usize,
) -> Result<u64, tokio_postgres::Error> {
    let statement = connection
        .client()
        .prepare_typed(INSERT_ONE, &[Type::VARCHAR, Type::VARCHAR])
        .await?;

    let mut id = String::with_capacity(36);
    let mut name = String::new();
    let mut inserted = 0;
    for index in 0..count {
        id.clear();
        id.push_str(Uuid::new_v4().hyphenated().encode_lower(&mut Uuid::encode_buffer()));
        name.clear();
        name.push_str("Entity ");
        name.push_str(&index.to_string());

        inserted += connection.client().execute(&statement, &[&id, &name]).await?;
    }
    Ok(inserted)
}
