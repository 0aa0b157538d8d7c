//! In-memory tables and server-side bulk loading through binary `COPY`.

use std::pin::pin;
use std::time::Duration;

use log::debug;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};

use crate::error::BenchError;
use crate::sql::SqlConnection;
use crate::types::{ID_COLUMN, MyEntity, NAME_COLUMN};

#[derive(Debug, Clone, PartialEq)]
pub struct DataColumn {
    pub name: String,
    pub ty: Type,
}

/// Column definitions plus rows of text cells, in column order.
#[derive(Debug, Default, Clone)]
pub struct DataTable {
    columns: Vec<DataColumn>,
    rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the `Id`/`Name` table that mirrors `"MyEntities"`.
    pub fn from_entities(entities: &[MyEntity]) -> Self {
        let mut table = Self::new();
        table.add_column(ID_COLUMN, Type::VARCHAR);
        table.add_column(NAME_COLUMN, Type::VARCHAR);
        table.rows.reserve(entities.len());
        for entity in entities {
            table.rows.push(vec![entity.id.clone(), entity.name.clone()]);
        }
        table
    }

    pub fn add_column(&mut self, name: &str, ty: Type) {
        self.columns.push(DataColumn {
            name: name.to_string(),
            ty,
        });
    }

    /// Appends a row; the number of cells must match the number of columns.
    pub fn add_row(&mut self, cells: Vec<String>) -> Result<(), BenchError> {
        if cells.len() != self.columns.len() {
            return Err(BenchError::BulkCopy(format!(
                "row has {} values but the table has {} columns",
                cells.len(),
                self.columns.len()
            )));
        }
        self.rows.push(cells);
        Ok(())
    }

    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }
}

/// Source column index and its type, in destination column order.
type CopyPlan = Vec<(usize, Type)>;

/// Streams a [`DataTable`] into a destination table.
///
/// Rows are sent in batches of `batch_size`, one `COPY ... FROM STDIN` per
/// batch. There is no surrounding transaction: every batch commits as soon as
/// its `COPY` completes, so batches sent before a failure stay in the table.
#[derive(Debug, Clone)]
pub struct BulkCopy {
    destination_table: String,
    column_mappings: Vec<(String, String)>,
    batch_size: usize,
    timeout: Duration,
}

impl BulkCopy {
    pub fn new(destination_table: &str) -> Self {
        Self {
            destination_table: destination_table.to_string(),
            column_mappings: Vec::new(),
            batch_size: 0,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn column_mapping(mut self, source: &str, destination: &str) -> Self {
        self.column_mappings
            .push((source.to_string(), destination.to_string()));
        self
    }

    /// Rows per `COPY`. Zero sends the whole table as one batch.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn copy_statement(&self) -> String {
        let columns = self
            .column_mappings
            .iter()
            .map(|(_, destination)| quote_identifier(destination))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "COPY {} ({}) FROM STDIN (FORMAT binary)",
            quote_identifier(&self.destination_table),
            columns
        )
    }

    fn plan(&self, table: &DataTable) -> Result<CopyPlan, BenchError> {
        if self.column_mappings.is_empty() {
            return Err(BenchError::BulkCopy("no column mappings".to_string()));
        }
        self.column_mappings
            .iter()
            .map(|(source, _)| {
                table
                    .column_index(source)
                    .map(|index| (index, table.columns[index].ty.clone()))
                    .ok_or_else(|| {
                        BenchError::BulkCopy(format!("source column {} does not exist", source))
                    })
            })
            .collect()
    }

    /// Loads every row of `table` and returns the number of rows copied. The
    /// first failing batch ends the load with its error.
    pub async fn write_to_server(
        &self,
        connection: &SqlConnection,
        table: &DataTable,
    ) -> Result<u64, BenchError> {
        let plan = self.plan(table)?;
        let types: Vec<Type> = plan.iter().map(|(_, ty)| ty.clone()).collect();
        let statement = self.copy_statement();
        let batch_size = if self.batch_size == 0 {
            table.len().max(1)
        } else {
            self.batch_size
        };

        let load = async {
            let mut copied = 0;
            for batch in table.rows().chunks(batch_size) {
                let sink = connection.client().copy_in(statement.as_str()).await?;
                let mut writer = pin!(BinaryCopyInWriter::new(sink, &types));
                for row in batch {
                    let values: Vec<&(dyn ToSql + Sync)> = plan
                        .iter()
                        .map(|(index, _)| &row[*index] as &(dyn ToSql + Sync))
                        .collect();
                    writer.as_mut().write(&values).await?;
                }
                copied += writer.as_mut().finish().await?;
                debug!("Bulk copy batch done ({} rows so far)", copied);
            }
            Ok::<u64, tokio_postgres::Error>(copied)
        };

        match tokio::time::timeout(self.timeout, load).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BenchError::BulkCopyTimeout(self.timeout)),
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::generate_entities;

    fn entity_copy() -> BulkCopy {
        BulkCopy::new("MyEntities")
            .column_mapping("Id", "Id")
            .column_mapping("Name", "Name")
    }

    #[test]
    fn table_from_entities_keeps_order_and_columns() {
        let entities = generate_entities(3);
        let table = DataTable::from_entities(&entities);

        let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Id", "Name"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[2], vec![entities[2].id.clone(), "Entity 2".to_string()]);
    }

    #[test]
    fn add_row_rejects_wrong_arity() {
        let mut table = DataTable::new();
        table.add_column("Id", Type::VARCHAR);
        table.add_column("Name", Type::VARCHAR);

        assert!(table.add_row(vec!["only-id".to_string()]).is_err());
        assert!(table
            .add_row(vec!["id".to_string(), "name".to_string()])
            .is_ok());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn copy_statement_lists_destination_columns() {
        assert_eq!(
            entity_copy().copy_statement(),
            r#"COPY "MyEntities" ("Id", "Name") FROM STDIN (FORMAT binary)"#
        );
    }

    #[test]
    fn plan_follows_mapping_order() {
        let table = DataTable::from_entities(&generate_entities(1));
        let copy = BulkCopy::new("MyEntities")
            .column_mapping("Name", "Name")
            .column_mapping("Id", "Id");

        let plan = copy.plan(&table).unwrap();

        assert_eq!(plan, vec![(1, Type::VARCHAR), (0, Type::VARCHAR)]);
    }

    #[test]
    fn plan_rejects_unknown_source_column() {
        let table = DataTable::from_entities(&generate_entities(1));
        let copy = entity_copy().column_mapping("Missing", "Missing");

        let err = copy.plan(&table).unwrap_err();

        assert!(err.to_string().contains("Missing"));
    }

    #[test]
    fn plan_requires_mappings() {
        let table = DataTable::from_entities(&generate_entities(1));
        assert!(BulkCopy::new("MyEntities").plan(&table).is_err());
    }

    #[test]
    fn identifiers_escape_embedded_quotes() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
