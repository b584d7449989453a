//! Table synchronizer
//!
//! Brings destination tables in line with the flattened stream schema and
//! loads staged batches into them. A table moves from absent to current by
//! creation, and stays current through added columns and type changes. A
//! type change renames the old column (keeping its data) and adds the new
//! one under the original name; columns are never dropped.

use crate::clock::Clock;
use crate::dialect::{Column, LoadPlan, SqlDialect, TableRef};
use crate::engine::{Row, StatementExecutor};
use crate::error::SinkResult;
use crate::staging::StagedObject;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Differences between the flattened schema and an existing table
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchemaDiff {
    /// Columns added to the table
    pub new_columns: Vec<Column>,
    /// Columns whose catalog type differs: (column, old catalog type)
    pub type_changes: Vec<(Column, String)>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.new_columns.is_empty() && self.type_changes.is_empty()
    }
}

/// Result of bringing a table up to date
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub diff: SchemaDiff,
    /// Catalog columns the batch carries no data for (upper case)
    pub destination_only: Vec<String>,
}

/// Creates, evolves and loads destination tables
pub struct TableSynchronizer {
    executor: Arc<dyn StatementExecutor>,
    dialect: Arc<dyn SqlDialect>,
    clock: Arc<dyn Clock>,
}

impl TableSynchronizer {
    pub fn new(
        executor: Arc<dyn StatementExecutor>,
        dialect: Arc<dyn SqlDialect>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            dialect,
            clock,
        }
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Create the target schema when the catalog doesn't list it
    pub async fn ensure_target_schema(&self, schema: &str) -> SinkResult<()> {
        let rows = self.executor.execute(&self.dialect.show_schemas(schema)).await?;
        if rows.is_empty() {
            let query = self.dialect.create_schema(schema);
            info!("Schema '{}' does not exist. Creating... {}", schema, query);
            self.executor.execute(&query).await?;
        }
        Ok(())
    }

    /// Create the table, or add and version columns until it matches `columns`
    pub async fn ensure_schema(&self, table: &TableRef, columns: &[Column]) -> SinkResult<TableLayout> {
        let qualified = self.dialect.qualified_table(table);

        let exists = !self
            .executor
            .execute(&self.dialect.show_tables(table))
            .await?
            .is_empty();

        if !exists {
            info!("Table {} does not exist. Creating...", qualified);
            self.executor
                .execute(&self.dialect.create_table(table, columns))
                .await?;
            return Ok(TableLayout::default());
        }

        let catalog = self.table_columns(table).await?;
        let diff = self.diff(columns, &catalog);

        for column in &diff.new_columns {
            let query = self.dialect.add_column(table, column);
            info!("Adding column: {}", query);
            self.executor.execute(&query).await?;
        }

        let mut versioned = Vec::new();
        for (column, old_type) in &diff.type_changes {
            let at = self.clock.wall();
            let query = self.dialect.version_column(table, &column.name, at);
            info!(
                "Versioning column {} ({} -> {}): {}",
                column.name, old_type, column.column_type, query
            );
            self.executor.execute(&query).await?;
            versioned.push(self.dialect.versioned_column_name(&column.name, at));

            let query = self.dialect.add_column(table, column);
            info!("Adding column: {}", query);
            self.executor.execute(&query).await?;
        }

        let data_columns: Vec<String> = columns.iter().map(|c| c.name.to_uppercase()).collect();
        let mut destination_only: Vec<String> = catalog
            .keys()
            .filter(|name| !data_columns.contains(name))
            .cloned()
            .collect();
        destination_only.sort();
        for name in versioned {
            if !destination_only.contains(&name) {
                destination_only.push(name);
            }
        }

        if diff.is_empty() {
            debug!("Table {} is up to date", qualified);
        }

        Ok(TableLayout {
            diff,
            destination_only,
        })
    }

    /// Upper-cased column name → catalog type of an existing table
    async fn table_columns(&self, table: &TableRef) -> SinkResult<HashMap<String, String>> {
        let rows = self
            .executor
            .execute(&self.dialect.describe_table(table))
            .await?;
        Ok(describe_columns(&rows))
    }

    fn diff(&self, columns: &[Column], catalog: &HashMap<String, String>) -> SchemaDiff {
        let mut diff = SchemaDiff::default();
        for column in columns {
            match catalog.get(&column.name.to_uppercase()) {
                None => diff.new_columns.push(column.clone()),
                Some(catalog_type) => {
                    if !self.dialect.types_compatible(catalog_type, column.column_type) {
                        diff.type_changes.push((column.clone(), catalog_type.clone()));
                    }
                }
            }
        }
        diff
    }

    /// Load a staged batch through a temporary table over its location
    pub async fn load(
        &self,
        table: &TableRef,
        staged: &StagedObject,
        columns: &[Column],
        key_columns: &[String],
        destination_only: &[String],
    ) -> SinkResult<()> {
        let staging_table = format!("tmp_{}", uuid::Uuid::new_v4().simple());
        self.executor
            .execute(&self.dialect.create_staging_table(
                &staging_table,
                columns,
                &staged.location,
            ))
            .await?;

        let plan = LoadPlan {
            table,
            staging_table: &staging_table,
            columns,
            key_columns,
            destination_only,
        };
        self.executor
            .execute(&self.dialect.load_statement(&plan))
            .await?;

        self.executor
            .execute(&self.dialect.drop_staging_table(&staging_table))
            .await?;
        Ok(())
    }

    /// Physically remove rows flagged as deleted
    pub async fn delete_marked(&self, table: &TableRef) -> SinkResult<()> {
        let query = self.dialect.delete_marked(table);
        info!("Deleting rows from '{}' table... {}", table.table, query);
        self.executor.execute(&query).await?;
        Ok(())
    }
}

/// Upper-cased column names and types of a DESCRIBE result
///
/// Rows from the first `#` section header on describe partitioning and
/// table metadata, not columns.
fn describe_columns(rows: &[Row]) -> HashMap<String, String> {
    let field = |row: &Row, key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let mut columns = HashMap::new();
    for row in rows {
        let name = field(row, "col_name");
        if name.starts_with('#') {
            break;
        }
        let data_type = field(row, "data_type");
        if name.is_empty() || data_type.is_empty() {
            continue;
        }
        columns.insert(name.to_uppercase(), data_type);
    }
    columns
}
