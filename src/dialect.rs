//! SQL dialect
//!
//! Pure builders from table layouts and load plans to statement text. The
//! table synchronizer only talks to the engine through these, so another
//! engine only needs another [`SqlDialect`] implementation.
//!
//! Identifiers are normalised to upper case and backtick quoted.

use crate::column_type::{column_type, ColumnType};
use crate::flatten::FlatSchema;
use chrono::{DateTime, Utc};

/// A destination table inside a target schema
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    /// Table names are lower-cased with `.` and `-` replaced by `_`
    pub fn new(schema: impl Into<String>, table: &str) -> Self {
        Self {
            schema: schema.into(),
            table: table.replace(['.', '-'], "_").to_lowercase(),
        }
    }
}

/// One destination column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Columns of a flattened schema, in schema order
pub fn columns_of(schema: &FlatSchema) -> Vec<Column> {
    schema
        .iter()
        .map(|(name, property)| Column {
            name: name.clone(),
            column_type: column_type(property),
        })
        .collect()
}

/// Everything needed to render the statement loading one staged batch
#[derive(Debug)]
pub struct LoadPlan<'a> {
    pub table: &'a TableRef,
    /// Temporary table exposing the staged rows
    pub staging_table: &'a str,
    /// Columns carried by the batch
    pub columns: &'a [Column],
    /// Key properties; empty means append-only
    pub key_columns: &'a [String],
    /// Catalog columns the batch has no data for
    pub destination_only: &'a [String],
}

/// Statement builders for one destination engine
pub trait SqlDialect: Send + Sync {
    fn qualified_table(&self, table: &TableRef) -> String;

    fn quote_column(&self, name: &str) -> String;

    /// DDL type of a destination column
    fn column_type_sql(&self, column_type: ColumnType) -> &'static str;

    /// Whether a type reported by the catalog already holds `column_type`
    fn types_compatible(&self, catalog_type: &str, column_type: ColumnType) -> bool;

    fn show_schemas(&self, schema: &str) -> String;

    fn create_schema(&self, schema: &str) -> String;

    fn show_tables(&self, table: &TableRef) -> String;

    fn describe_table(&self, table: &TableRef) -> String;

    fn create_table(&self, table: &TableRef, columns: &[Column]) -> String;

    fn add_column(&self, table: &TableRef, column: &Column) -> String;

    /// Name a column is moved to when its type changes
    fn versioned_column_name(&self, name: &str, at: DateTime<Utc>) -> String;

    fn version_column(&self, table: &TableRef, name: &str, at: DateTime<Utc>) -> String;

    fn create_staging_table(&self, name: &str, columns: &[Column], location: &str) -> String;

    fn drop_staging_table(&self, name: &str) -> String;

    /// MERGE when the plan has key columns, INSERT ... SELECT otherwise
    fn load_statement(&self, plan: &LoadPlan<'_>) -> String {
        if plan.key_columns.is_empty() {
            self.insert(plan)
        } else {
            self.merge(plan)
        }
    }

    fn merge(&self, plan: &LoadPlan<'_>) -> String;

    fn insert(&self, plan: &LoadPlan<'_>) -> String;

    /// Hard delete of rows flagged by the deleted-at metadata column
    fn delete_marked(&self, table: &TableRef) -> String;
}

/// Spark SQL over Iceberg tables
#[derive(Debug, Clone)]
pub struct SparkIcebergDialect {
    catalog: String,
}

impl SparkIcebergDialect {
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
        }
    }

    /// Source expression of a staged column; lists are staged as JSON text
    fn select_expression(&self, column: &Column) -> String {
        let quoted = self.quote_column(&column.name);
        match column.column_type {
            ColumnType::List => format!("from_json({0}, 'array<string>') AS {0}", quoted),
            _ => quoted,
        }
    }

    fn staged_type_sql(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::List => "string",
            other => self.column_type_sql(other),
        }
    }
}

fn normalize_type(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    if lower.starts_with("array") || lower.starts_with("list") {
        return "array".to_string();
    }
    match lower.as_str() {
        "long" | "bigint" | "int8" => "bigint",
        "int" | "integer" | "int4" => "int",
        "double" | "float8" | "double precision" => "double",
        "bool" | "boolean" => "boolean",
        "string" | "text" => "string",
        "timestamp" | "timestamptz" | "timestamp_ltz" => "timestamp",
        other => other,
    }
    .to_string()
}

impl SqlDialect for SparkIcebergDialect {
    fn qualified_table(&self, table: &TableRef) -> String {
        format!(
            "{}.{}.`{}`",
            self.catalog,
            table.schema,
            table.table.to_uppercase()
        )
    }

    fn quote_column(&self, name: &str) -> String {
        format!("`{}`", name.to_uppercase())
    }

    fn column_type_sql(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::String => "string",
            ColumnType::Double => "double",
            ColumnType::Long => "bigint",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Date => "date",
            ColumnType::List => "array<string>",
        }
    }

    fn types_compatible(&self, catalog_type: &str, column_type: ColumnType) -> bool {
        normalize_type(catalog_type) == normalize_type(self.column_type_sql(column_type))
    }

    fn show_schemas(&self, schema: &str) -> String {
        format!("SHOW SCHEMAS LIKE '{}'", schema.to_uppercase())
    }

    fn create_schema(&self, schema: &str) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", schema)
    }

    fn show_tables(&self, table: &TableRef) -> String {
        format!(
            "SHOW TABLES IN {} LIKE '{}'",
            table.schema,
            table.table.to_uppercase()
        )
    }

    fn describe_table(&self, table: &TableRef) -> String {
        format!("DESCRIBE {}", self.qualified_table(table))
    }

    fn create_table(&self, table: &TableRef, columns: &[Column]) -> String {
        let columns: Vec<String> = columns
            .iter()
            .map(|c| {
                format!(
                    "{} {}",
                    self.quote_column(&c.name),
                    self.column_type_sql(c.column_type)
                )
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified_table(table),
            columns.join(", ")
        )
    }

    fn add_column(&self, table: &TableRef, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.qualified_table(table),
            self.quote_column(&column.name),
            self.column_type_sql(column.column_type)
        )
    }

    fn versioned_column_name(&self, name: &str, at: DateTime<Utc>) -> String {
        format!("{}_{}", name.to_uppercase(), at.format("%Y%m%d_%H%M"))
    }

    fn version_column(&self, table: &TableRef, name: &str, at: DateTime<Utc>) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.qualified_table(table),
            self.quote_column(name),
            self.quote_column(&self.versioned_column_name(name, at))
        )
    }

    fn create_staging_table(&self, name: &str, columns: &[Column], location: &str) -> String {
        let columns: Vec<String> = columns
            .iter()
            .map(|c| {
                format!(
                    "{} {}",
                    self.quote_column(&c.name),
                    self.staged_type_sql(c.column_type)
                )
            })
            .collect();
        format!(
            "CREATE TEMPORARY TABLE {}({}) USING csv OPTIONS (header \"false\", path \"{}\", mode \"FAILFAST\")",
            name,
            columns.join(","),
            location
        )
    }

    fn drop_staging_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", name)
    }

    fn merge(&self, plan: &LoadPlan<'_>) -> String {
        let source: Vec<String> = plan
            .columns
            .iter()
            .map(|c| self.select_expression(c))
            .collect();

        let on: Vec<String> = plan
            .key_columns
            .iter()
            .map(|k| {
                let k = self.quote_column(k);
                format!("s.{0} = t.{0}", k)
            })
            .collect();

        let keys: Vec<String> = plan.key_columns.iter().map(|k| k.to_uppercase()).collect();
        let mut update: Vec<String> = plan
            .columns
            .iter()
            .filter(|c| !keys.contains(&c.name.to_uppercase()))
            .map(|c| {
                let c = self.quote_column(&c.name);
                format!("{0}=s.{0}", c)
            })
            .collect();
        // A table of key columns only still needs a non-empty SET clause
        if update.is_empty() {
            update = plan
                .key_columns
                .iter()
                .map(|k| {
                    let k = self.quote_column(k);
                    format!("{0}=s.{0}", k)
                })
                .collect();
        }

        let mut insert_columns: Vec<String> = plan
            .columns
            .iter()
            .map(|c| self.quote_column(&c.name))
            .collect();
        let mut insert_values: Vec<String> = insert_columns.iter().map(|c| format!("s.{}", c)).collect();
        for column in plan.destination_only {
            insert_columns.push(self.quote_column(column));
            insert_values.push("null".to_string());
        }

        format!(
            "MERGE INTO {} t USING (SELECT {} FROM {}) s ON {} \
             WHEN MATCHED THEN UPDATE SET {} \
             WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            self.qualified_table(plan.table),
            source.join(", "),
            plan.staging_table,
            on.join(" AND "),
            update.join(", "),
            insert_columns.join(", "),
            insert_values.join(", ")
        )
    }

    fn insert(&self, plan: &LoadPlan<'_>) -> String {
        let mut target: Vec<String> = plan
            .columns
            .iter()
            .map(|c| self.quote_column(&c.name))
            .collect();
        let mut source: Vec<String> = plan
            .columns
            .iter()
            .map(|c| self.select_expression(c))
            .collect();
        for column in plan.destination_only {
            target.push(self.quote_column(column));
            source.push("null".to_string());
        }

        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            self.qualified_table(plan.table),
            target.join(", "),
            source.join(", "),
            plan.staging_table
        )
    }

    fn delete_marked(&self, table: &TableRef) -> String {
        format!(
            "DELETE FROM {} WHERE {} IS NOT NULL",
            self.qualified_table(table),
            self.quote_column(crate::record::DELETED_AT_COLUMN)
        )
    }
}
