//! DDL rendering from table descriptors
//!
//! Produces standard `CREATE TABLE` / `CREATE INDEX` statements. Every
//! statement uses `IF NOT EXISTS`, so re-running a rendered script against a
//! database that already holds the tables is harmless.

use crate::migrations::checksums::statements_checksum;
use keel_core::registry::descriptor::{
    AssociationTableDescriptor, ColumnDescriptor, IndexDescriptor, TableDescriptor,
};
use keel_core::sql::quote_ident;
use keel_core::SchemaRegistry;

/// Rendered statements for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDdl {
    pub table: String,
    pub statements: Vec<String>,
    pub checksum: String,
}

impl TableDdl {
    fn new(table: String, statements: Vec<String>) -> Self {
        let checksum = statements_checksum(&statements);
        Self {
            table,
            statements,
            checksum,
        }
    }
}

fn column_ddl(column: &ColumnDescriptor, version_column: Option<&str>) -> String {
    let mut parts = vec![quote_ident(&column.name), column.storage.sql_name().to_string()];
    if column.primary_key {
        parts.push("PRIMARY KEY".to_string());
        if !column.auto_increment {
            parts.push("NOT NULL".to_string());
        }
    } else {
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if column.unique {
            parts.push("UNIQUE".to_string());
        }
    }
    if version_column == Some(column.name.as_str()) {
        parts.push("DEFAULT 1".to_string());
    }
    parts.join(" ")
}

fn index_ddl(table: &str, index: &IndexDescriptor) -> String {
    let columns: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        quote_ident(table),
        columns.join(", ")
    )
}

/// `CREATE TABLE` plus index statements for a model table
pub fn render_table(descriptor: &TableDescriptor) -> TableDdl {
    let version = descriptor.version_column.as_deref();
    let mut lines: Vec<String> = descriptor
        .columns
        .iter()
        .map(|c| column_ddl(c, version))
        .collect();

    for fk in &descriptor.foreign_keys {
        lines.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            quote_ident(&fk.column),
            quote_ident(&fk.target_table),
            quote_ident(&fk.target_column),
            fk.on_delete.sql()
        ));
    }

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(&descriptor.table),
        lines.join(",\n    ")
    )];
    statements.extend(
        descriptor
            .indexes
            .iter()
            .map(|index| index_ddl(&descriptor.table, index)),
    );
    TableDdl::new(descriptor.table.clone(), statements)
}

/// `CREATE TABLE` for a derived many-to-many link table
///
/// Rows are keyed by the pair, and vanish with either end.
pub fn render_association(link: &AssociationTableDescriptor) -> TableDdl {
    let sides = [&link.left, &link.right];
    let mut lines: Vec<String> = sides
        .iter()
        .map(|side| {
            format!(
                "{} {} NOT NULL",
                quote_ident(&side.column),
                side.storage.sql_name()
            )
        })
        .collect();
    lines.push(format!(
        "PRIMARY KEY ({}, {})",
        quote_ident(&link.left.column),
        quote_ident(&link.right.column)
    ));
    for side in sides {
        lines.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE",
            quote_ident(&side.column),
            quote_ident(&side.target_table),
            quote_ident(&side.target_column)
        ));
    }
    let statement = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(&link.table),
        lines.join(",\n    ")
    );
    TableDdl::new(link.table.clone(), vec![statement])
}

/// Every table of the registry, parents before children, link tables last
pub fn render_schema(registry: &SchemaRegistry) -> Vec<TableDdl> {
    let mut tables: Vec<TableDdl> = registry
        .dependency_order()
        .into_iter()
        .map(render_table)
        .collect();
    tables.extend(registry.associations().map(render_association));
    tables
}

/// The whole schema as one `;`-terminated script
pub fn render_script(registry: &SchemaRegistry) -> String {
    render_schema(registry)
        .iter()
        .flat_map(|t| t.statements.iter())
        .map(|s| format!("{};\n", s))
        .collect::<Vec<_>>()
        .join("\n")
}
