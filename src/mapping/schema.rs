//! Resolved schemas: the output of applying one mapping configuration.

use super::column::ColumnDefinition;
use super::table::TableDefinition;

/// Schema of one entity table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    /// Short type name of the entity, used in diagnostics
    pub type_name: &'static str,
    pub table: String,
    pub schema: Option<String>,
    /// Mapped properties in declaration order (ignored properties removed)
    pub columns: Vec<ColumnDefinition>,
    /// Key property names, in key order
    pub key: Vec<String>,
    /// Indexes, constraints and foreign keys, already resolved to column names
    pub table_def: TableDefinition,
}

impl EntitySchema {
    /// Table name with its schema prefix, if any
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table),
            None => self.table.clone(),
        }
    }

    pub fn column_for(&self, property: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.property == property)
    }

    pub fn property_for_column(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.property.as_str())
    }

    pub fn is_key(&self, property: &str) -> bool {
        self.key.iter().any(|k| k == property)
    }

    /// Key column names, in key order
    pub fn key_columns(&self) -> Vec<&str> {
        self.key
            .iter()
            .filter_map(|p| self.column_for(p).map(|c| c.column.as_str()))
            .collect()
    }

    pub fn has_generated_columns(&self) -> bool {
        self.columns.iter().any(|c| c.generated_on_add)
    }
}

/// Schema of one read-only projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionSchema {
    pub type_name: &'static str,
    /// Optional view (or table) the projection reads from by default
    pub view: Option<String>,
    pub columns: Vec<ColumnDefinition>,
}

impl ProjectionSchema {
    pub fn property_for_column(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.property.as_str())
    }
}
