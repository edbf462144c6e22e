//! Fluent, strongly-typed schema builders handed to mapping configurations.
//!
//! Builders are seeded from the record's [`PropertyInfo`](crate::PropertyInfo)
//! list, so a configuration only states what differs from the defaults:
//!
//! - table name: snake_case of the type name
//! - column names: property names
//! - key: the `id` property, when there is one
//!
//! Mistakes such as naming an unknown property are collected and reported
//! together when the builder is finished.

use super::column::ColumnDefinition;
use super::schema::{EntitySchema, ProjectionSchema};
use super::table::{
    ForeignKeyDefinition, IndexDefinition, ReferentialAction, TableDefinition,
};
use crate::entity::{short_type_name, Entity, Projection, PropertyInfo};
use crate::error::ContextError;
use convert_case::{Case, Casing};
use std::collections::HashSet;
use std::marker::PhantomData;

fn seed_columns(properties: Vec<PropertyInfo>) -> Vec<ColumnDefinition> {
    properties
        .into_iter()
        .map(|p| ColumnDefinition {
            column_type: Some(p.column_type.to_string()),
            nullable: p.nullable,
            ..ColumnDefinition::new(p.name)
        })
        .collect()
}

/// Fluent access to one property's column mapping
pub struct PropertyBuilder<'a> {
    column: &'a mut ColumnDefinition,
}

impl<'a> PropertyBuilder<'a> {
    pub fn has_column_name(self, name: impl Into<String>) -> Self {
        self.column.column = name.into();
        self
    }

    pub fn has_column_type(self, column_type: impl Into<String>) -> Self {
        self.column.column_type = Some(column_type.into());
        self
    }

    pub fn has_max_length(self, len: u32) -> Self {
        self.column.max_length = Some(len);
        self
    }

    pub fn is_required(self) -> Self {
        self.column.nullable = false;
        self
    }

    pub fn is_optional(self) -> Self {
        self.column.nullable = true;
        self
    }

    pub fn is_unique(self) -> Self {
        self.column.unique = true;
        self
    }

    /// Database-side default expression, e.g. `NOW()`
    pub fn has_default_sql(self, expr: impl Into<String>) -> Self {
        self.column.default_expr = Some(expr.into());
        self
    }

    /// Default literal, rendered verbatim
    pub fn has_default_value(self, literal: impl Into<String>) -> Self {
        self.column.default_value = Some(literal.into());
        self
    }

    /// The database produces this value on insert; it is never written by the context
    pub fn value_generated_on_add(self) -> Self {
        self.column.generated_on_add = true;
        self
    }

    pub fn has_comment(self, comment: impl Into<String>) -> Self {
        self.column.comment = Some(comment.into());
        self
    }
}

/// Fluent access to a foreign key being declared
pub struct ForeignKeyBuilder<'a> {
    fk: &'a mut ForeignKeyDefinition,
}

impl<'a> ForeignKeyBuilder<'a> {
    pub fn on_delete(self, action: ReferentialAction) -> Self {
        self.fk.on_delete = action;
        self
    }
}

/// Schema builder for an [`Entity`]
pub struct EntityTypeBuilder<E: Entity> {
    table: String,
    schema: Option<String>,
    columns: Vec<ColumnDefinition>,
    key: Vec<String>,
    ignored: Vec<String>,
    // Property-level definitions, resolved to column names in `finish`
    table_def: TableDefinition,
    scratch: ColumnDefinition,
    errors: Vec<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Default for EntityTypeBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> EntityTypeBuilder<E> {
    pub fn new() -> Self {
        let columns = seed_columns(E::properties());
        let key = columns
            .iter()
            .find(|c| c.property == "id")
            .map(|c| vec![c.property.clone()])
            .unwrap_or_default();
        Self {
            table: short_type_name::<E>().to_case(Case::Snake),
            schema: None,
            columns,
            key,
            ignored: Vec::new(),
            table_def: TableDefinition::default(),
            scratch: ColumnDefinition::default(),
            errors: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn to_table(&mut self, table: impl Into<String>) -> &mut Self {
        self.table = table.into();
        self
    }

    pub fn in_schema(&mut self, schema: impl Into<String>) -> &mut Self {
        self.schema = Some(schema.into());
        self
    }

    /// Replace the key with the given properties (composite when more than one)
    pub fn has_key(&mut self, properties: &[&str]) -> &mut Self {
        self.key = properties.iter().map(|p| (*p).to_string()).collect();
        self
    }

    pub fn property(&mut self, name: &str) -> PropertyBuilder<'_> {
        match self.columns.iter().position(|c| c.property == name) {
            Some(idx) => PropertyBuilder {
                column: &mut self.columns[idx],
            },
            None => {
                self.errors.push(format!("unknown property '{name}'"));
                self.scratch = ColumnDefinition::new(name);
                PropertyBuilder {
                    column: &mut self.scratch,
                }
            }
        }
    }

    /// Exclude a property from the table; it is neither read nor written
    pub fn ignore(&mut self, name: &str) -> &mut Self {
        if self.columns.iter().any(|c| c.property == name) {
            self.ignored.push(name.to_string());
        } else {
            self.errors.push(format!("cannot ignore unknown property '{name}'"));
        }
        self
    }

    pub fn has_index(&mut self, name: impl Into<String>, properties: &[&str]) -> &mut Self {
        self.push_index(name.into(), properties, false, None)
    }

    pub fn has_unique_index(&mut self, name: impl Into<String>, properties: &[&str]) -> &mut Self {
        self.push_index(name.into(), properties, true, None)
    }

    pub fn has_filtered_index(
        &mut self,
        name: impl Into<String>,
        properties: &[&str],
        filter: impl Into<String>,
    ) -> &mut Self {
        self.push_index(name.into(), properties, false, Some(filter.into()))
    }

    fn push_index(
        &mut self,
        name: String,
        properties: &[&str],
        unique: bool,
        partial_where: Option<String>,
    ) -> &mut Self {
        self.table_def.indexes.push(IndexDefinition {
            name,
            columns: properties.iter().map(|p| (*p).to_string()).collect(),
            unique,
            partial_where,
        });
        self
    }

    pub fn has_composite_unique(&mut self, properties: &[&str]) -> &mut Self {
        self.table_def
            .composite_unique
            .push(properties.iter().map(|p| (*p).to_string()).collect());
        self
    }

    pub fn has_check(&mut self, name: impl Into<String>, expression: impl Into<String>) -> &mut Self {
        self.table_def
            .check_constraints
            .push((name.into(), expression.into()));
        self
    }

    pub fn has_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.table_def.table_comment = Some(comment.into());
        self
    }

    /// Declare that `properties` reference `principal_columns` of `principal_table`
    pub fn has_foreign_key(
        &mut self,
        properties: &[&str],
        principal_table: impl Into<String>,
        principal_columns: &[&str],
    ) -> ForeignKeyBuilder<'_> {
        self.table_def.foreign_keys.push(ForeignKeyDefinition {
            columns: properties.iter().map(|p| (*p).to_string()).collect(),
            principal_table: principal_table.into(),
            principal_columns: principal_columns.iter().map(|c| (*c).to_string()).collect(),
            on_delete: ReferentialAction::default(),
        });
        let last = self.table_def.foreign_keys.len() - 1;
        ForeignKeyBuilder {
            fk: &mut self.table_def.foreign_keys[last],
        }
    }

    fn resolve(&self, properties: &[String], errors: &mut Vec<String>, what: &str) -> Vec<String> {
        properties
            .iter()
            .map(|p| match self.columns.iter().find(|c| &c.property == p) {
                Some(c) if !self.ignored.contains(p) => c.column.clone(),
                _ => {
                    errors.push(format!("{what} references unmapped property '{p}'"));
                    p.clone()
                }
            })
            .collect()
    }

    /// Validate and produce the resolved schema
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` listing every problem found: unknown
    /// properties, a missing or unmapped key, duplicate column names, or indexes and
    /// foreign keys over unmapped properties.
    pub fn finish(self) -> Result<EntitySchema, ContextError> {
        let mut errors = self.errors.clone();

        if self.table.trim().is_empty() {
            errors.push("table name is empty".to_string());
        }
        if self.key.is_empty() {
            errors.push("no key configured; call has_key()".to_string());
        }
        for k in &self.key {
            if !self.columns.iter().any(|c| &c.property == k) || self.ignored.contains(k) {
                errors.push(format!("key property '{k}' is not mapped"));
            }
        }

        let mut table_def = self.table_def.clone();
        for index in &mut table_def.indexes {
            index.columns = self.resolve(&index.columns, &mut errors, "index");
        }
        table_def.composite_unique = table_def
            .composite_unique
            .iter()
            .map(|cols| self.resolve(cols, &mut errors, "unique constraint"))
            .collect();
        for fk in &mut table_def.foreign_keys {
            fk.columns = self.resolve(&fk.columns, &mut errors, "foreign key");
        }

        let columns: Vec<ColumnDefinition> = self
            .columns
            .iter()
            .filter(|c| !self.ignored.contains(&c.property))
            .cloned()
            .collect();

        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.column.as_str()) {
                errors.push(format!("column '{}' is mapped more than once", c.column));
            }
        }

        if !errors.is_empty() {
            return Err(ContextError::configuration(
                short_type_name::<E>(),
                errors.join("; "),
            ));
        }

        Ok(EntitySchema {
            type_name: short_type_name::<E>(),
            table: self.table,
            schema: self.schema,
            columns,
            key: self.key,
            table_def,
        })
    }
}

/// Schema builder for a [`Projection`]
pub struct QueryTypeBuilder<P: Projection> {
    view: Option<String>,
    columns: Vec<ColumnDefinition>,
    scratch: ColumnDefinition,
    errors: Vec<String>,
    _projection: PhantomData<fn() -> P>,
}

impl<P: Projection> Default for QueryTypeBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Projection> QueryTypeBuilder<P> {
    pub fn new() -> Self {
        Self {
            view: None,
            columns: seed_columns(P::properties()),
            scratch: ColumnDefinition::default(),
            errors: Vec::new(),
            _projection: PhantomData,
        }
    }

    /// Read from this view (or table) when no SQL is supplied
    pub fn to_view(&mut self, view: impl Into<String>) -> &mut Self {
        self.view = Some(view.into());
        self
    }

    pub fn property(&mut self, name: &str) -> PropertyBuilder<'_> {
        match self.columns.iter().position(|c| c.property == name) {
            Some(idx) => PropertyBuilder {
                column: &mut self.columns[idx],
            },
            None => {
                self.errors.push(format!("unknown property '{name}'"));
                self.scratch = ColumnDefinition::new(name);
                PropertyBuilder {
                    column: &mut self.scratch,
                }
            }
        }
    }

    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when an unknown property was configured.
    pub fn finish(self) -> Result<ProjectionSchema, ContextError> {
        if !self.errors.is_empty() {
            return Err(ContextError::configuration(
                short_type_name::<P>(),
                self.errors.join("; "),
            ));
        }
        Ok(ProjectionSchema {
            type_name: short_type_name::<P>(),
            view: self.view,
            columns: self.columns,
        })
    }
}
