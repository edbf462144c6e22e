//! CREATE script generation for a model.
//!
//! Layout of the generated script:
//!
//! 1. `CREATE SCHEMA IF NOT EXISTS` for every non-default schema
//! 2. one `CREATE TABLE IF NOT EXISTS` per entity, principal tables first,
//!    each followed by its indexes
//! 3. foreign keys as `ALTER TABLE ... ADD CONSTRAINT`, so table order never
//!    has to break a cycle
//! 4. table and column comments
//!
//! Ties are broken alphabetically so the output is stable across runs.

use super::Model;
use crate::mapping::table::sanitize_constraint_name;
use crate::mapping::EntitySchema;
use std::collections::{BTreeMap, BTreeSet};

pub(super) fn generate_create_script(model: &Model) -> String {
    let schemas = model.entity_schemas();
    let ordered = dependency_order(&schemas);

    let mut sql = String::new();

    let namespaces: BTreeSet<&str> = schemas.iter().filter_map(|s| s.schema.as_deref()).collect();
    for ns in &namespaces {
        sql.push_str(&format!("CREATE SCHEMA IF NOT EXISTS {ns};\n"));
    }
    if !namespaces.is_empty() {
        sql.push('\n');
    }

    for schema in &ordered {
        sql.push_str(&create_table_sql(schema));
        sql.push('\n');
    }

    let mut foreign_keys = String::new();
    for schema in &ordered {
        let table = schema.qualified_table();
        for fk in &schema.table_def.foreign_keys {
            foreign_keys.push_str(&format!(
                "ALTER TABLE {table} ADD CONSTRAINT fk_{}_{} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {};\n",
                sanitize_constraint_name(&schema.table),
                sanitize_constraint_name(&fk.columns.join("_")),
                fk.columns.join(", "),
                fk.principal_table,
                fk.principal_columns.join(", "),
                fk.on_delete.to_sql()
            ));
        }
    }
    if !foreign_keys.is_empty() {
        sql.push_str(&foreign_keys);
        sql.push('\n');
    }

    let mut comments = String::new();
    for schema in &ordered {
        let table = schema.qualified_table();
        if let Some(ref comment) = schema.table_def.table_comment {
            comments.push_str(&format!(
                "COMMENT ON TABLE {table} IS '{}';\n",
                comment.replace('\'', "''")
            ));
        }
        for column in &schema.columns {
            if let Some(ref comment) = column.comment {
                comments.push_str(&format!(
                    "COMMENT ON COLUMN {table}.{} IS '{}';\n",
                    column.column,
                    comment.replace('\'', "''")
                ));
            }
        }
    }
    sql.push_str(&comments);

    sql.trim_end().to_string() + "\n"
}

fn create_table_sql(schema: &EntitySchema) -> String {
    let table = schema.qualified_table();
    let key_columns = schema.key_columns();

    let mut lines: Vec<String> = schema
        .columns
        .iter()
        .map(|c| c.sql_fragment(schema.is_key(&c.property)))
        .collect();

    lines.push(format!(
        "    CONSTRAINT pk_{} PRIMARY KEY ({})",
        sanitize_constraint_name(&schema.table),
        key_columns.join(", ")
    ));
    for (name, expr) in &schema.table_def.check_constraints {
        lines.push(format!(
            "    CONSTRAINT {} CHECK ({expr})",
            sanitize_constraint_name(name)
        ));
    }
    for cols in &schema.table_def.composite_unique {
        lines.push(format!("    UNIQUE ({})", cols.join(", ")));
    }

    let mut sql = format!("CREATE TABLE IF NOT EXISTS {table} (\n");
    sql.push_str(&lines.join(",\n"));
    sql.push_str("\n);\n");

    for index in &schema.table_def.indexes {
        let kind = if index.unique { "CREATE UNIQUE INDEX" } else { "CREATE INDEX" };
        sql.push_str(&format!(
            "{kind} IF NOT EXISTS {} ON {table} ({})",
            index.name,
            index.columns.join(", ")
        ));
        if let Some(ref filter) = index.partial_where {
            sql.push_str(&format!(" WHERE {filter}"));
        }
        sql.push_str(";\n");
    }

    sql
}

/// Order tables so that principals precede dependents
///
/// Kahn's algorithm over the foreign keys that point at tables of this model,
/// keyed by schema-qualified table name. Ready tables are taken alphabetically.
/// Tables left over by a cycle are appended alphabetically; their constraints
/// are added afterwards anyway.
fn dependency_order<'a>(schemas: &[&'a EntitySchema]) -> Vec<&'a EntitySchema> {
    let by_table: BTreeMap<String, &'a EntitySchema> =
        schemas.iter().map(|s| (s.qualified_table(), *s)).collect();

    let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (table, schema) in &by_table {
        let deps: BTreeSet<&str> = schema
            .table_def
            .foreign_keys
            .iter()
            .map(|fk| fk.principal_qualified_table())
            .filter(|t| *t != table.as_str() && by_table.contains_key(*t))
            .collect();
        pending.insert(table.as_str(), deps);
    }

    let mut ordered = Vec::with_capacity(schemas.len());
    loop {
        let ready = pending
            .iter()
            .find(|(_, deps)| deps.is_empty())
            .map(|(table, _)| *table);
        let Some(table) = ready else { break };

        pending.remove(table);
        for deps in pending.values_mut() {
            deps.remove(table);
        }
        ordered.push(by_table[table]);
    }

    if !pending.is_empty() {
        log::warn!(
            "circular foreign key references between {:?}; emitting them alphabetically",
            pending.keys().collect::<Vec<_>>()
        );
        ordered.extend(pending.keys().map(|t| by_table[*t]));
    }

    ordered
}
