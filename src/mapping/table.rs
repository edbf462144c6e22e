//! Table-level metadata: indexes, composite unique constraints, CHECK
//! constraints, foreign keys and comments.

/// Table definition metadata
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableDefinition {
    /// Table comment/documentation
    pub table_comment: Option<String>,
    /// Composite unique constraints; each entry is a list of column names
    pub composite_unique: Vec<Vec<String>>,
    pub indexes: Vec<IndexDefinition>,
    /// Table-level CHECK constraints as (`constraint_name`, `expression`)
    pub check_constraints: Vec<(String, String)>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
}

/// Index definition metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    /// Column names (for composite indexes)
    pub columns: Vec<String>,
    pub unique: bool,
    /// Partial index WHERE clause (if any)
    pub partial_where: Option<String>,
}

/// Referential action for ON DELETE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

impl ReferentialAction {
    pub(crate) fn to_sql(self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
        }
    }
}

/// A relationship from this table's columns to another table's key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDefinition {
    /// Dependent columns on this table
    pub columns: Vec<String>,
    /// Principal table, optionally schema-qualified
    pub principal_table: String,
    pub principal_columns: Vec<String>,
    pub on_delete: ReferentialAction,
}

impl ForeignKeyDefinition {
    /// Principal table as [`EntitySchema::qualified_table`] spells it
    ///
    /// A bare name refers to the default schema, and so does an explicit
    /// `public.` prefix.
    ///
    /// [`EntitySchema::qualified_table`]: crate::mapping::EntitySchema::qualified_table
    pub fn principal_qualified_table(&self) -> &str {
        self.principal_table
            .strip_prefix("public.")
            .unwrap_or(&self.principal_table)
    }
}

/// Sanitize a name for use in constraint names
pub(crate) fn sanitize_constraint_name(name: &str) -> String {
    name.replace(['-', '.'], "_").to_lowercase()
}
