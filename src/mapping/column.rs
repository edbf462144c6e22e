//! Column definition metadata and PostgreSQL type mapping.

/// How a property maps onto a table or result column
///
/// Stores the column name, its type, nullability, defaults and constraints.
/// Entity builders start from the entity's [`PropertyInfo`](crate::PropertyInfo)
/// and configurations override individual fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnDefinition {
    /// Property name on the record
    pub property: String,
    /// Column name in the database
    pub column: String,
    /// Column type (e.g., "integer", "text", "jsonb")
    pub column_type: Option<String>,
    /// Maximum length for character columns
    pub max_length: Option<u32>,
    pub nullable: bool,
    /// Default value literal (if any)
    pub default_value: Option<String>,
    /// Default SQL expression (e.g., "NOW()", "gen_random_uuid()")
    pub default_expr: Option<String>,
    /// Column comment/documentation
    pub comment: Option<String>,
    pub unique: bool,
    /// Value is produced by the database on insert (identity, serial, defaults)
    pub generated_on_add: bool,
}

impl ColumnDefinition {
    pub fn new(property: impl Into<String>) -> Self {
        let property = property.into();
        Self {
            column: property.clone(),
            property,
            ..Default::default()
        }
    }

    /// Render the PostgreSQL type for this column
    ///
    /// Generated integer columns become identity columns in [`sql_fragment`](Self::sql_fragment),
    /// so only the base type is returned here.
    pub fn sql_type(&self) -> String {
        let Some(col_type) = self.column_type.as_deref() else {
            return "TEXT".to_string();
        };
        let lower = col_type.to_lowercase();
        match lower.as_str() {
            "integer" | "i32" | "int" | "int4" => "INTEGER".to_string(),
            "bigint" | "i64" | "big_integer" | "int8" => "BIGINT".to_string(),
            "smallint" | "i16" | "int2" => "SMALLINT".to_string(),
            "string" | "varchar" => match self.max_length {
                Some(len) => format!("VARCHAR({len})"),
                None => "VARCHAR".to_string(),
            },
            "text" => match self.max_length {
                Some(len) => format!("VARCHAR({len})"),
                None => "TEXT".to_string(),
            },
            "char" => format!("CHAR({})", self.max_length.unwrap_or(1)),
            "boolean" | "bool" => "BOOLEAN".to_string(),
            "float" | "f32" | "real" => "REAL".to_string(),
            "double" | "f64" | "double_precision" => "DOUBLE PRECISION".to_string(),
            "json" => "JSON".to_string(),
            "jsonb" => "JSONB".to_string(),
            "timestamp" | "datetime" => "TIMESTAMP".to_string(),
            "timestamptz" => "TIMESTAMPTZ".to_string(),
            "date" => "DATE".to_string(),
            "time" => "TIME".to_string(),
            "uuid" => "UUID".to_string(),
            "binary" | "bytes" | "bytea" | "blob" => "BYTEA".to_string(),
            "decimal" | "numeric" => "NUMERIC".to_string(),
            // Anything else is passed through as a raw SQL type
            _ => col_type.to_string(),
        }
    }

    fn is_integer_type(&self) -> bool {
        matches!(self.sql_type().as_str(), "INTEGER" | "BIGINT" | "SMALLINT")
    }

    /// Column clause for a CREATE TABLE statement, without a trailing comma
    pub fn sql_fragment(&self, is_primary_key: bool) -> String {
        let mut sql = format!("    {} {}", self.column, self.sql_type());

        if self.generated_on_add && self.is_integer_type() {
            sql.push_str(" GENERATED BY DEFAULT AS IDENTITY");
        }

        if self.nullable && !is_primary_key {
            sql.push_str(" NULL");
        } else {
            sql.push_str(" NOT NULL");
        }

        // Priority: explicit default_expr > explicit default_value > UUID key default
        if let Some(ref default_expr) = self.default_expr {
            sql.push_str(&format!(" DEFAULT {default_expr}"));
        } else if let Some(ref default_val) = self.default_value {
            sql.push_str(&format!(" DEFAULT {default_val}"));
        } else if self.generated_on_add && self.sql_type() == "UUID" {
            sql.push_str(" DEFAULT gen_random_uuid()");
        }

        if self.unique && !is_primary_key {
            sql.push_str(" UNIQUE");
        }

        sql
    }
}
