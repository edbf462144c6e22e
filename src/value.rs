//! Row and value plumbing between backends and mapped records.
//!
//! Every backend hands results to the context as [`DataRow`]s: an ordered list of
//! column names and `sea_query::Value`s. Records read their fields out of a row
//! through [`FromValue`].

use crate::error::ContextError;
use sea_query::Value;

/// Error produced when a single value cannot be converted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The value is null but the target type is not optional
    Null,
    /// The value variant does not match the target type
    TypeMismatch { expected: &'static str, actual: String },
    /// Conversion failed (overflow, invalid format)
    Conversion(String),
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueError::Null => write!(f, "Value is null"),
            ValueError::TypeMismatch { expected, actual } => {
                write!(f, "Type mismatch: expected {expected}, got {actual}")
            }
            ValueError::Conversion(msg) => write!(f, "Conversion error: {msg}"),
        }
    }
}

impl std::error::Error for ValueError {}

/// Conversion from a `sea_query::Value` into a Rust field type
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, ValueError>;
}

fn mismatch(expected: &'static str, value: &Value) -> ValueError {
    ValueError::TypeMismatch {
        expected,
        actual: format!("{value:?}"),
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(Some(b)) => Ok(*b),
            Value::Bool(None) => Err(ValueError::Null),
            other => Err(mismatch("Bool", other)),
        }
    }
}

impl FromValue for i16 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::SmallInt(Some(v)) => Ok(*v),
            Value::TinyInt(Some(v)) => Ok(i16::from(*v)),
            Value::SmallInt(None) | Value::TinyInt(None) => Err(ValueError::Null),
            other => Err(mismatch("SmallInt", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Int(Some(v)) => Ok(*v),
            Value::SmallInt(Some(v)) => Ok(i32::from(*v)),
            Value::BigInt(Some(v)) => i32::try_from(*v)
                .map_err(|_| ValueError::Conversion(format!("{v} does not fit in i32"))),
            Value::Int(None) | Value::SmallInt(None) | Value::BigInt(None) => Err(ValueError::Null),
            other => Err(mismatch("Int", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::BigInt(Some(v)) => Ok(*v),
            Value::Int(Some(v)) => Ok(i64::from(*v)),
            Value::SmallInt(Some(v)) => Ok(i64::from(*v)),
            Value::BigInt(None) | Value::Int(None) | Value::SmallInt(None) => Err(ValueError::Null),
            other => Err(mismatch("BigInt", other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(Some(v)) => Ok(*v),
            Value::Float(None) => Err(ValueError::Null),
            other => Err(mismatch("Float", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Double(Some(v)) => Ok(*v),
            Value::Float(Some(v)) => Ok(f64::from(*v)),
            Value::Double(None) | Value::Float(None) => Err(ValueError::Null),
            other => Err(mismatch("Double", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::String(Some(s)) => Ok(String::clone(s)),
            Value::String(None) => Err(ValueError::Null),
            other => Err(mismatch("String", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Bytes(Some(b)) => Ok(Vec::clone(b)),
            Value::Bytes(None) => Err(ValueError::Null),
            other => Err(mismatch("Bytes", other)),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Uuid(Some(u)) => Ok(uuid::Uuid::clone(u)),
            Value::Uuid(None) => Err(ValueError::Null),
            Value::String(Some(s)) => uuid::Uuid::parse_str(s)
                .map_err(|e| ValueError::Conversion(format!("invalid uuid: {e}"))),
            other => Err(mismatch("Uuid", other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Json(Some(j)) => Ok(serde_json::Value::clone(j)),
            Value::Json(None) => Err(ValueError::Null),
            other => Err(mismatch("Json", other)),
        }
    }
}

impl FromValue for chrono::NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::ChronoDateTime(Some(dt)) => Ok(chrono::NaiveDateTime::clone(dt)),
            Value::ChronoDateTime(None) => Err(ValueError::Null),
            other => Err(mismatch("ChronoDateTime", other)),
        }
    }
}

impl FromValue for chrono::DateTime<chrono::Utc> {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::ChronoDateTimeUtc(Some(dt)) => Ok(chrono::DateTime::<chrono::Utc>::clone(dt)),
            Value::ChronoDateTimeUtc(None) => Err(ValueError::Null),
            other => Err(mismatch("ChronoDateTimeUtc", other)),
        }
    }
}

impl FromValue for rust_decimal::Decimal {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Decimal(Some(d)) => Ok(rust_decimal::Decimal::clone(d)),
            Value::Decimal(None) => Err(ValueError::Null),
            other => Err(mismatch("Decimal", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match T::from_value(value) {
            Ok(v) => Ok(Some(v)),
            Err(ValueError::Null) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Whether a value is one of the typed nulls
pub fn is_null(value: &Value) -> bool {
    matches!(
        value,
        Value::Bool(None)
            | Value::TinyInt(None)
            | Value::SmallInt(None)
            | Value::Int(None)
            | Value::BigInt(None)
            | Value::TinyUnsigned(None)
            | Value::SmallUnsigned(None)
            | Value::Unsigned(None)
            | Value::BigUnsigned(None)
            | Value::Float(None)
            | Value::Double(None)
            | Value::String(None)
            | Value::Char(None)
            | Value::Bytes(None)
            | Value::Json(None)
            | Value::Uuid(None)
            | Value::ChronoDateTime(None)
            | Value::ChronoDateTimeUtc(None)
            | Value::Decimal(None)
    )
}

/// One result row, keyed by column (or, after remapping, property) name
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataRow {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl DataRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append, mostly for tests and scripted backends
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.push(column.into());
        self.values.push(value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw value for `column`, if present
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn value_at(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Typed read of `column`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Materialization` when the column is missing or its value
    /// cannot be converted to `T`.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T, ContextError> {
        let value = self.value(column).ok_or_else(|| {
            ContextError::materialization(
                std::any::type_name::<T>(),
                format!("column '{column}' is not present in the result row"),
            )
        })?;
        T::from_value(value).map_err(|e| {
            ContextError::materialization(std::any::type_name::<T>(), format!("column '{column}': {e}"))
        })
    }

    /// Rename columns through `rename`; columns it returns `None` for keep their name
    ///
    /// Used to turn database column names into record property names before
    /// materialization.
    pub fn remap<F>(self, mut rename: F) -> DataRow
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = DataRow::new();
        for (column, value) in self.columns.into_iter().zip(self.values) {
            match rename(&column) {
                Some(name) => out.push(name, value),
                None => out.push(column, value),
            }
        }
        out
    }

    pub fn into_values(self) -> Vec<(String, Value)> {
        self.columns.into_iter().zip(self.values).collect()
    }
}
