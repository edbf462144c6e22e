//! Record traits implemented by mapped types.
//!
//! - [`Entity`]: identity-bearing, persisted and change-tracked.
//! - [`Projection`]: read-only shape populated from ad-hoc SQL, never tracked.
//!
//! Both describe their fields through [`PropertyInfo`] so that mapping
//! configurations can start from sensible defaults and only override what
//! differs from the database.

use crate::error::ContextError;
use crate::value::DataRow;
use sea_query::Value;

/// Materialization of a record from a result row
///
/// Rows handed to `from_row` are keyed by *property* name: the context renames
/// mapped columns before calling it.
pub trait FromRow: Sized {
    /// # Errors
    ///
    /// Returns `ContextError::Materialization` when a property is missing or has the
    /// wrong type.
    fn from_row(row: &DataRow) -> Result<Self, ContextError>;
}

/// Static description of one record field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyInfo {
    pub name: &'static str,
    /// Column type name understood by the DDL generator ("integer", "text", "uuid", ...)
    pub column_type: &'static str,
    pub nullable: bool,
}

impl PropertyInfo {
    pub const fn required(name: &'static str, column_type: &'static str) -> Self {
        Self {
            name,
            column_type,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, column_type: &'static str) -> Self {
        Self {
            name,
            column_type,
            nullable: true,
        }
    }
}

/// A persisted, change-tracked record type
///
/// # Example
///
/// ```
/// use lifeline::{ContextError, DataRow, Entity, FromRow, PropertyInfo};
/// use sea_query::Value;
///
/// #[derive(Clone, Debug)]
/// struct Blog {
///     id: i32,
///     url: String,
/// }
///
/// impl FromRow for Blog {
///     fn from_row(row: &DataRow) -> Result<Self, ContextError> {
///         Ok(Blog { id: row.get("id")?, url: row.get("url")? })
///     }
/// }
///
/// impl Entity for Blog {
///     fn properties() -> Vec<PropertyInfo> {
///         vec![
///             PropertyInfo::required("id", "integer"),
///             PropertyInfo::required("url", "text"),
///         ]
///     }
///
///     fn values(&self) -> Vec<(&'static str, Value)> {
///         vec![("id", self.id.into()), ("url", self.url.clone().into())]
///     }
/// }
/// ```
pub trait Entity: FromRow + Clone + 'static {
    /// Every persisted property, in declaration order
    fn properties() -> Vec<PropertyInfo>;

    /// Current property values, keyed by property name
    fn values(&self) -> Vec<(&'static str, Value)>;

    /// Value of a single property
    fn value_of(&self, property: &str) -> Option<Value> {
        self.values()
            .into_iter()
            .find(|(name, _)| *name == property)
            .map(|(_, v)| v)
    }
}

/// A read-only record shape for ad-hoc queries
pub trait Projection: FromRow + 'static {
    fn properties() -> Vec<PropertyInfo>;
}

/// Short, human-readable name of a type, used in diagnostics
///
/// Only the outer path is trimmed. The result borrows from
/// [`std::any::type_name`], so generic arguments keep their full paths; that
/// also keeps `Wrapper<a::Item>` and `Wrapper<b::Item>` apart in messages.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}
