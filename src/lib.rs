//! # Lifeline
//!
//! Relational data-access context for PostgreSQL on the `may` coroutine runtime.
//!
//! - Mapping configurations are registered with [`register_entity_mapping!`] and
//!   [`register_query_mapping!`] and discovered when a scope's [`Model`] is
//!   first built.
//! - A [`DataContext`] is one unit of work over one [`Connection`]: typed sets,
//!   raw SQL, commands with timeout and transaction control, change tracking.
//!
//! See the README for a walkthrough.

pub mod config;
pub mod connection;
pub mod context;
pub mod entity;
pub mod error;
pub mod mapping;
pub mod metrics;
pub mod model;
pub mod postgres;
pub mod raw_sql;
pub mod transaction;
pub mod value;

#[cfg(any(test, feature = "mock"))]
pub mod testing;
#[cfg(test)]
mod tests_cfg;

pub use config::ContextConfig;
pub use connection::Connection;
pub use context::{
    ChangeTracker, DataContext, DataContextBuilder, DbSet, EntityState, RawProjectionQuery,
    RawQuery, Tracked, UntrackedSet,
};
pub use entity::{Entity, FromRow, Projection, PropertyInfo};
pub use error::ContextError;
pub use mapping::{EntityTypeBuilder, EntityTypeConfiguration, QueryTypeBuilder, QueryTypeConfiguration};
pub use model::{Model, ModelBuilder};
pub use postgres::{connect, PgConnection};
pub use raw_sql::{ParameterDirection, SqlArg, SqlParameter};
pub use transaction::IsolationLevel;
pub use value::{DataRow, FromValue};

// Used by the registration macros
#[doc(hidden)]
pub use inventory;
