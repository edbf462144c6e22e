//! Lazy raw SQL queries
//!
//! Building a query only prepares its text. The statement runs each time the
//! query is loaded, so iterating twice executes it twice.

use super::tracker::Tracked;
use super::DataContext;
use crate::entity::{Entity, Projection};
use crate::error::ContextError;
use crate::mapping::{EntitySchema, ProjectionSchema};
use crate::raw_sql::{bound_values, parameter_names, SqlArg};
use crate::value::DataRow;
use std::marker::PhantomData;

/// Raw SQL materializing tracked entities of type `E`
pub struct RawQuery<'c, E: Entity> {
    context: &'c DataContext,
    schema: &'c EntitySchema,
    sql: String,
    args: Vec<SqlArg>,
    _entity: PhantomData<fn() -> E>,
}

impl<'c, E: Entity> RawQuery<'c, E> {
    pub(crate) fn new(
        context: &'c DataContext,
        schema: &'c EntitySchema,
        sql: String,
        args: Vec<SqlArg>,
    ) -> Self {
        Self {
            context,
            schema,
            sql,
            args,
            _entity: PhantomData,
        }
    }

    /// Statement text with parameter markers, as it will be sent (before placeholder rewriting)
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[SqlArg] {
        &self.args
    }

    fn rows(&self) -> Result<Vec<DataRow>, ContextError> {
        let conn = self.context.connection();
        let native = conn.native_sql(&self.sql, &parameter_names(&self.args))?;
        self.context
            .run_query(&native, &bound_values(&self.args), self.schema.type_name)
    }

    /// Run the query and track the results
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Execution` when the query fails and
    /// `ContextError::Materialization` when a row does not fit `E`.
    pub fn load(&self) -> Result<Vec<Tracked<E>>, ContextError> {
        let loaded = DataContext::materialize_entities::<E>(self.schema, self.rows()?)?;
        Ok(self.context.track_loaded(self.schema, loaded))
    }

    /// Run the query and iterate over the tracked results
    ///
    /// # Errors
    ///
    /// See [`RawQuery::load`].
    pub fn iter(&self) -> Result<std::vec::IntoIter<Tracked<E>>, ContextError> {
        Ok(self.load()?.into_iter())
    }

    /// # Errors
    ///
    /// See [`RawQuery::load`].
    pub fn first(&self) -> Result<Option<Tracked<E>>, ContextError> {
        Ok(self.load()?.into_iter().next())
    }

    /// Run the query without tracking the results
    ///
    /// # Errors
    ///
    /// See [`RawQuery::load`].
    pub fn no_tracking(&self) -> Result<Vec<E>, ContextError> {
        DataContext::materialize_entities::<E>(self.schema, self.rows()?)
    }
}

/// Raw SQL materializing projection `P`
pub struct RawProjectionQuery<'c, P: Projection> {
    context: &'c DataContext,
    schema: &'c ProjectionSchema,
    sql: String,
    _projection: PhantomData<fn() -> P>,
}

impl<'c, P: Projection> RawProjectionQuery<'c, P> {
    pub(crate) fn new(context: &'c DataContext, schema: &'c ProjectionSchema, sql: String) -> Self {
        Self {
            context,
            schema,
            sql,
            _projection: PhantomData,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// # Errors
    ///
    /// Returns `ContextError::Execution` when the query fails and
    /// `ContextError::Materialization` when a row does not fit `P`.
    pub fn load(&self) -> Result<Vec<P>, ContextError> {
        let rows = self.context.run_query(&self.sql, &[], self.schema.type_name)?;
        DataContext::materialize_projections::<P>(self.schema, rows)
    }

    /// # Errors
    ///
    /// See [`RawProjectionQuery::load`].
    pub fn iter(&self) -> Result<std::vec::IntoIter<P>, ContextError> {
        Ok(self.load()?.into_iter())
    }

    /// # Errors
    ///
    /// See [`RawProjectionQuery::load`].
    pub fn first(&self) -> Result<Option<P>, ContextError> {
        Ok(self.load()?.into_iter().next())
    }
}
