//! Typed table access for one entity type.

use super::tracker::{key_identity, sql::table_ref, Tracked};
use super::DataContext;
use crate::entity::Entity;
use crate::error::ContextError;
use crate::mapping::EntitySchema;
use crate::value::FromValue;
use sea_query::{Alias, Expr, ExprTrait, PostgresQueryBuilder, Query, SelectStatement, Value};
use std::marker::PhantomData;

/// Handle over the table of entity `E`
///
/// Entities loaded through a set are tracked; loading a row whose key is
/// already tracked returns the tracked instance.
pub struct DbSet<'c, E: Entity> {
    context: &'c DataContext,
    schema: &'c EntitySchema,
    _entity: PhantomData<fn() -> E>,
}

impl<'c, E: Entity> DbSet<'c, E> {
    pub(crate) fn new(context: &'c DataContext, schema: &'c EntitySchema) -> Self {
        Self {
            context,
            schema,
            _entity: PhantomData,
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        self.schema
    }

    /// Entity with the given single-column key
    ///
    /// Tracked instances are returned without a round trip.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::InvalidArgument` when the key is composite, or the
    /// query or materialization error.
    pub fn find(&self, key: impl Into<Value>) -> Result<Option<Tracked<E>>, ContextError> {
        self.find_by_key(vec![key.into()])
    }

    /// Entity with the given key values, in key order
    ///
    /// # Errors
    ///
    /// Returns `ContextError::InvalidArgument` when the number of values does not
    /// match the key.
    pub fn find_by_key(&self, key: Vec<Value>) -> Result<Option<Tracked<E>>, ContextError> {
        let refs: Vec<&Value> = key.iter().collect();
        let identity = key_identity::<E>(&refs);
        if let Some(tracked) = self.context.tracker().borrow_mut().lookup::<E>(&identity) {
            return Ok(Some(tracked));
        }

        let query = key_query(self.schema, key)?;
        let loaded = load::<E>(self.context, self.schema, &query)?;
        Ok(self.context.track_loaded(self.schema, loaded).into_iter().next())
    }

    /// Every row of the table
    ///
    /// # Errors
    ///
    /// Returns the query or materialization error.
    pub fn all(&self) -> Result<Vec<Tracked<E>>, ContextError> {
        let loaded = load::<E>(self.context, self.schema, &select(self.schema))?;
        Ok(self.context.track_loaded(self.schema, loaded))
    }

    /// Rows whose `property` equals `value`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::InvalidArgument` for an unmapped property, or the
    /// query or materialization error.
    pub fn filter_eq(
        &self,
        property: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<Tracked<E>>, ContextError> {
        let query = filter_query(self.schema, property, value.into())?;
        let loaded = load::<E>(self.context, self.schema, &query)?;
        Ok(self.context.track_loaded(self.schema, loaded))
    }

    /// Number of rows in the table
    ///
    /// # Errors
    ///
    /// Returns the query error, or `ContextError::Materialization` if the count
    /// cannot be read.
    pub fn count(&self) -> Result<i64, ContextError> {
        let mut query = Query::select();
        query.expr(Expr::cust("COUNT(*)")).from(table_ref(self.schema));
        let (sql, values) = query.build(PostgresQueryBuilder);

        let rows = self.context.run_query(&sql, &values.0, self.schema.type_name)?;
        let value = rows
            .first()
            .and_then(|row| row.value_at(0))
            .ok_or_else(|| {
                ContextError::materialization(self.schema.type_name, "COUNT(*) returned no row")
            })?;
        i64::from_value(value)
            .map_err(|e| ContextError::materialization(self.schema.type_name, e.to_string()))
    }

    /// Track `entity` for insertion by the next save
    pub fn add(&self, entity: E) -> Tracked<E> {
        self.context.tracker().borrow_mut().track_added(entity)
    }

    /// Track `entity` as an existing, unchanged row
    ///
    /// # Errors
    ///
    /// Returns `ContextError::InvalidArgument` when another instance with the same
    /// key is already tracked.
    pub fn attach(&self, entity: E) -> Result<Tracked<E>, ContextError> {
        self.context
            .tracker()
            .borrow_mut()
            .track_attached(self.schema, entity)
    }

    /// Mark `entity` for deletion by the next save
    ///
    /// # Errors
    ///
    /// Returns `ContextError::InvalidArgument` when the entity is not tracked.
    pub fn remove(&self, entity: &Tracked<E>) -> Result<(), ContextError> {
        self.context.tracker().borrow_mut().mark_deleted(entity)
    }

    /// Entities of this type the context currently tracks
    pub fn local(&self) -> Vec<Tracked<E>> {
        self.context.tracker().borrow().entities::<E>()
    }

    /// Reads that bypass change tracking
    pub fn no_tracking(&self) -> UntrackedSet<'c, E> {
        UntrackedSet {
            context: self.context,
            schema: self.schema,
            _entity: PhantomData,
        }
    }
}

/// Read-only view of a [`DbSet`]; results are plain values, never tracked
pub struct UntrackedSet<'c, E: Entity> {
    context: &'c DataContext,
    schema: &'c EntitySchema,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> UntrackedSet<'_, E> {
    /// # Errors
    ///
    /// See [`DbSet::find`].
    pub fn find(&self, key: impl Into<Value>) -> Result<Option<E>, ContextError> {
        let query = key_query(self.schema, vec![key.into()])?;
        Ok(load::<E>(self.context, self.schema, &query)?.into_iter().next())
    }

    /// # Errors
    ///
    /// See [`DbSet::all`].
    pub fn all(&self) -> Result<Vec<E>, ContextError> {
        load::<E>(self.context, self.schema, &select(self.schema))
    }

    /// # Errors
    ///
    /// See [`DbSet::filter_eq`].
    pub fn filter_eq(&self, property: &str, value: impl Into<Value>) -> Result<Vec<E>, ContextError> {
        let query = filter_query(self.schema, property, value.into())?;
        load::<E>(self.context, self.schema, &query)
    }
}

fn select(schema: &EntitySchema) -> SelectStatement {
    let mut query = Query::select();
    query
        .columns(schema.columns.iter().map(|c| Alias::new(c.column.clone())))
        .from(table_ref(schema));
    query
}

fn key_query(schema: &EntitySchema, key: Vec<Value>) -> Result<SelectStatement, ContextError> {
    let columns = schema.key_columns();
    if columns.len() != key.len() {
        return Err(ContextError::InvalidArgument(format!(
            "{} has a key of {} column(s), {} value(s) given",
            schema.type_name,
            columns.len(),
            key.len()
        )));
    }
    let mut query = select(schema);
    for (column, value) in columns.into_iter().zip(key) {
        query.and_where(Expr::col(Alias::new(column.to_string())).eq(value));
    }
    Ok(query)
}

fn filter_query(schema: &EntitySchema, property: &str, value: Value) -> Result<SelectStatement, ContextError> {
    let column = schema.column_for(property).ok_or_else(|| {
        ContextError::InvalidArgument(format!(
            "{} has no mapped property '{property}'",
            schema.type_name
        ))
    })?;
    let mut query = select(schema);
    query.and_where(Expr::col(Alias::new(column.column.clone())).eq(value));
    Ok(query)
}

fn load<E: Entity>(
    context: &DataContext,
    schema: &EntitySchema,
    query: &SelectStatement,
) -> Result<Vec<E>, ContextError> {
    let (sql, values) = query.build(PostgresQueryBuilder);
    let rows = context.run_query(&sql, &values.0, schema.type_name)?;
    DataContext::materialize_entities::<E>(schema, rows)
}
