//! The data context: one unit of work over one connection.
//!
//! A [`DataContext`] owns its [`Connection`] and its [`ChangeTracker`], and
//! shares the immutable [`Model`] of its scope with every other context of
//! that scope. It is neither `Send` nor `Sync`; create one per request or job.
//!
//! Command execution follows this sequence:
//!
//! ```text
//! Idle -> TimeoutSet -> TransactionOpen -> Executed -> Committed -> TimeoutRestored -> Idle
//!                    \-> Executed directly ---------------------/
//! ```
//!
//! A failure while executing rolls the transaction back (when one was opened)
//! and still restores the timeout before the error reaches the caller.

mod raw;
mod set;
mod tracker;

pub use raw::{RawProjectionQuery, RawQuery};
pub use set::{DbSet, UntrackedSet};
pub use tracker::{ChangeTracker, EntityState, Tracked};

use crate::config::ContextConfig;
use crate::connection::Connection;
use crate::entity::{short_type_name, Entity, Projection};
use crate::error::ContextError;
use crate::mapping::{EntitySchema, ProjectionSchema, DEFAULT_SCOPE};
use crate::model::Model;
use crate::raw_sql::{append_parameter_markers, bound_values, parameter_names, SqlArg};
use crate::transaction::{CommandTimeoutScope, IsolationLevel, Transaction};
use crate::value::DataRow;
use sea_query::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Configures and builds a [`DataContext`]
pub struct DataContextBuilder {
    connection: Box<dyn Connection>,
    scope: String,
    model: Option<Arc<Model>>,
    default_command_timeout: Option<Duration>,
    isolation_level: IsolationLevel,
}

impl DataContextBuilder {
    /// Model scope to resolve; defaults to [`DEFAULT_SCOPE`]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Use an explicitly built model instead of the discovered one
    pub fn model(mut self, model: Arc<Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Command timeout applied to the connection for the life of the context
    pub fn default_command_timeout(mut self, timeout: Duration) -> Self {
        self.default_command_timeout = Some(timeout);
        self
    }

    /// Isolation level of transactions the context opens
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when the scope's model cannot be built,
    /// or the backend error if the default timeout cannot be applied.
    pub fn build(self) -> Result<DataContext, ContextError> {
        let model = match self.model {
            Some(model) => model,
            None => {
                #[cfg(feature = "tracing")]
                let _span = tracing_helpers::build_model_span(&self.scope).entered();
                Model::for_scope(&self.scope)?
            }
        };

        if let Some(timeout) = self.default_command_timeout {
            self.connection.set_command_timeout(Some(timeout))?;
        }

        log::debug!("data context opened for model scope '{}'", model.scope());
        Ok(DataContext {
            connection: self.connection,
            model,
            tracker: RefCell::new(ChangeTracker::new()),
            isolation_level: self.isolation_level,
        })
    }
}

/// Session object exposing typed sets, raw SQL, commands and change tracking
pub struct DataContext {
    connection: Box<dyn Connection>,
    model: Arc<Model>,
    tracker: RefCell<ChangeTracker>,
    isolation_level: IsolationLevel,
}

impl std::fmt::Debug for DataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("scope", &self.model.scope())
            .field("isolation_level", &self.isolation_level)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl DataContext {
    pub fn builder(connection: impl Connection + 'static) -> DataContextBuilder {
        DataContextBuilder {
            connection: Box::new(connection),
            scope: DEFAULT_SCOPE.to_string(),
            model: None,
            default_command_timeout: None,
            isolation_level: IsolationLevel::default(),
        }
    }

    /// Context over `connection` using the default scope's model
    ///
    /// # Errors
    ///
    /// See [`DataContextBuilder::build`].
    pub fn new(connection: impl Connection + 'static) -> Result<Self, ContextError> {
        Self::builder(connection).build()
    }

    /// Connect to PostgreSQL as described by `config`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Connection` if the connection fails, or any error of
    /// [`DataContextBuilder::build`].
    pub fn from_config(config: &ContextConfig) -> Result<Self, ContextError> {
        let connection = crate::postgres::connect(&config.url)?;
        let mut builder = Self::builder(connection)
            .scope(config.scope.clone())
            .isolation_level(config.isolation_level);
        if let Some(timeout) = config.default_command_timeout() {
            builder = builder.default_command_timeout(timeout);
        }
        builder.build()
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Typed access to the table of entity `E`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when `E` has no mapping in this
    /// context's model.
    pub fn set<E: Entity>(&self) -> Result<DbSet<'_, E>, ContextError> {
        let schema = self.model.entity::<E>()?;
        Ok(DbSet::new(self, schema))
    }

    /// Lazy query materializing tracked entities from raw SQL
    ///
    /// One marker per named parameter is appended to `sql` (see
    /// [`append_parameter_markers`]), so `sql` must end in a form that accepts
    /// them. Nothing runs until the query is loaded; every load runs it again.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when `E` is not mapped.
    pub fn raw_query<E: Entity>(
        &self,
        sql: &str,
        args: Vec<SqlArg>,
    ) -> Result<RawQuery<'_, E>, ContextError> {
        let schema = self.model.entity::<E>()?;
        let text = append_parameter_markers(sql, &args);
        Ok(RawQuery::new(self, schema, text, args))
    }

    /// Lazy, parameterless query materializing projection `P`; results are never tracked
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when `P` has no query mapping.
    pub fn raw_query_projection<P: Projection>(
        &self,
        sql: &str,
    ) -> Result<RawProjectionQuery<'_, P>, ContextError> {
        let schema = self.model.projection::<P>()?;
        Ok(RawProjectionQuery::new(self, schema, sql.to_string()))
    }

    /// Lazy query over the view configured for projection `P`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when `P` is not mapped or its mapping
    /// names no view.
    pub fn query<P: Projection>(&self) -> Result<RawProjectionQuery<'_, P>, ContextError> {
        let schema = self.model.projection::<P>()?;
        let view = schema.view.as_deref().ok_or_else(|| {
            ContextError::configuration(
                short_type_name::<P>(),
                "no view configured; call to_view() or use raw_query_projection()",
            )
        })?;
        let columns: Vec<&str> = schema.columns.iter().map(|c| c.column.as_str()).collect();
        let sql = format!("SELECT {} FROM {view}", columns.join(", "));
        Ok(RawProjectionQuery::new(self, schema, sql))
    }

    /// Execute `sql` for its side effects and return the affected-row count
    ///
    /// - `timeout`: `Some` overrides the command timeout for this call only; the
    ///   previous value is restored on every exit path.
    /// - `ensure_transaction`: when no transaction is active, the statement runs in
    ///   a new one that is committed on success and rolled back on failure. An
    ///   already active transaction is joined.
    ///
    /// Named parameters are referenced from `sql` as `@name`.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Execution` when the statement fails and
    /// `ContextError::Transaction` when begin or commit fails. In both cases no
    /// transaction opened by this call remains open.
    pub fn execute_command(
        &self,
        sql: &str,
        ensure_transaction: bool,
        timeout: Option<Duration>,
        args: &[SqlArg],
    ) -> Result<u64, ContextError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_command_span(sql, ensure_transaction).entered();

        let conn = self.connection.as_ref();
        let native = conn.native_sql(sql, &parameter_names(args))?;
        let values = bound_values(args);

        // Declared first, dropped last: the timeout outlives the transaction
        let _timeout = match timeout {
            Some(t) => Some(CommandTimeoutScope::enter(conn, Some(t))?),
            None => None,
        };

        if ensure_transaction && !conn.in_transaction() {
            let tx = Transaction::begin(conn, self.isolation_level)?;
            let affected = conn.execute(&native, &values)?;
            tx.commit()?;
            log::debug!("command affected {affected} row(s) in its own transaction");
            Ok(affected)
        } else {
            let affected = conn.execute(&native, &values)?;
            log::debug!("command affected {affected} row(s)");
            Ok(affected)
        }
    }

    /// Run a procedure call and return its output parameters by name
    ///
    /// Markers for every named parameter are appended to `sql`, as for
    /// [`DataContext::raw_query`]. Output and input-output values are read from
    /// the first row the call returns, by parameter name.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Execution` when the call fails and
    /// `ContextError::Materialization` when an output parameter is missing from
    /// the result.
    pub fn call_procedure(
        &self,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<HashMap<String, Value>, ContextError> {
        let text = append_parameter_markers(sql, args);
        let rows = self.fetch_rows(&text, args, "procedure")?;

        let outputs: Vec<&str> = args
            .iter()
            .filter_map(SqlArg::parameter)
            .filter(|p| p.direction().is_output())
            .map(|p| p.name())
            .collect();

        let mut values = HashMap::new();
        if outputs.is_empty() {
            return Ok(values);
        }
        let row = rows.into_iter().next().ok_or_else(|| {
            ContextError::materialization("procedure", "the call returned no row to read output parameters from")
        })?;
        for name in outputs {
            let value = row
                .columns()
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .and_then(|idx| row.value_at(idx))
                .ok_or_else(|| {
                    ContextError::materialization(
                        "procedure",
                        format!("output parameter '{name}' is not present in the result"),
                    )
                })?;
            values.insert(name.to_string(), value.clone());
        }
        Ok(values)
    }

    /// Stop tracking `entity` without touching the database
    ///
    /// Later changes to a detached entity are not saved. Detaching an entity the
    /// context does not track is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::InvalidArgument` when `entity` is `None`; tracking is
    /// left unchanged.
    pub fn detach<E: Entity>(&self, entity: Option<&Tracked<E>>) -> Result<(), ContextError> {
        let entity = entity.ok_or_else(|| {
            ContextError::InvalidArgument(format!(
                "cannot detach a null {} entity",
                short_type_name::<E>()
            ))
        })?;
        if self.tracker.borrow_mut().detach(entity) {
            log::debug!("detached {} entity", short_type_name::<E>());
        }
        Ok(())
    }

    /// Tracking state of `entity` in this context
    pub fn entry_state<E: Entity>(&self, entity: &Tracked<E>) -> EntityState {
        self.tracker.borrow().state_of(entity)
    }

    /// Number of entities currently tracked
    pub fn tracked_count(&self) -> usize {
        self.tracker.borrow().len()
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.borrow().has_changes()
    }

    /// Write every added, modified and deleted entity in one transaction
    ///
    /// Writes run in tracking order. An already active transaction is joined
    /// instead. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Execution` when a write fails or an update or delete
    /// matches no row. The transaction is rolled back and tracking is left as it
    /// was, so the save can be retried.
    pub fn save_changes(&self) -> Result<usize, ContextError> {
        let mut tracker = self.tracker.borrow_mut();
        tracker.prune();
        let writes = tracker.pending_writes(&self.model)?;
        if writes.is_empty() {
            return Ok(0);
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::save_changes_span(writes.len()).entered();

        let conn = self.connection.as_ref();
        let tx = if conn.in_transaction() {
            None
        } else {
            Some(Transaction::begin(conn, self.isolation_level)?)
        };

        let mut written = 0usize;
        let mut completed: Vec<(u64, Option<DataRow>)> = Vec::with_capacity(writes.len());
        for (id, write) in writes {
            if write.returning {
                let row = conn.query(&write.sql, &write.values)?.into_iter().next().ok_or_else(|| {
                    ContextError::execution(&write.sql, write.values.len(), "insert returned no row")
                })?;
                written += 1;
                completed.push((id, Some(row)));
            } else {
                let affected = conn.execute(&write.sql, &write.values)?;
                if affected == 0 {
                    return Err(ContextError::execution(
                        &write.sql,
                        write.values.len(),
                        "no row matched; it was changed or deleted since it was loaded",
                    ));
                }
                written += usize::try_from(affected).unwrap_or(usize::MAX);
                completed.push((id, None));
            }
        }

        if let Some(tx) = tx {
            tx.commit()?;
        }

        for (id, returned) in completed {
            let Some(type_id) = tracker.entity_type_of(id) else {
                continue;
            };
            let schema = self.model.entity_by_type(type_id)?;
            tracker.accept(id, schema, returned)?;
        }

        log::debug!("saved changes: {written} row(s) written");
        Ok(written)
    }

    /// DDL creating every table of this context's model
    pub fn generate_create_script(&self) -> String {
        self.model.generate_create_script()
    }

    /// Run a query given in `@name` form with `args` bound
    fn fetch_rows(&self, sql: &str, args: &[SqlArg], target: &str) -> Result<Vec<DataRow>, ContextError> {
        let native = self.connection.native_sql(sql, &parameter_names(args))?;
        self.run_query(&native, &bound_values(args), target)
    }

    /// Run a query already in the backend's native form
    pub(crate) fn run_query(
        &self,
        sql: &str,
        values: &[Value],
        target: &str,
    ) -> Result<Vec<DataRow>, ContextError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::query_span(sql, target).entered();

        let rows = self.connection.query(sql, values)?;
        log::trace!("query for {target} returned {} row(s)", rows.len());
        Ok(rows)
    }

    pub(crate) fn materialize_entities<E: Entity>(
        schema: &EntitySchema,
        rows: Vec<DataRow>,
    ) -> Result<Vec<E>, ContextError> {
        rows.into_iter()
            .map(|row| {
                let row = row.remap(|c| schema.property_for_column(c).map(str::to_string));
                E::from_row(&row)
            })
            .collect()
    }

    pub(crate) fn materialize_projections<P: Projection>(
        schema: &ProjectionSchema,
        rows: Vec<DataRow>,
    ) -> Result<Vec<P>, ContextError> {
        rows.into_iter()
            .map(|row| {
                let row = row.remap(|c| schema.property_for_column(c).map(str::to_string));
                P::from_row(&row)
            })
            .collect()
    }

    pub(crate) fn track_loaded<E: Entity>(&self, schema: &EntitySchema, loaded: Vec<E>) -> Vec<Tracked<E>> {
        let mut tracker = self.tracker.borrow_mut();
        loaded
            .into_iter()
            .map(|entity| tracker.track_loaded(schema, entity))
            .collect()
    }

    pub(crate) fn tracker(&self) -> &RefCell<ChangeTracker> {
        &self.tracker
    }
}

#[cfg(test)]
mod tests;
