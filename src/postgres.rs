//! PostgreSQL backend over `may_postgres`
//!
//! [`PgConnection`] wraps a single `may_postgres::Client`. Calls block the
//! current coroutine, not the OS thread, so contexts are meant to run inside
//! `may` coroutines.

use crate::connection::{validate_connection_string, Connection};
use crate::error::ContextError;
use crate::raw_sql::rewrite_named_placeholders;
use crate::transaction::IsolationLevel;
use crate::value::DataRow;
use may_postgres::types::{ToSql, Type};
use may_postgres::{Client, Row};
use sea_query::Value;
use std::cell::Cell;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Open a connection
///
/// # Errors
///
/// Returns `ContextError::Connection` if the string is malformed or the server
/// cannot be reached.
pub fn connect(connection_string: &str) -> Result<PgConnection, ContextError> {
    validate_connection_string(connection_string)?;

    let start = Instant::now();
    let client = may_postgres::connect(connection_string)
        .map_err(|e| ContextError::Connection(format!("could not connect: {e}")))?;
    log::debug!("connected to PostgreSQL in {:?}", start.elapsed());

    Ok(PgConnection::new(client))
}

/// Last `statement_timeout` the session is known to run with
///
/// A plain `SET` inside a transaction is undone by `ROLLBACK`, and a failed
/// `SET` leaves the server value unknown. Either way the next request has to
/// reach the server instead of being answered from here.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SessionTimeout {
    value: Option<Duration>,
    known: bool,
    /// State when the current transaction began
    at_begin: Option<(Option<Duration>, bool)>,
}

impl SessionTimeout {
    fn new() -> Self {
        Self {
            value: None,
            known: true,
            at_begin: None,
        }
    }

    fn is_current(&self, requested: Option<Duration>) -> bool {
        self.known && self.value == requested
    }

    fn applied(&mut self, value: Option<Duration>) {
        self.value = value;
        self.known = true;
    }

    fn failed(&mut self) {
        self.known = false;
    }

    fn begun(&mut self) {
        self.at_begin = Some((self.value, self.known));
    }

    fn committed(&mut self) {
        self.at_begin = None;
    }

    /// The server is back to the value it had at `BEGIN`
    fn rolled_back(&mut self) {
        if let Some((value, known)) = self.at_begin.take() {
            self.value = value;
            self.known = known;
        }
    }
}

/// `SET statement_timeout` argument in milliseconds
///
/// Rounded up, and never 0: the server reads 0 as "no limit".
fn statement_timeout_millis(timeout: Duration) -> u128 {
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    millis.max(1)
}

/// A [`Connection`] backed by one PostgreSQL session
pub struct PgConnection {
    client: Client,
    timeout: Cell<SessionTimeout>,
    in_transaction: Cell<bool>,
}

impl PgConnection {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: Cell::new(SessionTimeout::new()),
            in_transaction: Cell::new(false),
        }
    }

    fn update_timeout(&self, f: impl FnOnce(&mut SessionTimeout)) {
        let mut state = self.timeout.get();
        f(&mut state);
        self.timeout.set(state);
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn into_client(self) -> Client {
        self.client
    }

    /// Run a control statement (transaction or session setting) without parameters
    fn control(&self, sql: &str) -> Result<(), ContextError> {
        self.client
            .execute(sql, &[])
            .map(|_| ())
            .map_err(|e| ContextError::execution(sql, 0, e.to_string()))
    }
}

impl Connection for PgConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ContextError> {
        let start = Instant::now();
        let bound = to_sql_params(params)?;
        let refs: Vec<&dyn ToSql> = bound.iter().map(|b| b.as_ref() as &dyn ToSql).collect();

        let result = self.client.execute(sql, &refs).map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_error();
            ContextError::execution(sql, params.len(), e.to_string())
        });

        #[cfg(feature = "metrics")]
        METRICS.record_command(start.elapsed());
        log::trace!("executed in {:?}", start.elapsed());

        result
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<DataRow>, ContextError> {
        let start = Instant::now();
        let bound = to_sql_params(params)?;
        let refs: Vec<&dyn ToSql> = bound.iter().map(|b| b.as_ref() as &dyn ToSql).collect();

        let rows = self.client.query(sql, &refs).map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_error();
            ContextError::execution(sql, params.len(), e.to_string())
        })?;

        let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;

        #[cfg(feature = "metrics")]
        METRICS.record_query(start.elapsed(), decoded.len());
        log::trace!("queried {} row(s) in {:?}", decoded.len(), start.elapsed());

        Ok(decoded)
    }

    fn begin(&self, isolation: IsolationLevel) -> Result<(), ContextError> {
        if self.in_transaction.get() {
            return Err(ContextError::Transaction(
                "a transaction is already open on this connection".to_string(),
            ));
        }
        self.control("BEGIN")
            .map_err(|e| ContextError::Transaction(format!("BEGIN failed: {e}")))?;
        self.in_transaction.set(true);
        self.update_timeout(SessionTimeout::begun);

        if isolation != IsolationLevel::default() {
            let set = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.to_sql());
            if let Err(e) = self.control(&set) {
                let _ = self.control("ROLLBACK");
                self.in_transaction.set(false);
                self.update_timeout(SessionTimeout::rolled_back);
                return Err(ContextError::Transaction(format!("failed to set isolation level: {e}")));
            }
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), ContextError> {
        if !self.in_transaction.get() {
            return Err(ContextError::Transaction("no transaction to commit".to_string()));
        }
        // A failed COMMIT still ends the transaction on the server, as a rollback
        self.in_transaction.set(false);
        match self.control("COMMIT") {
            Ok(()) => {
                self.update_timeout(SessionTimeout::committed);
                Ok(())
            }
            Err(e) => {
                self.update_timeout(SessionTimeout::rolled_back);
                Err(ContextError::Transaction(format!("COMMIT failed: {e}")))
            }
        }
    }

    fn rollback(&self) -> Result<(), ContextError> {
        if !self.in_transaction.get() {
            return Err(ContextError::Transaction("no transaction to roll back".to_string()));
        }
        self.in_transaction.set(false);
        let result = self
            .control("ROLLBACK")
            .map_err(|e| ContextError::Transaction(format!("ROLLBACK failed: {e}")));
        self.update_timeout(SessionTimeout::rolled_back);
        if result.is_err() {
            self.update_timeout(SessionTimeout::failed);
        }
        result
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    fn command_timeout(&self) -> Option<Duration> {
        self.timeout.get().value
    }

    fn set_command_timeout(&self, timeout: Option<Duration>) -> Result<(), ContextError> {
        if self.timeout.get().is_current(timeout) {
            return Ok(());
        }
        let result = match timeout {
            Some(t) => self.control(&format!(
                "SET statement_timeout = {}",
                statement_timeout_millis(t)
            )),
            None => self.control("RESET statement_timeout"),
        };
        match result {
            Ok(()) => self.update_timeout(|s| s.applied(timeout)),
            Err(_) => self.update_timeout(SessionTimeout::failed),
        }
        result
    }

    fn native_sql(&self, sql: &str, parameter_names: &[Option<&str>]) -> Result<String, ContextError> {
        if parameter_names.iter().all(Option::is_none) && !sql.contains('@') {
            return Ok(sql.to_string());
        }
        rewrite_named_placeholders(sql, parameter_names)
    }
}

/// Convert values into owned `ToSql` parameters
///
/// Nulls keep their type (`Value::Int(None)` binds as a null `int4`), so the
/// server can infer parameter types for untyped placeholders.
fn to_sql_params(values: &[Value]) -> Result<Vec<Box<dyn ToSql>>, ContextError> {
    values.iter().map(to_sql_param).collect()
}

fn to_sql_param(value: &Value) -> Result<Box<dyn ToSql>, ContextError> {
    let boxed: Box<dyn ToSql> = match value {
        Value::Bool(v) => Box::new(*v),
        Value::TinyInt(v) => Box::new(v.map(i16::from)),
        Value::SmallInt(v) => Box::new(*v),
        Value::Int(v) => Box::new(*v),
        Value::BigInt(v) => Box::new(*v),
        Value::TinyUnsigned(v) => Box::new(v.map(i16::from)),
        Value::SmallUnsigned(v) => Box::new(v.map(i32::from)),
        Value::Unsigned(v) => Box::new(v.map(i64::from)),
        Value::BigUnsigned(v) => {
            let converted = v
                .map(|u| {
                    i64::try_from(u).map_err(|_| {
                        ContextError::InvalidArgument(format!(
                            "BigUnsigned value {u} exceeds i64::MAX and cannot be bound"
                        ))
                    })
                })
                .transpose()?;
            Box::new(converted)
        }
        Value::Float(v) => Box::new(*v),
        Value::Double(v) => Box::new(*v),
        Value::String(v) => Box::new(v.as_ref().map(|x| String::clone(x))),
        Value::Char(v) => Box::new(v.map(|c| c.to_string())),
        Value::Bytes(v) => Box::new(v.as_ref().map(|x| Vec::<u8>::clone(x))),
        Value::Json(v) => Box::new(v.as_ref().map(|j| serde_json::Value::clone(j))),
        Value::Uuid(v) => Box::new(v.as_ref().map(|x| uuid::Uuid::clone(x))),
        Value::ChronoDate(v) => Box::new(v.as_ref().map(|x| chrono::NaiveDate::clone(x))),
        Value::ChronoTime(v) => Box::new(v.as_ref().map(|x| chrono::NaiveTime::clone(x))),
        Value::ChronoDateTime(v) => Box::new(v.as_ref().map(|x| chrono::NaiveDateTime::clone(x))),
        Value::ChronoDateTimeUtc(v) => {
            Box::new(v.as_ref().map(|x| chrono::DateTime::<chrono::Utc>::clone(x)))
        }
        Value::Decimal(v) => Box::new(v.as_ref().map(|x| rust_decimal::Decimal::clone(x))),
        other => {
            return Err(ContextError::InvalidArgument(format!(
                "unsupported parameter value: {other:?}"
            )))
        }
    };
    Ok(boxed)
}

/// Decode one row by column type into a [`DataRow`]
fn decode_row(row: &Row) -> Result<DataRow, ContextError> {
    let mut out = DataRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_()).map_err(|message| {
            ContextError::materialization(column.name(), message)
        })?;
        out.push(column.name(), value);
    }
    Ok(out)
}

fn decode_column(row: &Row, idx: usize, ty: &Type) -> Result<Value, String> {
    macro_rules! get {
        ($t:ty) => {
            row.try_get::<_, Option<$t>>(idx).map_err(|e| e.to_string())?
        };
    }

    let value = match *ty {
        Type::BOOL => Value::from(get!(bool)),
        Type::INT2 => Value::from(get!(i16)),
        Type::INT4 => Value::from(get!(i32)),
        Type::INT8 => Value::from(get!(i64)),
        Type::FLOAT4 => Value::from(get!(f32)),
        Type::FLOAT8 => Value::from(get!(f64)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Value::from(get!(String)),
        Type::BYTEA => Value::from(get!(Vec<u8>)),
        Type::UUID => Value::from(get!(uuid::Uuid)),
        Type::JSON | Type::JSONB => Value::from(get!(serde_json::Value)),
        Type::DATE => Value::from(get!(chrono::NaiveDate)),
        Type::TIME => Value::from(get!(chrono::NaiveTime)),
        Type::TIMESTAMP => Value::from(get!(chrono::NaiveDateTime)),
        Type::TIMESTAMPTZ => Value::from(get!(chrono::DateTime<chrono::Utc>)),
        Type::NUMERIC => Value::from(get!(rust_decimal::Decimal)),
        ref other => return Err(format!("unsupported column type {other}")),
    };
    Ok(value)
}
