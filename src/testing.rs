//! In-memory scripted backend
//!
//! [`MockConnection`] implements [`Connection`] without a database. Results are
//! scripted ahead of time, every statement is recorded, and a two-stage journal
//! (pending inside a transaction, committed outside of one) makes rollbacks
//! observable.
//!
//! Clones share state, so a test can hand one clone to a context and inspect
//! the other afterwards.

use crate::connection::Connection;
use crate::error::ContextError;
use crate::transaction::IsolationLevel;
use crate::value::DataRow;
use sea_query::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A statement seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Command timeout in effect when the statement ran
    pub timeout: Option<Duration>,
    pub in_transaction: bool,
}

#[derive(Debug, Default)]
struct MockState {
    execute_results: VecDeque<Result<u64, String>>,
    query_results: VecDeque<Result<Vec<DataRow>, String>>,
    statements: Vec<ExecutedStatement>,
    pending: Vec<ExecutedStatement>,
    committed: Vec<ExecutedStatement>,
    in_transaction: bool,
    isolation_levels: Vec<IsolationLevel>,
    timeout: Option<Duration>,
    timeout_history: Vec<Option<Duration>>,
    commit_failure: Option<String>,
    begins: usize,
    commits: usize,
    rollbacks: usize,
}

/// Scripted [`Connection`] for tests
///
/// Unscripted `execute` calls report one affected row; unscripted queries
/// return no rows.
#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the affected-row count of the next `execute`
    pub fn push_execute_result(&self, rows: u64) -> &Self {
        self.state().execute_results.push_back(Ok(rows));
        self
    }

    /// Make the next `execute` fail with `message`
    pub fn push_execute_error(&self, message: impl Into<String>) -> &Self {
        self.state().execute_results.push_back(Err(message.into()));
        self
    }

    /// Queue the rows returned by the next `query`
    pub fn push_query_result(&self, rows: Vec<DataRow>) -> &Self {
        self.state().query_results.push_back(Ok(rows));
        self
    }

    pub fn push_query_error(&self, message: impl Into<String>) -> &Self {
        self.state().query_results.push_back(Err(message.into()));
        self
    }

    /// Make the next `commit` fail; the transaction is discarded as if the server aborted it
    pub fn fail_next_commit(&self, message: impl Into<String>) -> &Self {
        self.state().commit_failure = Some(message.into());
        self
    }

    /// Every statement and query, in execution order
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.state().statements.clone()
    }

    /// Statement texts, in execution order
    pub fn sql_log(&self) -> Vec<String> {
        self.state().statements.iter().map(|s| s.sql.clone()).collect()
    }

    /// `execute` statements whose effects are durable: run outside a
    /// transaction or inside one that committed
    pub fn committed_statements(&self) -> Vec<ExecutedStatement> {
        self.state().committed.clone()
    }

    pub fn timeout_history(&self) -> Vec<Option<Duration>> {
        self.state().timeout_history.clone()
    }

    pub fn isolation_levels(&self) -> Vec<IsolationLevel> {
        self.state().isolation_levels.clone()
    }

    pub fn begin_count(&self) -> usize {
        self.state().begins
    }

    pub fn commit_count(&self) -> usize {
        self.state().commits
    }

    pub fn rollback_count(&self) -> usize {
        self.state().rollbacks
    }

    fn record(state: &mut MockState, sql: &str, params: &[Value]) -> ExecutedStatement {
        let statement = ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
            timeout: state.timeout,
            in_transaction: state.in_transaction,
        };
        state.statements.push(statement.clone());
        statement
    }
}

impl Connection for MockConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ContextError> {
        let mut state = self.state();
        let statement = Self::record(&mut state, sql, params);
        match state.execute_results.pop_front().unwrap_or(Ok(1)) {
            Ok(rows) => {
                if state.in_transaction {
                    state.pending.push(statement);
                } else {
                    state.committed.push(statement);
                }
                Ok(rows)
            }
            Err(message) => Err(ContextError::execution(sql, params.len(), message)),
        }
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<DataRow>, ContextError> {
        let mut state = self.state();
        Self::record(&mut state, sql, params);
        state
            .query_results
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
            .map_err(|message| ContextError::execution(sql, params.len(), message))
    }

    fn begin(&self, isolation: IsolationLevel) -> Result<(), ContextError> {
        let mut state = self.state();
        if state.in_transaction {
            return Err(ContextError::Transaction(
                "a transaction is already open on this connection".to_string(),
            ));
        }
        state.in_transaction = true;
        state.begins += 1;
        state.isolation_levels.push(isolation);
        Ok(())
    }

    fn commit(&self) -> Result<(), ContextError> {
        let mut state = self.state();
        if !state.in_transaction {
            return Err(ContextError::Transaction("no transaction to commit".to_string()));
        }
        state.in_transaction = false;
        if let Some(message) = state.commit_failure.take() {
            state.pending.clear();
            return Err(ContextError::Transaction(format!("commit failed: {message}")));
        }
        let pending = std::mem::take(&mut state.pending);
        state.committed.extend(pending);
        state.commits += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<(), ContextError> {
        let mut state = self.state();
        if !state.in_transaction {
            return Err(ContextError::Transaction("no transaction to roll back".to_string()));
        }
        state.in_transaction = false;
        state.pending.clear();
        state.rollbacks += 1;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state().in_transaction
    }

    fn command_timeout(&self) -> Option<Duration> {
        self.state().timeout
    }

    fn set_command_timeout(&self, timeout: Option<Duration>) -> Result<(), ContextError> {
        let mut state = self.state();
        state.timeout = timeout;
        state.timeout_history.push(timeout);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_results_are_consumed_in_order() {
        let conn = MockConnection::new();
        conn.push_execute_result(3).push_execute_error("unique violation");

        assert_eq!(conn.execute("UPDATE a", &[]).unwrap(), 3);
        let err = conn.execute("UPDATE b", &[]).unwrap_err();
        assert!(err.to_string().contains("unique violation"));
        assert_eq!(conn.execute("UPDATE c", &[]).unwrap(), 1);
        assert_eq!(conn.sql_log(), vec!["UPDATE a", "UPDATE b", "UPDATE c"]);
    }

    #[test]
    fn test_failed_statements_are_not_journaled() {
        let conn = MockConnection::new();
        conn.push_execute_error("boom");
        let _ = conn.execute("DELETE FROM t", &[]);
        assert!(conn.committed_statements().is_empty());
        assert_eq!(conn.statements().len(), 1);
    }

    #[test]
    fn test_rollback_discards_pending() {
        let conn = MockConnection::new();
        conn.begin(IsolationLevel::ReadCommitted).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        conn.rollback().unwrap();
        assert!(conn.committed_statements().is_empty());
        assert_eq!(conn.rollback_count(), 1);
    }

    #[test]
    fn test_failed_commit_ends_transaction() {
        let conn = MockConnection::new();
        conn.fail_next_commit("serialization failure");
        conn.begin(IsolationLevel::Serializable).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        assert!(matches!(conn.commit(), Err(ContextError::Transaction(_))));
        assert!(!conn.in_transaction());
        assert!(conn.committed_statements().is_empty());
    }

    #[test]
    fn test_nested_begin_is_rejected() {
        let conn = MockConnection::new();
        conn.begin(IsolationLevel::ReadCommitted).unwrap();
        assert!(conn.begin(IsolationLevel::ReadCommitted).is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let conn = MockConnection::new();
        let observer = conn.clone();
        conn.execute("SELECT 1", &[]).unwrap();
        assert_eq!(observer.sql_log(), vec!["SELECT 1"]);
    }
}
