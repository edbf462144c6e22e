//! Transaction Module
//!
//! Scoped resources around a [`Connection`]:
//!
//! - [`Transaction`]: begins on creation, commits explicitly, rolls back on drop
//! - [`CommandTimeoutScope`]: overrides the command timeout and restores the
//!   previous value on drop
//!
//! Both guards release their resource on every exit path, including early
//! returns through `?` and panics.

use crate::connection::Connection;
use crate::error::ContextError;
use serde::Deserialize;
use std::time::Duration;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Read uncommitted (PostgreSQL treats it as ReadCommitted)
    ReadUncommitted,
    /// Read committed (default)
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// PostgreSQL syntax for `SET TRANSACTION ISOLATION LEVEL`
    pub fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A transaction opened on a connection
///
/// Dropping an uncommitted transaction rolls it back. A rollback failure during
/// drop is logged; callers that need to observe it call [`Transaction::rollback`].
pub struct Transaction<'c> {
    conn: &'c dyn Connection,
    closed: bool,
}

impl<'c> Transaction<'c> {
    /// Begin a new transaction on `conn`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Transaction` if the connection cannot begin one.
    pub fn begin(conn: &'c dyn Connection, isolation: IsolationLevel) -> Result<Self, ContextError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        conn.begin(isolation)?;
        log::debug!("transaction opened ({})", isolation.to_sql());
        Ok(Self { conn, closed: false })
    }

    /// Commit; on failure the transaction is rolled back by the drop guard
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Transaction` if `COMMIT` fails.
    pub fn commit(mut self) -> Result<(), ContextError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();

        self.conn.commit()?;
        self.closed = true;
        log::debug!("transaction committed");
        Ok(())
    }

    /// Roll back explicitly and observe the outcome
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Transaction` if `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), ContextError> {
        self.closed = true;
        self.rollback_inner()
    }

    fn rollback_inner(&self) -> Result<(), ContextError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();
        #[cfg(feature = "metrics")]
        METRICS.record_rollback();

        self.conn.rollback()?;
        log::debug!("transaction rolled back");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // The connection may already have ended the transaction (failed COMMIT)
        if !self.conn.in_transaction() {
            return;
        }
        if let Err(e) = self.rollback_inner() {
            log::error!("rollback of abandoned transaction failed: {e}");
        }
    }
}

/// Temporarily overrides a connection's command timeout
///
/// The previous timeout is restored when the scope is dropped.
pub struct CommandTimeoutScope<'c> {
    conn: &'c dyn Connection,
    previous: Option<Duration>,
}

impl<'c> CommandTimeoutScope<'c> {
    /// Set `timeout` on `conn` until the returned scope is dropped
    ///
    /// # Errors
    ///
    /// Returns the backend error if the timeout cannot be set; nothing needs
    /// restoring in that case.
    pub fn enter(conn: &'c dyn Connection, timeout: Option<Duration>) -> Result<Self, ContextError> {
        let previous = conn.command_timeout();
        conn.set_command_timeout(timeout)?;
        Ok(Self { conn, previous })
    }

    pub fn previous(&self) -> Option<Duration> {
        self.previous
    }
}

impl Drop for CommandTimeoutScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.set_command_timeout(self.previous) {
            log::error!("failed to restore command timeout to {:?}: {e}", self.previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;

    #[test]
    fn test_isolation_level_to_sql() {
        assert_eq!(IsolationLevel::ReadUncommitted.to_sql(), "READ UNCOMMITTED");
        assert_eq!(IsolationLevel::ReadCommitted.to_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.to_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::Serializable.to_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_isolation_level_default_is_read_committed() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_commit_applies_pending_statements() {
        let conn = MockConnection::new();
        let tx = Transaction::begin(&conn, IsolationLevel::ReadCommitted).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        assert!(conn.committed_statements().is_empty());
        tx.commit().unwrap();
        assert_eq!(conn.committed_statements().len(), 1);
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_drop_rolls_back() {
        let conn = MockConnection::new();
        {
            let _tx = Transaction::begin(&conn, IsolationLevel::ReadCommitted).unwrap();
            conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        }
        assert!(conn.committed_statements().is_empty());
        assert_eq!(conn.rollback_count(), 1);
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_explicit_rollback_does_not_roll_back_twice() {
        let conn = MockConnection::new();
        let tx = Transaction::begin(&conn, IsolationLevel::Serializable).unwrap();
        tx.rollback().unwrap();
        assert_eq!(conn.rollback_count(), 1);
    }

    #[test]
    fn test_timeout_scope_restores_previous() {
        let conn = MockConnection::new();
        conn.set_command_timeout(Some(Duration::from_secs(30))).unwrap();
        {
            let scope = CommandTimeoutScope::enter(&conn, Some(Duration::from_secs(2))).unwrap();
            assert_eq!(scope.previous(), Some(Duration::from_secs(30)));
            assert_eq!(conn.command_timeout(), Some(Duration::from_secs(2)));
        }
        assert_eq!(conn.command_timeout(), Some(Duration::from_secs(30)));
    }
}
