//! Observability hooks
//!
//! - `METRICS` (feature `metrics`): OpenTelemetry instruments recorded through the
//!   global meter provider. Exporting is left to the application.
//! - `tracing_helpers` (feature `tracing`): spans around commands, queries and
//!   transactions.

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use std::time::Duration;

    pub static METRICS: Lazy<LifelineMetrics> = Lazy::new(LifelineMetrics::init);

    pub struct LifelineMetrics {
        pub commands_total: Counter<u64>,
        pub command_duration: Histogram<f64>,
        pub command_errors_total: Counter<u64>,
        pub queries_total: Counter<u64>,
        pub rows_materialized_total: Counter<u64>,
        pub rollbacks_total: Counter<u64>,
    }

    impl LifelineMetrics {
        pub fn init() -> Self {
            let meter = global::meter("lifeline");

            let commands_total = meter
                .u64_counter("lifeline_commands_total")
                .with_description("Total raw SQL commands executed")
                .build();

            let command_duration = meter
                .f64_histogram("lifeline_command_duration_seconds")
                .with_description("Duration of commands and queries")
                .build();

            let command_errors_total = meter
                .u64_counter("lifeline_command_errors_total")
                .with_description("Commands and queries that failed")
                .build();

            let queries_total = meter
                .u64_counter("lifeline_queries_total")
                .with_description("Total queries executed")
                .build();

            let rows_materialized_total = meter
                .u64_counter("lifeline_rows_materialized_total")
                .with_description("Rows converted into entities or projections")
                .build();

            let rollbacks_total = meter
                .u64_counter("lifeline_rollbacks_total")
                .with_description("Transactions rolled back")
                .build();

            Self {
                commands_total,
                command_duration,
                command_errors_total,
                queries_total,
                rows_materialized_total,
                rollbacks_total,
            }
        }

        pub fn record_command(&self, elapsed: Duration) {
            self.commands_total.add(1, &[]);
            self.command_duration
                .record(elapsed.as_secs_f64(), &[KeyValue::new("kind", "command")]);
        }

        pub fn record_query(&self, elapsed: Duration, rows: usize) {
            self.queries_total.add(1, &[]);
            self.rows_materialized_total.add(rows as u64, &[]);
            self.command_duration
                .record(elapsed.as_secs_f64(), &[KeyValue::new("kind", "query")]);
        }

        pub fn record_error(&self) {
            self.command_errors_total.add(1, &[]);
        }

        pub fn record_rollback(&self) {
            self.rollbacks_total.add(1, &[]);
        }
    }
}

#[cfg(feature = "metrics")]
pub use otel::{LifelineMetrics, METRICS};

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Span for a raw SQL command; records the statement text, never its values
    pub fn execute_command_span(sql: &str, ensure_transaction: bool) -> Span {
        info_span!(
            "lifeline.execute_command",
            db.statement = %sql,
            ensure_transaction = ensure_transaction
        )
    }

    pub fn query_span(sql: &str, target: &str) -> Span {
        info_span!("lifeline.query", db.statement = %sql, target = %target)
    }

    pub fn save_changes_span(entries: usize) -> Span {
        info_span!("lifeline.save_changes", entries = entries)
    }

    pub fn build_model_span(scope: &str) -> Span {
        info_span!("lifeline.build_model", scope = %scope)
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("lifeline.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("lifeline.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("lifeline.transaction.rollback")
    }
}
