//! Migration executor: applies a planned operation list against the
//! database, in order, one statement at a time.
//!
//! Execution is deliberately not wrapped in one big transaction: several
//! backends auto-commit DDL anyway, and a partial failure leaves the schema
//! in a state the next run re-introspects and resumes from. The error for a
//! failed operation records its position so operators can see exactly what
//! was and was not applied.

use crate::diff::ChangeOperation;
use crate::dialect::Dialect;
use crate::error::{Result, SyncError};
use deadpool_postgres::Pool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of applying a plan.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// Number of operations applied.
    pub applied: usize,
    /// Every DDL statement executed, in order.
    pub statements: Vec<String>,
}

/// Applies change operations sequentially.
pub struct Executor<'a> {
    pool: &'a Pool,
    dialect: &'a dyn Dialect,
    statement_timeout_secs: u64,
    cancel: CancellationToken,
}

impl<'a> Executor<'a> {
    pub fn new(
        pool: &'a Pool,
        dialect: &'a dyn Dialect,
        statement_timeout_secs: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            dialect,
            statement_timeout_secs,
            cancel,
        }
    }

    /// Apply every operation in order. Stops at the first failure or at
    /// cancellation; already-applied operations are left in place.
    pub async fn apply(&self, ops: &[ChangeOperation]) -> Result<ApplyReport> {
        if self.cancel.is_cancelled() {
            info!("cancellation requested, skipping execution");
            return Err(SyncError::Cancelled);
        }

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting connection for executor"))?;

        if let Some(set) = timeout_statement(self.statement_timeout_secs) {
            client
                .batch_execute(&set)
                .await
                .map_err(|e| SyncError::pool(e, "setting statement timeout"))?;
        }

        let mut statements = Vec::new();
        let mut applied = 0;

        for (idx, op) in ops.iter().enumerate() {
            let position = idx + 1;
            if self.cancel.is_cancelled() {
                info!(
                    applied,
                    remaining = ops.len() - applied,
                    "cancellation requested, stopping before next operation"
                );
                return Err(SyncError::Cancelled);
            }

            info!(position, total = ops.len(), "{}", op.summary());
            for stmt in self.dialect.render_ddl(op)? {
                debug!(ddl = %stmt, "executing");
                client
                    .batch_execute(&stmt)
                    .await
                    .map_err(|source| SyncError::Execution {
                        position,
                        operation: op.summary(),
                        source,
                    })?;
                statements.push(stmt);
            }
            applied += 1;
        }

        Ok(ApplyReport {
            applied,
            statements,
        })
    }
}

/// Session timeout statement, or `None` when timeouts are disabled (0).
fn timeout_statement(secs: u64) -> Option<String> {
    if secs == 0 {
        return None;
    }
    Some(format!("SET statement_timeout = '{}s'", secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ColumnDescriptor, EntityBuilder, IntWidth, SemanticType};
    use crate::dialect::PostgresDialect;
    use deadpool_postgres::{Manager, ManagerConfig, RecyclingMethod};
    use tokio_postgres::NoTls;

    #[test]
    fn test_timeout_statement_formatting() {
        assert_eq!(
            timeout_statement(300).as_deref(),
            Some("SET statement_timeout = '300s'")
        );
        assert_eq!(timeout_statement(0), None);
    }

    // A pool over an unreachable address; fine as long as no connection is
    // ever requested.
    fn unconnected_pool() -> Pool {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host("127.0.0.1")
            .port(1)
            .user("nobody")
            .dbname("nowhere");
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        Pool::builder(manager).max_size(1).build().unwrap()
    }

    #[tokio::test]
    async fn test_apply_refuses_to_start_when_already_cancelled() {
        let pool = unconnected_pool();
        let dialect = PostgresDialect::new("public");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let executor = Executor::new(&pool, &dialect, 300, cancel);
        let users = EntityBuilder::new("users")
            .column(
                ColumnDescriptor::new("id", SemanticType::Integer { width: IntWidth::Big })
                    .primary_key(),
            )
            .build()
            .unwrap();
        let ops = vec![ChangeOperation::CreateTable(users)];

        let err = executor.apply(&ops).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
