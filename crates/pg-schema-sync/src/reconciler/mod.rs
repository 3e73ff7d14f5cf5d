//! Reconciler: ties introspection, diffing, and execution into one run.

use crate::config::Config;
use crate::descriptor::EntityDescriptor;
use crate::dialect::{Dialect, PostgresDialect};
use crate::diff::{ChangeOperation, DiffEngine};
use crate::error::{Result, SyncError};
use crate::executor::Executor;
use crate::introspect::Introspector;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Result of a reconciliation run, serializable for automation.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub run_id: String,
    pub status: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub tables_total: usize,
    pub operations_planned: usize,
    pub operations_applied: usize,
    pub statements: Vec<String>,
}

impl ReconcileReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A computed plan with its rendered DDL, serializable for automation.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub operations: Vec<String>,
    pub statements: Vec<String>,
}

impl PlanReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Render the DDL for a plan, in execution order.
pub fn render_statements(dialect: &dyn Dialect, ops: &[ChangeOperation]) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for op in ops {
        statements.extend(dialect.render_ddl(op)?);
    }
    Ok(statements)
}

/// Drives a reconciliation run against one database.
pub struct Reconciler {
    config: Config,
    pool: Pool,
    dialect: PostgresDialect,
}

impl Reconciler {
    /// Connect to the database described by the configuration.
    pub async fn new(config: Config) -> Result<Self> {
        let pool = config.database.build_pool().await?;
        let dialect = PostgresDialect::new(config.database.schema.clone());
        Ok(Self {
            config,
            pool,
            dialect,
        })
    }

    /// Verify connectivity and schema visibility without changing anything.
    pub async fn health_check(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting connection for health check"))?;
        let row = client
            .query_one(
                "SELECT COUNT(*)::int8 FROM information_schema.tables WHERE table_schema = $1",
                &[&self.config.database.schema],
            )
            .await
            .map_err(|e| SyncError::introspection(format!("health check query: {}", e)))?;
        let tables: i64 = row.get(0);
        info!(
            schema = %self.config.database.schema,
            tables,
            "health check passed"
        );
        Ok(())
    }

    /// Reject descriptor sets that are inconsistent as a whole before any
    /// database work happens. Per-entity validation already ran in the
    /// builder.
    fn validate_targets(targets: &[EntityDescriptor]) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entity in targets {
            if !seen.insert(entity.table.as_str()) {
                return Err(SyncError::invalid_descriptor(
                    &entity.table,
                    "table appears more than once in the target set",
                ));
            }
        }
        Ok(())
    }

    /// Plan the operations that would reconcile the schema, without
    /// applying them.
    pub async fn plan(&self, targets: &[EntityDescriptor]) -> Result<Vec<ChangeOperation>> {
        Self::validate_targets(targets)?;
        let introspector = Introspector::new(
            &self.pool,
            &self.config.database.schema,
            &self.dialect,
        );
        let snapshot = introspector.snapshot().await?;
        let engine = DiffEngine::new(&self.dialect, &self.config.reconcile);
        engine.plan(targets, &snapshot)
    }

    /// Summarize a plan and render its DDL without executing anything.
    pub fn describe(&self, ops: &[ChangeOperation]) -> Result<PlanReport> {
        Ok(PlanReport {
            operations: ops.iter().map(|op| op.summary()).collect(),
            statements: render_statements(&self.dialect, ops)?,
        })
    }

    /// Run a full reconciliation: snapshot, plan, apply.
    ///
    /// With `dry_run` the plan is computed and reported but nothing is
    /// executed.
    pub async fn reconcile(
        &self,
        targets: &[EntityDescriptor],
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Result<ReconcileReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting reconciliation run: {}", run_id);

        info!("Phase 1+2: Introspecting current schema and planning changes");
        let ops = self.plan(targets).await?;
        info!("Planned {} operations", ops.len());
        for (i, op) in ops.iter().enumerate() {
            info!("  {}. {}", i + 1, op.summary());
        }

        let (applied, statements, status) = if dry_run {
            info!("Dry run: skipping execution");
            (0, render_statements(&self.dialect, &ops)?, "planned")
        } else {
            info!("Phase 3: Applying changes");
            let executor = Executor::new(
                &self.pool,
                &self.dialect,
                self.config.database.statement_timeout_secs,
                cancel,
            );
            let report = executor.apply(&ops).await?;
            (report.applied, report.statements, "completed")
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let report = ReconcileReport {
            run_id,
            status: status.to_string(),
            dry_run,
            started_at,
            completed_at,
            duration_seconds: duration,
            tables_total: targets.len(),
            operations_planned: ops.len(),
            operations_applied: applied,
            statements,
        };

        info!(
            "Reconciliation {}: {} tables, {}/{} operations in {:.1}s",
            report.status,
            report.tables_total,
            report.operations_applied,
            report.operations_planned,
            report.duration_seconds
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ColumnDescriptor, EntityBuilder, IntWidth, SemanticType};

    #[test]
    fn test_duplicate_target_tables_rejected() {
        let entity = EntityBuilder::new("users")
            .column(
                ColumnDescriptor::new("id", SemanticType::Integer { width: IntWidth::Big })
                    .primary_key(),
            )
            .build()
            .unwrap();
        let err = Reconciler::validate_targets(&[entity.clone(), entity]).unwrap_err();
        assert!(matches!(err, SyncError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_render_statements_flattens_in_execution_order() {
        let dialect = PostgresDialect::new("public");
        let users = EntityBuilder::new("users")
            .column(
                ColumnDescriptor::new("id", SemanticType::Integer { width: IntWidth::Big })
                    .primary_key(),
            )
            .build()
            .unwrap();
        let ops = vec![
            ChangeOperation::CreateTable(users),
            ChangeOperation::AddColumn {
                table: "users".to_string(),
                column: ColumnDescriptor::new(
                    "status",
                    SemanticType::Enumerated {
                        values: vec!["active".to_string(), "disabled".to_string()],
                    },
                ),
            },
        ];

        let statements = render_statements(&dialect, &ops).unwrap();
        // The enum column expands to two statements, so the plan of two
        // operations renders three statements in order.
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS"));
        assert!(statements[1].contains("ADD COLUMN IF NOT EXISTS \"status\""));
        assert!(statements[2].contains("chk_users_status_enum"));
    }

    #[test]
    fn test_plan_report_pairs_summaries_with_statements() {
        let report = PlanReport {
            operations: vec!["create table users".to_string()],
            statements: vec!["CREATE TABLE IF NOT EXISTS \"public\".\"users\"".to_string()],
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"operations\""));
        assert!(json.contains("\"statements\""));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let now = Utc::now();
        let report = ReconcileReport {
            run_id: "test-run".to_string(),
            status: "completed".to_string(),
            dry_run: false,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.2,
            tables_total: 2,
            operations_planned: 3,
            operations_applied: 3,
            statements: vec!["CREATE TABLE x".to_string()],
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"run_id\": \"test-run\""));
        assert!(json.contains("\"operations_applied\": 3"));
    }
}
