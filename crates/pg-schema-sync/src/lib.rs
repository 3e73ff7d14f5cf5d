//! # pg-schema-sync
//!
//! Declarative schema reconciliation for PostgreSQL.
//!
//! This library compares a set of entity descriptors against the live
//! database schema and applies the ordered DDL that brings the two in
//! line, with support for:
//!
//! - **Idempotent runs**: a second run over an unchanged schema plans
//!   nothing
//! - **Non-destructive defaults**: columns are never dropped without an
//!   explicit opt-in
//! - **Deferred foreign keys**: constraints are added after every table
//!   exists, so reference cycles reconcile cleanly
//! - **Capability checks**: changes a backend cannot apply in place fail
//!   at planning time with a remediation hint
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_schema_sync::{schema_file, Config, Reconciler};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pg_schema_sync::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let targets = schema_file::load("schema.yaml")?;
//!     let reconciler = Reconciler::new(config).await?;
//!     let report = reconciler
//!         .reconcile(&targets, false, CancellationToken::new())
//!         .await?;
//!     println!("Applied {} operations", report.operations_applied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod dialect;
pub mod diff;
pub mod error;
pub mod executor;
pub mod introspect;
pub mod reconciler;
pub mod schema_file;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, ReconcileOptions};
pub use descriptor::{
    ColumnDescriptor, EntityBuilder, EntityDescriptor, ForeignKeyDescriptor, IndexDescriptor,
    IntWidth, RefAction, SchemaSnapshot, SemanticType,
};
pub use dialect::{Capability, Dialect, PostgresDialect};
pub use diff::{ChangeOperation, DiffEngine};
pub use error::{Result, SyncError};
pub use executor::{ApplyReport, Executor};
pub use introspect::Introspector;
pub use reconciler::{PlanReport, ReconcileReport, Reconciler};
