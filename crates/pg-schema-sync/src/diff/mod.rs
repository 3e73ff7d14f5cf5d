//! Diff engine: compares target descriptors against a schema snapshot and
//! plans the ordered operations that reconcile the two.
//!
//! Planning is pure (no I/O) and deterministic: the same target set and
//! snapshot always produce the same plan, regardless of the order entities
//! were declared in. Destructive operations are planned only when the
//! caller opts in.

use crate::config::ReconcileOptions;
use crate::descriptor::{
    ColumnDescriptor, EntityDescriptor, ForeignKeyDescriptor, IndexDescriptor, SchemaSnapshot,
    SemanticType,
};
use crate::dialect::{Capability, Dialect};
use crate::error::{Result, SyncError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// One planned schema change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOperation {
    /// Create a table with its columns, primary key, and enum checks.
    /// Indexes and foreign keys are planned as separate later operations.
    CreateTable(EntityDescriptor),
    /// Add a column to an existing table.
    AddColumn {
        table: String,
        column: ColumnDescriptor,
    },
    /// Alter an existing column's type and/or nullability toward the
    /// target definition. `column` carries the target state.
    ModifyColumn {
        table: String,
        column: ColumnDescriptor,
        alter_type: bool,
        alter_nullable: bool,
    },
    /// Drop a column no longer present in the target. Planned only when
    /// destructive changes are enabled.
    DropColumn { table: String, column: String },
    /// Create a secondary index.
    AddIndex {
        table: String,
        index: IndexDescriptor,
    },
    /// Add a foreign key constraint.
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeyDescriptor,
    },
}

impl ChangeOperation {
    /// The table the operation targets.
    pub fn table(&self) -> &str {
        match self {
            ChangeOperation::CreateTable(entity) => &entity.table,
            ChangeOperation::AddColumn { table, .. }
            | ChangeOperation::ModifyColumn { table, .. }
            | ChangeOperation::DropColumn { table, .. }
            | ChangeOperation::AddIndex { table, .. }
            | ChangeOperation::AddForeignKey { table, .. } => table,
        }
    }

    /// Short human-readable description for logs and reports.
    pub fn summary(&self) -> String {
        match self {
            ChangeOperation::CreateTable(entity) => format!("create table {}", entity.table),
            ChangeOperation::AddColumn { table, column } => {
                format!("add column {}.{}", table, column.name)
            }
            ChangeOperation::ModifyColumn { table, column, .. } => {
                format!("modify column {}.{}", table, column.name)
            }
            ChangeOperation::DropColumn { table, column } => {
                format!("drop column {}.{}", table, column)
            }
            ChangeOperation::AddIndex { table, index } => {
                format!("add index {} on {}", index.name, table)
            }
            ChangeOperation::AddForeignKey { table, foreign_key } => {
                format!("add foreign key {} on {}", foreign_key.name, table)
            }
        }
    }
}

/// Plans the operations that bring the observed schema in line with the
/// target descriptors.
pub struct DiffEngine<'a> {
    dialect: &'a dyn Dialect,
    options: &'a ReconcileOptions,
}

impl<'a> DiffEngine<'a> {
    pub fn new(dialect: &'a dyn Dialect, options: &'a ReconcileOptions) -> Self {
        Self { dialect, options }
    }

    /// Produce the ordered change plan.
    ///
    /// Three phases: table/column changes in dependency order, then index
    /// creation, then foreign keys. Deferring foreign keys to the last
    /// phase guarantees every referenced table exists by the time its
    /// constraints are added, even when entities reference each other in a
    /// cycle.
    pub fn plan(
        &self,
        targets: &[EntityDescriptor],
        snapshot: &SchemaSnapshot,
    ) -> Result<Vec<ChangeOperation>> {
        let by_name: BTreeMap<&str, &EntityDescriptor> =
            targets.iter().map(|e| (e.table.as_str(), e)).collect();

        self.validate_references(&by_name, snapshot)?;
        let order = dependency_order(&by_name);

        let mut ops = Vec::new();

        for table in &order {
            let target = by_name[table.as_str()];
            match snapshot.table(table) {
                None => {
                    debug!(table = %table, "table missing, planning create");
                    ops.push(ChangeOperation::CreateTable(target.clone()));
                }
                Some(current) => {
                    self.plan_column_changes(target, current, &mut ops)?;
                }
            }
        }

        if self.options.create_indexes {
            for table in &order {
                let target = by_name[table.as_str()];
                let current = snapshot.table(table);
                for index in &target.indexes {
                    let exists = current
                        .map(|c| c.indexes.iter().any(|ix| ix.same_shape(index)))
                        .unwrap_or(false);
                    if !exists {
                        ops.push(ChangeOperation::AddIndex {
                            table: table.clone(),
                            index: index.clone(),
                        });
                    }
                }
            }
        }

        if self.options.create_foreign_keys {
            for table in &order {
                let target = by_name[table.as_str()];
                let current = snapshot.table(table);
                for fk in &target.foreign_keys {
                    let exists = current
                        .map(|c| c.foreign_keys.iter().any(|f| f.same_shape(fk)))
                        .unwrap_or(false);
                    if !exists {
                        ops.push(ChangeOperation::AddForeignKey {
                            table: table.clone(),
                            foreign_key: fk.clone(),
                        });
                    }
                }
            }
        }

        Ok(ops)
    }

    /// Every foreign key must point at a table that will exist after the
    /// plan runs: either another target entity or a table already present
    /// in the snapshot.
    fn validate_references(
        &self,
        by_name: &BTreeMap<&str, &EntityDescriptor>,
        snapshot: &SchemaSnapshot,
    ) -> Result<()> {
        for entity in by_name.values() {
            for fk in &entity.foreign_keys {
                if !by_name.contains_key(fk.ref_table.as_str()) && !snapshot.contains(&fk.ref_table)
                {
                    return Err(SyncError::invalid_descriptor(
                        &entity.table,
                        format!(
                            "foreign key '{}' references unknown table '{}'",
                            fk.name, fk.ref_table
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Whether a target type already holds in the live column.
    ///
    /// Most types compare by rendered form so that semantically equivalent
    /// spellings do not churn the plan. Enumerated types compare
    /// structurally: they render as plain text, and rendered comparison
    /// would treat an unconstrained text column (or one whose value-set
    /// check was lost to a partial run) as already matching.
    fn types_match(&self, target: &SemanticType, current: &SemanticType) -> bool {
        match (target, current) {
            (SemanticType::Enumerated { .. }, _) | (_, SemanticType::Enumerated { .. }) => {
                target == current
            }
            _ => self.dialect.render_type(target) == self.dialect.render_type(current),
        }
    }

    fn plan_column_changes(
        &self,
        target: &EntityDescriptor,
        current: &EntityDescriptor,
        ops: &mut Vec<ChangeOperation>,
    ) -> Result<()> {
        for col in &target.columns {
            match current.column(&col.name) {
                None => {
                    if !col.nullable
                        && col.default.is_none()
                        && !col.auto_increment
                        && !self
                            .dialect
                            .supports(Capability::AddNotNullColumnWithoutDefault)
                    {
                        return Err(SyncError::CapabilityGap {
                            table: target.table.clone(),
                            column: col.name.clone(),
                            message: "cannot add a NOT NULL column without a default to an existing table".to_string(),
                            remediation: "declare a default value, or make the column nullable and tighten it after backfilling".to_string(),
                        });
                    }
                    ops.push(ChangeOperation::AddColumn {
                        table: target.table.clone(),
                        column: col.clone(),
                    });
                }
                Some(existing) => {
                    let alter_type = !self.types_match(&col.semantic_type, &existing.semantic_type);
                    let alter_nullable = col.nullable != existing.nullable;

                    if alter_type {
                        // Swapping one value set for another means dropping a
                        // constraint that rows may depend on; that stays a
                        // manual, reviewed step.
                        if let (
                            SemanticType::Enumerated { .. },
                            SemanticType::Enumerated { .. },
                        ) = (&col.semantic_type, &existing.semantic_type)
                        {
                            return Err(SyncError::CapabilityGap {
                                table: target.table.clone(),
                                column: col.name.clone(),
                                message: format!(
                                    "cannot change the value set of {} to {} in place",
                                    existing.semantic_type, col.semantic_type
                                ),
                                remediation: "replace the column's value-set check constraint manually, then re-run".to_string(),
                            });
                        }
                        if !self.dialect.supports(Capability::AlterColumnType) {
                            return Err(SyncError::CapabilityGap {
                                table: target.table.clone(),
                                column: col.name.clone(),
                                message: format!(
                                    "backend '{}' cannot alter column type {} to {} in place",
                                    self.dialect.name(),
                                    existing.semantic_type,
                                    col.semantic_type
                                ),
                                remediation: "recreate the column manually, then re-run".to_string(),
                            });
                        }
                    }
                    if alter_nullable
                        && !self.dialect.supports(Capability::AlterColumnNullability)
                    {
                        return Err(SyncError::CapabilityGap {
                            table: target.table.clone(),
                            column: col.name.clone(),
                            message: format!(
                                "backend '{}' cannot alter column nullability in place",
                                self.dialect.name()
                            ),
                            remediation: "adjust the constraint manually, then re-run".to_string(),
                        });
                    }

                    if alter_type || alter_nullable {
                        ops.push(ChangeOperation::ModifyColumn {
                            table: target.table.clone(),
                            column: col.clone(),
                            alter_type,
                            alter_nullable,
                        });
                    }
                }
            }
        }

        for existing in &current.columns {
            if target.column(&existing.name).is_none() {
                if self.options.allow_destructive {
                    ops.push(ChangeOperation::DropColumn {
                        table: target.table.clone(),
                        column: existing.name.clone(),
                    });
                } else {
                    warn!(
                        table = %target.table,
                        column = %existing.name,
                        "column absent from target, keeping (destructive changes disabled)"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Order tables so that referenced tables come before their referents.
///
/// Kahn's algorithm over the foreign-key graph, breaking ties by name so
/// the result is independent of declaration order. Tables caught in a
/// reference cycle are appended in name order; foreign keys are deferred
/// to the final phase, so creation inside a cycle is still safe.
fn dependency_order(by_name: &BTreeMap<&str, &EntityDescriptor>) -> Vec<String> {
    let mut in_degree: BTreeMap<&str, usize> = by_name.keys().map(|k| (*k, 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (&name, entity) in by_name {
        for dep in entity.referenced_tables() {
            if by_name.contains_key(dep) {
                *in_degree.get_mut(name).unwrap() += 1;
                dependents.entry(dep).or_default().push(name);
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(k, _)| *k)
        .collect();
    let mut order = Vec::with_capacity(by_name.len());

    while let Some(next) = ready.pop_first() {
        order.push(next.to_string());
        if let Some(deps) = dependents.get(next) {
            for &dependent in deps {
                let d = in_degree.get_mut(dependent).unwrap();
                *d -= 1;
                if *d == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() < by_name.len() {
        let missing: Vec<String> = by_name
            .keys()
            .filter(|&&k| !order.iter().any(|o| o.as_str() == k))
            .map(|&k| k.to_string())
            .collect();
        order.extend(missing);
    }

    order
}
