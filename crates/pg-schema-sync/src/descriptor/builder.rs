//! Fluent construction and validation of entity descriptors.

use crate::descriptor::{
    ColumnDescriptor, EntityDescriptor, ForeignKeyDescriptor, IndexDescriptor, RefAction,
    SemanticType,
};
use crate::error::{Result, SyncError};
use std::collections::HashSet;

/// Builds an [`EntityDescriptor`] and validates it in one shot.
///
/// `build()` is the only way to obtain a descriptor from user input, so a
/// descriptor that reaches the diff engine is structurally sound: every
/// index and foreign key refers to declared columns, at most one column is
/// the primary key, and names are unique.
pub struct EntityBuilder {
    table: String,
    columns: Vec<ColumnDescriptor>,
    indexes: Vec<IndexDescriptor>,
    foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl EntityBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a secondary index over the given columns.
    pub fn index(mut self, name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        self.indexes.push(IndexDescriptor {
            name: name.into(),
            columns,
            unique,
        });
        self
    }

    /// Add a foreign key with an auto-generated name.
    pub fn foreign_key(
        mut self,
        columns: Vec<String>,
        ref_table: impl Into<String>,
        ref_columns: Vec<String>,
        on_delete: RefAction,
        on_update: RefAction,
    ) -> Self {
        let ref_table = ref_table.into();
        let name = format!("fk_{}_{}", self.table, columns.join("_"));
        self.foreign_keys.push(ForeignKeyDescriptor {
            name,
            columns,
            ref_table,
            ref_columns,
            on_delete,
            on_update,
        });
        self
    }

    /// Validate and produce the descriptor.
    pub fn build(self) -> Result<EntityDescriptor> {
        let table = self.table;

        if table.trim().is_empty() {
            return Err(SyncError::invalid_descriptor(
                "<unnamed>",
                "table name is empty",
            ));
        }
        if self.columns.is_empty() {
            return Err(SyncError::invalid_descriptor(
                &table,
                "entity declares no columns",
            ));
        }

        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(SyncError::invalid_descriptor(
                    &table,
                    format!("duplicate column '{}'", col.name),
                ));
            }
        }

        let pk_count = self.columns.iter().filter(|c| c.primary_key).count();
        if pk_count > 1 {
            return Err(SyncError::invalid_descriptor(
                &table,
                format!("{} columns marked primary key, at most one allowed", pk_count),
            ));
        }

        let mut columns = self.columns;
        for col in &mut columns {
            if col.primary_key {
                // PKs are NOT NULL whether or not the caller said so.
                col.nullable = false;
            }
            match &col.semantic_type {
                SemanticType::Integer { .. } => {}
                _ if col.auto_increment => {
                    return Err(SyncError::invalid_descriptor(
                        &table,
                        format!(
                            "column '{}' is auto-increment but not an integer type",
                            col.name
                        ),
                    ));
                }
                SemanticType::Numeric { precision, scale } => {
                    if *precision == 0 || scale > precision {
                        return Err(SyncError::invalid_descriptor(
                            &table,
                            format!(
                                "column '{}' has invalid numeric({},{})",
                                col.name, precision, scale
                            ),
                        ));
                    }
                }
                SemanticType::Enumerated { values } => {
                    if values.is_empty() {
                        return Err(SyncError::invalid_descriptor(
                            &table,
                            format!("column '{}' enumerates no values", col.name),
                        ));
                    }
                }
                _ => {}
            }
        }

        // Single-column unique flags become named unique indexes so the
        // diff engine sees one uniform representation.
        let mut indexes = self.indexes;
        for col in &columns {
            if col.unique && !col.primary_key {
                let shape = IndexDescriptor {
                    name: format!("ux_{}", col.name),
                    columns: vec![col.name.clone()],
                    unique: true,
                };
                if !indexes.iter().any(|ix| ix.same_shape(&shape)) {
                    indexes.push(shape);
                }
            }
        }

        let names: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        for ix in &indexes {
            if ix.columns.is_empty() {
                return Err(SyncError::invalid_descriptor(
                    &table,
                    format!("index '{}' covers no columns", ix.name),
                ));
            }
            for c in &ix.columns {
                if !names.contains(c.as_str()) {
                    return Err(SyncError::invalid_descriptor(
                        &table,
                        format!("index '{}' references unknown column '{}'", ix.name, c),
                    ));
                }
            }
        }

        for fk in &self.foreign_keys {
            if fk.columns.is_empty() {
                return Err(SyncError::invalid_descriptor(
                    &table,
                    format!("foreign key '{}' covers no columns", fk.name),
                ));
            }
            if fk.columns.len() != fk.ref_columns.len() {
                return Err(SyncError::invalid_descriptor(
                    &table,
                    format!(
                        "foreign key '{}' has {} columns but {} referenced columns",
                        fk.name,
                        fk.columns.len(),
                        fk.ref_columns.len()
                    ),
                ));
            }
            for c in &fk.columns {
                if !names.contains(c.as_str()) {
                    return Err(SyncError::invalid_descriptor(
                        &table,
                        format!(
                            "foreign key '{}' references unknown column '{}'",
                            fk.name, c
                        ),
                    ));
                }
            }
        }

        Ok(EntityDescriptor {
            table,
            columns,
            indexes,
            foreign_keys: self.foreign_keys,
        })
    }
}
