//! YAML schema definition files: the declarative way to describe target
//! entities, turned into validated descriptors.
//!
//! Besides plain columns, indexes, and foreign keys, a definition may
//! declare `belongs_to` associations; each expands into a referencing
//! column (typed after the referenced entity's primary key) plus the
//! matching foreign key.

use crate::descriptor::{
    ColumnDescriptor, EntityBuilder, EntityDescriptor, IntWidth, RefAction, SemanticType,
};
use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SchemaFile {
    entities: Vec<EntitySpec>,
}

#[derive(Debug, Deserialize)]
struct EntitySpec {
    table: String,
    columns: Vec<ColumnSpec>,
    #[serde(default)]
    indexes: Vec<IndexSpec>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKeySpec>,
    #[serde(default)]
    belongs_to: Vec<BelongsToSpec>,
}

#[derive(Debug, Deserialize)]
struct ColumnSpec {
    name: String,
    r#type: TypeName,
    #[serde(default)]
    max_length: Option<u32>,
    #[serde(default)]
    precision: Option<u8>,
    #[serde(default)]
    scale: Option<u8>,
    #[serde(default)]
    values: Vec<String>,
    #[serde(default = "default_true")]
    nullable: bool,
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    auto_increment: bool,
    #[serde(default)]
    unique: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TypeName {
    SmallInteger,
    Integer,
    BigInteger,
    Text,
    Boolean,
    Timestamp,
    Timestamptz,
    Binary,
    Numeric,
    Enum,
}

#[derive(Debug, Deserialize)]
struct IndexSpec {
    name: String,
    columns: Vec<String>,
    #[serde(default)]
    unique: bool,
}

#[derive(Debug, Deserialize)]
struct ForeignKeySpec {
    columns: Vec<String>,
    ref_table: String,
    ref_columns: Vec<String>,
    #[serde(default)]
    on_delete: RefAction,
    #[serde(default)]
    on_update: RefAction,
}

#[derive(Debug, Deserialize)]
struct BelongsToSpec {
    entity: String,
    /// Referencing column name; defaults to `{entity}_id`.
    #[serde(default)]
    column: Option<String>,
    #[serde(default = "default_true")]
    nullable: bool,
    #[serde(default)]
    on_delete: RefAction,
    #[serde(default)]
    on_update: RefAction,
}

fn default_true() -> bool {
    true
}

/// Load entity descriptors from a YAML schema definition file.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<EntityDescriptor>> {
    let content = std::fs::read_to_string(path)?;
    from_yaml(&content)
}

/// Parse entity descriptors from a YAML string.
pub fn from_yaml(yaml: &str) -> Result<Vec<EntityDescriptor>> {
    let file: SchemaFile = serde_yaml::from_str(yaml)?;

    // First pass: primary key name and type per table, needed to type the
    // columns that belongs_to associations generate.
    let mut seen = std::collections::HashSet::new();
    let mut pk_types: BTreeMap<String, (String, SemanticType)> = BTreeMap::new();
    for spec in &file.entities {
        if !seen.insert(spec.table.clone()) {
            return Err(SyncError::invalid_descriptor(
                &spec.table,
                "table defined more than once",
            ));
        }
        if let Some(col) = spec.columns.iter().find(|c| c.primary_key) {
            pk_types.insert(
                spec.table.clone(),
                (col.name.clone(), resolve_type(&spec.table, col)?),
            );
        }
    }

    let mut entities = Vec::with_capacity(file.entities.len());
    for spec in &file.entities {
        let mut builder = EntityBuilder::new(&spec.table);

        for col in &spec.columns {
            let semantic_type = resolve_type(&spec.table, col)?;
            builder = builder.column(ColumnDescriptor {
                name: col.name.clone(),
                semantic_type,
                nullable: col.nullable,
                default: col.default.clone(),
                primary_key: col.primary_key,
                auto_increment: col.auto_increment,
                unique: col.unique,
            });
        }

        for assoc in &spec.belongs_to {
            let Some((pk_name, pk_type)) = pk_types.get(&assoc.entity) else {
                return Err(SyncError::invalid_descriptor(
                    &spec.table,
                    format!(
                        "belongs_to '{}': referenced entity is missing or has no primary key",
                        assoc.entity
                    ),
                ));
            };
            let column_name = assoc
                .column
                .clone()
                .unwrap_or_else(|| format!("{}_id", assoc.entity));

            // The referencing column takes the referenced key's type, minus
            // generation.
            let mut column = ColumnDescriptor::new(&column_name, pk_type.clone());
            column.nullable = assoc.nullable;
            builder = builder.column(column);
            builder = builder.foreign_key(
                vec![column_name],
                &assoc.entity,
                vec![pk_name.clone()],
                assoc.on_delete,
                assoc.on_update,
            );
        }

        for ix in &spec.indexes {
            builder = builder.index(&ix.name, ix.columns.clone(), ix.unique);
        }
        for fk in &spec.foreign_keys {
            builder = builder.foreign_key(
                fk.columns.clone(),
                &fk.ref_table,
                fk.ref_columns.clone(),
                fk.on_delete,
                fk.on_update,
            );
        }

        entities.push(builder.build()?);
    }

    Ok(entities)
}

fn resolve_type(table: &str, col: &ColumnSpec) -> Result<SemanticType> {
    let ty = match col.r#type {
        TypeName::SmallInteger => SemanticType::Integer { width: IntWidth::Small },
        TypeName::Integer => SemanticType::Integer { width: IntWidth::Standard },
        TypeName::BigInteger => SemanticType::Integer { width: IntWidth::Big },
        TypeName::Text => SemanticType::Text {
            max_length: col.max_length,
        },
        TypeName::Boolean => SemanticType::Boolean,
        TypeName::Timestamp => SemanticType::Timestamp { with_tz: false },
        TypeName::Timestamptz => SemanticType::Timestamp { with_tz: true },
        TypeName::Binary => SemanticType::Binary {
            max_length: col.max_length,
        },
        TypeName::Numeric => {
            let precision = col.precision.ok_or_else(|| {
                SyncError::invalid_descriptor(
                    table,
                    format!("column '{}': numeric type requires precision", col.name),
                )
            })?;
            SemanticType::Numeric {
                precision,
                scale: col.scale.unwrap_or(0),
            }
        }
        TypeName::Enum => {
            if col.values.is_empty() {
                return Err(SyncError::invalid_descriptor(
                    table,
                    format!("column '{}': enum type requires values", col.name),
                ));
            }
            SemanticType::Enumerated {
                values: col.values.clone(),
            }
        }
    };
    Ok(ty)
}
