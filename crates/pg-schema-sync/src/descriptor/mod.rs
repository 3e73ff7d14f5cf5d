//! Descriptor model: backend-neutral representation of tables, columns,
//! indexes, and foreign keys.
//!
//! Descriptors are the single vocabulary shared by the target side (entity
//! definitions) and the current side (introspected schema), so the diff
//! engine always compares like with like.

mod builder;

pub use builder::EntityBuilder;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Width of an integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntWidth {
    /// 16-bit. Maps to SMALLINT.
    Small,
    /// 32-bit. Maps to INTEGER.
    Standard,
    /// 64-bit. Maps to BIGINT.
    Big,
}

/// Backend-neutral column type vocabulary.
///
/// Every supported backend must be able to render each of these to a native
/// type and map its native types back, so that a column round-trips to the
/// same semantic type after introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    /// Signed integer of the given width.
    Integer { width: IntWidth },
    /// Character data; `max_length` bounds it, `None` means unlimited.
    Text { max_length: Option<u32> },
    /// Boolean flag.
    Boolean,
    /// Point in time, with or without timezone.
    Timestamp { with_tz: bool },
    /// Raw bytes; `max_length` is advisory on backends without bounded
    /// binary types.
    Binary { max_length: Option<u32> },
    /// Exact decimal. Precision is total digits, scale is digits after the
    /// decimal point.
    Numeric { precision: u8, scale: u8 },
    /// Closed set of string values.
    Enumerated { values: Vec<String> },
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemanticType::Integer { width } => match width {
                IntWidth::Small => write!(f, "Integer(small)"),
                IntWidth::Standard => write!(f, "Integer"),
                IntWidth::Big => write!(f, "Integer(big)"),
            },
            SemanticType::Text { max_length: Some(n) } => write!(f, "Text({})", n),
            SemanticType::Text { max_length: None } => write!(f, "Text"),
            SemanticType::Boolean => write!(f, "Boolean"),
            SemanticType::Timestamp { with_tz: true } => write!(f, "TimestampTz"),
            SemanticType::Timestamp { with_tz: false } => write!(f, "Timestamp"),
            SemanticType::Binary { max_length: Some(n) } => write!(f, "Binary({})", n),
            SemanticType::Binary { max_length: None } => write!(f, "Binary"),
            SemanticType::Numeric { precision, scale } => {
                write!(f, "Numeric({},{})", precision, scale)
            }
            SemanticType::Enumerated { values } => write!(f, "Enumerated({:?})", values),
        }
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name (unique within the table).
    pub name: String,

    /// Backend-neutral type.
    pub semantic_type: SemanticType,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Default value expression, if any.
    pub default: Option<String>,

    /// Whether the column is the primary key.
    pub primary_key: bool,

    /// Whether the column is backend-generated (identity/serial).
    pub auto_increment: bool,

    /// Whether the column carries a single-column unique constraint.
    pub unique: bool,
}

impl ColumnDescriptor {
    /// Create a nullable, non-key column of the given type.
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            nullable: true,
            default: None,
            primary_key: false,
            auto_increment: false,
            unique: false,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set a default value expression.
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Mark the column as the primary key (implies NOT NULL).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark the column as backend-generated.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Mark the column unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name (rendered per-dialect with a table prefix).
    pub name: String,

    /// Indexed column names, in order.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub unique: bool,
}

impl IndexDescriptor {
    /// True if `other` covers the same columns with the same uniqueness,
    /// regardless of name. Used by the diff engine, since backends assign
    /// their own names to constraint-backed indexes.
    pub fn same_shape(&self, other: &IndexDescriptor) -> bool {
        self.columns == other.columns && self.unique == other.unique
    }
}

/// Referential action for ON DELETE / ON UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

impl RefAction {
    /// Render as SQL.
    pub fn as_sql(&self) -> &'static str {
        match self {
            RefAction::NoAction => "NO ACTION",
            RefAction::Restrict => "RESTRICT",
            RefAction::Cascade => "CASCADE",
            RefAction::SetNull => "SET NULL",
        }
    }

    /// Parse a backend action description (as reported by pg_constraint).
    pub fn parse(action: &str) -> Self {
        match action.to_uppercase().replace(' ', "_").as_str() {
            "RESTRICT" => RefAction::Restrict,
            "CASCADE" => RefAction::Cascade,
            "SET_NULL" => RefAction::SetNull,
            _ => RefAction::NoAction,
        }
    }
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Constraint name (rendered per-dialect).
    pub name: String,

    /// Referencing column names.
    pub columns: Vec<String>,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: RefAction,

    /// ON UPDATE action.
    pub on_update: RefAction,
}

impl ForeignKeyDescriptor {
    /// True if `other` links the same columns to the same target,
    /// regardless of constraint name.
    pub fn same_shape(&self, other: &ForeignKeyDescriptor) -> bool {
        self.columns == other.columns
            && self.ref_table == other.ref_table
            && self.ref_columns == other.ref_columns
    }
}

/// Table metadata: the unit the diff engine works over.
///
/// Built via [`EntityBuilder`] on the target side and assembled directly by
/// the introspector on the current side. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Table name.
    pub table: String,

    /// Column definitions, in declaration order.
    pub columns: Vec<ColumnDescriptor>,

    /// Secondary indexes, in declaration order.
    pub indexes: Vec<IndexDescriptor>,

    /// Foreign key constraints, in declaration order.
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl EntityDescriptor {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The primary key column, if one is declared.
    pub fn primary_key(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Tables this entity references through foreign keys, excluding itself.
    pub fn referenced_tables(&self) -> Vec<&str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.ref_table.as_str())
            .filter(|t| *t != self.table)
            .collect()
    }
}

/// The introspected state of the live schema at one instant.
///
/// Keyed by table name; BTreeMap keeps iteration deterministic so diff
/// output is stable across runs.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    /// Observed tables in the application schema.
    pub tables: BTreeMap<String, EntityDescriptor>,
}

impl SchemaSnapshot {
    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&EntityDescriptor> {
        self.tables.get(name)
    }

    /// Whether a table exists in the snapshot.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}
