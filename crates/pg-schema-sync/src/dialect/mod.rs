//! Dialect adapters: everything backend-specific behind one trait.
//!
//! The descriptor model, diff engine, and executor never emit SQL text or
//! inspect native type names themselves; they go through a [`Dialect`].

pub(crate) mod postgres;

pub use postgres::PostgresDialect;

use crate::descriptor::SemanticType;
use crate::diff::ChangeOperation;
use crate::error::Result;

/// Optional schema-change abilities a backend may or may not have.
///
/// The diff engine consults these before planning an operation, so a gap
/// surfaces as a planning error instead of a runtime DDL failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// ALTER COLUMN ... TYPE (in-place column type change).
    AlterColumnType,
    /// ALTER COLUMN ... SET/DROP NOT NULL.
    AlterColumnNullability,
    /// Adding a NOT NULL column without a default to a table that may
    /// already hold rows.
    AddNotNullColumnWithoutDefault,
}

/// Backend adapter: type rendering, type parsing, identifier quoting, and
/// DDL generation for planned operations.
pub trait Dialect: Send + Sync {
    /// Short backend name, used in logs.
    fn name(&self) -> &'static str;

    /// Quote an identifier for safe inclusion in DDL.
    fn quote_ident(&self, ident: &str) -> String;

    /// Render a semantic type as the backend's native column type.
    fn render_type(&self, ty: &SemanticType) -> String;

    /// Map an introspected native type back to the semantic vocabulary.
    ///
    /// `max_length`, `precision`, and `scale` come from the information
    /// schema and apply only where the native type carries them.
    fn parse_type(
        &self,
        native: &str,
        max_length: Option<u32>,
        precision: Option<u8>,
        scale: Option<u8>,
    ) -> SemanticType;

    /// Whether the backend supports the given schema-change ability.
    fn supports(&self, capability: Capability) -> bool;

    /// Render a planned operation as one or more DDL statements.
    fn render_ddl(&self, op: &ChangeOperation) -> Result<Vec<String>>;
}
