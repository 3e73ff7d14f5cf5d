//! Schema introspection: reads the live PostgreSQL catalog into a
//! [`SchemaSnapshot`] expressed in the descriptor vocabulary.
//!
//! Snapshots are taken fresh at the start of every run and never cached, so
//! a re-run after a partial failure observes the true schema state.

use crate::descriptor::{
    ColumnDescriptor, EntityDescriptor, ForeignKeyDescriptor, IndexDescriptor, RefAction,
    SchemaSnapshot, SemanticType,
};
use crate::dialect::postgres::{enum_check_name, parse_enum_values};
use crate::dialect::Dialect;
use crate::error::{Result, SyncError};
use deadpool_postgres::Pool;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A CHECK constraint as reported by the catalog.
struct CheckConstraint {
    name: String,
    definition: String,
}

/// Reads the current state of one application schema.
pub struct Introspector<'a> {
    pool: &'a Pool,
    schema: &'a str,
    dialect: &'a dyn Dialect,
}

impl<'a> Introspector<'a> {
    pub fn new(pool: &'a Pool, schema: &'a str, dialect: &'a dyn Dialect) -> Self {
        Self {
            pool,
            schema,
            dialect,
        }
    }

    /// Take a snapshot of every base table in the configured schema.
    pub async fn snapshot(&self) -> Result<SchemaSnapshot> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting connection for introspection"))?;

        let query = r#"
            SELECT table_name
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema = $1
            ORDER BY table_name
        "#;
        let rows = client
            .query(query, &[&self.schema])
            .await
            .map_err(|e| SyncError::introspection(format!("listing tables: {}", e)))?;

        let mut tables = BTreeMap::new();
        for row in rows {
            let name: String = row.get(0);
            let entity = self.load_table(&name).await?;
            tables.insert(name, entity);
        }

        info!(
            schema = %self.schema,
            tables = tables.len(),
            "schema snapshot taken"
        );
        Ok(SchemaSnapshot { tables })
    }

    async fn load_table(&self, table: &str) -> Result<EntityDescriptor> {
        let mut columns = self.load_columns(table).await?;

        for pk in self.load_primary_key(table).await? {
            if let Some(col) = columns.iter_mut().find(|c| c.name == pk) {
                col.primary_key = true;
            }
        }

        let checks = self.load_check_constraints(table).await?;
        fold_enum_checks(table, &mut columns, &checks);

        let entity = EntityDescriptor {
            table: table.to_string(),
            columns,
            indexes: self.load_indexes(table).await?,
            foreign_keys: self.load_foreign_keys(table).await?,
        };

        debug!(
            table = %table,
            columns = entity.columns.len(),
            indexes = entity.indexes.len(),
            foreign_keys = entity.foreign_keys.len(),
            "introspected table"
        );
        Ok(entity)
    }

    async fn load_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting connection for load_columns"))?;

        let query = r#"
            SELECT
                column_name,
                udt_name,
                COALESCE(character_maximum_length, 0)::int4,
                COALESCE(numeric_precision, 0)::int4,
                COALESCE(numeric_scale, 0)::int4,
                CASE WHEN is_nullable = 'YES' THEN true ELSE false END,
                COALESCE(
                    (SELECT true FROM pg_catalog.pg_class c
                     JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid
                     JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                     WHERE n.nspname = columns.table_schema
                       AND c.relname = columns.table_name
                       AND a.attname = columns.column_name
                       AND a.attidentity IN ('a', 'd')),
                    false
                ) AS is_identity,
                column_default
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = client
            .query(query, &[&self.schema, &table])
            .await
            .map_err(|e| SyncError::introspection(format!("loading columns of '{}': {}", table, e)))?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0);
            let udt_name: String = row.get(1);
            let max_length: i32 = row.get(2);
            let precision: i32 = row.get(3);
            let scale: i32 = row.get(4);
            let nullable: bool = row.get(5);
            let is_identity: bool = row.get(6);
            let default: Option<String> = row.get(7);

            let semantic_type = self.dialect.parse_type(
                &udt_name,
                (max_length > 0).then_some(max_length as u32),
                (precision > 0).then(|| precision.min(u8::MAX as i32) as u8),
                Some(scale.clamp(0, u8::MAX as i32) as u8),
            );

            // Sequence-backed defaults mean the backend generates values,
            // same as an identity column.
            let auto_increment = is_identity || is_serial_default(default.as_deref());
            let default = if auto_increment { None } else { default };

            columns.push(ColumnDescriptor {
                name,
                semantic_type,
                nullable,
                default,
                primary_key: false,
                auto_increment,
                unique: false,
            });
        }
        Ok(columns)
    }

    async fn load_primary_key(&self, table: &str) -> Result<Vec<String>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting connection for load_primary_key"))?;

        let query = r#"
            SELECT a.attname
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
            WHERE n.nspname = $1
              AND t.relname = $2
              AND c.contype = 'p'
              AND a.attnum = ANY(c.conkey)
            ORDER BY array_position(c.conkey, a.attnum)
        "#;

        let rows = client
            .query(query, &[&self.schema, &table])
            .await
            .map_err(|e| {
                SyncError::introspection(format!("loading primary key of '{}': {}", table, e))
            })?;

        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn load_indexes(&self, table: &str) -> Result<Vec<IndexDescriptor>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting connection for load_indexes"))?;

        let query = r#"
            SELECT
                i.relname AS index_name,
                ix.indisunique,
                array_agg(a.attname ORDER BY array_position(ix.indkey, a.attnum)) AS columns
            FROM pg_catalog.pg_index ix
            JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
            JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            WHERE n.nspname = $1
              AND t.relname = $2
              AND NOT ix.indisprimary
            GROUP BY i.relname, ix.indisunique
            ORDER BY i.relname
        "#;

        let rows = client
            .query(query, &[&self.schema, &table])
            .await
            .map_err(|e| {
                SyncError::introspection(format!("loading indexes of '{}': {}", table, e))
            })?;

        Ok(rows
            .iter()
            .map(|row| IndexDescriptor {
                name: row.get(0),
                unique: row.get(1),
                columns: row.get(2),
            })
            .collect())
    }

    async fn load_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting connection for load_foreign_keys"))?;

        let query = r#"
            SELECT
                c.conname AS fk_name,
                array_agg(a.attname ORDER BY array_position(c.conkey, a.attnum)) AS columns,
                rt.relname AS ref_table,
                array_agg(ra.attname ORDER BY array_position(c.confkey, ra.attnum)) AS ref_columns,
                CASE c.confdeltype
                    WHEN 'a' THEN 'NO_ACTION'
                    WHEN 'r' THEN 'RESTRICT'
                    WHEN 'c' THEN 'CASCADE'
                    WHEN 'n' THEN 'SET_NULL'
                    ELSE 'NO_ACTION'
                END AS on_delete,
                CASE c.confupdtype
                    WHEN 'a' THEN 'NO_ACTION'
                    WHEN 'r' THEN 'RESTRICT'
                    WHEN 'c' THEN 'CASCADE'
                    WHEN 'n' THEN 'SET_NULL'
                    ELSE 'NO_ACTION'
                END AS on_update
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(c.conkey)
            JOIN pg_catalog.pg_attribute ra ON ra.attrelid = rt.oid AND ra.attnum = ANY(c.confkey)
            WHERE n.nspname = $1
              AND t.relname = $2
              AND c.contype = 'f'
            GROUP BY c.conname, rt.relname, c.confdeltype, c.confupdtype
            ORDER BY c.conname
        "#;

        let rows = client
            .query(query, &[&self.schema, &table])
            .await
            .map_err(|e| {
                SyncError::introspection(format!("loading foreign keys of '{}': {}", table, e))
            })?;

        Ok(rows
            .iter()
            .map(|row| ForeignKeyDescriptor {
                name: row.get(0),
                columns: row.get(1),
                ref_table: row.get(2),
                ref_columns: row.get(3),
                on_delete: RefAction::parse(row.get::<_, String>(4).as_str()),
                on_update: RefAction::parse(row.get::<_, String>(5).as_str()),
            })
            .collect())
    }

    async fn load_check_constraints(&self, table: &str) -> Result<Vec<CheckConstraint>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, "getting connection for load_check_constraints"))?;

        let query = r#"
            SELECT c.conname, pg_get_constraintdef(c.oid)
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            WHERE n.nspname = $1 AND t.relname = $2 AND c.contype = 'c'
            ORDER BY c.conname
        "#;

        let rows = client
            .query(query, &[&self.schema, &table])
            .await
            .map_err(|e| {
                SyncError::introspection(format!(
                    "loading check constraints of '{}': {}",
                    table, e
                ))
            })?;

        Ok(rows
            .iter()
            .map(|row| CheckConstraint {
                name: row.get(0),
                definition: row.get(1),
            })
            .collect())
    }
}

/// Recognize a sequence-backed default (`nextval('...')`), the pre-identity
/// spelling of a generated column.
fn is_serial_default(default: Option<&str>) -> bool {
    default.is_some_and(|d| d.trim_start().starts_with("nextval("))
}

/// Rewrite TEXT columns back to their enumerated type when the table carries
/// the value-set CHECK constraint this tool emits for them.
fn fold_enum_checks(table: &str, columns: &mut [ColumnDescriptor], checks: &[CheckConstraint]) {
    for col in columns.iter_mut() {
        if col.semantic_type != (SemanticType::Text { max_length: None }) {
            continue;
        }
        let expected = enum_check_name(table, &col.name);
        let Some(check) = checks.iter().find(|c| c.name == expected) else {
            continue;
        };
        if let Some(values) = parse_enum_values(&check.definition) {
            col.semantic_type = SemanticType::Enumerated { values };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_serial_default() {
        assert!(is_serial_default(Some("nextval('users_id_seq'::regclass)")));
        assert!(!is_serial_default(Some("'main'::text")));
        assert!(!is_serial_default(None));
    }

    #[test]
    fn test_fold_enum_checks_rewrites_matching_column() {
        let mut columns = vec![ColumnDescriptor::new(
            "status",
            SemanticType::Text { max_length: None },
        )];
        let checks = vec![CheckConstraint {
            name: "chk_users_status_enum".to_string(),
            definition: "CHECK ((status = ANY (ARRAY['active'::text, 'disabled'::text])))"
                .to_string(),
        }];

        fold_enum_checks("users", &mut columns, &checks);
        assert_eq!(
            columns[0].semantic_type,
            SemanticType::Enumerated {
                values: vec!["active".to_string(), "disabled".to_string()]
            }
        );
    }

    #[test]
    fn test_fold_enum_checks_ignores_unrelated_checks() {
        let mut columns = vec![
            ColumnDescriptor::new("status", SemanticType::Text { max_length: None }),
            ColumnDescriptor::new("note", SemanticType::Text { max_length: None }),
        ];
        let checks = vec![CheckConstraint {
            name: "users_price_check".to_string(),
            definition: "CHECK ((price > 0))".to_string(),
        }];

        fold_enum_checks("users", &mut columns, &checks);
        assert!(columns
            .iter()
            .all(|c| c.semantic_type == SemanticType::Text { max_length: None }));
    }

    #[test]
    fn test_fold_enum_checks_skips_bounded_text() {
        let mut columns = vec![ColumnDescriptor::new(
            "status",
            SemanticType::Text { max_length: Some(16) },
        )];
        let checks = vec![CheckConstraint {
            name: "chk_users_status_enum".to_string(),
            definition: "CHECK ((status = ANY (ARRAY['a'::text])))".to_string(),
        }];

        fold_enum_checks("users", &mut columns, &checks);
        assert_eq!(
            columns[0].semantic_type,
            SemanticType::Text { max_length: Some(16) }
        );
    }
}
