//! PostgreSQL dialect adapter.

use crate::descriptor::{ColumnDescriptor, EntityDescriptor, IntWidth, SemanticType};
use crate::dialect::{Capability, Dialect};
use crate::diff::ChangeOperation;
use crate::error::Result;
use tracing::warn;

/// PostgreSQL limits identifiers to 63 bytes and silently truncates longer
/// ones; truncate generated names ourselves so DDL matches what the catalog
/// will report back.
const MAX_IDENT_LEN: usize = 63;

pub(crate) fn truncate_ident(name: &str) -> String {
    if name.len() <= MAX_IDENT_LEN {
        name.to_string()
    } else {
        let mut end = MAX_IDENT_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name[..end].to_string()
    }
}

/// Name of the CHECK constraint backing an enumerated column.
pub(crate) fn enum_check_name(table: &str, column: &str) -> String {
    truncate_ident(&format!("chk_{}_{}_enum", table, column))
}

/// Recover enumerated values from a CHECK constraint definition as printed
/// by `pg_get_constraintdef`. Handles both the `= ANY (ARRAY[...])` form
/// Postgres normalizes to and the literal `IN (...)` form.
pub(crate) fn parse_enum_values(definition: &str) -> Option<Vec<String>> {
    let inner = if let Some(start) = definition.find("ARRAY[") {
        let rest = &definition[start + "ARRAY[".len()..];
        &rest[..rest.find(']')?]
    } else if let Some(start) = definition.find(" IN (") {
        let rest = &definition[start + " IN (".len()..];
        &rest[..rest.find(')')?]
    } else {
        return None;
    };

    let mut values = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        // Each element looks like 'active'::text or just 'active'.
        let literal = part.split("::").next()?.trim();
        let literal = literal.strip_prefix('\'')?.strip_suffix('\'')?;
        values.push(literal.replace("''", "'"));
    }
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

pub struct PostgresDialect {
    schema: String,
}

impl PostgresDialect {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    fn qualify(&self, table: &str) -> String {
        format!("{}.{}", self.quote_ident(&self.schema), self.quote_ident(table))
    }

    fn column_def(&self, col: &ColumnDescriptor) -> String {
        let mut def = format!("{} {}", self.quote_ident(&col.name), self.render_type(&col.semantic_type));
        if col.auto_increment {
            def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
        }
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &col.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }

    /// Table-level CHECK constraint for an enumerated column, or None for
    /// other types.
    fn enum_check(&self, table: &str, col: &ColumnDescriptor) -> Option<String> {
        let SemanticType::Enumerated { values } = &col.semantic_type else {
            return None;
        };
        let list = values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "CONSTRAINT {} CHECK ({} IN ({}))",
            self.quote_ident(&enum_check_name(table, &col.name)),
            self.quote_ident(&col.name),
            list
        ))
    }

    fn create_table(&self, entity: &EntityDescriptor) -> Vec<String> {
        let mut parts: Vec<String> = entity
            .columns
            .iter()
            .map(|c| self.column_def(c))
            .collect();

        if let Some(pk) = entity.primary_key() {
            parts.push(format!("PRIMARY KEY ({})", self.quote_ident(&pk.name)));
        }
        for col in &entity.columns {
            if let Some(check) = self.enum_check(&entity.table, col) {
                parts.push(check);
            }
        }

        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.qualify(&entity.table),
            parts.join(",\n    ")
        )]
    }

    fn add_column(&self, table: &str, col: &ColumnDescriptor) -> Vec<String> {
        let mut stmts = vec![format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
            self.qualify(table),
            self.column_def(col)
        )];
        if let Some(check) = self.enum_check(table, col) {
            stmts.push(format!("ALTER TABLE {} ADD {}", self.qualify(table), check));
        }
        stmts
    }

    fn modify_column(
        &self,
        table: &str,
        col: &ColumnDescriptor,
        alter_type: bool,
        alter_nullable: bool,
    ) -> Vec<String> {
        let mut stmts = Vec::new();
        let qualified = self.qualify(table);
        let ident = self.quote_ident(&col.name);
        if alter_type {
            // A stale value-set check cannot survive a type change; dropping
            // it first is a no-op for columns that never carried one.
            stmts.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                qualified,
                self.quote_ident(&enum_check_name(table, &col.name))
            ));
            let ty = self.render_type(&col.semantic_type);
            stmts.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                qualified, ident, ty, ident, ty
            ));
            if let Some(check) = self.enum_check(table, col) {
                stmts.push(format!("ALTER TABLE {} ADD {}", qualified, check));
            }
        }
        if alter_nullable {
            let clause = if col.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
            stmts.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} {}",
                qualified, ident, clause
            ));
        }
        stmts
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn render_type(&self, ty: &SemanticType) -> String {
        match ty {
            SemanticType::Integer { width } => match width {
                IntWidth::Small => "smallint".to_string(),
                IntWidth::Standard => "integer".to_string(),
                IntWidth::Big => "bigint".to_string(),
            },
            SemanticType::Text { max_length: Some(n) } => format!("varchar({})", n),
            SemanticType::Text { max_length: None } => "text".to_string(),
            SemanticType::Boolean => "boolean".to_string(),
            SemanticType::Timestamp { with_tz: true } => "timestamptz".to_string(),
            SemanticType::Timestamp { with_tz: false } => "timestamp".to_string(),
            // Postgres bytea is unbounded; a declared max length is advisory.
            SemanticType::Binary { .. } => "bytea".to_string(),
            SemanticType::Numeric { precision, scale } => {
                format!("numeric({},{})", precision, scale)
            }
            // Rendered as text; the value set is enforced by a named CHECK
            // constraint emitted alongside the column.
            SemanticType::Enumerated { .. } => "text".to_string(),
        }
    }

    fn parse_type(
        &self,
        native: &str,
        max_length: Option<u32>,
        precision: Option<u8>,
        scale: Option<u8>,
    ) -> SemanticType {
        match native {
            "int2" | "smallint" => SemanticType::Integer { width: IntWidth::Small },
            "int4" | "integer" => SemanticType::Integer { width: IntWidth::Standard },
            "int8" | "bigint" => SemanticType::Integer { width: IntWidth::Big },
            "varchar" | "character varying" | "bpchar" | "character" => {
                SemanticType::Text { max_length }
            }
            "text" => SemanticType::Text { max_length: None },
            "bool" | "boolean" => SemanticType::Boolean,
            "timestamptz" | "timestamp with time zone" => {
                SemanticType::Timestamp { with_tz: true }
            }
            "timestamp" | "timestamp without time zone" => {
                SemanticType::Timestamp { with_tz: false }
            }
            "bytea" => SemanticType::Binary { max_length: None },
            "numeric" | "decimal" => SemanticType::Numeric {
                precision: precision.unwrap_or(0),
                scale: scale.unwrap_or(0),
            },
            other => {
                warn!(native_type = other, "unrecognized native type, treating as text");
                SemanticType::Text { max_length: None }
            }
        }
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::AlterColumnType => true,
            Capability::AlterColumnNullability => true,
            // Existing rows would violate the constraint immediately.
            Capability::AddNotNullColumnWithoutDefault => false,
        }
    }

    fn render_ddl(&self, op: &ChangeOperation) -> Result<Vec<String>> {
        let stmts = match op {
            ChangeOperation::CreateTable(entity) => self.create_table(entity),
            ChangeOperation::AddColumn { table, column } => self.add_column(table, column),
            ChangeOperation::ModifyColumn {
                table,
                column,
                alter_type,
                alter_nullable,
            } => self.modify_column(table, column, *alter_type, *alter_nullable),
            ChangeOperation::DropColumn { table, column } => vec![format!(
                "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
                self.qualify(table),
                self.quote_ident(column)
            )],
            ChangeOperation::AddIndex { table, index } => {
                let name = truncate_ident(&format!("{}_{}", table, index.name));
                let unique = if index.unique { "UNIQUE " } else { "" };
                let cols = index
                    .columns
                    .iter()
                    .map(|c| self.quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    unique,
                    self.quote_ident(&name),
                    self.qualify(table),
                    cols
                )]
            }
            ChangeOperation::AddForeignKey { table, foreign_key } => {
                let cols = foreign_key
                    .columns
                    .iter()
                    .map(|c| self.quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let ref_cols = foreign_key
                    .ref_columns
                    .iter()
                    .map(|c| self.quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
                    self.qualify(table),
                    self.quote_ident(&truncate_ident(&foreign_key.name)),
                    cols,
                    self.qualify(&foreign_key.ref_table),
                    ref_cols,
                    foreign_key.on_delete.as_sql(),
                    foreign_key.on_update.as_sql()
                )]
            }
        };
        Ok(stmts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EntityBuilder, ForeignKeyDescriptor, IndexDescriptor, RefAction};

    fn dialect() -> PostgresDialect {
        PostgresDialect::new("public")
    }

    #[test]
    fn test_render_type() {
        let d = dialect();
        assert_eq!(d.render_type(&SemanticType::Integer { width: IntWidth::Big }), "bigint");
        assert_eq!(d.render_type(&SemanticType::Text { max_length: Some(255) }), "varchar(255)");
        assert_eq!(d.render_type(&SemanticType::Text { max_length: None }), "text");
        assert_eq!(d.render_type(&SemanticType::Timestamp { with_tz: true }), "timestamptz");
        assert_eq!(d.render_type(&SemanticType::Numeric { precision: 10, scale: 2 }), "numeric(10,2)");
        assert_eq!(
            d.render_type(&SemanticType::Enumerated { values: vec!["a".into()] }),
            "text"
        );
    }

    #[test]
    fn test_parse_type_round_trips() {
        let d = dialect();
        let cases = vec![
            SemanticType::Integer { width: IntWidth::Small },
            SemanticType::Integer { width: IntWidth::Standard },
            SemanticType::Integer { width: IntWidth::Big },
            SemanticType::Text { max_length: Some(100) },
            SemanticType::Text { max_length: None },
            SemanticType::Boolean,
            SemanticType::Timestamp { with_tz: true },
            SemanticType::Timestamp { with_tz: false },
            SemanticType::Binary { max_length: None },
            SemanticType::Numeric { precision: 12, scale: 4 },
        ];
        for ty in cases {
            let native = d.render_type(&ty);
            let (max_length, precision, scale) = match &ty {
                SemanticType::Text { max_length } => (*max_length, None, None),
                SemanticType::Numeric { precision, scale } => (None, Some(*precision), Some(*scale)),
                _ => (None, None, None),
            };
            let base = native.split('(').next().unwrap();
            assert_eq!(d.parse_type(base, max_length, precision, scale), ty);
        }
    }

    #[test]
    fn test_parse_unknown_type_falls_back_to_text() {
        let d = dialect();
        assert_eq!(
            d.parse_type("tsvector", None, None, None),
            SemanticType::Text { max_length: None }
        );
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(dialect().quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_truncate_ident() {
        let long = "x".repeat(80);
        assert_eq!(truncate_ident(&long).len(), 63);
        assert_eq!(truncate_ident("short"), "short");
    }

    #[test]
    fn test_create_table_ddl() {
        use crate::descriptor::ColumnDescriptor;
        let entity = EntityBuilder::new("users")
            .column(
                ColumnDescriptor::new("id", SemanticType::Integer { width: IntWidth::Big })
                    .primary_key()
                    .auto_increment(),
            )
            .column(
                ColumnDescriptor::new("email", SemanticType::Text { max_length: Some(255) })
                    .not_null(),
            )
            .column(ColumnDescriptor::new(
                "status",
                SemanticType::Enumerated {
                    values: vec!["active".into(), "disabled".into()],
                },
            ))
            .build()
            .unwrap();

        let stmts = dialect()
            .render_ddl(&ChangeOperation::CreateTable(entity))
            .unwrap();
        assert_eq!(stmts.len(), 1);
        let ddl = &stmts[0];
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"users\""));
        assert!(ddl.contains("\"id\" bigint GENERATED BY DEFAULT AS IDENTITY NOT NULL"));
        assert!(ddl.contains("\"email\" varchar(255) NOT NULL"));
        assert!(ddl.contains("PRIMARY KEY (\"id\")"));
        assert!(ddl.contains("CONSTRAINT \"chk_users_status_enum\" CHECK (\"status\" IN ('active', 'disabled'))"));
    }

    #[test]
    fn test_add_column_ddl() {
        use crate::descriptor::ColumnDescriptor;
        let stmts = dialect()
            .render_ddl(&ChangeOperation::AddColumn {
                table: "users".into(),
                column: ColumnDescriptor::new("nickname", SemanticType::Text { max_length: Some(64) }),
            })
            .unwrap();
        assert_eq!(
            stmts,
            vec![
                "ALTER TABLE \"public\".\"users\" ADD COLUMN IF NOT EXISTS \"nickname\" varchar(64)"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_modify_column_ddl() {
        use crate::descriptor::ColumnDescriptor;
        let stmts = dialect()
            .render_ddl(&ChangeOperation::ModifyColumn {
                table: "users".into(),
                column: ColumnDescriptor::new(
                    "email",
                    SemanticType::Text { max_length: Some(512) },
                )
                .not_null(),
                alter_type: true,
                alter_nullable: true,
            })
            .unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].contains("DROP CONSTRAINT IF EXISTS \"chk_users_email_enum\""));
        assert!(stmts[1].contains("ALTER COLUMN \"email\" TYPE varchar(512) USING \"email\"::varchar(512)"));
        assert!(stmts[2].contains("ALTER COLUMN \"email\" SET NOT NULL"));
    }

    #[test]
    fn test_modify_column_to_enumerated_adds_value_check() {
        use crate::descriptor::ColumnDescriptor;
        let stmts = dialect()
            .render_ddl(&ChangeOperation::ModifyColumn {
                table: "users".into(),
                column: ColumnDescriptor::new(
                    "status",
                    SemanticType::Enumerated {
                        values: vec!["active".into(), "disabled".into()],
                    },
                ),
                alter_type: true,
                alter_nullable: false,
            })
            .unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].contains("DROP CONSTRAINT IF EXISTS \"chk_users_status_enum\""));
        assert!(stmts[1].contains("ALTER COLUMN \"status\" TYPE text USING \"status\"::text"));
        assert!(stmts[2].contains(
            "ADD CONSTRAINT \"chk_users_status_enum\" CHECK (\"status\" IN ('active', 'disabled'))"
        ));
    }

    #[test]
    fn test_add_index_ddl() {
        let stmts = dialect()
            .render_ddl(&ChangeOperation::AddIndex {
                table: "users".into(),
                index: IndexDescriptor {
                    name: "ux_email".into(),
                    columns: vec!["email".into()],
                    unique: true,
                },
            })
            .unwrap();
        assert_eq!(
            stmts,
            vec![
                "CREATE UNIQUE INDEX IF NOT EXISTS \"users_ux_email\" ON \"public\".\"users\" (\"email\")"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_add_foreign_key_ddl() {
        let stmts = dialect()
            .render_ddl(&ChangeOperation::AddForeignKey {
                table: "sessions".into(),
                foreign_key: ForeignKeyDescriptor {
                    name: "fk_sessions_user_id".into(),
                    columns: vec!["user_id".into()],
                    ref_table: "users".into(),
                    ref_columns: vec!["id".into()],
                    on_delete: RefAction::Cascade,
                    on_update: RefAction::NoAction,
                },
            })
            .unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("ADD CONSTRAINT \"fk_sessions_user_id\" FOREIGN KEY (\"user_id\") REFERENCES \"public\".\"users\" (\"id\") ON DELETE CASCADE ON UPDATE NO ACTION"));
    }

    #[test]
    fn test_parse_enum_values_array_form() {
        let def = "CHECK ((status = ANY (ARRAY['active'::text, 'disabled'::text])))";
        assert_eq!(
            parse_enum_values(def),
            Some(vec!["active".to_string(), "disabled".to_string()])
        );
    }

    #[test]
    fn test_parse_enum_values_in_form() {
        let def = "CHECK (status IN ('a', 'b''c'))";
        assert_eq!(
            parse_enum_values(def),
            Some(vec!["a".to_string(), "b'c".to_string()])
        );
    }

    #[test]
    fn test_parse_enum_values_rejects_other_checks() {
        assert_eq!(parse_enum_values("CHECK ((price > 0))"), None);
    }
}
