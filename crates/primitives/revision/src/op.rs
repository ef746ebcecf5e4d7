use crate::schema::ColumnDef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single declarative schema mutation.
///
/// Revision files list these under `apply` and `revert`. They are executed in order inside the transaction of the
/// revision step, so a failing op discards every op that ran before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaOp {
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        name: String,
    },
    RenameTable {
        from: String,
        to: String,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: String,
    },
    SetDefault {
        table: String,
        column: String,
        value: String,
    },
    DropDefault {
        table: String,
        column: String,
    },
    SetNullable {
        table: String,
        column: String,
        nullable: bool,
    },
    CreateIndex {
        table: String,
        name: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    DropIndex {
        table: String,
        name: String,
    },
    /// Seed data, written to the data keyspace.
    Put {
        key: String,
        value: String,
    },
    Delete {
        key: String,
    },
}

impl fmt::Display for SchemaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaOp::CreateTable { name, columns } => write!(f, "create table {name} ({} columns)", columns.len()),
            SchemaOp::DropTable { name } => write!(f, "drop table {name}"),
            SchemaOp::RenameTable { from, to } => write!(f, "rename table {from} to {to}"),
            SchemaOp::AddColumn { table, column } => write!(f, "add column {table}.{} {}", column.name, column.ty),
            SchemaOp::DropColumn { table, column } => write!(f, "drop column {table}.{column}"),
            SchemaOp::SetDefault { table, column, value } => write!(f, "set default {table}.{column} = {value}"),
            SchemaOp::DropDefault { table, column } => write!(f, "drop default {table}.{column}"),
            SchemaOp::SetNullable { table, column, nullable } => {
                write!(f, "set {table}.{column} {}", if *nullable { "nullable" } else { "not null" })
            }
            SchemaOp::CreateIndex { table, name, columns, unique } => {
                let kind = if *unique { "unique index" } else { "index" };
                write!(f, "create {kind} {name} on {table} ({})", columns.join(", "))
            }
            SchemaOp::DropIndex { table, name } => write!(f, "drop index {name} on {table}"),
            SchemaOp::Put { key, .. } => write!(f, "put {key}"),
            SchemaOp::Delete { key } => write!(f, "delete {key}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    #[test]
    fn test_yaml_shape() {
        let yaml = r#"
- add_column:
    table: user
    column: { name: is_admin, type: boolean, nullable: false, server_default: "false" }
- drop_default: { table: user, column: is_admin }
- create_index: { table: user, name: ix_user_email, columns: [email] }
"#;
        let ops: Vec<SchemaOp> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            ops[0],
            SchemaOp::AddColumn {
                table: "user".into(),
                column: ColumnDef::new("is_admin", ColumnType::Boolean).not_null().server_default("false"),
            }
        );
        assert_eq!(ops[1], SchemaOp::DropDefault { table: "user".into(), column: "is_admin".into() });
        assert_eq!(
            ops[2],
            SchemaOp::CreateIndex {
                table: "user".into(),
                name: "ix_user_email".into(),
                columns: vec!["email".into()],
                unique: false
            }
        );
    }

    #[test]
    fn test_display() {
        let op = SchemaOp::SetNullable { table: "course".into(), column: "title".into(), nullable: false };
        assert_eq!(op.to_string(), "set course.title not null");
    }
}
