//! The logical schema catalog mutated by revisions.

use crate::store::{scan_prefix, Store, Txn, DATA_COLUMN, SCHEMA_COLUMN};
use crate::LedgerError;
use sp_revision::schema::{ColumnDef, IndexDef, TableDef};
use sp_revision::SchemaOp;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Table `{0}` already exists")]
    TableExists(String),
    #[error("Table `{0}` does not exist")]
    NoSuchTable(String),
    #[error("Table `{0}` must have at least one column")]
    NoColumns(String),
    #[error("Column `{table}.{column}` is declared more than once")]
    DuplicateColumn { table: String, column: String },
    #[error("Column `{table}.{column}` already exists")]
    ColumnExists { table: String, column: String },
    #[error("Column `{table}.{column}` does not exist")]
    NoSuchColumn { table: String, column: String },
    #[error("Foreign key `{table}.{column}` references missing `{target_table}.{target_column}`")]
    DanglingForeignKey { table: String, column: String, target_table: String, target_column: String },
    #[error("`{target}` is still referenced by `{referrer}`")]
    StillReferenced { target: String, referrer: String },
    #[error("Column `{table}.{column}` is used by index `{index}`")]
    ColumnIndexed { table: String, column: String, index: String },
    #[error("Index `{index}` already exists on `{table}`")]
    IndexExists { table: String, index: String },
    #[error("Index `{index}` does not exist on `{table}`")]
    NoSuchIndex { table: String, index: String },
    #[error("Index `{index}` on `{table}` has no columns")]
    EmptyIndex { table: String, index: String },
    #[error("Data key `{0}` does not exist")]
    NoSuchKey(String),
}

/// Point-in-time copy of the whole catalog and seed data.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableDef>,
    pub data: BTreeMap<String, String>,
}

/// Catalog view bound to one store transaction. Every read sees the writes made earlier in the same transaction.
pub struct Catalog<'a> {
    store: &'a Store,
    txn: &'a Txn<'a>,
}

impl<'a> Catalog<'a> {
    pub(crate) fn new(store: &'a Store, txn: &'a Txn<'a>) -> Self {
        Self { store, txn }
    }

    pub fn table(&self, name: &str) -> Result<Option<TableDef>, LedgerError> {
        let Some(bytes) = self.txn.get_cf(self.store.column(SCHEMA_COLUMN), name.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn tables(&self) -> Result<Vec<TableDef>, LedgerError> {
        scan_prefix(self.store, self.txn, SCHEMA_COLUMN, b"")?
            .into_iter()
            .map(|(_, value)| Ok(serde_json::from_slice(&value)?))
            .collect()
    }

    pub fn data(&self, key: &str) -> Result<Option<String>, LedgerError> {
        let Some(bytes) = self.txn.get_cf(self.store.column(DATA_COLUMN), key.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn snapshot(&self) -> Result<SchemaSnapshot, LedgerError> {
        let tables = self.tables()?.into_iter().map(|table| (table.name.clone(), table)).collect();
        let data = scan_prefix(self.store, self.txn, DATA_COLUMN, b"")?
            .into_iter()
            .map(|(key, value)| {
                (String::from_utf8_lossy(&key).into_owned(), String::from_utf8_lossy(&value).into_owned())
            })
            .collect();
        Ok(SchemaSnapshot { tables, data })
    }

    fn put_table(&self, table: &TableDef) -> Result<(), LedgerError> {
        self.txn.put_cf(self.store.column(SCHEMA_COLUMN), table.name.as_bytes(), serde_json::to_vec(table)?)?;
        Ok(())
    }

    fn delete_table(&self, name: &str) -> Result<(), LedgerError> {
        self.txn.delete_cf(self.store.column(SCHEMA_COLUMN), name.as_bytes())?;
        Ok(())
    }

    fn existing_table(&self, name: &str) -> Result<TableDef, LedgerError> {
        Ok(self.table(name)?.ok_or_else(|| CatalogError::NoSuchTable(name.to_string()))?)
    }

    fn check_foreign_key(&self, table: &str, column: &ColumnDef, pending: Option<&TableDef>) -> Result<(), LedgerError> {
        let Some(fk) = &column.references else { return Ok(()) };
        // A table may reference itself while being created.
        let target = match pending {
            Some(pending) if pending.name == fk.table => Some(pending.clone()),
            _ => self.table(&fk.table)?,
        };
        if target.as_ref().and_then(|t| t.column(&fk.column)).is_none() {
            return Err(CatalogError::DanglingForeignKey {
                table: table.to_string(),
                column: column.name.clone(),
                target_table: fk.table.clone(),
                target_column: fk.column.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// First foreign key of another table pointing at `table` (or only at `table.column` when given).
    fn referrer(&self, table: &str, column: Option<&str>) -> Result<Option<String>, LedgerError> {
        for other in self.tables()? {
            for col in &other.columns {
                let Some(fk) = &col.references else { continue };
                let self_reference = other.name == table;
                if fk.table == table && column.map_or(true, |c| c == fk.column) && !(self_reference && column.is_none()) {
                    return Ok(Some(format!("{}.{}", other.name, col.name)));
                }
            }
        }
        Ok(None)
    }

    #[tracing::instrument(skip_all, fields(op = %op))]
    pub fn apply(&self, op: &SchemaOp) -> Result<(), LedgerError> {
        match op {
            SchemaOp::CreateTable { name, columns } => {
                if self.table(name)?.is_some() {
                    return Err(CatalogError::TableExists(name.clone()).into());
                }
                if columns.is_empty() {
                    return Err(CatalogError::NoColumns(name.clone()).into());
                }
                for (i, column) in columns.iter().enumerate() {
                    if columns[..i].iter().any(|c| c.name == column.name) {
                        return Err(CatalogError::DuplicateColumn { table: name.clone(), column: column.name.clone() }
                            .into());
                    }
                }
                let table = TableDef { name: name.clone(), columns: columns.clone(), indexes: vec![] };
                for column in columns {
                    self.check_foreign_key(name, column, Some(&table))?;
                }
                self.put_table(&table)
            }
            SchemaOp::DropTable { name } => {
                self.existing_table(name)?;
                if let Some(referrer) = self.referrer(name, None)? {
                    return Err(CatalogError::StillReferenced { target: name.clone(), referrer }.into());
                }
                self.delete_table(name)
            }
            SchemaOp::RenameTable { from, to } => {
                let mut table = self.existing_table(from)?;
                if self.table(to)?.is_some() {
                    return Err(CatalogError::TableExists(to.clone()).into());
                }
                // Foreign keys follow the table, including those of other tables.
                for mut other in self.tables()?.into_iter().filter(|other| other.name != *from) {
                    if retarget_foreign_keys(&mut other, from, to) {
                        self.put_table(&other)?;
                    }
                }
                table.name = to.clone();
                retarget_foreign_keys(&mut table, from, to);
                self.delete_table(from)?;
                self.put_table(&table)
            }
            SchemaOp::AddColumn { table, column } => {
                let mut def = self.existing_table(table)?;
                if def.column(&column.name).is_some() {
                    return Err(CatalogError::ColumnExists { table: table.clone(), column: column.name.clone() }.into());
                }
                def.columns.push(column.clone());
                self.check_foreign_key(table, column, Some(&def))?;
                self.put_table(&def)
            }
            SchemaOp::DropColumn { table, column } => {
                let mut def = self.existing_table(table)?;
                if def.column(column).is_none() {
                    return Err(CatalogError::NoSuchColumn { table: table.clone(), column: column.clone() }.into());
                }
                if let Some(index) = def.indexes.iter().find(|i| i.columns.contains(column)) {
                    return Err(CatalogError::ColumnIndexed {
                        table: table.clone(),
                        column: column.clone(),
                        index: index.name.clone(),
                    }
                    .into());
                }
                if let Some(referrer) = self.referrer(table, Some(column))? {
                    return Err(CatalogError::StillReferenced { target: format!("{table}.{column}"), referrer }.into());
                }
                def.columns.retain(|c| c.name != *column);
                self.put_table(&def)
            }
            SchemaOp::SetDefault { table, column, value } => {
                self.alter_column(table, column, |c| c.server_default = Some(value.clone()))
            }
            SchemaOp::DropDefault { table, column } => self.alter_column(table, column, |c| c.server_default = None),
            SchemaOp::SetNullable { table, column, nullable } => {
                self.alter_column(table, column, |c| c.nullable = *nullable)
            }
            SchemaOp::CreateIndex { table, name, columns, unique } => {
                let mut def = self.existing_table(table)?;
                if def.index(name).is_some() {
                    return Err(CatalogError::IndexExists { table: table.clone(), index: name.clone() }.into());
                }
                if columns.is_empty() {
                    return Err(CatalogError::EmptyIndex { table: table.clone(), index: name.clone() }.into());
                }
                if let Some(missing) = columns.iter().find(|c| def.column(c).is_none()) {
                    return Err(CatalogError::NoSuchColumn { table: table.clone(), column: missing.clone() }.into());
                }
                def.indexes.push(IndexDef { name: name.clone(), columns: columns.clone(), unique: *unique });
                self.put_table(&def)
            }
            SchemaOp::DropIndex { table, name } => {
                let mut def = self.existing_table(table)?;
                if def.index(name).is_none() {
                    return Err(CatalogError::NoSuchIndex { table: table.clone(), index: name.clone() }.into());
                }
                def.indexes.retain(|i| i.name != *name);
                self.put_table(&def)
            }
            SchemaOp::Put { key, value } => {
                self.txn.put_cf(self.store.column(DATA_COLUMN), key.as_bytes(), value.as_bytes())?;
                Ok(())
            }
            SchemaOp::Delete { key } => {
                if self.data(key)?.is_none() {
                    return Err(CatalogError::NoSuchKey(key.clone()).into());
                }
                self.txn.delete_cf(self.store.column(DATA_COLUMN), key.as_bytes())?;
                Ok(())
            }
        }
    }

    fn alter_column(&self, table: &str, column: &str, f: impl FnOnce(&mut ColumnDef)) -> Result<(), LedgerError> {
        let mut def = self.existing_table(table)?;
        let Some(col) = def.column_mut(column) else {
            return Err(CatalogError::NoSuchColumn { table: table.to_string(), column: column.to_string() }.into());
        };
        f(col);
        self.put_table(&def)
    }
}

/// Points every foreign key of `table` aimed at `from` to `to`. Returns whether any key changed.
fn retarget_foreign_keys(table: &mut TableDef, from: &str, to: &str) -> bool {
    let mut changed = false;
    for fk in table.columns.iter_mut().filter_map(|c| c.references.as_mut()).filter(|fk| fk.table == from) {
        fk.table = to.to_string();
        changed = true;
    }
    changed
}
