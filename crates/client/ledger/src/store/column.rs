pub struct Column {
    pub rocksdb_name: &'static str,
}

impl Column {
    pub const fn new(name: &'static str) -> Self {
        Self { rocksdb_name: name }
    }
}

/// Ledger marker and store metadata.
pub const META_COLUMN: &Column = &Column::new("meta");
/// One json-encoded [`sp_revision::schema::TableDef`] per table name.
pub const SCHEMA_COLUMN: &Column = &Column::new("schema");
/// Seed data written by `put`/`delete` ops.
pub const DATA_COLUMN: &Column = &Column::new("data");

pub const ALL_COLUMNS: &[&Column] = &[META_COLUMN, SCHEMA_COLUMN, DATA_COLUMN];
