//! Transactional RocksDB storage backing the ledger.
//!
//! The schema catalog, the seed data and the ledger marker all live in the same [`rocksdb::TransactionDB`], so a
//! revision step and the marker update describing it are committed or discarded together.

use crate::LedgerError;
use rocksdb::{ColumnFamily, IteratorMode, Options, TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions};
use std::fmt;
use std::path::{Path, PathBuf};

mod column;

pub use column::{Column, ALL_COLUMNS, DATA_COLUMN, META_COLUMN, SCHEMA_COLUMN};

type DB = TransactionDB;
pub(crate) type Txn<'db> = rocksdb::Transaction<'db, DB>;

/// Layout version of the store. Bump it when the encoding of a column changes.
pub const STORE_VERSION: u32 = 1;
const META_STORE_VERSION_KEY: &[u8] = b"STORE_VERSION";

#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Fsync on every commit.
    pub fsync: bool,
}

pub struct Store {
    db: DB,
    write_opts: WriteOptions,
    path: PathBuf,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

fn rocksdb_options() -> Options {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_max_log_file_size(10 * 1024 * 1024);
    options.set_keep_log_file_num(3);
    options.set_log_level(rocksdb::LogLevel::Warn);
    options
}

impl Store {
    #[tracing::instrument(skip(config))]
    pub fn open(path: &Path, config: &StoreConfig) -> Result<Self, LedgerError> {
        tracing::debug!("Opening ledger store at {:?}", path.display());
        let db = DB::open_cf(
            &rocksdb_options(),
            &TransactionDBOptions::default(),
            path,
            ALL_COLUMNS.iter().map(|col| col.rocksdb_name),
        )?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(config.fsync);

        let store = Self { db, write_opts, path: path.to_path_buf() };
        store.check_version()?;
        Ok(store)
    }

    fn check_version(&self) -> Result<(), LedgerError> {
        let txn = self.transaction();
        match txn.get_cf(self.column(META_COLUMN), META_STORE_VERSION_KEY)? {
            Some(bytes) => {
                let store_version = u32::from_be_bytes(
                    bytes[..].try_into().map_err(|_| LedgerError::CorruptedMarker("malformed store version".into()))?,
                );
                if store_version > STORE_VERSION {
                    return Err(LedgerError::StoreNewerThanBinary { store_version, binary_version: STORE_VERSION });
                }
                Ok(())
            }
            None => {
                tracing::debug!("Fresh store, writing layout version {STORE_VERSION}");
                txn.put_cf(self.column(META_COLUMN), META_STORE_VERSION_KEY, STORE_VERSION.to_be_bytes())?;
                txn.commit()?;
                Ok(())
            }
        }
    }

    pub(crate) fn column(&self, col: &Column) -> &ColumnFamily {
        let name = col.rocksdb_name;
        match self.db.cf_handle(name) {
            Some(column) => column,
            None => panic!("column {name} not initialized"),
        }
    }

    /// Starts a transaction. Dropping it without calling `commit` discards every write made through it.
    pub(crate) fn transaction(&self) -> Txn<'_> {
        self.db.transaction_opt(&self.write_opts, &TransactionOptions::default())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Every key/value pair of a column whose key starts with `prefix`, in key order.
pub(crate) fn scan_prefix(
    store: &Store,
    txn: &Txn<'_>,
    col: &Column,
    prefix: &[u8],
) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, LedgerError> {
    let mut out = vec![];
    for entry in txn.iterator_cf(store.column(col), IteratorMode::From(prefix, rocksdb::Direction::Forward)) {
        let (key, value) = entry?;
        if !key.starts_with(prefix) {
            break;
        }
        out.push((key, value));
    }
    Ok(out)
}
