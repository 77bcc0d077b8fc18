use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, TableHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::LedgerError;

/// A `&str`-keyed table of JSON-encoded records.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

pub const INTENTS: RecordTable = TableDefinition::new("intents");
pub const BUILDS: RecordTable = TableDefinition::new("builds");

const ALL_TABLES: [RecordTable; 2] = [INTENTS, BUILDS];

/// Transactional record store over a single redb database file.
///
/// Writers are serialized by redb; readers see a consistent snapshot. Cloning
/// shares the same database handle.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
    path: PathBuf,
}

fn db_err(e: impl Display) -> LedgerError {
    LedgerError::Database(e.to_string())
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;

        // Create every table up front so read transactions never hit a
        // missing table.
        let write_txn = db.begin_write().map_err(db_err)?;
        for table in ALL_TABLES {
            write_txn.open_table(table).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        debug!(path = %path.display(), "ledger opened");
        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts a record under a key that must not exist yet.
    pub fn insert_new<T: Serialize>(
        &self,
        table: RecordTable,
        key: &str,
        record: &T,
    ) -> Result<(), LedgerError> {
        let encoded = encode(table, key, record)?;
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut t = write_txn.open_table(table).map_err(db_err)?;
            if t.get(key).map_err(db_err)?.is_some() {
                return Err(LedgerError::Duplicate {
                    table: table.name().to_string(),
                    key: key.to_string(),
                });
            }
            t.insert(key, encoded.as_slice()).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        table: RecordTable,
        key: &str,
    ) -> Result<Option<T>, LedgerError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let t = read_txn.open_table(table).map_err(db_err)?;
        let bytes = t.get(key).map_err(db_err)?.map(|v| v.value().to_vec());
        bytes.map(|b| decode(table, key, &b)).transpose()
    }

    /// Every record in `table`, in key order.
    pub fn scan<T: DeserializeOwned>(&self, table: RecordTable) -> Result<Vec<T>, LedgerError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let t = read_txn.open_table(table).map_err(db_err)?;
        let mut records = Vec::new();
        for entry in t.iter().map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            records.push(decode(table, key.value(), value.value())?);
        }
        Ok(records)
    }

    /// Read-modify-write of one record inside a single write transaction.
    ///
    /// Returns `Ok(None)` without writing when `key` is absent. If `apply`
    /// fails the transaction is aborted and nothing is written.
    pub fn update<T, F>(
        &self,
        table: RecordTable,
        key: &str,
        apply: F,
    ) -> Result<Option<T>, LedgerError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<(), LedgerError>,
    {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let updated = {
            let mut t = write_txn.open_table(table).map_err(db_err)?;
            let existing = t.get(key).map_err(db_err)?.map(|v| v.value().to_vec());
            let Some(bytes) = existing else {
                return Ok(None);
            };
            let mut record: T = decode(table, key, &bytes)?;
            apply(&mut record)?;
            let encoded = encode(table, key, &record)?;
            t.insert(key, encoded.as_slice()).map_err(db_err)?;
            record
        };
        write_txn.commit().map_err(db_err)?;
        Ok(Some(updated))
    }
}

fn encode<T: Serialize>(table: RecordTable, key: &str, record: &T) -> Result<Vec<u8>, LedgerError> {
    serde_json::to_vec(record).map_err(|e| LedgerError::Corrupt {
        table: table.name().to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(
    table: RecordTable,
    key: &str,
    bytes: &[u8],
) -> Result<T, LedgerError> {
    serde_json::from_slice(bytes).map_err(|e| LedgerError::Corrupt {
        table: table.name().to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    })
}
