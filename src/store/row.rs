use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// tables the engine keeps in the host row store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    /// hot object payloads, keyed by raw oid
    Objects,
    /// tier metadata for every object, keyed by oid hex (prefix-scannable)
    ObjectIndex,
    /// refs, keyed by ref name
    Refs,
    /// write-ahead log, keyed by big-endian sequence number
    Wal,
    /// singleton merge state
    MergeState,
    /// branch upstream tracking, keyed by branch name
    Upstreams,
    /// worktree records, keyed by slug
    Worktrees,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Objects,
        Table::ObjectIndex,
        Table::Refs,
        Table::Wal,
        Table::MergeState,
        Table::Upstreams,
        Table::Worktrees,
    ];

    fn slot(&self) -> usize {
        match self {
            Table::Objects => 0,
            Table::ObjectIndex => 1,
            Table::Refs => 2,
            Table::Wal => 3,
            Table::MergeState => 4,
            Table::Upstreams => 5,
            Table::Worktrees => 6,
        }
    }
}

/// transactional row store capability provided by the host isolate
///
/// read-your-writes within the isolate; each call is atomic. prefix scans
/// return rows in key order, which short-oid resolution and the WAL rely
/// on.
pub trait RowStore: Send + Sync {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, table: Table, key: &[u8], value: &[u8]) -> Result<()>;

    /// delete a row, returning whether it existed
    fn delete(&self, table: Table, key: &[u8]) -> Result<bool>;

    /// rows whose key starts with `prefix`, in key order
    fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// point-get a batch of keys in one round-trip, preserving input order
    fn get_many(&self, table: Table, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(table, k)).collect()
    }
}

/// encode a typed record to row bytes (CBOR)
pub fn encode_row<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(record, &mut bytes)?;
    Ok(bytes)
}

/// decode row bytes back into a typed record
pub fn decode_row<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(ciborium::from_reader(bytes)?)
}

/// in-memory row store for tests and standalone embedding
#[derive(Default)]
pub struct MemoryRowStore {
    tables: Mutex<[BTreeMap<Vec<u8>, Vec<u8>>; 7]>,
    /// when set, every access fails; lets tests exercise IoError paths
    fail: Mutex<Option<String>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// make every subsequent call fail with the given message
    pub fn poison(&self, message: impl Into<String>) {
        *self.fail.lock().unwrap() = Some(message.into());
    }

    fn check(&self) -> Result<()> {
        match &*self.fail.lock().unwrap() {
            Some(msg) => Err(Error::io("row store", msg)),
            None => Ok(()),
        }
    }
}

impl RowStore for MemoryRowStore {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables[table.slot()].get(key).cloned())
    }

    fn put(&self, table: Table, key: &[u8], value: &[u8]) -> Result<()> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        tables[table.slot()].insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, table: Table, key: &[u8]) -> Result<bool> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        Ok(tables[table.slot()].remove(key).is_some())
    }

    fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        let iter = tables[table.slot()]
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }

    fn get_many(&self, table: Table, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(keys
            .iter()
            .map(|k| tables[table.slot()].get(*k).cloned())
            .collect())
    }
}
