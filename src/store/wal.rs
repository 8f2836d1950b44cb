use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::object::Kind;
use crate::oid::Oid;
use crate::store::row::{decode_row, encode_row, RowStore, Table};

/// object-store mutation kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectOp {
    Put,
    Delete,
    Promote,
    Demote,
}

/// ref-store mutation kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefOp {
    Set,
    Delete,
    SetSymbolic,
}

/// what a WAL entry records
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum WalRecord {
    Object {
        op: ObjectOp,
        oid: Oid,
        kind: Kind,
    },
    Ref {
        op: RefOp,
        name: String,
        old: Option<String>,
        new: Option<String>,
    },
}

/// a sequenced WAL entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub record: WalRecord,
    /// unix seconds
    pub ts: i64,
    pub flushed: bool,
}

/// append-only log of mutating operations
///
/// per-instance: the isolate serialises writers, so a plain atomic counter
/// seeded from the highest stored key is enough.
pub struct Wal {
    rows: Arc<dyn RowStore>,
    next_seq: AtomicU64,
}

impl Wal {
    /// open the WAL, seeding the sequence counter from existing rows
    pub fn open(rows: Arc<dyn RowStore>) -> Result<Self> {
        let mut next = 0u64;
        for (key, _) in rows.scan_prefix(Table::Wal, &[], None)? {
            if let Ok(bytes) = <[u8; 8]>::try_from(key.as_slice()) {
                next = next.max(u64::from_be_bytes(bytes) + 1);
            }
        }
        Ok(Self {
            rows,
            next_seq: AtomicU64::new(next),
        })
    }

    /// append a record, returning its sequence number
    pub fn append(&self, record: WalRecord) -> Result<u64> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = WalEntry {
            seq,
            record,
            ts: unix_now(),
            flushed: false,
        };
        self.rows
            .put(Table::Wal, &seq.to_be_bytes(), &encode_row(&entry)?)?;
        Ok(seq)
    }

    /// all entries in sequence order
    pub fn entries(&self) -> Result<Vec<WalEntry>> {
        self.rows
            .scan_prefix(Table::Wal, &[], None)?
            .iter()
            .map(|(_, v)| decode_row(v))
            .collect()
    }

    /// entries not yet marked flushed
    pub fn unflushed(&self) -> Result<Vec<WalEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| !e.flushed)
            .collect())
    }

    /// mark every entry with seq <= `up_to` as flushed
    pub fn mark_flushed(&self, up_to: u64) -> Result<usize> {
        let mut marked = 0;
        for mut entry in self.entries()? {
            if !entry.flushed && entry.seq <= up_to {
                entry.flushed = true;
                self.rows
                    .put(Table::Wal, &entry.seq.to_be_bytes(), &encode_row(&entry)?)?;
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// remove flushed entries, returning how many were dropped
    pub fn truncate(&self) -> Result<usize> {
        let mut dropped = 0;
        for entry in self.entries()? {
            if entry.flushed {
                self.rows.delete(Table::Wal, &entry.seq.to_be_bytes())?;
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    /// number of entries currently held
    pub fn len(&self) -> Result<usize> {
        Ok(self.rows.scan_prefix(Table::Wal, &[], None)?.len())
    }
}

/// current unix time in seconds
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::row::MemoryRowStore;

    fn wal() -> Wal {
        Wal::open(Arc::new(MemoryRowStore::new())).unwrap()
    }

    fn put_record(n: u8) -> WalRecord {
        WalRecord::Object {
            op: ObjectOp::Put,
            oid: Oid::from_bytes([n; 20]),
            kind: Kind::Blob,
        }
    }

    #[test]
    fn test_append_sequences() {
        let wal = wal();
        assert_eq!(wal.append(put_record(1)).unwrap(), 0);
        assert_eq!(wal.append(put_record(2)).unwrap(), 1);

        let entries = wal.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].seq, 1);
        assert!(!entries[0].flushed);
    }

    #[test]
    fn test_seq_survives_reopen() {
        let rows: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new());
        {
            let wal = Wal::open(rows.clone()).unwrap();
            wal.append(put_record(1)).unwrap();
            wal.append(put_record(2)).unwrap();
        }
        let wal = Wal::open(rows).unwrap();
        assert_eq!(wal.append(put_record(3)).unwrap(), 2);
    }

    #[test]
    fn test_mark_flushed_and_truncate() {
        let wal = wal();
        for n in 0..4 {
            wal.append(put_record(n)).unwrap();
        }

        assert_eq!(wal.mark_flushed(1).unwrap(), 2);
        assert_eq!(wal.unflushed().unwrap().len(), 2);

        assert_eq!(wal.truncate().unwrap(), 2);
        assert_eq!(wal.len().unwrap(), 2);
        // remaining entries are the unflushed tail
        assert!(wal.entries().unwrap().iter().all(|e| !e.flushed));
    }

    #[test]
    fn test_ref_record_roundtrip() {
        let wal = wal();
        let record = WalRecord::Ref {
            op: RefOp::Set,
            name: "refs/heads/main".to_string(),
            old: None,
            new: Some("ce013625030ba8dba906f756967f9e9ca394464a".to_string()),
        };
        wal.append(record.clone()).unwrap();
        assert_eq!(wal.entries().unwrap()[0].record, record);
    }
}
