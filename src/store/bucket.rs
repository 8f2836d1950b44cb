use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// remote object bucket capability provided by the host
///
/// writes are durable on return; the compactor's write-then-delete rule
/// depends on that. listing carries no order guarantee.
pub trait ObjectBucket: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// read `length` bytes at `offset`; buckets without native range reads
    /// fall back to a full get
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key)?.map(|bytes| {
            let start = (offset as usize).min(bytes.len());
            let end = (start + length as usize).min(bytes.len());
            bytes[start..end].to_vec()
        }))
    }
}

/// in-memory bucket for tests and standalone embedding
#[derive(Default)]
pub struct MemoryBucket {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    fail: Mutex<Option<String>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// make every subsequent call fail with the given message
    pub fn poison(&self, message: impl Into<String>) {
        *self.fail.lock().unwrap() = Some(message.into());
    }

    /// total bytes across all stored keys
    pub fn total_bytes(&self) -> u64 {
        let entries = self.entries.lock().unwrap();
        entries.values().map(|v| v.len() as u64).sum()
    }

    fn check(&self) -> Result<()> {
        match &*self.fail.lock().unwrap() {
            Some(msg) => Err(Error::io("object bucket", msg)),
            None => Ok(()),
        }
    }
}

impl ObjectBucket for MemoryBucket {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.entries.lock().unwrap().get(key).map(|bytes| {
            let start = (offset as usize).min(bytes.len());
            let end = (start + length as usize).min(bytes.len());
            bytes[start..end].to_vec()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let bucket = MemoryBucket::new();
        bucket.put("bundles/a.bundle", b"payload").unwrap();

        assert_eq!(
            bucket.get("bundles/a.bundle").unwrap(),
            Some(b"payload".to_vec())
        );
        bucket.delete("bundles/a.bundle").unwrap();
        assert_eq!(bucket.get("bundles/a.bundle").unwrap(), None);
    }

    #[test]
    fn test_list_by_prefix() {
        let bucket = MemoryBucket::new();
        bucket.put("bundles/a.bundle", b"1").unwrap();
        bucket.put("bundles/b.bundle", b"2").unwrap();
        bucket.put("archive/c.bundle", b"3").unwrap();

        let keys = bucket.list("bundles/").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"bundles/a.bundle".to_string()));
    }

    #[test]
    fn test_get_range() {
        let bucket = MemoryBucket::new();
        bucket.put("k", b"0123456789").unwrap();

        assert_eq!(bucket.get_range("k", 2, 3).unwrap(), Some(b"234".to_vec()));
        // range past the end clamps
        assert_eq!(bucket.get_range("k", 8, 10).unwrap(), Some(b"89".to_vec()));
        assert_eq!(bucket.get_range("missing", 0, 1).unwrap(), None);
    }

    #[test]
    fn test_poisoned_bucket_errors() {
        let bucket = MemoryBucket::new();
        bucket.poison("network gone");
        assert!(bucket.get("k").is_err());
        assert!(bucket.list("").is_err());
    }
}
