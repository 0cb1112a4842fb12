//! Durable key-value store boundary.
//!
//! A [`Transaction`] collects put/append/unlink operations that the store
//! applies atomically in a single [`KvStore::commit`]: either every
//! operation takes effect or none does.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: Bytes },
    Append { key: String, value: Bytes },
    /// Removes `key` and, when it names a directory, everything under it.
    Unlink { key: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<TxnOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.ops.push(TxnOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.ops.push(TxnOp::Append {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn unlink(&mut self, key: impl Into<String>) {
        self.ops.push(TxnOp::Unlink { key: key.into() });
    }

    /// Move every operation of `other` to the end of this transaction.
    pub fn extend(&mut self, other: Transaction) {
        self.ops.extend(other.ops);
    }

    pub fn ops(&self) -> &[TxnOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("commit failed: {0}")]
    Commit(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn commit(&self, txn: Transaction) -> Result<(), StoreError>;
}

/// In-memory store, suitable for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Bytes>>,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.entries.read().await.get(key).cloned()
    }

    /// True if any key lives under directory `dir`.
    pub async fn contains_dir(&self, dir: &str) -> bool {
        let prefix = format!("{dir}.");
        self.entries
            .read()
            .await
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        for op in txn.ops {
            match op {
                TxnOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                TxnOp::Append { key, value } => {
                    let merged = match entries.remove(&key) {
                        Some(existing) => {
                            let mut buf = BytesMut::with_capacity(existing.len() + value.len());
                            buf.extend_from_slice(&existing);
                            buf.extend_from_slice(&value);
                            buf.freeze()
                        }
                        None => value,
                    };
                    entries.insert(key, merged);
                }
                TxnOp::Unlink { key } => {
                    let prefix = format!("{key}.");
                    entries.retain(|k, _| *k != key && !k.starts_with(&prefix));
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_and_append() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("job.a.J", "signed");
        txn.append("job.a.eventlog", "one\n");
        txn.append("job.a.eventlog", "two\n");
        assert_eq!(txn.len(), 3);
        store.commit(txn).await.unwrap();

        assert_eq!(store.get("job.a.J").await.unwrap(), Bytes::from("signed"));
        assert_eq!(
            store.get("job.a.eventlog").await.unwrap(),
            Bytes::from("one\ntwo\n")
        );
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn unlink_removes_directory() {
        let store = MemoryStore::new();
        let mut txn = Transaction::new();
        txn.put("job.a.J", "x");
        txn.put("job.a.jobspec", "y");
        txn.put("job.ab.J", "z");
        store.commit(txn).await.unwrap();
        assert!(store.contains_dir("job.a").await);

        let mut txn = Transaction::new();
        txn.unlink("job.a");
        store.commit(txn).await.unwrap();

        assert!(!store.contains_dir("job.a").await);
        assert!(store.contains_dir("job.ab").await);
        assert_eq!(store.keys().await, vec!["job.ab.J".to_string()]);
    }

    #[test]
    fn extend_preserves_order() {
        let mut a = Transaction::new();
        a.put("k1", "v1");
        let mut b = Transaction::new();
        b.unlink("k2");
        a.extend(b);
        assert_eq!(
            a.ops(),
            &[
                TxnOp::Put {
                    key: "k1".into(),
                    value: Bytes::from("v1")
                },
                TxnOp::Unlink { key: "k2".into() },
            ]
        );
    }
}
