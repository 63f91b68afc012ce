// pgsnapd/src/store/testing.rs
//! In-memory store used by pipeline and retention tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::errors::{BackupError, Result};
use crate::store::SnapshotStore;

#[derive(Default)]
pub struct MemStore {
    id: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Number of upcoming `put` calls that fail.
    puts_to_fail: AtomicUsize,
    /// When true, injected failures surface as `StoreUnavailable` instead of
    /// `StoreWrite`.
    fail_unavailable: bool,
    /// Names whose `delete` fails with `StoreDelete`.
    delete_failures: Mutex<HashSet<String>>,
    /// Specific `put` call numbers (1-based) that fail.
    failing_put_calls: Mutex<HashSet<usize>>,
    puts_seen: AtomicUsize,
}

impl MemStore {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn failing_puts(id: &str, count: usize, unavailable: bool) -> Self {
        Self {
            id: id.to_string(),
            puts_to_fail: AtomicUsize::new(count),
            fail_unavailable: unavailable,
            ..Default::default()
        }
    }

    pub fn fail_put_call(&self, call: usize) {
        self.failing_put_calls.lock().unwrap().insert(call);
    }

    pub fn fail_delete_of(&self, name: &str) {
        self.delete_failures
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    pub fn insert(&self, name: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl SnapshotStore for MemStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let call = self.puts_seen.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_put_calls.lock().unwrap().contains(&call) {
            return Err(BackupError::StoreWrite {
                store: self.id.clone(),
                name: name.to_string(),
                cause: "injected write failure".to_string(),
            });
        }
        let remaining = self.puts_to_fail.load(Ordering::SeqCst);
        if remaining > 0 {
            self.puts_to_fail.store(remaining - 1, Ordering::SeqCst);
            return Err(if self.fail_unavailable {
                BackupError::StoreUnavailable {
                    store: self.id.clone(),
                    cause: "injected outage".to_string(),
                }
            } else {
                BackupError::StoreWrite {
                    store: self.id.clone(),
                    name: name.to_string(),
                    cause: "injected write failure".to_string(),
                }
            });
        }
        self.insert(name, bytes);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.names())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if self.delete_failures.lock().unwrap().contains(name) {
            return Err(BackupError::StoreDelete {
                store: self.id.clone(),
                name: name.to_string(),
                cause: "injected delete failure".to_string(),
            });
        }
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(name))
    }
}
