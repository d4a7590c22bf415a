//! In-memory credential store for tests. Not durable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use lb_domain::error::{Error, Result};

use super::CredentialStore;
use crate::types::Credentials;

#[derive(Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<String, Credentials>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    puts: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(session_id: &str, credentials: Credentials) -> Self {
        let store = Self::default();
        store.records.lock().insert(session_id.to_string(), credentials);
        store
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Every subsequent `put` sleeps this long before committing.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    pub fn snapshot(&self, session_id: &str) -> Option<Credentials> {
        self.records.lock().get(session_id).cloned()
    }

    /// Successful writes so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn put(&self, session_id: &str, credentials: &Credentials) -> Result<()> {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Dependency("credential store unavailable".into()));
        }
        self.records
            .lock()
            .insert(session_id.to_string(), credentials.clone());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Credentials>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Dependency("credential store unavailable".into()));
        }
        Ok(self.records.lock().get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.records.lock().remove(session_id);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
