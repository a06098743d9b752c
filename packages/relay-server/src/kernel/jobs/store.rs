//! Status record persistence.
//!
//! The production store is an external key-value service with get/set and
//! expiry. [`MemoryStatusStore`] provides the same semantics in process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use super::record::JobRecord;

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Current record, or `None` when absent or expired.
    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>>;

    /// Write the whole record, resetting its expiry to `ttl` from now.
    async fn set(&self, record: &JobRecord, ttl: Duration) -> Result<()>;
}

struct StoredRecord {
    record: JobRecord,
    expires_at: Instant,
}

/// In-memory store honouring per-record TTL.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: RwLock<HashMap<Uuid, StoredRecord>>,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent read fail, as an unreachable store would.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Drop expired entries. Reads already treat them as absent.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, stored| stored.expires_at > now);
        before - records.len()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("status store unavailable");
        }
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(&job_id)
            .filter(|stored| stored.expires_at > Instant::now())
            .map(|stored| stored.record.clone()))
    }

    async fn set(&self, record: &JobRecord, ttl: Duration) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("status store unavailable");
        }
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                record.id,
                StoredRecord {
                    record: record.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
