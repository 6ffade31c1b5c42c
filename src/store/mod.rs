//! Record Store - Deduplicating, batched persistence with file fallback
//!
//! The store buffers accepted records for the current page and flushes them
//! as one unordered bulk upsert:
//! - business fields and `created_at` are written only on first insert
//! - `updated_at` is refreshed on every flush
//! - if the batch fails, every buffered record goes to the fallback sink
//!
//! Once an id is known (staged, flushed, or found in the durable store) it is
//! never staged again for the lifetime of this `RecordStore`.

mod fallback;
mod memory;

pub use fallback::{FallbackSink, JsonFileSink};
pub use memory::MemoryStore;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::record::Record;

/// One upsert in a bulk write, keyed by `id`
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOp {
    pub id: String,
    /// Written only when the document doesn't exist yet
    pub insert_only: Map<String, Value>,
    /// Written on every upsert
    pub always_set: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub modified: usize,
}

/// Durable document store shared by the process
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Apply every op. A returned error means the whole batch failed.
    async fn bulk_upsert(
        &self,
        collection: &str,
        ops: Vec<UpsertOp>,
        ordered: bool,
    ) -> Result<UpsertOutcome>;

    async fn close(&self) -> Result<()>;
}

/// What a flush did with the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was staged
    Empty,
    Persisted { inserted: usize, updated: usize },
    /// The store rejected the batch; every record went to the fallback sink
    FellBack { written: usize, reason: String },
}

impl FlushOutcome {
    pub fn inserted(&self) -> usize {
        match self {
            FlushOutcome::Persisted { inserted, .. } => *inserted,
            _ => 0,
        }
    }

    pub fn updated(&self) -> usize {
        match self {
            FlushOutcome::Persisted { updated, .. } => *updated,
            _ => 0,
        }
    }

    pub fn fallback_written(&self) -> usize {
        match self {
            FlushOutcome::FellBack { written, .. } => *written,
            _ => 0,
        }
    }
}

/// Running totals across all flushes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreTotals {
    pub inserted: usize,
    pub updated: usize,
    pub fallback_written: usize,
}

pub struct RecordStore {
    store: Arc<dyn DurableStore>,
    sink: Arc<dyn FallbackSink>,
    collection: String,
    buffer: Vec<Record>,
    staged: HashSet<String>,
    known: HashSet<String>,
    recovered: HashSet<String>,
    totals: StoreTotals,
}

impl RecordStore {
    pub fn new(
        store: Arc<dyn DurableStore>,
        sink: Arc<dyn FallbackSink>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sink,
            collection: collection.into(),
            buffer: Vec::new(),
            staged: HashSet::new(),
            known: HashSet::new(),
            recovered: HashSet::new(),
            totals: StoreTotals::default(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Fallback files live under the collection name, lowercased by the sink
    pub fn namespace(&self) -> &str {
        &self.collection
    }

    pub fn staged_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn staged_ids(&self) -> impl Iterator<Item = &str> {
        self.buffer.iter().map(|r| r.id.as_str())
    }

    pub fn totals(&self) -> StoreTotals {
        self.totals
    }

    pub async fn connect(&self) -> Result<(), StoreError> {
        debug!("Connecting to durable store ({})", self.collection);
        self.store.connect().await.map_err(StoreError::Connect)
    }

    /// Close the store handle. Failures are logged, never raised.
    pub async fn close(&self) {
        if let Err(e) = self.store.close().await {
            error!("Failed to close durable store: {:#}", e);
        }
        info!(
            "{}: {} inserted, {} updated, {} written to fallback",
            self.collection,
            self.totals.inserted,
            self.totals.updated,
            self.totals.fallback_written
        );
    }

    /// True if `id` is staged, already flushed this session, or in the store.
    pub async fn exists(&mut self, id: &str) -> Result<bool, StoreError> {
        if self.staged.contains(id) || self.known.contains(id) {
            return Ok(true);
        }

        let found = self
            .store
            .find_one(&self.collection, id)
            .await
            .map_err(|source| StoreError::Lookup {
                collection: self.collection.clone(),
                id: id.to_string(),
                source,
            })?
            .is_some();

        if found {
            self.known.insert(id.to_string());
        }
        Ok(found)
    }

    /// Add a record to the buffer. Returns false if the id was already
    /// staged or known; the first staged copy wins.
    pub fn stage(&mut self, record: Record) -> bool {
        if self.known.contains(&record.id) || !self.staged.insert(record.id.clone()) {
            debug!("Record {} already staged or persisted", record.id);
            return false;
        }
        self.buffer.push(record);
        true
    }

    /// Re-stage records left in the fallback sink by an earlier session.
    ///
    /// Their files are removed once a flush persists them to the store.
    pub async fn recover_pending(&mut self) -> Result<usize, StoreError> {
        let pending = self
            .sink
            .load_pending(self.namespace())
            .await
            .map_err(|source| StoreError::Recovery {
                namespace: self.collection.clone(),
                source,
            })?;

        let mut recovered = 0;
        for record in pending {
            let id = record.id.clone();
            if self.stage(record) {
                self.recovered.insert(id);
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!(
                "Recovered {} records from fallback files for {}",
                recovered, self.collection
            );
        }
        Ok(recovered)
    }

    /// Persist the buffer.
    ///
    /// A store failure is absorbed by writing every buffered record to the
    /// fallback sink; only a failing fallback write is returned as an error.
    /// In that case records already written leave the buffer and the rest
    /// stay staged.
    pub async fn flush(&mut self) -> Result<FlushOutcome, StoreError> {
        if self.buffer.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let now = Utc::now();
        let upserted = match self
            .buffer
            .iter()
            .map(|record| upsert_op(record, now))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(ops) => self
                .store
                .bulk_upsert(&self.collection, ops, false)
                .await
                .map_err(|e| format!("{:#}", e)),
            Err(e) => Err(e.to_string()),
        };

        match upserted {
            Ok(outcome) => {
                self.totals.inserted += outcome.inserted;
                self.totals.updated += outcome.modified;
                if outcome.inserted > 0 {
                    debug!("Records inserted: {}", outcome.inserted);
                }
                if outcome.modified > 0 {
                    debug!("Records updated: {}", outcome.modified);
                }

                let flushed = self.drain_buffer();
                self.forget_recovered(&flushed).await;

                Ok(FlushOutcome::Persisted {
                    inserted: outcome.inserted,
                    updated: outcome.modified,
                })
            }
            Err(reason) => {
                error!(
                    "Failed to persist {} records to {}: {}",
                    self.buffer.len(),
                    self.collection,
                    reason
                );
                let written = self.write_fallback().await?;
                Ok(FlushOutcome::FellBack { written, reason })
            }
        }
    }

    async fn write_fallback(&mut self) -> Result<usize, StoreError> {
        debug!(
            "Writing {} records to fallback namespace {}",
            self.buffer.len(),
            self.namespace()
        );

        let mut written = 0;
        let mut failure = None;
        for record in &self.buffer {
            match self.sink.write_record(self.namespace(), record).await {
                Ok(()) => written += 1,
                Err(source) => {
                    failure = Some(StoreError::Fallback {
                        id: record.id.clone(),
                        source,
                    });
                    break;
                }
            }
        }

        // Written records are durable now; keep the rest staged.
        let remaining = self.buffer.split_off(written);
        let drained = std::mem::replace(&mut self.buffer, remaining);
        for record in &drained {
            self.staged.remove(&record.id);
            self.known.insert(record.id.clone());
            // The fresh file supersedes the recovered one
            self.recovered.remove(&record.id);
        }
        self.totals.fallback_written += written;

        match failure {
            Some(err) => {
                error!("Fallback write failed after {} records: {}", written, err);
                Err(err)
            }
            None => {
                warn!(
                    "{} records saved to fallback files for {}",
                    written, self.collection
                );
                Ok(written)
            }
        }
    }

    fn drain_buffer(&mut self) -> Vec<String> {
        let ids: Vec<String> = self.buffer.drain(..).map(|r| r.id).collect();
        for id in &ids {
            self.staged.remove(id);
            self.known.insert(id.clone());
        }
        ids
    }

    async fn forget_recovered(&mut self, flushed: &[String]) {
        for id in flushed {
            if !self.recovered.remove(id) {
                continue;
            }
            if let Err(e) = self.sink.remove(&self.collection, id).await {
                warn!("Failed to remove recovered fallback for {}: {:#}", id, e);
            }
        }
    }
}

fn upsert_op(record: &Record, now: DateTime<Utc>) -> Result<UpsertOp, StoreError> {
    let fields = serde_json::to_value(record).map_err(|source| StoreError::Serialize {
        id: record.id.clone(),
        source,
    })?;

    let mut insert_only = match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    insert_only.remove("id");
    insert_only.insert("created_at".to_string(), Value::String(now.to_rfc3339()));

    let mut always_set = Map::new();
    always_set.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));

    Ok(UpsertOp {
        id: record.id.clone(),
        insert_only,
        always_set,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    struct BrokenStore;

    #[async_trait]
    impl DurableStore for BrokenStore {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn find_one(&self, _collection: &str, _id: &str) -> Result<Option<Value>> {
            Ok(None)
        }

        async fn bulk_upsert(
            &self,
            _collection: &str,
            _ops: Vec<UpsertOp>,
            _ordered: bool,
        ) -> Result<UpsertOutcome> {
            anyhow::bail!("connection reset by peer")
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Accepts `capacity` writes, then fails
    struct FullSink {
        capacity: usize,
        written: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FallbackSink for FullSink {
        async fn write_record(&self, _namespace: &str, record: &Record) -> Result<()> {
            let mut written = self.written.lock();
            if written.len() >= self.capacity {
                anyhow::bail!("no space left on device");
            }
            written.push(record.id.clone());
            Ok(())
        }

        async fn load_pending(&self, _namespace: &str) -> Result<Vec<Record>> {
            Ok(Vec::new())
        }

        async fn remove(&self, _namespace: &str, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn memory_store(dir: &std::path::Path) -> (Arc<MemoryStore>, RecordStore) {
        let memory = Arc::new(MemoryStore::new());
        let store = RecordStore::new(memory.clone(), Arc::new(JsonFileSink::new(dir)), "TestBot");
        store.connect().await.unwrap();
        (memory, store)
    }

    #[tokio::test]
    async fn test_stage_first_write_wins() {
        let dir = tempdir().unwrap();
        let (memory, mut store) = memory_store(dir.path()).await;

        assert!(store.stage(Record::new("a").with_title("first")));
        assert!(!store.stage(Record::new("a").with_title("second")));
        assert_eq!(store.staged_len(), 1);

        store.flush().await.unwrap();
        let doc = memory.document("TestBot", "a").unwrap();
        assert_eq!(doc["title"], serde_json::json!("first"));
    }

    #[tokio::test]
    async fn test_exists_checks_buffer_then_store() {
        let dir = tempdir().unwrap();
        let (memory, mut store) = memory_store(dir.path()).await;
        memory.insert_raw("TestBot", "old", Map::new());

        assert!(store.exists("old").await.unwrap());
        assert!(!store.exists("new").await.unwrap());

        store.stage(Record::new("new"));
        assert!(store.exists("new").await.unwrap());

        // Known ids are never staged again
        assert!(!store.stage(Record::new("old")));
    }

    #[tokio::test]
    async fn test_flushed_ids_stay_known() {
        let dir = tempdir().unwrap();
        let (_memory, mut store) = memory_store(dir.path()).await;

        store.stage(Record::new("a"));
        store.flush().await.unwrap();
        assert_eq!(store.staged_len(), 0);
        assert!(store.exists("a").await.unwrap());
        assert!(!store.stage(Record::new("a")));
    }

    #[tokio::test]
    async fn test_flush_reports_inserted_and_updated() {
        let dir = tempdir().unwrap();
        let (memory, mut store) = memory_store(dir.path()).await;
        let mut seeded = Map::new();
        seeded.insert("updated_at".into(), Value::String("yesterday".into()));
        memory.insert_raw("TestBot", "seen-before", seeded);

        store.stage(Record::new("fresh"));
        // Staged directly without an exists() check, e.g. recovered from fallback
        store.stage(Record::new("seen-before"));

        let outcome = store.flush().await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Persisted {
                inserted: 1,
                updated: 1
            }
        );
        assert_eq!(store.totals().inserted, 1);
        assert_eq!(store.totals().updated, 1);

        let fresh = memory.document("TestBot", "fresh").unwrap();
        assert!(fresh.contains_key("created_at"));
        assert!(fresh.contains_key("updated_at"));
        assert!(!fresh.contains_key("id"));
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let dir = tempdir().unwrap();
        let (_memory, mut store) = memory_store(dir.path()).await;
        assert_eq!(store.flush().await.unwrap(), FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn test_batch_failure_falls_back_to_files() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(JsonFileSink::new(dir.path()));
        let mut store = RecordStore::new(Arc::new(BrokenStore), sink.clone(), "TestBot");

        store.stage(Record::new("a"));
        store.stage(Record::new("b"));
        let outcome = store.flush().await.unwrap();

        assert_eq!(outcome.fallback_written(), 2);
        assert!(matches!(outcome, FlushOutcome::FellBack { ref reason, .. } if reason.contains("connection reset")));
        assert_eq!(store.staged_len(), 0);
        assert!(sink.record_path("TestBot", "a").exists());
        assert!(sink.record_path("TestBot", "b").exists());
        assert_eq!(store.totals().fallback_written, 2);
        assert!(store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_fallback_keeps_lookalike_ids_apart() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(JsonFileSink::new(dir.path()));
        let mut store = RecordStore::new(Arc::new(BrokenStore), sink.clone(), "TestBot");

        store.stage(Record::new("job/1").with_title("first"));
        store.stage(Record::new("job_1").with_title("second"));
        assert_eq!(store.flush().await.unwrap().fallback_written(), 2);

        let mut pending: Vec<(String, Option<String>)> = sink
            .load_pending("TestBot")
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.id, r.title))
            .collect();
        pending.sort();
        assert_eq!(
            pending,
            vec![
                ("job/1".to_string(), Some("first".to_string())),
                ("job_1".to_string(), Some("second".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_fallback_keeps_unwritten_records() {
        let sink = Arc::new(FullSink {
            capacity: 1,
            written: Mutex::new(Vec::new()),
        });
        let mut store = RecordStore::new(Arc::new(BrokenStore), sink.clone(), "TestBot");

        store.stage(Record::new("a"));
        store.stage(Record::new("b"));
        store.stage(Record::new("c"));

        let err = store.flush().await.unwrap_err();
        assert!(matches!(err, StoreError::Fallback { ref id, .. } if id == "b"));
        assert_eq!(*sink.written.lock(), vec!["a".to_string()]);
        assert_eq!(store.staged_ids().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_recovered_files_removed_after_flush() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(JsonFileSink::new(dir.path()));
        sink.write_record("TestBot", &Record::new("left-over"))
            .await
            .unwrap();

        let memory = Arc::new(MemoryStore::new());
        let mut store = RecordStore::new(memory.clone(), sink.clone(), "TestBot");
        store.connect().await.unwrap();

        assert_eq!(store.recover_pending().await.unwrap(), 1);
        assert_eq!(store.staged_len(), 1);

        store.flush().await.unwrap();
        assert!(memory.document("TestBot", "left-over").is_some());
        assert!(!sink.record_path("TestBot", "left-over").exists());
    }
}
