//! In-process durable store with the same upsert semantics as the real
//! document database. Used for dry runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{DurableStore, UpsertOp, UpsertOutcome};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Map<String, Value>>>>,
    connected: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Seed a document directly, bypassing the upsert path
    pub fn insert_raw(&self, collection: &str, id: &str, mut document: Map<String, Value>) {
        document.insert("_id".to_string(), Value::String(id.to_string()));
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Map<String, Value>> {
        self.collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected() {
            bail!("memory store is not connected");
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn find_one(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.ensure_connected()?;
        Ok(self.document(collection, id).map(Value::Object))
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        ops: Vec<UpsertOp>,
        _ordered: bool,
    ) -> Result<UpsertOutcome> {
        self.ensure_connected()?;

        let mut outcome = UpsertOutcome::default();
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();

        for op in ops {
            match docs.get_mut(&op.id) {
                Some(existing) => {
                    let mut changed = false;
                    for (key, value) in op.always_set {
                        if existing.get(&key) != Some(&value) {
                            existing.insert(key, value);
                            changed = true;
                        }
                    }
                    if changed {
                        outcome.modified += 1;
                    }
                }
                None => {
                    let mut document = op.insert_only;
                    document.extend(op.always_set);
                    document.insert("_id".to_string(), Value::String(op.id.clone()));
                    docs.insert(op.id, document);
                    outcome.inserted += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
