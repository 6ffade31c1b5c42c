//! File fallback sink - one human-diffable JSON file per record id
//!
//! Layout: `<root>/<namespace lowercased>/<encoded id>.json`. Writes go through a
//! temp file and a rename so a crash never leaves a half-written record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::record::Record;

/// Durable per-record sink used when the store rejects a batch
#[async_trait]
pub trait FallbackSink: Send + Sync {
    async fn write_record(&self, namespace: &str, record: &Record) -> Result<()>;

    /// Records written earlier and not yet removed
    async fn load_pending(&self, namespace: &str) -> Result<Vec<Record>>;

    async fn remove(&self, namespace: &str, id: &str) -> Result<()>;
}

pub struct JsonFileSink {
    root: PathBuf,
}

impl JsonFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(encode_file_name(&namespace.to_lowercase()))
    }

    pub fn record_path(&self, namespace: &str, id: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.json", encode_file_name(id)))
    }
}

/// Percent-encode everything outside `[A-Za-z0-9-]` so every id gets its
/// own file name on every platform. The empty name encodes as a lone `%`,
/// which no other input produces.
fn encode_file_name(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[async_trait]
impl FallbackSink for JsonFileSink {
    async fn write_record(&self, namespace: &str, record: &Record) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create fallback dir: {}", dir.display()))?;

        let path = self.record_path(namespace, &record.id);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)
            .with_context(|| format!("Failed to serialize record {}", record.id))?;

        tokio::fs::write(&temp_path, json)
            .await
            .with_context(|| format!("Failed to write fallback: {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("Failed to move fallback into place: {}", path.display()))?;

        debug!("Fallback record written: {}", path.display());
        Ok(())
    }

    async fn load_pending(&self, namespace: &str) -> Result<Vec<Record>> {
        let dir = self.namespace_dir(namespace);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read fallback dir: {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read fallback: {}", path.display()))?;
            match serde_json::from_str::<Record>(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable fallback {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }

    async fn remove(&self, namespace: &str, id: &str) -> Result<()> {
        let path = self.record_path(namespace, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove fallback: {}", path.display()))
            }
        }
    }
}
