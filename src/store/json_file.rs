//! On-disk persistence for stock records
//!
//! Stores records as individual `{product_id}.json` files in a directory.
//! Maintains an in-memory cache for fast access. Writes go to a temporary
//! file first and are renamed into place, so a crash never leaves a
//! half-written record behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{RecordStore, StoreError};
use crate::record::{ProductId, StockRecord};

fn record_path(storage_path: &Path, id: &ProductId) -> PathBuf {
    storage_path.join(format!("{}.json", id))
}

/// Write a record to disk as `{id}.json` in the given directory.
async fn write_record(storage_path: &Path, record: &StockRecord) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(storage_path)
        .await
        .map_err(|e| StoreError::IoError(e.to_string()))?;

    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    let path = record_path(storage_path, &record.id);
    let tmp = storage_path.join(format!(".{}.json.tmp", record.id));
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| StoreError::IoError(e.to_string()))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| StoreError::IoError(e.to_string()))?;
    Ok(())
}

async fn remove_record(storage_path: &Path, id: &ProductId) -> Result<(), StoreError> {
    match tokio::fs::remove_file(record_path(storage_path, id)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::IoError(e.to_string())),
    }
}

/// Every `*.json` record file in the directory (hidden and temporary files
/// excluded). A missing directory holds no records.
async fn record_files(storage_path: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    if !tokio::fs::try_exists(storage_path)
        .await
        .map_err(|e| StoreError::IoError(e.to_string()))?
    {
        return Ok(files);
    }

    let mut entries = tokio::fs::read_dir(storage_path)
        .await
        .map_err(|e| StoreError::IoError(e.to_string()))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::IoError(e.to_string()))?
    {
        let path = entry.path();
        let is_record = path.extension().and_then(|ext| ext.to_str()) == Some("json")
            && !path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with('.'));
        if is_record {
            files.push(path);
        }
    }
    Ok(files)
}

/// Persistent record store backed by a directory of JSON files.
pub struct JsonFileRecordStore {
    storage_path: PathBuf,
    records: RwLock<HashMap<ProductId, StockRecord>>,
}

impl JsonFileRecordStore {
    /// Create a store with an empty cache (does not read the directory).
    pub fn new(storage_path: PathBuf) -> Self {
        Self {
            storage_path,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Open a store, loading every record file in the directory.
    ///
    /// Files that fail to decode (including malformed product ids) abort the
    /// load rather than being skipped.
    pub async fn open(storage_path: &Path) -> Result<Self, StoreError> {
        let mut records = HashMap::new();

        for path in record_files(storage_path).await? {
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| StoreError::IoError(e.to_string()))?;
            let record: StockRecord = serde_json::from_slice(&data).map_err(|e| {
                StoreError::DeserializationError(format!("{}: {}", path.display(), e))
            })?;
            records.insert(record.id.clone(), record);
        }

        log::debug!(
            "Loaded {} records from {}",
            records.len(),
            storage_path.display()
        );

        Ok(Self {
            storage_path: storage_path.to_path_buf(),
            records: RwLock::new(records),
        })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn get(&self, id: &ProductId) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<StockRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn put(&self, record: StockRecord) -> Result<(), StoreError> {
        // Hold the write lock across the disk write so cache and disk agree
        let mut records = self.records.write().await;
        write_record(&self.storage_path, &record).await?;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &ProductId) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        remove_record(&self.storage_path, id).await?;
        records.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        // Includes files this instance never loaded
        for path in record_files(&self.storage_path).await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::IoError(e.to_string())),
            }
        }
        records.clear();
        Ok(())
    }
}
