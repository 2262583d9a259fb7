// src/mapping/store.rs
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Mapping, NewMapping};
use crate::error::StoreError;

/// The create/list/delete contract the supervisor and the management tools
/// rely on. Implementations serialize their own writes.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn list_mappings(&self) -> Result<Vec<Mapping>, StoreError>;
    async fn create_mapping(&self, new: NewMapping) -> Result<Mapping, StoreError>;
    async fn delete_mapping(&self, id: u64) -> Result<(), StoreError>;
}

/// Serialized form shared by both stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    mappings: Vec<Mapping>,
}

impl StoreDocument {
    fn insert(&mut self, new: NewMapping) -> Result<Mapping, StoreError> {
        let new = new.normalized()?;

        if self.mappings.iter().any(|m| {
            m.same_source(&new) && m.target_webhook_url == new.target_webhook_url
        }) {
            return Err(StoreError::Duplicate {
                server: new.source_server_url,
                topic: new.source_topic,
                webhook: new.target_webhook_url,
            });
        }
        if let Some(existing) = self.mappings.iter().find(|m| m.same_source(&new)) {
            tracing::warn!(
                existing_id = existing.id,
                server = %new.source_server_url,
                topic = %new.source_topic,
                "topic already subscribed by another mapping; adding a second subscription"
            );
        }

        let max_existing = self.mappings.iter().map(|m| m.id).max().unwrap_or(0);
        let id = self.next_id.max(max_existing + 1).max(1);
        self.next_id = id + 1;

        let mapping = new.with_id(id);
        self.mappings.push(mapping.clone());
        Ok(mapping)
    }

    fn remove(&mut self, id: u64) -> Result<(), StoreError> {
        let before = self.mappings.len();
        self.mappings.retain(|m| m.id != id);
        if self.mappings.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

/// Process-local store. Used by tests and embedders that manage mappings
/// through the admin API only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a mapping under its existing id.
    pub async fn upsert(&self, mapping: Mapping) {
        let mut doc = self.doc.lock().await;
        match doc.mappings.iter_mut().find(|m| m.id == mapping.id) {
            Some(slot) => *slot = mapping,
            None => {
                doc.next_id = doc.next_id.max(mapping.id + 1);
                doc.mappings.push(mapping);
            }
        }
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn list_mappings(&self) -> Result<Vec<Mapping>, StoreError> {
        Ok(self.doc.lock().await.mappings.clone())
    }

    async fn create_mapping(&self, new: NewMapping) -> Result<Mapping, StoreError> {
        self.doc.lock().await.insert(new)
    }

    async fn delete_mapping(&self, id: u64) -> Result<(), StoreError> {
        self.doc.lock().await.remove(id)
    }
}

/// JSON document on disk, re-read on every call so edits made by `bridgectl`
/// reach a running daemon on its next reconcile.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<StoreDocument, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) if s.trim().is_empty() => Ok(StoreDocument::default()),
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file, then rename over the original.
    async fn save(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(doc)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl MappingStore for JsonFileStore {
    async fn list_mappings(&self) -> Result<Vec<Mapping>, StoreError> {
        Ok(self.load().await?.mappings)
    }

    async fn create_mapping(&self, new: NewMapping) -> Result<Mapping, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        let mapping = doc.insert(new)?;
        self.save(&doc).await?;
        tracing::info!(
            id = mapping.id,
            server = %mapping.source_server_url,
            topic = %mapping.source_topic,
            "mapping added"
        );
        Ok(mapping)
    }

    async fn delete_mapping(&self, id: u64) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        doc.remove(id)?;
        self.save(&doc).await?;
        tracing::info!(id, "mapping removed");
        Ok(())
    }
}
