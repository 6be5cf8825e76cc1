//! Key-value persistence for chat history.
//!
//! The engine never touches a global store: callers inject an implementation of
//! [`KeyValueStore`] (in-memory for tests, a JSON file for the CLI).

use crate::api::Message;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local store; contents are lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by one JSON object file. Loaded once at open; rewritten after every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`; a missing or unreadable file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                log::warn!("history file {} is not valid JSON, starting empty: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value);
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

/// Confirmed messages per conversation, kept in a [`KeyValueStore`] under `messages/{id}`.
#[derive(Clone)]
pub struct MessageHistory {
    store: std::sync::Arc<dyn KeyValueStore>,
}

impl MessageHistory {
    pub fn new(store: std::sync::Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(conversation_id: i64) -> String {
        format!("messages/{}", conversation_id)
    }

    /// Stored messages for the conversation; empty when nothing (or nothing readable) is stored.
    pub fn load(&self, conversation_id: i64) -> Vec<Message> {
        match self.store.get(&Self::key(conversation_id)) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("discarding unreadable history for conversation {}: {}", conversation_id, e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("reading history for conversation {} failed: {}", conversation_id, e);
                Vec::new()
            }
        }
    }

    /// Replace the stored messages; pending placeholders are never persisted.
    pub fn save(&self, conversation_id: i64, messages: &[Message]) {
        let confirmed: Vec<&Message> = messages.iter().filter(|m| !m.is_pending()).collect();
        let result = serde_json::to_string(&confirmed)
            .map_err(StoreError::from)
            .and_then(|raw| self.store.put(&Self::key(conversation_id), raw));
        if let Err(e) = result {
            log::warn!("saving history for conversation {} failed: {}", conversation_id, e);
        }
    }

    pub fn forget(&self, conversation_id: i64) {
        if let Err(e) = self.store.remove(&Self::key(conversation_id)) {
            log::warn!("removing history for conversation {} failed: {}", conversation_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Author;
    use std::sync::Arc;

    fn msg(id: i64, text: &str) -> Message {
        Message {
            id,
            conversation_id: 4,
            author: Author::Agent,
            text: text.to_string(),
            created_at: None,
        }
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("supportdesk-store-test-{}", uuid::Uuid::new_v4()))
            .join("history.json")
    }

    #[test]
    fn memory_store_put_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.put("a", "1".into()).unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn json_file_store_survives_reopen() {
        let path = temp_path();
        {
            let store = JsonFileStore::open(&path);
            store.put("k", "v".into()).unwrap();
            store.put("gone", "x".into()).unwrap();
            store.remove("gone").unwrap();
        }
        let reopened = JsonFileStore::open(&path);
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(reopened.get("gone").unwrap(), None);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn json_file_store_ignores_corrupt_file() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();
        let store = JsonFileStore::open(&path);
        assert_eq!(store.get("k").unwrap(), None);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn history_skips_pending_messages() {
        let history = MessageHistory::new(Arc::new(MemoryStore::new()));
        let pending = Message::pending(4, "draft");
        history.save(4, &[msg(1, "a"), pending, msg(2, "b")]);
        let ids: Vec<i64> = history.load(4).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(history.load(5).is_empty());
        history.forget(4);
        assert!(history.load(4).is_empty());
    }
}
