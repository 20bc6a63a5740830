use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::EntryStore;
use crate::error::Result;

/// Process-lifetime backend. Writes are visible to the very next read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held in a namespace.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces.read().get(namespace).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()> {
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .namespaces
            .read()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        if let Some(ns) = self.namespaces.write().get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<()> {
        self.namespaces.write().remove(namespace);
        Ok(())
    }

    async fn has(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .namespaces
            .read()
            .get(namespace)
            .is_some_and(|ns| ns.contains_key(key)))
    }
}
