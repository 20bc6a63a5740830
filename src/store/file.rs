use std::fmt::Write;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::fs;
use tracing::instrument;

use super::EntryStore;
use crate::error::CacheError;
use crate::error::Result;

const ENTRY_EXT: &str = "entry";

/// File-backed backend: one directory per namespace, one file per key.
///
/// Writes go to a temporary sibling first and are renamed into place, so a concurrent reader sees either the old or
/// the new payload but never a torn one.
#[derive(Debug)]
pub struct FileStore {
    root:    PathBuf,
    tmp_seq: AtomicU64,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|err| CacheError::storage_unavailable(format!("{}: {err}", root.display())))?;
        Ok(Self {
            root,
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Keys like "metrics:manager:17" are not portable file names. Anything outside [A-Za-z0-9_-] is escaped as %XX,
    // which also keeps "." and ".." from ever reaching the file system.
    fn encode(name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        for b in name.bytes() {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
                out.push(b as char);
            }
            else {
                let _ = write!(out, "%{b:02X}");
            }
        }
        out
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(Self::encode(namespace))
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(Self::encode(key))
            .with_extension(ENTRY_EXT)
    }
}

#[async_trait]
impl EntryStore for FileStore {
    #[instrument(level = "trace", skip(self, value))]
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir).await?;

        let path = self.entry_path(namespace, key);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{ENTRY_EXT}.tmp{seq}"));

        fs::write(&tmp, value).await?;
        if let Err(err) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.entry_path(namespace, key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(namespace, key)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    #[instrument(level = "trace", skip(self))]
    async fn clear_namespace(&self, namespace: &str) -> Result<()> {
        match fs::remove_dir_all(self.namespace_dir(namespace)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    async fn has(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.entry_path(namespace, key)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_escapes_separators() {
        assert_eq!(FileStore::encode("metrics:manager:17"), "metrics%3Amanager%3A17");
        assert_eq!(FileStore::encode(".."), "%2E%2E");
        assert_eq!(FileStore::encode("bookings"), "bookings");
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.put("metrics", "owner:all", b"payload".to_vec()).await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(
            store.get("metrics", "owner:all").await.unwrap(),
            Some(b"payload".to_vec())
        );
        assert!(store.has("metrics", "owner:all").await.unwrap());
    }

    #[tokio::test]
    async fn missing_things_are_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        assert_eq!(store.get("nope", "k").await.unwrap(), None);
        assert!(!store.has("nope", "k").await.unwrap());
        store.delete("nope", "k").await.unwrap();
        store.clear_namespace("nope").await.unwrap();
    }

    #[tokio::test]
    async fn clear_namespace_leaves_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.put("a", "k", vec![1]).await.unwrap();
        store.put("b", "k", vec![2]).await.unwrap();

        store.clear_namespace("a").await.unwrap();

        assert_eq!(store.get("a", "k").await.unwrap(), None);
        assert_eq!(store.get("b", "k").await.unwrap(), Some(vec![2]));
    }
}
