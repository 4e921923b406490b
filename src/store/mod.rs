//! Object storage for sealed batches and the published aggregate.
//!
//! - [`BlobStore`] is the boundary to an object store (bucket of keyed blobs).
//! - [`local`] implements it on a local directory.
//! - [`PersistenceStore`] wraps any store, reconnecting before every
//!   operation and owning the additive publish of the aggregate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::models::Aggregate;

pub mod local;

/// Errors raised by object-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store stayed disconnected after a reconnect attempt.
    #[error("unable to connect to object store {0}")]
    NotConnected(String),

    #[error("object {key} does not exist")]
    MissingObject { key: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in object {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The already-published aggregate could not be interpreted; publishing
    /// over it would discard prior counts.
    #[error("published aggregate {key} is malformed: {source}")]
    MalformedAggregate {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A keyed blob store such as an S3 bucket.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Human-readable location, used in logs and errors.
    fn location(&self) -> String;

    async fn connect(&mut self) -> Result<(), StoreError>;

    fn is_connected(&self) -> bool;

    async fn object_exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn read_json(&self, key: &str) -> Result<Value, StoreError>;

    async fn write_json(&self, key: &str, data: &Value) -> Result<(), StoreError>;

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<(), StoreError>;

    async fn download_file(&self, key: &str, local_path: &Path) -> Result<(), StoreError>;

    /// Keys under `prefix`, sorted.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete every object under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

/// Connection-checking facade over a [`BlobStore`].
#[derive(Debug)]
pub struct PersistenceStore<S> {
    client: S,
}

impl<S: BlobStore> PersistenceStore<S> {
    pub fn new(client: S) -> Self {
        Self { client }
    }

    #[cfg(test)]
    pub fn client(&self) -> &S {
        &self.client
    }

    async fn check_and_connect(&mut self) -> Result<(), StoreError> {
        if !self.client.is_connected() {
            self.client.connect().await?;
            if !self.client.is_connected() {
                return Err(StoreError::NotConnected(self.client.location()));
            }
        }
        Ok(())
    }

    /// Merge `data` into the aggregate stored at `key` and write it back.
    ///
    /// Counts are added to those already published, and keys already
    /// published keep their place ahead of new keys with equal counts. An
    /// existing document that cannot be read or decoded aborts the update
    /// instead of being overwritten. Returns the document that was written.
    pub async fn update(&mut self, data: Aggregate, key: &str) -> Result<Aggregate, StoreError> {
        self.check_and_connect().await?;

        let mut merged = if self.client.object_exists(key).await? {
            info!(key, "aggregate exists, merging");
            let json = self.client.read_json(key).await?;
            serde_json::from_value::<Aggregate>(json).map_err(|source| {
                StoreError::MalformedAggregate {
                    key: key.to_string(),
                    source,
                }
            })?
        } else {
            Aggregate::new()
        };

        for (ecosystem, table) in &data {
            merged.entry(*ecosystem).or_default().merge(table);
        }

        let json = serde_json::to_value(&merged).map_err(|source| StoreError::Json {
            key: key.to_string(),
            source,
        })?;
        self.client.write_json(key, &json).await?;
        info!(key, "aggregate updated");
        Ok(merged)
    }

    pub async fn upload_file(&mut self, src: &Path, target: &str) -> Result<(), StoreError> {
        self.check_and_connect().await?;
        self.client.upload_file(src, target).await?;
        debug!(src = %src.display(), target, "uploaded");
        Ok(())
    }

    pub async fn download_file(&mut self, src: &str, target: &Path) -> Result<(), StoreError> {
        self.check_and_connect().await?;
        self.client.download_file(src, target).await
    }

    pub async fn list_objects(&mut self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check_and_connect().await?;
        self.client.list_objects(prefix).await
    }

    pub async fn delete_prefix(&mut self, prefix: &str) -> Result<usize, StoreError> {
        self.check_and_connect().await?;
        self.client.delete_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{DependencySet, FrequencyTable};
    use crate::models::Ecosystem;
    use serde_json::json;

    use local::LocalBlobStore;

    const KEY: &str = "big-query-data/collated.json";

    fn table(keys: &[&[&str]]) -> FrequencyTable {
        let mut table = FrequencyTable::new();
        for ids in keys {
            table.record(&ids.iter().collect::<DependencySet>());
        }
        table
    }

    fn store(dir: &tempfile::TempDir) -> PersistenceStore<LocalBlobStore> {
        PersistenceStore::new(LocalBlobStore::new(dir.path()))
    }

    /// A store that never manages to connect.
    struct Unreachable;

    #[async_trait]
    impl BlobStore for Unreachable {
        fn location(&self) -> String {
            "unreachable".to_string()
        }
        async fn connect(&mut self) -> Result<(), StoreError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            false
        }
        async fn object_exists(&self, _key: &str) -> Result<bool, StoreError> {
            unreachable!()
        }
        async fn read_json(&self, _key: &str) -> Result<Value, StoreError> {
            unreachable!()
        }
        async fn write_json(&self, _key: &str, _data: &Value) -> Result<(), StoreError> {
            unreachable!()
        }
        async fn upload_file(&self, _local: &Path, _key: &str) -> Result<(), StoreError> {
            unreachable!()
        }
        async fn download_file(&self, _key: &str, _local: &Path) -> Result<(), StoreError> {
            unreachable!()
        }
        async fn list_objects(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
            unreachable!()
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<usize, StoreError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_not_connected() {
        let mut store = PersistenceStore::new(Unreachable);
        let err = store.update(Aggregate::new(), KEY).await.unwrap_err();
        assert!(matches!(err, StoreError::NotConnected(_)));
        assert_eq!(err.to_string(), "unable to connect to object store unreachable");
    }

    #[tokio::test]
    async fn test_update_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);

        let mut data = Aggregate::new();
        data.insert(Ecosystem::Npm, table(&[&["body-parser"]]));
        store.update(data, KEY).await.unwrap();

        let written = store.client().read_json(KEY).await.unwrap();
        assert_eq!(written, json!({"npm": {"body-parser": 1}}));
    }

    #[tokio::test]
    async fn test_update_adds_to_existing_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        store.check_and_connect().await.unwrap();
        store
            .client()
            .write_json(KEY, &json!({"pypi": {"flask": 2, "django": 1}, "maven": {}}))
            .await
            .unwrap();

        let mut data = Aggregate::new();
        data.insert(Ecosystem::Pypi, table(&[&["flask"]]));
        let merged = store.update(data, KEY).await.unwrap();

        assert_eq!(merged[&Ecosystem::Pypi].count("flask"), 3);
        let written = store.client().read_json(KEY).await.unwrap();
        assert_eq!(
            written,
            json!({"maven": {}, "pypi": {"flask": 3, "django": 1}})
        );
    }

    #[tokio::test]
    async fn test_update_accepts_existing_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        store.check_and_connect().await.unwrap();
        store.client().write_json(KEY, &json!({})).await.unwrap();

        let mut data = Aggregate::new();
        data.insert(Ecosystem::Pypi, table(&[&["flask"]]));
        store.update(data, KEY).await.unwrap();
        assert_eq!(
            store.client().read_json(KEY).await.unwrap(),
            json!({"pypi": {"flask": 1}})
        );
    }

    #[tokio::test]
    async fn test_update_refuses_to_overwrite_malformed_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        store.check_and_connect().await.unwrap();
        let corrupt = json!({"pypi": {"flask": "many"}});
        store.client().write_json(KEY, &corrupt).await.unwrap();

        let mut data = Aggregate::new();
        data.insert(Ecosystem::Pypi, table(&[&["flask"]]));
        let err = store.update(data, KEY).await.unwrap_err();

        assert!(matches!(err, StoreError::MalformedAggregate { .. }));
        assert_eq!(store.client().read_json(KEY).await.unwrap(), corrupt);
    }

    #[tokio::test]
    async fn test_update_refuses_unreadable_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        store.check_and_connect().await.unwrap();
        std::fs::create_dir_all(dir.path().join("big-query-data")).unwrap();
        std::fs::write(dir.path().join(KEY), "{ not json").unwrap();

        let err = store.update(Aggregate::new(), KEY).await.unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }

    fn position(haystack: &str, needle: &str) -> usize {
        haystack
            .find(needle)
            .unwrap_or_else(|| panic!("{} missing from {}", needle, haystack))
    }

    #[tokio::test]
    async fn test_written_tables_are_ordered_by_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);

        let mut pypi = table(&[&["attrs"]]);
        for _ in 0..5 {
            pypi.record(&["zope"].iter().collect::<DependencySet>());
        }
        assert_eq!(pypi.most_common(), vec![("zope", 5), ("attrs", 1)]);

        let mut data = Aggregate::new();
        data.insert(Ecosystem::Pypi, pypi);
        store.update(data, KEY).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(KEY)).unwrap();
        assert!(position(&raw, "\"zope\"") < position(&raw, "\"attrs\""));
    }

    #[tokio::test]
    async fn test_published_keys_win_count_ties() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir);
        store.check_and_connect().await.unwrap();
        store
            .client()
            .write_json(KEY, &json!({"pypi": {"django": 1}}))
            .await
            .unwrap();

        let mut data = Aggregate::new();
        data.insert(Ecosystem::Pypi, table(&[&["flask"]]));
        let merged = store.update(data, KEY).await.unwrap();

        assert_eq!(
            merged[&Ecosystem::Pypi].most_common(),
            vec![("django", 1), ("flask", 1)]
        );
        let raw = std::fs::read_to_string(dir.path().join(KEY)).unwrap();
        assert!(position(&raw, "\"django\"") < position(&raw, "\"flask\""));
    }
}
