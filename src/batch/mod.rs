//! Size-bounded batches of manifests in the object store.
//!
//! Phase one of a run stages manifests per ecosystem with [`BatchWriter`]
//! and seals them into zip archives under the batch prefix:
//!
//! ```text
//! <temp_prefix>/<ecosystem>/<index>_<ecosystem>.zip
//! └── <ecosystem>/<seq>_<manifest file name>
//! ```
//!
//! Phase two replays those archives with [`BatchReader`].

pub mod archive;
pub mod reader;
pub mod writer;

pub use reader::{BatchReader, ReplaySummary};
pub use writer::{BatchState, BatchWriter};

use crate::models::Ecosystem;

/// Subdirectory of the working dir holding archives awaiting upload.
pub const ARCHIVES_DIR: &str = "archives";

/// Marks the per-archive scratch dirs `<n>_unzip_dir_*` made during replay.
pub const UNZIP_DIR_MARKER: &str = "_unzip_dir_";

/// Object key of batch `index` of `ecosystem`.
pub fn batch_key(prefix: &str, ecosystem: Ecosystem, index: u32) -> String {
    format!(
        "{}/{}/{}_{}.{}",
        prefix.trim_end_matches('/'),
        ecosystem,
        index,
        ecosystem,
        archive::ARCHIVE_EXTENSION
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::collector::Collectors;
    use crate::config::JobConfig;
    use crate::models::ManifestRecord;
    use crate::store::local::LocalBlobStore;
    use crate::store::{BlobStore, PersistenceStore, StoreError};

    const PREFIX: &str = "big-query-data/manifest-data-zip";
    const MANIFEST_LEN: usize = 200;

    fn job_config(dir: &Path) -> JobConfig {
        JobConfig {
            working_dir: dir.join("work"),
            batch_size_bytes: 300,
            temp_prefix: PREFIX.to_string(),
            ..JobConfig::default()
        }
    }

    fn local_store(dir: &Path) -> PersistenceStore<LocalBlobStore> {
        PersistenceStore::new(LocalBlobStore::new(dir.join("store")))
    }

    /// Pad with trailing newlines, which every parser ignores.
    fn padded(content: &str) -> String {
        let mut padded = content.to_string();
        while padded.len() < MANIFEST_LEN {
            padded.push('\n');
        }
        padded
    }

    fn manifests(ecosystem: Ecosystem) -> Vec<String> {
        let raw: Vec<&str> = match ecosystem {
            Ecosystem::Maven => vec![
                "<project><dependencies><dependency><groupId>junit</groupId><artifactId>junit</artifactId></dependency></dependencies></project>",
                "<project><dependencies><dependency><groupId>org.slf4j</groupId><artifactId>slf4j-api</artifactId></dependency></dependencies></project>",
                "<project><dependencies><dependency><groupId>junit</groupId><artifactId>junit</artifactId></dependency></dependencies></project>",
                "<project><dependencies/></project>",
                "<project><dependencies><dependency><groupId>org.slf4j</groupId><artifactId>slf4j-api</artifactId></dependency></dependencies></project>",
            ],
            Ecosystem::Npm => vec![
                r#"{"dependencies": {"express": "^4.0.0"}}"#,
                r#"{"dependencies": {"express": "^4.0.0", "ejs": "1.0.0"}}"#,
                r#"{"name": "no-deps"}"#,
                r#"{"dependencies": {"ejs": "1.0.0", "express": "^4.0.0"}}"#,
                r#"{"dependencies": {"express": "^4.0.0"}}"#,
            ],
            Ecosystem::Pypi => vec![
                "flask\nboto",
                "django==4.2",
                "boto\nflask",
                "# nothing pinned",
                "Django>=4",
            ],
        };
        raw.into_iter().map(padded).collect()
    }

    fn record(index: usize, ecosystem: Ecosystem, content: &str) -> ManifestRecord {
        ManifestRecord {
            path: format!("org/repo{}/{}", index, ecosystem.manifest_name()),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_replay_matches_direct_processing() {
        let dir = tempfile::tempdir().unwrap();
        let config = job_config(dir.path());
        let mut store = local_store(dir.path());
        let mut writer = BatchWriter::new(&config).unwrap();
        let mut direct = Collectors::new();

        for ecosystem in Ecosystem::ALL {
            for (i, content) in manifests(ecosystem).iter().enumerate() {
                assert_eq!(content.len(), MANIFEST_LEN);
                writer
                    .add(ecosystem, &record(i, ecosystem, content), &mut store)
                    .await
                    .unwrap();
                direct
                    .get_mut(ecosystem)
                    .parse_and_collect(Some(content), true);
            }
        }
        writer.finish(&mut store).await.unwrap();

        // 200, 400 (sealed), 200, 400 (sealed), 200 (sealed on finish)
        for ecosystem in Ecosystem::ALL {
            let expected: Vec<String> = (1..=3).map(|i| batch_key(PREFIX, ecosystem, i)).collect();
            assert_eq!(writer.state(ecosystem).sealed, expected);
            assert_eq!(writer.state(ecosystem).size, 0);
            assert_eq!(writer.state(ecosystem).staged, 5);
        }
        assert_eq!(store.list_objects(PREFIX).await.unwrap().len(), 9);

        let mut replayed = Collectors::new();
        let summary = BatchReader::new(&config)
            .replay(&mut store, &mut replayed)
            .await
            .unwrap();

        assert_eq!(summary.archives, 9);
        assert_eq!(summary.manifests, 15);
        assert_eq!(replayed.aggregate(), direct.aggregate());
        assert_eq!(replayed.get(Ecosystem::Pypi).counter().count("boto, flask"), 2);
        assert_eq!(replayed.get(Ecosystem::Npm).counter().count("ejs, express"), 2);

        let leftovers: Vec<_> = fs::read_dir(&config.working_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(UNZIP_DIR_MARKER))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_new_writer_clears_stale_staging() {
        let dir = tempfile::tempdir().unwrap();
        let config = job_config(dir.path());
        let stale = config.working_dir.join("npm");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("7_package.json"), "{}").unwrap();

        let writer = BatchWriter::new(&config).unwrap();
        assert_eq!(fs::read_dir(writer.staging_dir(Ecosystem::Npm)).unwrap().count(), 0);
        assert!(writer.staging_dir(Ecosystem::Maven).is_dir());
        assert_eq!(writer.state(Ecosystem::Npm).batch_index, 1);
    }

    #[test]
    fn test_new_writer_sweeps_abandoned_unzip_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = job_config(dir.path());
        let abandoned = config.working_dir.join("3_unzip_dir_x1y2z3");
        fs::create_dir_all(abandoned.join("pypi")).unwrap();
        fs::write(abandoned.join("pypi").join("1_requirements.txt"), "flask").unwrap();
        let unrelated = config.working_dir.join("notes");
        fs::create_dir_all(&unrelated).unwrap();

        BatchWriter::new(&config).unwrap();

        assert!(!abandoned.exists());
        assert!(unrelated.is_dir());
    }

    #[tokio::test]
    async fn test_batch_at_ceiling_is_not_sealed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = job_config(dir.path());
        config.batch_size_bytes = 2 * MANIFEST_LEN as u64;
        let mut store = local_store(dir.path());
        let mut writer = BatchWriter::new(&config).unwrap();

        let content = padded("flask");
        for i in 0..2 {
            writer
                .add(Ecosystem::Pypi, &record(i, Ecosystem::Pypi, &content), &mut store)
                .await
                .unwrap();
        }
        assert!(writer.state(Ecosystem::Pypi).sealed.is_empty());
        assert_eq!(writer.state(Ecosystem::Pypi).size, 400);

        writer.finish(&mut store).await.unwrap();
        assert_eq!(
            writer.state(Ecosystem::Pypi).sealed,
            vec![batch_key(PREFIX, Ecosystem::Pypi, 1)]
        );
        assert!(writer.state(Ecosystem::Maven).sealed.is_empty());
    }

    /// Local store whose first `failures` uploads fail.
    struct FlakyStore {
        inner: LocalBlobStore,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(root: &Path, failures: u32) -> Self {
            Self {
                inner: LocalBlobStore::new(root),
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl BlobStore for FlakyStore {
        fn location(&self) -> String {
            self.inner.location()
        }
        async fn connect(&mut self) -> Result<(), StoreError> {
            self.inner.connect().await
        }
        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }
        async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.object_exists(key).await
        }
        async fn read_json(&self, key: &str) -> Result<Value, StoreError> {
            self.inner.read_json(key).await
        }
        async fn write_json(&self, key: &str, data: &Value) -> Result<(), StoreError> {
            self.inner.write_json(key, data).await
        }
        async fn upload_file(&self, local_path: &Path, key: &str) -> Result<(), StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::io(
                    local_path,
                    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upload interrupted"),
                ));
            }
            self.inner.upload_file(local_path, key).await
        }
        async fn download_file(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
            self.inner.download_file(key, local_path).await
        }
        async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list_objects(prefix).await
        }
        async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
            self.inner.delete_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn test_seal_retries_upload() {
        let dir = tempfile::tempdir().unwrap();
        let config = job_config(dir.path());
        let mut store = PersistenceStore::new(FlakyStore::new(&dir.path().join("store"), 2));
        let mut writer = BatchWriter::new(&config).unwrap();

        let content = padded(r#"{"dependencies": {"ejs": "1"}}"#);
        writer
            .add(Ecosystem::Npm, &record(0, Ecosystem::Npm, &content), &mut store)
            .await
            .unwrap();
        let key = writer.seal(Ecosystem::Npm, &mut store).await.unwrap();

        assert_eq!(key, batch_key(PREFIX, Ecosystem::Npm, 1));
        assert!(store.client().object_exists(&key).await.unwrap());
        assert_eq!(writer.state(Ecosystem::Npm).batch_index, 2);
        assert_eq!(fs::read_dir(writer.staging_dir(Ecosystem::Npm)).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_staging() {
        let dir = tempfile::tempdir().unwrap();
        let config = job_config(dir.path());
        let mut store = PersistenceStore::new(FlakyStore::new(&dir.path().join("store"), 10));
        let mut writer = BatchWriter::new(&config).unwrap();

        let content = padded("flask");
        writer
            .add(Ecosystem::Pypi, &record(0, Ecosystem::Pypi, &content), &mut store)
            .await
            .unwrap();
        let err = writer.finish(&mut store).await.unwrap_err();

        assert!(format!("{:#}", err).contains("after 3 attempts"));
        assert_eq!(store.client().failures.load(Ordering::SeqCst), 7);
        assert_eq!(writer.state(Ecosystem::Pypi).batch_index, 1);
        assert_eq!(writer.state(Ecosystem::Pypi).size, MANIFEST_LEN as u64);
        assert!(writer
            .staging_dir(Ecosystem::Pypi)
            .join("1_requirements.txt")
            .is_file());
    }

    /// Build an archive of `files` under `folder/` and upload it as `key`.
    async fn upload_archive(
        dir: &Path,
        store: &mut PersistenceStore<LocalBlobStore>,
        folder: &str,
        files: &[(&str, &str)],
        key: &str,
    ) {
        let src = tempfile::tempdir_in(dir).unwrap();
        fs::create_dir_all(src.path().join(folder)).unwrap();
        for (name, content) in files {
            fs::write(src.path().join(folder).join(name), content).unwrap();
        }
        let output = src.path().join("out.zip");
        archive::compress_dir(src.path(), folder, &output).unwrap();
        store.upload_file(&output, key).await.unwrap();
    }

    #[tokio::test]
    async fn test_replay_skips_unexpected_objects_and_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = job_config(dir.path());
        let mut store = local_store(dir.path());

        upload_archive(
            dir.path(),
            &mut store,
            "npm",
            &[
                ("1_package.json", r#"{"dependencies": {"body-parser": "1.9.0"}}"#),
                ("2_README.md", "# readme"),
            ],
            &batch_key(PREFIX, Ecosystem::Npm, 1),
        )
        .await;
        // Maven batch whose archive holds an npm folder.
        upload_archive(
            dir.path(),
            &mut store,
            "npm",
            &[("1_package.json", "{}")],
            &batch_key(PREFIX, Ecosystem::Maven, 1),
        )
        .await;
        upload_archive(
            dir.path(),
            &mut store,
            "cargo",
            &[("1_Cargo.toml", "")],
            &format!("{}/cargo/1_cargo.zip", PREFIX),
        )
        .await;
        let notes = dir.path().join("notes.txt");
        fs::write(&notes, "hello").unwrap();
        store
            .upload_file(&notes, &format!("{}/notes.txt", PREFIX))
            .await
            .unwrap();

        let mut collectors = Collectors::new();
        let summary = BatchReader::new(&config)
            .replay(&mut store, &mut collectors)
            .await
            .unwrap();

        assert_eq!(
            summary,
            ReplaySummary {
                archives: 2,
                manifests: 1,
                skipped_objects: 2,
                skipped_files: 1,
            }
        );
        assert_eq!(collectors.get(Ecosystem::Npm).counter().count("body-parser"), 1);
        assert!(collectors.get(Ecosystem::Maven).counter().is_empty());
    }

    #[tokio::test]
    async fn test_replay_fails_on_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let config = job_config(dir.path());
        let mut store = local_store(dir.path());

        let bogus = dir.path().join("bogus.zip");
        fs::write(&bogus, "not a zip").unwrap();
        store
            .upload_file(&bogus, &batch_key(PREFIX, Ecosystem::Pypi, 1))
            .await
            .unwrap();

        let mut collectors = Collectors::new();
        let result = BatchReader::new(&config)
            .replay(&mut store, &mut collectors)
            .await;

        assert!(result.is_err());
        let leftovers = fs::read_dir(&config.working_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_batch_key_layout() {
        assert_eq!(
            batch_key("big-query-data/manifest-data-zip/", Ecosystem::Maven, 12),
            "big-query-data/manifest-data-zip/maven/12_maven.zip"
        );
    }
}
