use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{archive, batch_key, ARCHIVES_DIR, UNZIP_DIR_MARKER};
use crate::config::JobConfig;
use crate::models::{Ecosystem, ManifestRecord};
use crate::store::{BlobStore, PersistenceStore};

/// Progress of one ecosystem's batches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchState {
    /// Index the next sealed batch will get; starts at 1.
    pub batch_index: u32,
    /// Content bytes in the open batch.
    pub size: u64,
    /// Manifests staged so far this run, across all batches.
    pub staged: u64,
    /// Object keys of the batches sealed so far.
    pub sealed: Vec<String>,
}

impl Default for BatchState {
    fn default() -> Self {
        Self {
            batch_index: 1,
            size: 0,
            staged: 0,
            sealed: Vec::new(),
        }
    }
}

/// Stages manifests per ecosystem on local disk and seals them into
/// compressed batches in the object store whenever a size ceiling is passed.
///
/// Staging lives in `<working_dir>/<ecosystem>/`; a batch is only cleared
/// locally once its archive has been uploaded.
#[derive(Debug)]
pub struct BatchWriter {
    working_dir: PathBuf,
    temp_prefix: String,
    ceiling: u64,
    upload_attempts: u32,
    batches: BTreeMap<Ecosystem, BatchState>,
}

impl BatchWriter {
    /// Prepare empty staging directories, discarding anything left behind by
    /// an earlier run, including unzip dirs of an interrupted replay.
    pub fn new(config: &JobConfig) -> Result<Self> {
        let writer = Self {
            working_dir: config.working_dir.clone(),
            temp_prefix: config.temp_prefix.clone(),
            ceiling: config.batch_size_bytes,
            upload_attempts: config.upload_attempts.max(1),
            batches: Ecosystem::ALL
                .into_iter()
                .map(|e| (e, BatchState::default()))
                .collect(),
        };

        for ecosystem in Ecosystem::ALL {
            reset_dir(&writer.staging_dir(ecosystem))?;
        }
        reset_dir(&writer.working_dir.join(ARCHIVES_DIR))?;
        writer.sweep_unzip_dirs()?;

        Ok(writer)
    }

    fn sweep_unzip_dirs(&self) -> Result<()> {
        let entries = fs::read_dir(&self.working_dir)
            .with_context(|| format!("reading {}", self.working_dir.display()))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let abandoned = path.is_dir()
                && entry.file_name().to_string_lossy().contains(UNZIP_DIR_MARKER);
            if !abandoned {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => debug!(dir = %path.display(), "removed abandoned unzip dir"),
                Err(err) => warn!(dir = %path.display(), error = %err, "could not remove abandoned unzip dir"),
            }
        }
        Ok(())
    }

    pub fn staging_dir(&self, ecosystem: Ecosystem) -> PathBuf {
        self.working_dir.join(ecosystem.as_str())
    }

    pub fn state(&self, ecosystem: Ecosystem) -> &BatchState {
        &self.batches[&ecosystem]
    }

    pub fn states(&self) -> &BTreeMap<Ecosystem, BatchState> {
        &self.batches
    }

    fn state_mut(&mut self, ecosystem: Ecosystem) -> &mut BatchState {
        self.batches.entry(ecosystem).or_default()
    }

    /// Stage one manifest, sealing the ecosystem's batch if it is now over
    /// the ceiling.
    pub async fn add<S: BlobStore>(
        &mut self,
        ecosystem: Ecosystem,
        record: &ManifestRecord,
        store: &mut PersistenceStore<S>,
    ) -> Result<()> {
        let seq = {
            let state = self.state_mut(ecosystem);
            state.staged += 1;
            state.staged
        };

        let path = self
            .staging_dir(ecosystem)
            .join(format!("{}_{}", seq, record.file_name()));
        fs::write(&path, &record.content)
            .with_context(|| format!("staging {} as {}", record.path, path.display()))?;

        let size = {
            let state = self.state_mut(ecosystem);
            state.size += record.content.len() as u64;
            state.size
        };

        if size > self.ceiling {
            self.seal(ecosystem, store).await?;
        }
        Ok(())
    }

    /// Compress, upload and clear the open batch of `ecosystem`.
    ///
    /// The whole archive is re-uploaded on failure, up to the configured
    /// attempts; staging is untouched unless the upload succeeded.
    pub async fn seal<S: BlobStore>(
        &mut self,
        ecosystem: Ecosystem,
        store: &mut PersistenceStore<S>,
    ) -> Result<String> {
        let index = self.state(ecosystem).batch_index;
        let key = batch_key(&self.temp_prefix, ecosystem, index);
        let archive_path = self
            .working_dir
            .join(ARCHIVES_DIR)
            .join(format!("{}_{}.{}", index, ecosystem, archive::ARCHIVE_EXTENSION));

        let files = archive::compress_dir(&self.working_dir, ecosystem.as_str(), &archive_path)?;
        self.upload(&archive_path, &key, store).await?;

        reset_dir(&self.staging_dir(ecosystem))?;
        if let Err(err) = fs::remove_file(&archive_path) {
            warn!(path = %archive_path.display(), error = %err, "could not remove local archive");
        }

        let state = self.state_mut(ecosystem);
        state.batch_index += 1;
        state.size = 0;
        state.sealed.push(key.clone());

        info!(%ecosystem, key = %key, files, "sealed batch");
        debug!(
            "Processed batch {}, starting new batch {}",
            index,
            index + 1
        );
        Ok(key)
    }

    async fn upload<S: BlobStore>(
        &self,
        archive_path: &Path,
        key: &str,
        store: &mut PersistenceStore<S>,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            match store.upload_file(archive_path, key).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.upload_attempts => {
                    warn!(key, attempt, error = %err, "batch upload failed, retrying");
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("uploading batch {} failed after {} attempts", key, attempt)
                    })
                }
            }
        }
    }

    /// Seal every batch still holding content.
    pub async fn finish<S: BlobStore>(&mut self, store: &mut PersistenceStore<S>) -> Result<()> {
        for ecosystem in Ecosystem::ALL {
            if self.state(ecosystem).size > 0 {
                self.seal(ecosystem, store).await?;
            }
        }
        Ok(())
    }

    /// Remove the (now empty) staging and archive directories.
    pub fn remove_staging(&self) {
        let dirs = Ecosystem::ALL
            .into_iter()
            .map(|e| self.staging_dir(e))
            .chain(std::iter::once(self.working_dir.join(ARCHIVES_DIR)));
        for dir in dirs {
            if let Err(err) = fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %err, "could not remove staging dir");
            }
        }
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("clearing {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(())
}
