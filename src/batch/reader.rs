use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::archive::{self, ARCHIVE_EXTENSION};
use super::UNZIP_DIR_MARKER;
use crate::collector::Collectors;
use crate::config::JobConfig;
use crate::detector::detect_batch_ecosystem;
use crate::models::Ecosystem;
use crate::store::{BlobStore, PersistenceStore};

/// What a replay of the sealed batches went through.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    /// Archives downloaded and unpacked.
    pub archives: usize,
    /// Manifests parsed into the collectors.
    pub manifests: u64,
    /// Objects under the prefix that were not batch archives of a known
    /// ecosystem.
    pub skipped_objects: usize,
    /// Archive entries that were not manifests or could not be read.
    pub skipped_files: u64,
}

/// Replays sealed batches from the object store into a set of collectors.
#[derive(Debug, Clone)]
pub struct BatchReader {
    working_dir: PathBuf,
    temp_prefix: String,
}

impl BatchReader {
    pub fn new(config: &JobConfig) -> Self {
        Self {
            working_dir: config.working_dir.clone(),
            temp_prefix: config.temp_prefix.clone(),
        }
    }

    /// Download every archive under the batch prefix, unpack it into its own
    /// scratch directory and parse each manifest with the collector of the
    /// archive's ecosystem.
    ///
    /// A failed download or extraction aborts the replay, so a partial
    /// aggregate is never published.
    pub async fn replay<S: BlobStore>(
        &self,
        store: &mut PersistenceStore<S>,
        collectors: &mut Collectors,
    ) -> Result<ReplaySummary> {
        let mut keys = store
            .list_objects(&self.temp_prefix)
            .await
            .with_context(|| format!("listing batches under {}", self.temp_prefix))?;
        fs::create_dir_all(&self.working_dir)
            .with_context(|| format!("creating {}", self.working_dir.display()))?;

        keys.sort_by_key(|key| {
            let (dir, name) = key.rsplit_once('/').unwrap_or(("", key));
            (dir.to_string(), leading_index(name), key.clone())
        });

        let suffix = format!(".{}", ARCHIVE_EXTENSION);
        let mut summary = ReplaySummary::default();

        for key in keys {
            if !key.ends_with(&suffix) {
                debug!(key = %key, "not a batch archive, skipping");
                summary.skipped_objects += 1;
                continue;
            }
            let Some(ecosystem) = detect_batch_ecosystem(&self.temp_prefix, &key) else {
                warn!(key = %key, "cannot tell the ecosystem of batch, skipping");
                summary.skipped_objects += 1;
                continue;
            };

            info!(key = %key, %ecosystem, "parsing batch");
            summary.archives += 1;

            let unzip_dir = tempfile::Builder::new()
                .prefix(&format!("{}{}", summary.archives, UNZIP_DIR_MARKER))
                .tempdir_in(&self.working_dir)
                .with_context(|| format!("creating unzip dir in {}", self.working_dir.display()))?;

            let result = self
                .replay_archive(store, &key, ecosystem, unzip_dir.path(), collectors)
                .await;

            let unzip_path = unzip_dir.path().to_path_buf();
            if let Err(err) = unzip_dir.close() {
                warn!(dir = %unzip_path.display(), error = %err, "could not remove unzip dir");
            }

            let (manifests, skipped) = result?;
            summary.manifests += manifests;
            summary.skipped_files += skipped;
        }

        Ok(summary)
    }

    /// Returns `(parsed, skipped)` entry counts for one archive.
    async fn replay_archive<S: BlobStore>(
        &self,
        store: &mut PersistenceStore<S>,
        key: &str,
        ecosystem: Ecosystem,
        dir: &Path,
        collectors: &mut Collectors,
    ) -> Result<(u64, u64)> {
        let downloaded = dir.join(format!("downloaded.{}", ARCHIVE_EXTENSION));
        store
            .download_file(key, &downloaded)
            .await
            .with_context(|| format!("downloading batch {}", key))?;
        archive::extract(&downloaded, dir)?;

        let manifest_dir = dir.join(ecosystem.as_str());
        if !manifest_dir.is_dir() {
            warn!(key, %ecosystem, "batch has no {} folder, skipping", ecosystem);
            return Ok((0, 0));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&manifest_dir)
            .with_context(|| format!("reading {}", manifest_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort_by_key(|path| {
            let index = path.file_name().and_then(|n| n.to_str()).and_then(leading_index);
            (index, path.clone())
        });

        let collector = collectors.get_mut(ecosystem);
        let (mut parsed, mut skipped) = (0, 0);
        for file in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !name.ends_with(ecosystem.manifest_name()) {
                warn!(key, file = %name, "not a {} manifest, skipping", ecosystem);
                skipped += 1;
                continue;
            }
            match fs::read_to_string(&file) {
                Ok(content) => {
                    collector.parse_and_collect(Some(&content), true);
                    parsed += 1;
                }
                Err(err) => {
                    warn!(key, file = %name, error = %err, "unreadable manifest, skipping");
                    skipped += 1;
                }
            }
        }

        debug!(key, parsed, skipped, "batch parsed");
        Ok((parsed, skipped))
    }
}

/// The numeric `<n>_` prefix of staged files and batch archives. Replay
/// follows it so counts are recorded in staging order, not lexical order.
fn leading_index(name: &str) -> Option<u64> {
    name.split_once('_')?.0.parse().ok()
}
