//! The two-phase harvesting run.
//!
//! [`DataJob::run`] walks the pipeline states in order:
//!
//! 1. `PreCleanup`: delete batches left under the temp prefix.
//! 2. `FetchAndBatch`: stream warehouse rows into sealed batches.
//! 3. `ParseAndAggregate`: replay the batches into frequency tables.
//! 4. `PostCleanup`: delete this run's batches.
//! 5. `Publish`: add the tables to the persisted aggregate.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch::{BatchReader, BatchState, BatchWriter, ReplaySummary};
use crate::collector::Collectors;
use crate::config::JobConfig;
use crate::detector::detect_ecosystem;
use crate::models::{Aggregate, Ecosystem, ManifestRecord, WarehouseRow};
use crate::store::{BlobStore, PersistenceStore};
use crate::warehouse::{manifest_query, QueryRunner, Warehouse};

/// Rows between progress log lines.
const PROGRESS_EVERY: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    PreCleanup,
    FetchAndBatch,
    ParseAndAggregate,
    PostCleanup,
    Publish,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Init => "init",
            PipelineState::PreCleanup => "pre_cleanup",
            PipelineState::FetchAndBatch => "fetch_and_batch",
            PipelineState::ParseAndAggregate => "parse_and_aggregate",
            PipelineState::PostCleanup => "post_cleanup",
            PipelineState::Publish => "publish",
            PipelineState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Manifests and content bytes fetched for one ecosystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentStats {
    pub manifests: u64,
    pub bytes: u64,
}

/// Warehouse rows that never reached a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscardedRows {
    pub missing_path: u64,
    pub missing_content: u64,
    pub unknown_ecosystem: u64,
}

impl DiscardedRows {
    pub fn total(&self) -> u64 {
        self.missing_path + self.missing_content + self.unknown_ecosystem
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub state: PipelineState,
    pub elapsed_ms: u64,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub rows: u64,
    pub content: BTreeMap<Ecosystem, ContentStats>,
    pub discarded: DiscardedRows,
    pub batches: BTreeMap<Ecosystem, BatchState>,
    pub replay: ReplaySummary,
    /// Tables built by this run alone.
    pub collected: Aggregate,
    /// The aggregate as written, prior counts included.
    pub published: Aggregate,
    pub timings: Vec<PhaseTiming>,
}

#[derive(Debug, Default)]
struct FetchSummary {
    rows: u64,
    content: BTreeMap<Ecosystem, ContentStats>,
    discarded: DiscardedRows,
    batches: BTreeMap<Ecosystem, BatchState>,
}

/// Drives one harvesting run against a warehouse and an object store.
pub struct DataJob<W, S> {
    config: JobConfig,
    query: String,
    runner: QueryRunner<W>,
    store: PersistenceStore<S>,
    collectors: Collectors,
    state: PipelineState,
}

impl<W: Warehouse, S: BlobStore> DataJob<W, S> {
    pub fn new(config: JobConfig, runner: QueryRunner<W>, store: PersistenceStore<S>) -> Self {
        Self {
            config,
            query: manifest_query(),
            runner,
            store,
            collectors: Collectors::new(),
            state: PipelineState::Init,
        }
    }

    /// Replace the default manifest query.
    #[cfg(test)]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[cfg(test)]
    pub fn store(&self) -> &PersistenceStore<S> {
        &self.store
    }

    fn enter(&mut self, state: PipelineState) {
        info!(from = %self.state, to = %state, "pipeline state");
        self.state = state;
    }

    /// Run the whole pipeline. Nothing is published unless both phases
    /// succeed; batches of a failed run stay behind for the next run's
    /// pre-cleanup.
    pub async fn run(&mut self) -> Result<JobReport> {
        let mut timings = Vec::new();
        self.collectors = Collectors::new();

        self.enter(PipelineState::PreCleanup);
        let started = Instant::now();
        self.cleanup().await;
        timings.push(timing(PipelineState::PreCleanup, started));

        self.enter(PipelineState::FetchAndBatch);
        let started = Instant::now();
        let fetched = self.fetch_and_batch().await.context(failed_in(self.state))?;
        timings.push(timing(PipelineState::FetchAndBatch, started));

        self.enter(PipelineState::ParseAndAggregate);
        let started = Instant::now();
        let replay = BatchReader::new(&self.config)
            .replay(&mut self.store, &mut self.collectors)
            .await
            .context(failed_in(self.state))?;
        timings.push(timing(PipelineState::ParseAndAggregate, started));
        info!(
            archives = replay.archives,
            manifests = replay.manifests,
            "batches replayed"
        );

        self.enter(PipelineState::PostCleanup);
        let started = Instant::now();
        self.cleanup().await;
        timings.push(timing(PipelineState::PostCleanup, started));

        self.enter(PipelineState::Publish);
        let started = Instant::now();
        let collected = self.collectors.aggregate();
        let published = self
            .store
            .update(collected.clone(), &self.config.aggregate_key)
            .await
            .context(failed_in(self.state))?;
        timings.push(timing(PipelineState::Publish, started));

        self.enter(PipelineState::Done);
        Ok(JobReport {
            rows: fetched.rows,
            content: fetched.content,
            discarded: fetched.discarded,
            batches: fetched.batches,
            replay,
            collected,
            published,
            timings,
        })
    }

    /// Delete everything under the temp prefix. Failures are only logged.
    async fn cleanup(&mut self) {
        let prefix = self.config.temp_prefix.clone();
        match self.store.delete_prefix(&prefix).await {
            Ok(0) => debug!(prefix = %prefix, "nothing to clean up"),
            Ok(removed) => info!(prefix = %prefix, removed, "removed temporary batches"),
            Err(err) => warn!(prefix = %prefix, error = %err, "cleanup failed"),
        }
    }

    async fn fetch_and_batch(&mut self) -> Result<FetchSummary> {
        let mut writer = BatchWriter::new(&self.config)?;
        let mut summary = FetchSummary {
            content: Ecosystem::ALL
                .into_iter()
                .map(|e| (e, ContentStats::default()))
                .collect(),
            ..FetchSummary::default()
        };

        let job = self.runner.run(&self.query).await?;
        let status = self.runner.wait_until_ready(&job).await?;
        info!(%job, ?status, "query ready, fetching rows");

        let mut rows = self.runner.rows(job);
        while let Some(row) = rows.next().await? {
            summary.rows += 1;
            if summary.rows % PROGRESS_EVERY == 0 {
                info!(rows = summary.rows, "rows fetched");
            }

            let Some((ecosystem, record)) = classify(row, &mut summary.discarded) else {
                continue;
            };
            let stats = summary.content.entry(ecosystem).or_default();
            stats.manifests += 1;
            stats.bytes += record.content.len() as u64;

            writer.add(ecosystem, &record, &mut self.store).await?;
        }

        writer.finish(&mut self.store).await?;
        writer.remove_staging();
        summary.batches = writer.states().clone();

        for (ecosystem, stats) in &summary.content {
            info!(%ecosystem, manifests = stats.manifests, bytes = stats.bytes, "content fetched");
        }
        if summary.discarded.total() > 0 {
            warn!(discarded = ?summary.discarded, "rows discarded");
        }
        Ok(summary)
    }
}

/// Turn a row into a manifest record, counting and logging rows that
/// cannot be harvested.
fn classify(row: WarehouseRow, discarded: &mut DiscardedRows) -> Option<(Ecosystem, ManifestRecord)> {
    let Some(path) = row.path.filter(|p| !p.is_empty()) else {
        warn!("row without a path, skipping");
        discarded.missing_path += 1;
        return None;
    };
    let Some(content) = row.content.filter(|c| !c.is_empty()) else {
        warn!(path = %path, "row without content, skipping");
        discarded.missing_content += 1;
        return None;
    };
    let Some(ecosystem) = detect_ecosystem(&path) else {
        warn!(path = %path, "no ecosystem for path, skipping");
        discarded.unknown_ecosystem += 1;
        return None;
    };
    Some((ecosystem, ManifestRecord { path, content }))
}

fn failed_in(state: PipelineState) -> String {
    format!("harvesting failed during {}", state)
}

fn timing(state: PipelineState, started: Instant) -> PhaseTiming {
    PhaseTiming {
        state,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}
