//! Query execution against the source-code warehouse.
//!
//! - [`Warehouse`] is the boundary to a query service with asynchronous jobs.
//! - [`QueryRunner`] runs a query synchronously by polling it to completion
//!   and streams the result rows page by page.
//! - [`local`] serves rows from a JSON-lines export.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::models::{Ecosystem, WarehouseRow};

pub mod local;

/// Errors raised by warehouse operations.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("Client or query missing")]
    MissingQuery,

    #[error("failed to poll job {job}: {message}")]
    Poll { job: String, message: String },

    #[error("failed to fetch results of job {job}: {message}")]
    Fetch { job: String, message: String },
}

/// Identifier of a submitted query job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(pub String);

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state reported for a query job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct RowPage {
    pub rows: Vec<WarehouseRow>,
    /// Token for the following page; `None` on the last page.
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait Warehouse: Send {
    async fn submit(&mut self, query: &str) -> Result<JobHandle, WarehouseError>;

    /// Whether the job has finished executing.
    async fn is_done(&mut self, job: &JobHandle) -> Result<bool, WarehouseError>;

    async fn job_state(&mut self, job: &JobHandle) -> Result<JobState, WarehouseError>;

    async fn fetch_page(
        &mut self,
        job: &JobHandle,
        page_token: Option<&str>,
    ) -> Result<RowPage, WarehouseError>;
}

/// Intervals used while waiting on a job.
#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    /// Delay between completion checks after submitting.
    pub completion: Duration,
    /// Delay between status checks while a job is pending.
    pub status: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            completion: Duration::from_millis(100),
            status: Duration::from_secs(1),
        }
    }
}

/// Runs queries to completion. Polling has no timeout: a job that never
/// completes blocks the caller.
pub struct QueryRunner<W> {
    warehouse: W,
    intervals: PollIntervals,
}

impl<W: Warehouse> QueryRunner<W> {
    pub fn new(warehouse: W, intervals: PollIntervals) -> Self {
        Self {
            warehouse,
            intervals,
        }
    }

    #[cfg(test)]
    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Submit `query` and wait until the warehouse reports it done.
    pub async fn run(&mut self, query: &str) -> Result<JobHandle, WarehouseError> {
        if query.trim().is_empty() {
            return Err(WarehouseError::MissingQuery);
        }
        let job = self.warehouse.submit(query).await?;
        info!(%job, "query submitted");

        let mut polls = 0u64;
        while !self.warehouse.is_done(&job).await? {
            polls += 1;
            tokio::time::sleep(self.intervals.completion).await;
        }
        info!(%job, polls, "query completed");
        Ok(job)
    }

    /// Wait while the job is still pending.
    pub async fn wait_until_ready(&mut self, job: &JobHandle) -> Result<JobState, WarehouseError> {
        loop {
            let state = self.warehouse.job_state(job).await?;
            if state != JobState::Pending {
                return Ok(state);
            }
            info!(%job, ?state, "job still pending");
            tokio::time::sleep(self.intervals.status).await;
        }
    }

    /// Stream the result rows of a completed job.
    pub fn rows(&mut self, job: JobHandle) -> RowStream<'_, W> {
        RowStream {
            warehouse: &mut self.warehouse,
            job,
            buffer: VecDeque::new(),
            next_token: None,
            exhausted: false,
            pages: 0,
        }
    }
}

/// Pulls result pages lazily so only one page is held in memory.
pub struct RowStream<'a, W> {
    warehouse: &'a mut W,
    job: JobHandle,
    buffer: VecDeque<WarehouseRow>,
    next_token: Option<String>,
    exhausted: bool,
    pages: u64,
}

impl<W: Warehouse> RowStream<'_, W> {
    pub async fn next(&mut self) -> Result<Option<WarehouseRow>, WarehouseError> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }
            let page = self
                .warehouse
                .fetch_page(&self.job, self.next_token.as_deref())
                .await?;
            self.pages += 1;
            debug!(job = %self.job, page = self.pages, rows = page.rows.len(), "fetched page");
            self.exhausted = page.next_page_token.is_none();
            self.next_token = page.next_page_token;
            self.buffer.extend(page.rows);
        }
    }
}

/// The manifest query: Java repos' `pom.xml`, Python repos'
/// `requirements.txt`, and every `package.json`, as `(content, path)` rows.
pub fn manifest_query() -> String {
    format!(
        r#"
SELECT con.content AS content, L.path AS path
FROM `bigquery-public-data.github_repos.contents` AS con
INNER JOIN (
    SELECT files.id AS id, files.path AS path
    FROM `bigquery-public-data.github_repos.languages` AS langs
    INNER JOIN `bigquery-public-data.github_repos.files` AS files
    ON files.repo_name = langs.repo_name
    WHERE (
        (
            REGEXP_CONTAINS(TO_JSON_STRING(language), r'(?i)java') AND
            files.path LIKE '%/{maven}'
        ) OR
        (
            REGEXP_CONTAINS(TO_JSON_STRING(language), r'(?i)python') AND
            files.path LIKE '%/{pypi}'
        ) OR
        (
            files.path LIKE '%/{npm}'
        )
    )
) AS L
ON con.id = L.id;
"#,
        maven = Ecosystem::Maven.manifest_name(),
        pypi = Ecosystem::Pypi.manifest_name(),
        npm = Ecosystem::Npm.manifest_name(),
    )
}
