use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use super::{JobHandle, JobState, RowPage, Warehouse, WarehouseError};
use crate::models::WarehouseRow;

/// A [`Warehouse`] serving a fixed set of rows, typically loaded from a
/// JSON-lines export of the manifest query (`{"path": ..., "content": ...}`
/// per line). Every submitted query returns the same rows.
///
/// A submitted job is `Running` until its first completion poll, which
/// finishes it; results can only be fetched from a `Done` job.
#[derive(Debug, Clone)]
pub struct LocalWarehouse {
    rows: Vec<WarehouseRow>,
    page_size: usize,
    jobs: Vec<JobState>,
}

impl LocalWarehouse {
    pub fn new(rows: Vec<WarehouseRow>, page_size: usize) -> Self {
        Self {
            rows,
            page_size: page_size.max(1),
            jobs: Vec::new(),
        }
    }

    /// Load rows from a JSON-lines file. Blank lines are ignored; lines that
    /// are not valid rows are skipped with a warning.
    pub fn from_json_lines(path: &Path, page_size: usize) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading warehouse export {}", path.display()))?;
        Ok(Self::new(parse_json_lines(&content, path), page_size))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Slot of `job` in `jobs`, if it was submitted here.
    fn slot(&self, job: &JobHandle) -> Option<usize> {
        job.0
            .strip_prefix("local-")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n >= 1 && n <= self.jobs.len())
            .map(|n| n - 1)
    }

    fn poll_slot(&self, job: &JobHandle) -> Result<usize, WarehouseError> {
        self.slot(job).ok_or_else(|| WarehouseError::Poll {
            job: job.to_string(),
            message: NOT_INITIALIZED.to_string(),
        })
    }
}

const NOT_INITIALIZED: &str = "Job is not initialized";

fn fetch_error(job: &JobHandle, message: &str) -> WarehouseError {
    WarehouseError::Fetch {
        job: job.to_string(),
        message: message.to_string(),
    }
}

fn parse_json_lines(content: &str, path: &Path) -> Vec<WarehouseRow> {
    let mut rows = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<WarehouseRow>(line) {
            Ok(row) => rows.push(row),
            Err(err) => warn!(
                file = %path.display(),
                line = number + 1,
                error = %err,
                "skipping malformed warehouse row"
            ),
        }
    }
    rows
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    async fn submit(&mut self, query: &str) -> Result<JobHandle, WarehouseError> {
        if query.trim().is_empty() {
            return Err(WarehouseError::MissingQuery);
        }
        self.jobs.push(JobState::Running);
        Ok(JobHandle(format!("local-{}", self.jobs.len())))
    }

    async fn is_done(&mut self, job: &JobHandle) -> Result<bool, WarehouseError> {
        let slot = self.poll_slot(job)?;
        self.jobs[slot] = JobState::Done;
        Ok(true)
    }

    async fn job_state(&mut self, job: &JobHandle) -> Result<JobState, WarehouseError> {
        let slot = self.poll_slot(job)?;
        Ok(self.jobs[slot])
    }

    async fn fetch_page(
        &mut self,
        job: &JobHandle,
        page_token: Option<&str>,
    ) -> Result<RowPage, WarehouseError> {
        let slot = self.slot(job).ok_or_else(|| fetch_error(job, NOT_INITIALIZED))?;
        if self.jobs[slot] != JobState::Done {
            return Err(fetch_error(job, "Job has not completed"));
        }
        let start = match page_token {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| fetch_error(job, &format!("invalid page token `{}`", token)))?,
        };
        let start = start.min(self.rows.len());
        let end = (start + self.page_size).min(self.rows.len());
        Ok(RowPage {
            rows: self.rows[start..end].to_vec(),
            next_page_token: (end < self.rows.len()).then(|| end.to_string()),
        })
    }
}
