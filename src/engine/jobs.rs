//! Background comparison runs addressed by job id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::aggregate::{DiffReport, ResultPage, ResultQuery, Summary};
use crate::engine::matcher::{Progress, ProgressSnapshot};
use crate::engine::options::{ComparisonOptions, ExportFormat};
use crate::engine::orchestrator::{self, RunContext};
use crate::error::{ComparisonError, ErrorKind, JobError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub kind: &'static str,
    pub message: String,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: Uuid,
    pub state: JobState,
    pub export_format: ExportFormat,
    pub progress: ProgressSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

enum Outcome {
    Running,
    Completed(Arc<DiffReport>),
    Failed(ErrorKind, String),
    Cancelled,
}

struct Job {
    cancel: CancellationToken,
    progress: Arc<Progress>,
    export_format: ExportFormat,
    outcome: Mutex<Outcome>,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl Job {
    fn outcome(&self) -> MutexGuard<'_, Outcome> {
        self.outcome.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, outcome: Outcome) {
        let mut current = self.outcome();
        // A cancel that lands first wins.
        if matches!(*current, Outcome::Running) {
            *current = outcome;
            *self
                .finished_at
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Utc::now());
        }
    }

    fn is_finished(&self) -> bool {
        !matches!(*self.outcome(), Outcome::Running)
    }

    fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self
            .finished_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status(&self, id: Uuid) -> JobStatus {
        let (state, summary, error) = match &*self.outcome() {
            Outcome::Running => (JobState::Running, None, None),
            Outcome::Completed(report) => (JobState::Completed, Some(report.summary()), None),
            Outcome::Failed(kind, message) => (
                JobState::Failed,
                None,
                Some(JobFailure {
                    kind: kind.as_str(),
                    message: message.clone(),
                }),
            ),
            Outcome::Cancelled => (JobState::Cancelled, None, None),
        };
        JobStatus {
            job_id: id,
            state,
            export_format: self.export_format,
            progress: self.progress.snapshot(),
            summary,
            error,
            started_at: self.started_at,
            finished_at: self.finished_at(),
        }
    }

    fn report(&self, id: Uuid) -> Result<Arc<DiffReport>, JobError> {
        match &*self.outcome() {
            Outcome::Completed(report) => Ok(report.clone()),
            Outcome::Running => Err(JobError::Running(id.to_string())),
            Outcome::Cancelled => Err(JobError::Cancelled(id.to_string())),
            Outcome::Failed(kind, message) => Err(JobError::Failed {
                id: id.to_string(),
                kind: *kind,
                message: message.clone(),
            }),
        }
    }
}

pub const DEFAULT_RETAINED_JOBS: usize = 100;

/// Registry of submitted runs. Cheap to clone; clones share jobs.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, Arc<Job>>>>,
    max_retained: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_JOBS)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `max_retained` finished jobs. Older finished jobs are
    /// dropped, results included, when a new job is submitted. Running jobs
    /// are never evicted.
    pub fn with_retention(max_retained: usize) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            max_retained,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn job(&self, id: Uuid) -> Result<Arc<Job>, JobError> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Starts `options` on a background task and returns at once. The task
    /// owns the run's handle references until it ends.
    pub fn submit(&self, options: ComparisonOptions, ctx: RunContext) -> JobStatus {
        let id = Uuid::new_v4();
        let job = Arc::new(Job {
            cancel: ctx.cancel.clone(),
            progress: ctx.progress.clone(),
            export_format: options.export_format,
            outcome: Mutex::new(Outcome::Running),
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
        });
        {
            let mut jobs = self.lock();
            self.evict_finished(&mut jobs);
            jobs.insert(id, job.clone());
        }
        info!(job = %id, "job submitted");

        let worker = job.clone();
        tokio::spawn(async move {
            let outcome = match orchestrator::compare(&options, &ctx).await {
                Ok(report) => Outcome::Completed(Arc::new(report)),
                Err(ComparisonError::Cancelled) => Outcome::Cancelled,
                Err(err) => {
                    warn!(job = %id, error = %err, "job failed");
                    Outcome::Failed(err.kind(), err.to_string())
                }
            };
            drop(ctx);
            worker.finish(outcome);
            info!(job = %id, "job finished");
        });

        job.status(id)
    }

    fn evict_finished(&self, jobs: &mut HashMap<Uuid, Arc<Job>>) {
        let mut finished = jobs
            .iter()
            .filter(|(_, job)| job.is_finished())
            .map(|(id, job)| (job.finished_at(), job.started_at, *id))
            .collect::<Vec<_>>();
        if finished.len() <= self.max_retained {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.max_retained;
        for (_, _, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
            debug!(job = %id, "finished job evicted");
        }
    }

    pub fn status(&self, id: Uuid) -> Result<JobStatus, JobError> {
        Ok(self.job(id)?.status(id))
    }

    /// Every known job, newest first.
    pub fn list(&self) -> Vec<JobStatus> {
        let mut all = self
            .lock()
            .iter()
            .map(|(id, job)| job.status(*id))
            .collect::<Vec<_>>();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    pub fn results(&self, id: Uuid, query: &ResultQuery) -> Result<ResultPage, JobError> {
        Ok(self.job(id)?.report(id)?.page(query))
    }

    pub fn report(&self, id: Uuid) -> Result<Arc<DiffReport>, JobError> {
        self.job(id)?.report(id)
    }

    /// Serializes a completed job's results, in the format requested at
    /// submission unless `format` overrides it.
    pub fn export(
        &self,
        id: Uuid,
        format: Option<ExportFormat>,
    ) -> anyhow::Result<(ExportFormat, Vec<u8>)> {
        let job = self.job(id)?;
        let report = job.report(id)?;
        let format = format.unwrap_or(job.export_format);
        Ok((format, report.export(format)?))
    }

    /// Signals the run to stop. Partial results are discarded; a finished
    /// job is left as it is.
    pub fn cancel(&self, id: Uuid) -> Result<JobStatus, JobError> {
        let job = self.job(id)?;
        job.cancel.cancel();
        job.finish(Outcome::Cancelled);
        info!(job = %id, "job cancel requested");
        Ok(job.status(id))
    }

    /// Cancels a running job. A job that has already ended is forgotten along
    /// with its results; its last status is returned.
    pub fn remove(&self, id: Uuid) -> Result<JobStatus, JobError> {
        let job = self.job(id)?;
        if !job.is_finished() {
            return self.cancel(id);
        }
        self.lock().remove(&id);
        info!(job = %id, "job removed");
        Ok(job.status(id))
    }
}
