use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::protocol::WorkerId;
use crate::scheduler::job::Job;

/// A finished job as reported by the worker that ran it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub worker_id: WorkerId,
    pub job: Job,
    pub result: Value,
    pub completed_at: DateTime<Utc>,
}

/// Receives completed jobs, synchronously, as `job_done` messages are handled.
pub trait ResultSink {
    fn accept(&mut self, completion: Completion);
}

/// Logs every completion and keeps a running count.
#[derive(Debug, Default)]
pub struct LoggingSink {
    pub completed: u64,
}

impl ResultSink for LoggingSink {
    fn accept(&mut self, completion: Completion) {
        self.completed += 1;
        let elapsed_ms = (completion.completed_at - completion.job.created_at).num_milliseconds();
        tracing::info!(
            worker_id = %completion.worker_id,
            job_id = %completion.job.id,
            result = %completion.result,
            elapsed_ms,
            "Worker finished job"
        );
    }
}

/// Keeps every completion in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub completions: Vec<Completion>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.completions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completions.is_empty()
    }
}

impl ResultSink for VecSink {
    fn accept(&mut self, completion: Completion) {
        self.completions.push(completion);
    }
}

impl<S: ResultSink + ?Sized> ResultSink for &mut S {
    fn accept(&mut self, completion: Completion) {
        (**self).accept(completion);
    }
}
