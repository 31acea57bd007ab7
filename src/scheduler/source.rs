use serde_json::json;
use uuid::Uuid;

use crate::protocol::Payload;
use crate::scheduler::job::Job;

/// Jobs waiting for (re)delivery.
///
/// Behaves as a stack: the most recently orphaned job is handed out first.
/// Jobs pulled from the source that could not be placed yet are pushed back
/// on top, so they are the next to go out.
#[derive(Debug, Default)]
pub struct RequeueStack {
    jobs: Vec<Job>,
}

impl RequeueStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: Job) {
        self.jobs.push(job);
    }

    /// Push every job in order; the last one ends up on top. Returns how many
    /// were added.
    pub fn extend(&mut self, jobs: impl IntoIterator<Item = Job>) -> usize {
        let before = self.jobs.len();
        self.jobs.extend(jobs);
        self.jobs.len() - before
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop()
    }

    /// The job that will be redelivered next.
    pub fn head(&self) -> Option<&Job> {
        self.jobs.last()
    }

    pub fn contains(&self, job_id: &Uuid) -> bool {
        self.jobs.iter().any(|j| &j.id == job_id)
    }

    /// Jobs from the top of the stack down.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Lazy, finite producer of jobs.
///
/// Each pull drains pending-requeue before minting anything new, which keeps
/// the requeue bounded even under heavy worker churn.
pub struct JobSource {
    payloads: Box<dyn Iterator<Item = Payload> + Send>,
    minted: u64,
    exhausted: bool,
}

impl JobSource {
    pub fn new<I>(payloads: I) -> Self
    where
        I: IntoIterator<Item = Payload>,
        I::IntoIter: Send + 'static,
    {
        Self {
            payloads: Box::new(payloads.into_iter()),
            minted: 0,
            exhausted: false,
        }
    }

    /// Next job to dispatch, or `None` once the payloads are used up and
    /// nothing is waiting for redelivery.
    pub fn next_job(&mut self, requeue: &mut RequeueStack) -> Option<Job> {
        if let Some(job) = requeue.pop() {
            return Some(job);
        }
        if self.exhausted {
            return None;
        }
        match self.payloads.next() {
            Some(payload) => {
                let job = Job::new(self.minted, payload);
                self.minted += 1;
                Some(job)
            }
            None => {
                self.exhausted = true;
                tracing::info!(minted = self.minted, "Job source exhausted");
                None
            }
        }
    }

    /// Number of fresh jobs produced so far.
    pub fn minted(&self) -> u64 {
        self.minted
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl std::fmt::Debug for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSource")
            .field("minted", &self.minted)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// Reference workload: `{"number": n}` for `n` in `0..total`.
pub fn numbers(total: u64) -> impl Iterator<Item = Payload> + Send + 'static {
    (0..total).map(|n| number_payload(n as i64))
}

pub fn number_payload(n: i64) -> Payload {
    let mut payload = Payload::new();
    payload.insert("number".to_string(), json!(n));
    payload
}
